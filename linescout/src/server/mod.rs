/// This module implements the TCP server loop, demonstrating Rust's thread-based
/// concurrency compared to .NET's Task Parallel Library.
///
/// # .NET vs Rust Connection Handling
///
/// A .NET TCP server typically dispatches accepted sockets onto the thread pool:
/// ```csharp
/// while (!cancellation.IsCancellationRequested) {
///     var client = await listener.AcceptTcpClientAsync();
///     _ = Task.Run(() => HandleClient(client));
/// }
/// ```
///
/// Here the same shape is a fixed pool of worker threads consuming accepted
/// sockets from a bounded channel:
/// ```rust,ignore
/// let (tx, rx) = crossbeam_channel::bounded(DISPATCH_QUEUE_DEPTH);
/// for _ in 0..config.max_connections {
///     let rx = rx.clone();
///     thread::spawn(move || worker_loop(rx, ...));
/// }
/// ```
///
/// The bounded channel is the backpressure mechanism: when every worker is
/// busy and the queue is full, the accept loop blocks and the OS listen
/// backlog absorbs the overflow, so connection growth is capped instead of
/// unbounded. Connections execute independently; a failure in one handler
/// never reaches the accept loop or any other connection.
pub mod handler;

use crossbeam_channel::{bounded, Receiver};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::errors::{ServeError, ServeResult};
use crate::metrics::{ConnectionTracker, QueryMetrics};
use crate::search::QueryEngine;
use crate::tls;
use handler::ConnectionHandler;

// How often the accept loop re-checks the shutdown flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);
// Accepted sockets waiting for a free worker.
const DISPATCH_QUEUE_DEPTH: usize = 100;

/// Requests shutdown of a running [`Server`] from another thread.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    shutdown: Arc<AtomicBool>,
}

impl ServerHandle {
    /// Asks the accept loop to stop; in-flight connections drain first.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// The TCP/TLS server: accepts connections and dispatches each to a
/// connection handler running on the worker pool.
pub struct Server {
    config: ServerConfig,
    engine: Arc<QueryEngine>,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    listener: TcpListener,
    shutdown: Arc<AtomicBool>,
    metrics: QueryMetrics,
    tracker: Arc<ConnectionTracker>,
    started: Instant,
}

impl Server {
    /// Validates the configuration, loads the dataset, provisions TLS, and
    /// binds the listening socket. Every failure here is fatal; the server
    /// never starts half-configured.
    pub fn bind(config: ServerConfig) -> ServeResult<Self> {
        config.validate()?;

        let engine = Arc::new(QueryEngine::from_config(&config)?);

        let tls_config = if config.ssl_enabled {
            let certfile = config
                .certfile
                .as_ref()
                .ok_or_else(|| ServeError::config_error("certfile is required when ssl_enabled"))?;
            let keyfile = config
                .keyfile
                .as_ref()
                .ok_or_else(|| ServeError::config_error("keyfile is required when ssl_enabled"))?;
            Some(tls::build_server_config(
                certfile,
                keyfile,
                config.cafile.as_deref(),
            )?)
        } else {
            None
        };

        let listener = TcpListener::bind(("0.0.0.0", config.port)).map_err(|e| {
            ServeError::config_error(format!("cannot bind port {}: {}", config.port, e))
        })?;

        Ok(Self {
            config,
            engine,
            tls_config,
            listener,
            shutdown: Arc::new(AtomicBool::new(false)),
            metrics: QueryMetrics::new(),
            tracker: Arc::new(ConnectionTracker::new()),
            started: Instant::now(),
        })
    }

    /// The bound address. With `port: 0` this reveals the ephemeral port.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// A handle that can stop the server from another thread.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// The server's query counters; the returned clone shares state with
    /// the running server.
    pub fn metrics(&self) -> QueryMetrics {
        self.metrics.clone()
    }

    /// Runs the accept loop until shutdown is requested, then drains the
    /// worker pool and logs final statistics.
    pub fn run(self) -> ServeResult<()> {
        self.listener.set_nonblocking(true)?;

        let (tx, rx) = bounded::<TcpStream>(DISPATCH_QUEUE_DEPTH);
        let read_timeout = Duration::from_millis(self.config.read_timeout_ms);

        let mut workers = Vec::with_capacity(self.config.max_connections);
        for i in 0..self.config.max_connections {
            let rx = rx.clone();
            let worker_handler = ConnectionHandler::new(
                Arc::clone(&self.engine),
                self.metrics.clone(),
                Arc::clone(&self.tracker),
                &self.config,
            );
            let worker_tls = self.tls_config.clone();
            let worker = thread::Builder::new()
                .name(format!("linescout-worker-{}", i))
                .spawn(move || worker_loop(rx, worker_handler, worker_tls, read_timeout))
                .map_err(ServeError::Transport)?;
            workers.push(worker);
        }
        drop(rx);

        info!(
            "Server listening on {} with {} workers (strategy={}, reread_on_query={}, tls={})",
            self.local_addr()?,
            self.config.max_connections,
            self.config.strategy,
            self.config.reread_on_query,
            self.config.ssl_enabled
        );

        while !self.shutdown.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    debug!("Accepted connection from {}", peer);
                    if tx.send(stream).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => warn!("Accept error: {}", e),
            }
        }

        // Closing the channel lets idle workers exit; busy ones finish
        // their current connection first.
        drop(tx);
        for worker in workers {
            let _ = worker.join();
        }

        info!(
            "Server shutdown complete after {}",
            humantime::format_duration(round_to_secs(self.started.elapsed()))
        );
        self.metrics.log_stats();
        self.tracker.log_summary();
        Ok(())
    }
}

fn round_to_secs(d: Duration) -> Duration {
    Duration::from_secs(d.as_secs())
}

fn worker_loop(
    rx: Receiver<TcpStream>,
    handler: ConnectionHandler,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    read_timeout: Duration,
) {
    while let Ok(tcp) = rx.recv() {
        if let Err(e) = serve_connection(&handler, tls_config.as_ref(), tcp, read_timeout) {
            // Handshake and setup failures are transport-level: no
            // response is owed, and other connections are unaffected.
            debug!("Connection ended before protocol start: {}", e);
        }
    }
}

fn serve_connection(
    handler: &ConnectionHandler,
    tls_config: Option<&Arc<rustls::ServerConfig>>,
    tcp: TcpStream,
    read_timeout: Duration,
) -> ServeResult<()> {
    // The listener is non-blocking; the accepted socket must not be.
    tcp.set_nonblocking(false)?;
    tcp.set_read_timeout(Some(read_timeout))?;
    let stream = tls::accept(tls_config, tcp)?;
    handler.handle(stream);
    Ok(())
}
