use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::errors::ServeError;
use crate::metrics::{ConnectionTracker, QueryMetrics};
use crate::search::QueryEngine;
use crate::tls::ClientStream;

const READ_CHUNK: usize = 1024;
// Query prefix length used in log lines.
const LOG_PREFIX_CHARS: usize = 20;

/// The fixed protocol replies.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Reply {
    Exists,
    NotFound,
    Error(String),
}

impl Reply {
    fn into_bytes(self) -> Vec<u8> {
        match self {
            Reply::Exists => b"STRING EXISTS\n".to_vec(),
            Reply::NotFound => b"STRING NOT FOUND\n".to_vec(),
            Reply::Error(reason) => format!("ERROR: {}\n", reason).into_bytes(),
        }
    }
}

/// Protocol states for one connection. The TLS handshake has already
/// completed by the time the handler sees the stream.
enum State {
    AwaitingQuery,
    Processing(Vec<u8>),
    Responding { reply: Reply, close: bool },
    Closed,
}

/// Outcome of waiting for one terminated query line.
enum ReadOutcome {
    /// A complete line, terminator removed.
    Line(Vec<u8>),
    /// The length threshold was hit before any terminator arrived.
    Oversized,
    /// EOF, idle timeout, or an I/O error: nothing more to read.
    Disconnected,
}

/// Serves the query/response protocol on one accepted connection.
///
/// Each worker thread owns a clone; the clones share the engine, the
/// query counters, and the per-peer tracker.
#[derive(Clone)]
pub(crate) struct ConnectionHandler {
    engine: Arc<QueryEngine>,
    metrics: QueryMetrics,
    tracker: Arc<ConnectionTracker>,
    persistent: bool,
    slow_query_ms: u64,
    max_query_length: usize,
}

impl ConnectionHandler {
    pub fn new(
        engine: Arc<QueryEngine>,
        metrics: QueryMetrics,
        tracker: Arc<ConnectionTracker>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            engine,
            metrics,
            tracker,
            persistent: config.persistent_connections,
            slow_query_ms: config.slow_query_ms,
            max_query_length: config.max_query_length,
        }
    }

    /// Drives the connection state machine until the connection closes.
    /// Never returns an error: every failure path ends in `Closed`.
    pub fn handle(&self, mut stream: ClientStream) {
        let peer = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(_) => return,
        };
        self.tracker.record_connection(peer.ip());
        debug!("Handling connection from {}", peer);

        // Bytes received past the last terminator; a pipelining client
        // may deliver several queries in one segment.
        let mut buffer: Vec<u8> = Vec::new();
        let mut queries_served = 0u64;
        let mut state = State::AwaitingQuery;

        loop {
            state = match state {
                State::AwaitingQuery => match self.read_line(&mut stream, &mut buffer) {
                    ReadOutcome::Line(line) => State::Processing(line),
                    ReadOutcome::Oversized => {
                        self.metrics.record_malformed();
                        State::Responding {
                            reply: Reply::Error(format!(
                                "query exceeds {} bytes",
                                self.max_query_length
                            )),
                            close: true,
                        }
                    }
                    ReadOutcome::Disconnected => State::Closed,
                },
                State::Processing(line) => {
                    queries_served += 1;
                    self.process(line, peer)
                }
                State::Responding { reply, close } => {
                    match stream.write_all(&reply.into_bytes()).and_then(|_| stream.flush()) {
                        Ok(()) if !close => State::AwaitingQuery,
                        Ok(()) => State::Closed,
                        Err(e) => {
                            // No response retry after a failed write.
                            debug!("Write to {} failed: {}", peer, e);
                            State::Closed
                        }
                    }
                }
                State::Closed => break,
            };
        }

        stream.shutdown();
        debug!(
            "Closed connection from {} (processed {} queries)",
            peer, queries_served
        );
    }

    /// Reads until a `\n` or NUL terminator or until the length threshold
    /// is exceeded. The socket's read timeout bounds idle waits.
    fn read_line(&self, stream: &mut ClientStream, buffer: &mut Vec<u8>) -> ReadOutcome {
        loop {
            if let Some(pos) = buffer.iter().position(|&b| b == b'\n' || b == b'\0') {
                let mut line: Vec<u8> = buffer.drain(..=pos).collect();
                line.pop(); // the terminator
                return ReadOutcome::Line(line);
            }
            if buffer.len() > self.max_query_length {
                buffer.clear();
                return ReadOutcome::Oversized;
            }

            let mut chunk = [0u8; READ_CHUNK];
            match stream.read(&mut chunk) {
                Ok(0) => return ReadOutcome::Disconnected,
                Ok(n) => buffer.extend_from_slice(&chunk[..n]),
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    debug!("Idle timeout waiting for query");
                    return ReadOutcome::Disconnected;
                }
                Err(e) => {
                    debug!("Read error: {}", e);
                    return ReadOutcome::Disconnected;
                }
            }
        }
    }

    /// Answers one query line and picks the reply plus the close policy.
    fn process(&self, line: Vec<u8>, peer: SocketAddr) -> State {
        let raw = match String::from_utf8(line) {
            Ok(raw) => raw,
            Err(_) => {
                warn!("Invalid UTF-8 from {}", peer);
                self.metrics.record_malformed();
                return State::Responding {
                    reply: Reply::Error("invalid utf-8".to_string()),
                    close: true,
                };
            }
        };

        let started = Instant::now();
        match self.engine.answer(&raw) {
            Ok(found) => {
                let elapsed = started.elapsed();
                let slow = elapsed.as_millis() as u64 > self.slow_query_ms;
                if slow {
                    warn!(
                        "Slow query from {}: '{}' took {:.2}ms (limit {}ms)",
                        peer,
                        log_prefix(&raw),
                        elapsed.as_secs_f64() * 1000.0,
                        self.slow_query_ms
                    );
                }
                self.metrics.record_query(found, elapsed, slow);
                self.tracker.record_query(peer.ip(), elapsed);
                info!(
                    "Query='{}' from {} result={} ({:.2}ms)",
                    log_prefix(&raw),
                    peer.ip(),
                    if found { "FOUND" } else { "NOT FOUND" },
                    elapsed.as_secs_f64() * 1000.0
                );
                State::Responding {
                    reply: if found { Reply::Exists } else { Reply::NotFound },
                    close: !self.persistent,
                }
            }
            Err(ServeError::MalformedQuery(reason)) => {
                self.metrics.record_malformed();
                State::Responding {
                    reply: Reply::Error(reason),
                    close: true,
                }
            }
            Err(ServeError::DatasetUnavailable { path, source }) => {
                // Re-read mode: this query loses, the server keeps serving.
                warn!("Dataset re-read failed ({}): {}", path.display(), source);
                State::Responding {
                    reply: Reply::Error("dataset unavailable".to_string()),
                    close: true,
                }
            }
            Err(e) => {
                warn!("Internal error answering query from {}: {}", peer, e);
                State::Responding {
                    reply: Reply::Error("internal error".to_string()),
                    close: true,
                }
            }
        }
    }
}

fn log_prefix(query: &str) -> String {
    if query.chars().count() <= LOG_PREFIX_CHARS {
        query.to_string()
    } else {
        let prefix: String = query.chars().take(LOG_PREFIX_CHARS).collect();
        format!("{}...", prefix)
    }
}
