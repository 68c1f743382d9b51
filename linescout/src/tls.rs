//! TLS provisioning: certificate/key/CA loading and the plaintext-vs-TLS
//! stream abstraction consumed by the connection handler.
//!
//! Only TLS 1.2 and 1.3 are offered to peers. When a CA bundle is
//! configured, client certificates are required and verified against it;
//! otherwise anonymous clients are accepted.

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConnection, StreamOwned};
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::sync::Arc;

use crate::errors::{ServeError, ServeResult};

/// Builds the server-side TLS configuration from PEM files.
pub fn build_server_config(
    certfile: &Path,
    keyfile: &Path,
    cafile: Option<&Path>,
) -> ServeResult<Arc<rustls::ServerConfig>> {
    let certs = load_certs(certfile)?;
    let key = load_private_key(keyfile)?;

    let builder = rustls::ServerConfig::builder_with_protocol_versions(&[
        &rustls::version::TLS12,
        &rustls::version::TLS13,
    ]);

    let builder = match cafile {
        Some(ca) => {
            let roots = load_root_store(ca)?;
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                .build()
                .map_err(|e| {
                    ServeError::tls_error(format!("client verifier from {}: {}", ca.display(), e))
                })?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };

    let config = builder
        .with_single_cert(certs, key)
        .map_err(|e| ServeError::tls_error(format!("invalid certificate/key pair: {}", e)))?;
    Ok(Arc::new(config))
}

/// Builds a client-side TLS configuration trusting the given CA bundle.
/// Used by the CLI client to talk to a server running with a self-signed
/// or private-CA certificate.
pub fn build_client_config(cafile: &Path) -> ServeResult<Arc<rustls::ClientConfig>> {
    let roots = load_root_store(cafile)?;
    let config = rustls::ClientConfig::builder_with_protocol_versions(&[
        &rustls::version::TLS12,
        &rustls::version::TLS13,
    ])
    .with_root_certificates(roots)
    .with_no_client_auth();
    Ok(Arc::new(config))
}

fn load_root_store(path: &Path) -> ServeResult<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots.add(cert).map_err(|e| {
            ServeError::tls_error(format!("invalid CA certificate in {}: {}", path.display(), e))
        })?;
    }
    Ok(roots)
}

fn load_certs(path: &Path) -> ServeResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| ServeError::tls_error(format!("cannot open {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServeError::tls_error(format!("cannot parse {}: {}", path.display(), e)))?;
    if certs.is_empty() {
        return Err(ServeError::tls_error(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> ServeResult<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| ServeError::tls_error(format!("cannot open {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ServeError::tls_error(format!("cannot parse {}: {}", path.display(), e)))?
        .ok_or_else(|| {
            ServeError::tls_error(format!("no private key found in {}", path.display()))
        })
}

/// One accepted client connection: plaintext TCP or a TLS session over
/// it. The connection handler only sees a `Read + Write` byte stream.
pub enum ClientStream {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ServerConnection, TcpStream>>),
}

impl ClientStream {
    fn tcp(&self) -> &TcpStream {
        match self {
            ClientStream::Plain(stream) => stream,
            ClientStream::Tls(stream) => stream.get_ref(),
        }
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.tcp().peer_addr()
    }

    /// Best-effort close of the underlying socket.
    pub fn shutdown(&self) {
        let _ = self.tcp().shutdown(std::net::Shutdown::Both);
    }
}

impl Read for ClientStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ClientStream::Plain(stream) => stream.read(buf),
            ClientStream::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for ClientStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ClientStream::Plain(stream) => stream.write(buf),
            ClientStream::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ClientStream::Plain(stream) => stream.flush(),
            ClientStream::Tls(stream) => stream.flush(),
        }
    }
}

/// Upgrades an accepted socket per the server's TLS setting, driving the
/// handshake to completion before any application bytes flow. With no
/// TLS configuration the socket passes through untouched.
pub fn accept(
    tls_config: Option<&Arc<rustls::ServerConfig>>,
    tcp: TcpStream,
) -> ServeResult<ClientStream> {
    match tls_config {
        None => Ok(ClientStream::Plain(tcp)),
        Some(config) => {
            let mut conn = ServerConnection::new(Arc::clone(config))
                .map_err(|e| ServeError::tls_error(e.to_string()))?;
            let mut tcp = tcp;
            // The socket's read timeout bounds a stalled handshake.
            while conn.is_handshaking() {
                conn.complete_io(&mut tcp)?;
            }
            Ok(ClientStream::Tls(Box::new(StreamOwned::new(conn, tcp))))
        }
    }
}
