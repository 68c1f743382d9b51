/// This module defines custom error types for linescout, demonstrating Rust's error handling
/// compared to .NET's exception system.
///
/// # Rust vs .NET Error Handling
///
/// A .NET socket server leans on exceptions for both protocol and transport failures:
/// ```csharp
/// try {
///     var listener = new TcpListener(port);
///     listener.Start();
/// } catch (SocketException ex) {
///     // Handle bind/accept failure
/// } catch (AuthenticationException ex) {
///     // Handle TLS failure
/// }
/// ```
///
/// Rust uses Result types with custom errors, so each failure class is a variant the
/// caller must match on:
/// ```rust,ignore
/// match Server::bind(config) {
///     Ok(server) => server.run()?,
///     Err(ServeError::DatasetUnavailable { path, .. }) => // refuse to start,
///     Err(ServeError::Tls(msg)) => // bad certificate material,
///     Err(e) => // other startup failure
/// }
/// ```
///
/// The split matters operationally: startup variants (`Config`, `Tls`,
/// `DatasetUnavailable`) are fatal, while `MalformedQuery` and `Transport` stay local
/// to one connection and never take the server down.
use std::path::PathBuf;
use thiserror::Error;

/// Result type for server and search operations
pub type ServeResult<T> = Result<T, ServeError>;

/// Errors that can occur while loading the dataset or serving queries
#[derive(Error, Debug)]
pub enum ServeError {
    #[error("Dataset unavailable: {path}: {source}")]
    DatasetUnavailable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed query: {0}")]
    MalformedQuery(String),
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ServeError {
    pub fn dataset_unavailable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DatasetUnavailable {
            path: path.into(),
            source,
        }
    }

    pub fn malformed_query(reason: impl Into<String>) -> Self {
        Self::MalformedQuery(reason.into())
    }

    pub fn tls_error(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for failures that must abort startup rather than be reported
    /// to a single client.
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Tls(_) | Self::DatasetUnavailable { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = ServeError::dataset_unavailable("200k.txt", io);
        assert!(matches!(err, ServeError::DatasetUnavailable { .. }));

        let err = ServeError::malformed_query("empty query");
        assert!(matches!(err, ServeError::MalformedQuery(_)));

        let err = ServeError::tls_error("no certificates found");
        assert!(matches!(err, ServeError::Tls(_)));

        let err = ServeError::config_error("port missing");
        assert!(matches!(err, ServeError::Config(_)));
    }

    #[test]
    fn test_error_messages() {
        let err = ServeError::malformed_query("query exceeds 1024 bytes");
        assert_eq!(err.to_string(), "Malformed query: query exceeds 1024 bytes");

        let err = ServeError::config_error("certfile is required when ssl_enabled");
        assert_eq!(
            err.to_string(),
            "Configuration error: certfile is required when ssl_enabled"
        );

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err = ServeError::dataset_unavailable("200k.txt", io);
        assert_eq!(err.to_string(), "Dataset unavailable: 200k.txt: no such file");
    }

    #[test]
    fn test_startup_fatality() {
        assert!(ServeError::config_error("bad").is_fatal_at_startup());
        assert!(ServeError::tls_error("bad").is_fatal_at_startup());
        assert!(!ServeError::malformed_query("bad").is_fatal_at_startup());

        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "reset");
        assert!(!ServeError::Transport(io).is_fatal_at_startup());
    }

    #[test]
    fn test_io_error_conversion() {
        fn read_all() -> ServeResult<Vec<u8>> {
            Ok(std::fs::read("definitely-not-a-real-file.bin")?)
        }
        assert!(matches!(read_all(), Err(ServeError::Transport(_))));
    }
}
