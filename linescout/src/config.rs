use config::{Config as ConfigBuilder, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for the search server.
///
/// # Configuration Locations
///
/// The configuration can be loaded from multiple locations in order of precedence:
/// 1. Custom config file specified via `--config` flag
/// 2. Local `.linescout.yaml` or `config.ini` in the current directory
/// 3. Global `$HOME/.config/linescout/config.yaml`
///
/// # Configuration Format
///
/// YAML is the native format; a flat INI file is accepted as well. Example:
/// ```yaml
/// # Line-oriented dataset file served by the engine
/// dataset_path: "200k.txt"
///
/// # TCP port to listen on
/// port: 5555
///
/// # Reload the dataset from disk on every query
/// reread_on_query: false
///
/// # Search strategy: set | linear | binary | parallel
/// strategy: "set"
///
/// # TLS material (required when ssl_enabled is true)
/// ssl_enabled: true
/// certfile: "server.crt"
/// keyfile: "server.key"
/// # When set, clients must present a certificate signed by this CA
/// cafile: "ca.crt"
///
/// # Protocol limits
/// max_query_length: 1024
/// max_connections: 10
/// persistent_connections: false
/// read_timeout_ms: 5000
/// slow_query_ms: 1000
///
/// # Log level (trace, debug, info, warn, error)
/// log_level: "info"
/// ```
///
/// # Error Handling
///
/// File loading reports `ConfigError`; semantic problems (missing TLS material,
/// unknown strategy, zero limits) are caught by [`ServerConfig::validate`] before
/// the server binds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the line-oriented dataset file
    pub dataset_path: PathBuf,

    /// TCP port to listen on (0 binds an ephemeral port)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Whether every query re-reads the dataset from disk.
    /// When false, one snapshot is built at startup and reused for the
    /// server's lifetime.
    #[serde(default)]
    pub reread_on_query: bool,

    /// Search strategy name (set | linear | binary | parallel)
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// Whether accepted connections are upgraded to TLS
    #[serde(default)]
    pub ssl_enabled: bool,

    /// PEM certificate chain presented to clients
    #[serde(default)]
    pub certfile: Option<PathBuf>,

    /// PEM private key matching the certificate
    #[serde(default)]
    pub keyfile: Option<PathBuf>,

    /// Optional CA bundle; when present, client certificates are required
    /// and verified against it
    #[serde(default)]
    pub cafile: Option<PathBuf>,

    /// Maximum accepted query length in bytes
    #[serde(default = "default_max_query_length")]
    pub max_query_length: usize,

    /// Upper bound on concurrently served connections (worker threads)
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Whether a connection may issue multiple queries before closing.
    /// When false the server replies once and closes.
    #[serde(default)]
    pub persistent_connections: bool,

    /// How long a handler waits for a query line before closing the
    /// connection, in milliseconds
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Queries slower than this are logged as warnings, in milliseconds
    #[serde(default = "default_slow_query_ms")]
    pub slow_query_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_port() -> u16 {
    5555
}

fn default_strategy() -> String {
    "set".to_string()
}

fn default_max_query_length() -> usize {
    1024
}

fn default_max_connections() -> usize {
    num_cpus::get().max(4)
}

fn default_read_timeout_ms() -> u64 {
    5000
}

fn default_slow_query_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ServerConfig {
    /// Creates a configuration with defaults for everything except the
    /// dataset path.
    pub fn new(dataset_path: impl Into<PathBuf>) -> Self {
        Self {
            dataset_path: dataset_path.into(),
            port: default_port(),
            reread_on_query: false,
            strategy: default_strategy(),
            ssl_enabled: false,
            certfile: None,
            keyfile: None,
            cafile: None,
            max_query_length: default_max_query_length(),
            max_connections: default_max_connections(),
            persistent_connections: false,
            read_timeout_ms: default_read_timeout_ms(),
            slow_query_ms: default_slow_query_ms(),
            log_level: default_log_level(),
        }
    }

    /// Loads configuration from the default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Loads configuration from a specific file
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        // Default config locations
        let config_files = [
            // Global config
            dirs::config_dir().map(|p| p.join("linescout/config.yaml")),
            // Local configs
            Some(PathBuf::from(".linescout.yaml")),
            Some(PathBuf::from("config.ini")),
            // Custom config
            config_path.map(PathBuf::from),
        ];

        // Add existing config files
        for path in config_files.iter().flatten() {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_path()));
            }
        }

        // Build and deserialize
        builder.build()?.try_deserialize()
    }

    /// Checks semantic constraints that serde cannot express.
    /// Called once before the server binds; every failure here is fatal.
    pub fn validate(&self) -> crate::ServeResult<()> {
        use crate::errors::ServeError;

        if !self.dataset_path.exists() {
            return Err(ServeError::config_error(format!(
                "dataset file not found: {}",
                self.dataset_path.display()
            )));
        }
        if self.max_query_length == 0 {
            return Err(ServeError::config_error("max_query_length must be positive"));
        }
        if self.max_connections == 0 {
            return Err(ServeError::config_error("max_connections must be positive"));
        }
        if crate::search::strategy_by_name(&self.strategy).is_none() {
            return Err(ServeError::config_error(format!(
                "unknown strategy '{}' (expected one of: {})",
                self.strategy,
                crate::search::strategy_names().join(", ")
            )));
        }
        if self.ssl_enabled {
            let certfile = self
                .certfile
                .as_ref()
                .ok_or_else(|| ServeError::config_error("certfile is required when ssl_enabled"))?;
            let keyfile = self
                .keyfile
                .as_ref()
                .ok_or_else(|| ServeError::config_error("keyfile is required when ssl_enabled"))?;
            for path in [Some(certfile), Some(keyfile), self.cafile.as_ref()]
                .into_iter()
                .flatten()
            {
                if !path.exists() {
                    return Err(ServeError::config_error(format!(
                        "TLS file not found: {}",
                        path.display()
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_load_config_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        let config_content = r#"
            dataset_path: "200k.txt"
            port: 6000
            reread_on_query: true
            strategy: "linear"
            max_query_length: 512
            max_connections: 4
            persistent_connections: true
            log_level: "debug"
        "#;

        let mut file = File::create(&config_path).unwrap();
        file.write_all(config_content.as_bytes()).unwrap();

        let config = ServerConfig::load_from(Some(&config_path)).unwrap();
        assert_eq!(config.dataset_path, PathBuf::from("200k.txt"));
        assert_eq!(config.port, 6000);
        assert!(config.reread_on_query);
        assert_eq!(config.strategy, "linear");
        assert_eq!(config.max_query_length, 512);
        assert_eq!(config.max_connections, 4);
        assert!(config.persistent_connections);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_load_ini_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("server.ini");
        let config_content = "dataset_path=200k.txt\nport=5999\nreread_on_query=true\n";

        let mut file = File::create(&config_path).unwrap();
        file.write_all(config_content.as_bytes()).unwrap();

        let config = ServerConfig::load_from(Some(&config_path)).unwrap();
        assert_eq!(config.dataset_path, PathBuf::from("200k.txt"));
        assert_eq!(config.port, 5999);
        assert!(config.reread_on_query);
    }

    #[test]
    fn test_default_values() {
        let config_content = r#"
            dataset_path: "200k.txt"
        "#;

        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        let mut file = File::create(&config_path).unwrap();
        file.write_all(config_content.as_bytes()).unwrap();

        let config = ServerConfig::load_from(Some(&config_path)).unwrap();
        assert_eq!(config.port, 5555);
        assert!(!config.reread_on_query);
        assert_eq!(config.strategy, "set");
        assert!(!config.ssl_enabled);
        assert_eq!(config.max_query_length, 1024);
        assert!(!config.persistent_connections);
        assert_eq!(config.read_timeout_ms, 5000);
        assert_eq!(config.slow_query_ms, 1000);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_invalid_config() {
        let config_content = r#"
            dataset_path: []  # Should be string
            port: "not a port"
        "#;

        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        let mut file = File::create(&config_path).unwrap();
        file.write_all(config_content.as_bytes()).unwrap();

        let result = ServerConfig::load_from(Some(&config_path));
        assert!(result.is_err(), "Expected error loading invalid config");
    }

    #[test]
    fn test_validate_missing_dataset() {
        let config = ServerConfig::new("no-such-dataset.txt");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("dataset file not found"));
    }

    #[test]
    fn test_validate_unknown_strategy() {
        let dir = tempdir().unwrap();
        let dataset = dir.path().join("data.txt");
        std::fs::write(&dataset, "a\nb\n").unwrap();

        let mut config = ServerConfig::new(&dataset);
        config.strategy = "quantum".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unknown strategy"));
    }

    #[test]
    fn test_validate_ssl_requires_material() {
        let dir = tempdir().unwrap();
        let dataset = dir.path().join("data.txt");
        std::fs::write(&dataset, "a\nb\n").unwrap();

        let mut config = ServerConfig::new(&dataset);
        config.ssl_enabled = true;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("certfile is required"));

        config.certfile = Some(dir.path().join("missing.crt"));
        config.keyfile = Some(dir.path().join("missing.key"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("TLS file not found"));
    }

    #[test]
    fn test_validate_accepts_plaintext_defaults() {
        let dir = tempdir().unwrap();
        let dataset = dir.path().join("data.txt");
        std::fs::write(&dataset, "a\nb\n").unwrap();

        let config = ServerConfig::new(&dataset);
        assert!(config.validate().is_ok());
    }
}
