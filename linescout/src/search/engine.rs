use std::sync::Arc;

use super::SearchStrategy;
use crate::config::ServerConfig;
use crate::dataset::{DatasetSnapshot, DatasetStore};
use crate::errors::{ServeError, ServeResult};

/// Composes the dataset store and one search strategy into a single
/// `answer(query) -> bool` operation, applying the re-read policy on
/// every call.
///
/// The engine itself does not log, cache results, or retry; those belong
/// to the connection handler and the client respectively. In re-read mode
/// every call performs one full file read — fresher data at the price of
/// latency and I/O.
pub struct QueryEngine {
    store: DatasetStore,
    strategy: Box<dyn SearchStrategy>,
    max_query_length: usize,
}

impl QueryEngine {
    pub fn new(
        store: DatasetStore,
        strategy: Box<dyn SearchStrategy>,
        max_query_length: usize,
    ) -> Self {
        Self {
            store,
            strategy,
            max_query_length,
        }
    }

    /// Builds an engine from validated configuration: opens the dataset
    /// (failing fast if it is unreadable) and resolves the strategy name.
    pub fn from_config(config: &ServerConfig) -> ServeResult<Self> {
        let store = DatasetStore::open(&config.dataset_path, config.reread_on_query)?;
        let strategy = crate::search::strategy_by_name(&config.strategy).ok_or_else(|| {
            ServeError::config_error(format!("unknown strategy '{}'", config.strategy))
        })?;
        Ok(Self::new(store, strategy, config.max_query_length))
    }

    /// Answers one query: normalize, snapshot per policy, delegate to the
    /// strategy. "Not found" is a valid `Ok(false)`, never an error.
    pub fn answer(&self, raw: &str) -> ServeResult<bool> {
        let query = normalize_query(raw, self.max_query_length)?;
        let snapshot = self.store.snapshot()?;
        Ok(self.strategy.matches(&snapshot, &query))
    }

    /// The current snapshot under the engine's re-read policy. Exposed
    /// for the benchmark harness, which times strategies directly.
    pub fn snapshot(&self) -> ServeResult<Arc<DatasetSnapshot>> {
        self.store.snapshot()
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn max_query_length(&self) -> usize {
        self.max_query_length
    }
}

/// Strips the trailing line terminator and any control bytes, then
/// enforces the emptiness and length bounds. Runs before any dataset
/// access so an oversized query never triggers a re-read.
pub(crate) fn normalize_query(raw: &str, max_length: usize) -> ServeResult<String> {
    let trimmed = raw.strip_suffix('\n').unwrap_or(raw);
    let trimmed = trimmed.strip_suffix('\r').unwrap_or(trimmed);
    let cleaned: String = trimmed.chars().filter(|c| !c.is_control()).collect();

    if cleaned.is_empty() {
        return Err(ServeError::malformed_query("empty query"));
    }
    if cleaned.len() > max_length {
        return Err(ServeError::malformed_query(format!(
            "query exceeds {} bytes",
            max_length
        )));
    }
    Ok(cleaned)
}
