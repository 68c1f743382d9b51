use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Tracks query counts and search latency across all connections
#[derive(Debug, Clone, Default)]
pub struct QueryMetrics {
    queries_total: Arc<AtomicU64>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
    malformed: Arc<AtomicU64>,
    slow_queries: Arc<AtomicU64>,
    search_micros_total: Arc<AtomicU64>,
    search_micros_peak: Arc<AtomicU64>,
}

impl QueryMetrics {
    /// Creates a new QueryMetrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one answered query and its search latency
    pub fn record_query(&self, found: bool, elapsed: Duration, slow: bool) {
        self.queries_total.fetch_add(1, Ordering::Relaxed);
        if found {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        if slow {
            self.slow_queries.fetch_add(1, Ordering::Relaxed);
        }

        let micros = elapsed.as_micros() as u64;
        self.search_micros_total.fetch_add(micros, Ordering::Relaxed);
        let mut peak = self.search_micros_peak.load(Ordering::Relaxed);
        while micros > peak {
            match self.search_micros_peak.compare_exchange_weak(
                peak,
                micros,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => peak = current,
            }
        }
    }

    /// Records a query rejected before it reached the dataset
    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Gets current counter values
    pub fn snapshot(&self) -> QueryStats {
        let total = self.queries_total.load(Ordering::Relaxed);
        let micros_total = self.search_micros_total.load(Ordering::Relaxed);
        QueryStats {
            queries_total: total,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            slow_queries: self.slow_queries.load(Ordering::Relaxed),
            search_micros_total: micros_total,
            search_micros_peak: self.search_micros_peak.load(Ordering::Relaxed),
            avg_micros: if total > 0 {
                micros_total as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    /// Logs current counter values
    pub fn log_stats(&self) {
        let stats = self.snapshot();
        info!(
            "Query stats:\n\
             Total queries: {}\n\
             Hits/misses: {}/{}\n\
             Malformed: {}\n\
             Slow queries: {}\n\
             Search time (avg/peak): {:.1}us/{}us",
            stats.queries_total,
            stats.hits,
            stats.misses,
            stats.malformed,
            stats.slow_queries,
            stats.avg_micros,
            stats.search_micros_peak
        );
    }
}

/// Point-in-time counter values
#[derive(Debug, Clone, Copy)]
pub struct QueryStats {
    pub queries_total: u64,
    pub hits: u64,
    pub misses: u64,
    pub malformed: u64,
    pub slow_queries: u64,
    pub search_micros_total: u64,
    pub search_micros_peak: u64,
    pub avg_micros: f64,
}

/// Per-peer connection statistics, summarized at shutdown
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    peers: DashMap<IpAddr, PeerStats>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PeerStats {
    pub connections: u64,
    pub queries: u64,
    pub elapsed_micros: u64,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one accepted connection from a peer
    pub fn record_connection(&self, peer: IpAddr) {
        self.peers.entry(peer).or_default().connections += 1;
    }

    /// Records one answered query and its latency for a peer
    pub fn record_query(&self, peer: IpAddr, elapsed: Duration) {
        let mut entry = self.peers.entry(peer).or_default();
        entry.queries += 1;
        entry.elapsed_micros += elapsed.as_micros() as u64;
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn stats_for(&self, peer: IpAddr) -> Option<PeerStats> {
        self.peers.get(&peer).map(|entry| *entry)
    }

    /// Logs a per-peer summary, one line per address
    pub fn log_summary(&self) {
        info!("Connection statistics ({} peers):", self.peers.len());
        for entry in self.peers.iter() {
            let stats = entry.value();
            let avg_micros = if stats.queries > 0 {
                stats.elapsed_micros / stats.queries
            } else {
                0
            };
            info!(
                "  {} - connections: {}, queries: {}, avg time: {}",
                entry.key(),
                stats.connections,
                stats.queries,
                humantime::format_duration(Duration::from_micros(avg_micros))
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_counters() {
        let metrics = QueryMetrics::new();

        metrics.record_query(true, Duration::from_micros(100), false);
        metrics.record_query(false, Duration::from_micros(300), false);
        metrics.record_query(true, Duration::from_micros(200), true);

        let stats = metrics.snapshot();
        assert_eq!(stats.queries_total, 3);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.slow_queries, 1);
        assert_eq!(stats.search_micros_total, 600);
        assert_eq!(stats.search_micros_peak, 300);
        assert!((stats.avg_micros - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_peak_is_monotonic() {
        let metrics = QueryMetrics::new();

        metrics.record_query(true, Duration::from_micros(500), false);
        metrics.record_query(true, Duration::from_micros(50), false);

        let stats = metrics.snapshot();
        assert_eq!(stats.search_micros_peak, 500); // Unchanged by the faster query
    }

    #[test]
    fn test_malformed_counter() {
        let metrics = QueryMetrics::new();
        metrics.record_malformed();
        metrics.record_malformed();

        let stats = metrics.snapshot();
        assert_eq!(stats.malformed, 2);
        assert_eq!(stats.queries_total, 0);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = QueryMetrics::new();
        let clone = metrics.clone();

        clone.record_query(true, Duration::from_micros(10), false);
        assert_eq!(metrics.snapshot().queries_total, 1);
    }

    #[test]
    fn test_connection_tracker() {
        let tracker = ConnectionTracker::new();
        let peer: IpAddr = "127.0.0.1".parse().unwrap();

        tracker.record_connection(peer);
        tracker.record_connection(peer);
        tracker.record_query(peer, Duration::from_micros(250));

        let stats = tracker.stats_for(peer).unwrap();
        assert_eq!(stats.connections, 2);
        assert_eq!(stats.queries, 1);
        assert_eq!(stats.elapsed_micros, 250);
        assert_eq!(tracker.peer_count(), 1);
        assert!(tracker.stats_for("10.0.0.9".parse().unwrap()).is_none());
    }
}
