//! Benchmark harness comparing search strategies over one snapshot,
//! bypassing the network layer entirely.

use serde::Serialize;
use std::hint::black_box;
use std::time::Instant;

use crate::dataset::DatasetSnapshot;
use crate::search::SearchStrategy;

/// Timing summary for one strategy over a query set.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyReport {
    pub strategy: String,
    pub queries: usize,
    pub iterations: usize,
    pub total_micros: u64,
    pub mean_micros: f64,
    pub min_micros: u64,
    pub max_micros: u64,
}

/// Times every strategy against every query, `iterations` passes each.
///
/// Each strategy gets one warmup call first so per-snapshot memoization
/// (the binary strategy's sort) is paid before measurement, matching how
/// a long-running server amortizes it.
pub fn run_benchmark(
    snapshot: &DatasetSnapshot,
    queries: &[String],
    strategies: &[Box<dyn SearchStrategy>],
    iterations: usize,
) -> Vec<StrategyReport> {
    strategies
        .iter()
        .map(|strategy| {
            if let Some(query) = queries.first() {
                black_box(strategy.matches(snapshot, query));
            }

            let mut samples: Vec<u64> = Vec::with_capacity(iterations * queries.len());
            for _ in 0..iterations {
                for query in queries {
                    let started = Instant::now();
                    black_box(strategy.matches(snapshot, black_box(query)));
                    samples.push(started.elapsed().as_micros() as u64);
                }
            }

            let total: u64 = samples.iter().sum();
            StrategyReport {
                strategy: strategy.name().to_string(),
                queries: queries.len(),
                iterations,
                total_micros: total,
                mean_micros: if samples.is_empty() {
                    0.0
                } else {
                    total as f64 / samples.len() as f64
                },
                min_micros: samples.iter().copied().min().unwrap_or(0),
                max_micros: samples.iter().copied().max().unwrap_or(0),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::all_strategies;

    fn sample_queries() -> Vec<String> {
        vec![
            "7;0;6;28;0;23;5;0;".to_string(),
            "nonexistent_string".to_string(),
            "1;2;3".to_string(),
        ]
    }

    #[test]
    fn test_report_per_strategy() {
        let snapshot = DatasetSnapshot::from_text("1;2;3\n7;0;6;28;0;23;5;0;\n");
        let strategies = all_strategies();
        let reports = run_benchmark(&snapshot, &sample_queries(), &strategies, 3);

        assert_eq!(reports.len(), strategies.len());
        for report in &reports {
            assert_eq!(report.queries, 3);
            assert_eq!(report.iterations, 3);
            assert!(report.min_micros <= report.max_micros);
            assert!(report.total_micros >= report.max_micros);
        }
    }

    #[test]
    fn test_empty_query_set() {
        let snapshot = DatasetSnapshot::from_text("a\n");
        let strategies = all_strategies();
        let reports = run_benchmark(&snapshot, &[], &strategies, 5);

        for report in reports {
            assert_eq!(report.total_micros, 0);
            assert_eq!(report.mean_micros, 0.0);
        }
    }

    #[test]
    fn test_report_serializes() {
        let snapshot = DatasetSnapshot::from_text("a\n");
        let strategies = all_strategies();
        let reports = run_benchmark(&snapshot, &sample_queries(), &strategies, 1);

        let json = serde_json::to_string(&reports).unwrap();
        assert!(json.contains("\"strategy\":\"set\""));
    }
}
