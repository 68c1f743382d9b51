/// This module implements the family of interchangeable search strategies,
/// demonstrating Rust's trait-object polymorphism compared to .NET's
/// interface-based dependency injection.
///
/// # .NET vs Rust Strategy Selection
///
/// In .NET you would register implementations of an interface and resolve
/// one at runtime:
/// ```csharp
/// public interface ISearchStrategy {
///     bool Matches(DatasetSnapshot snapshot, string query);
/// }
/// services.AddSingleton<ISearchStrategy, SetLookup>();
/// ```
///
/// In Rust the same shape is a trait with boxed trait objects, resolved by
/// name with no container:
/// ```rust,ignore
/// let strategy: Box<dyn SearchStrategy> = strategy_by_name("set").unwrap();
/// let found = strategy.matches(&snapshot, "192.168.1.1");
/// ```
///
/// Every strategy is stateless and answers exactly the same question —
/// "does this query equal some full line of the snapshot" — so they are
/// freely interchangeable and differ only in cost. That equivalence is a
/// tested invariant, which is what makes the benchmark comparisons
/// meaningful.
pub mod engine;
pub mod strategies;

pub use engine::QueryEngine;
pub use strategies::{BinarySearch, LinearScan, ParallelScan, SetLookup};

use crate::dataset::DatasetSnapshot;

/// A single search algorithm deciding whether a query line exists in a
/// snapshot.
///
/// Implementations must be stateless across calls and must not mutate the
/// snapshot; this is what allows one cached snapshot to be shared by many
/// concurrent queries without locking.
pub trait SearchStrategy: Send + Sync {
    /// The registry name this strategy is selected by.
    fn name(&self) -> &'static str;

    /// True when `query` equals some full line of `snapshot`.
    fn matches(&self, snapshot: &DatasetSnapshot, query: &str) -> bool;
}

/// Resolves a strategy by its registry name.
pub fn strategy_by_name(name: &str) -> Option<Box<dyn SearchStrategy>> {
    match name {
        "set" => Some(Box::new(SetLookup)),
        "linear" => Some(Box::new(LinearScan)),
        "binary" => Some(Box::new(BinarySearch)),
        "parallel" => Some(Box::new(ParallelScan)),
        _ => None,
    }
}

/// Names of every registered strategy, in registry order.
pub fn strategy_names() -> Vec<&'static str> {
    vec!["set", "linear", "binary", "parallel"]
}

/// One instance of every registered strategy, for benchmarking and
/// equivalence testing.
pub fn all_strategies() -> Vec<Box<dyn SearchStrategy>> {
    strategy_names()
        .into_iter()
        .filter_map(strategy_by_name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_resolves_all_names() {
        for name in strategy_names() {
            let strategy = strategy_by_name(name).unwrap();
            assert_eq!(strategy.name(), name);
        }
    }

    #[test]
    fn test_registry_rejects_unknown_name() {
        assert!(strategy_by_name("quantum").is_none());
        assert!(strategy_by_name("").is_none());
    }

    #[test]
    fn test_all_strategies_matches_registry() {
        assert_eq!(all_strategies().len(), strategy_names().len());
    }
}
