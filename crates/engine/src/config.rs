//! Engine configuration
//!
//! Defaults can be overridden from the environment; unparsable or zero
//! values fall back to the default.

use std::time::Duration;

const DEFAULT_MAX_VISITED_NODES: usize = 1_000_000;
const DEFAULT_MAX_PATH_VISITS: usize = 100_000;
const DEFAULT_STALENESS_WINDOW_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on nodes visited by a single traversal
    pub max_visited_nodes: usize,
    /// Upper bound on nodes visited while searching for a shortest path
    pub max_path_visits: usize,
    /// How long a node may go unobserved before retraction marks it stale
    pub staleness_window: Duration,
    /// Per-query deadline applied by the query API
    pub query_deadline: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_visited_nodes: DEFAULT_MAX_VISITED_NODES,
            max_path_visits: DEFAULT_MAX_PATH_VISITS,
            staleness_window: Duration::from_secs(DEFAULT_STALENESS_WINDOW_SECS),
            query_deadline: None,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `LINEAGE_*` environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_visited_nodes: positive_env("LINEAGE_MAX_VISITED_NODES")
                .unwrap_or(defaults.max_visited_nodes),
            max_path_visits: positive_env("LINEAGE_MAX_PATH_VISITS")
                .unwrap_or(defaults.max_path_visits),
            staleness_window: positive_env("LINEAGE_STALENESS_WINDOW_SECS")
                .map(|secs| Duration::from_secs(secs as u64))
                .unwrap_or(defaults.staleness_window),
            query_deadline: positive_env("LINEAGE_QUERY_DEADLINE_MS")
                .map(|ms| Duration::from_millis(ms as u64))
                .or(defaults.query_deadline),
        }
    }

    /// Builder: cap traversal visits
    pub fn with_max_visited_nodes(mut self, limit: usize) -> Self {
        self.max_visited_nodes = limit;
        self
    }

    /// Builder: cap shortest-path visits
    pub fn with_max_path_visits(mut self, limit: usize) -> Self {
        self.max_path_visits = limit;
        self
    }

    /// Builder: set staleness window
    pub fn with_staleness_window(mut self, window: Duration) -> Self {
        self.staleness_window = window;
        self
    }

    /// Builder: set per-query deadline
    pub fn with_query_deadline(mut self, deadline: Duration) -> Self {
        self.query_deadline = Some(deadline);
        self
    }

    /// Staleness window as a chrono duration for timestamp arithmetic
    pub fn staleness_window_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.staleness_window).unwrap_or(chrono::Duration::MAX)
    }
}

fn positive_env(key: &str) -> Option<usize> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .filter(|value| *value > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_visited_nodes, 1_000_000);
        assert_eq!(config.staleness_window, Duration::from_secs(604_800));
        assert!(config.query_deadline.is_none());
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::default()
            .with_max_visited_nodes(10)
            .with_max_path_visits(5)
            .with_query_deadline(Duration::from_millis(250));
        assert_eq!(config.max_visited_nodes, 10);
        assert_eq!(config.max_path_visits, 5);
        assert_eq!(config.query_deadline, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_env_override_ignores_zero() {
        std::env::set_var("LINEAGE_MAX_PATH_VISITS", "0");
        std::env::set_var("LINEAGE_STALENESS_WINDOW_SECS", "60");
        let config = EngineConfig::from_env();
        std::env::remove_var("LINEAGE_MAX_PATH_VISITS");
        std::env::remove_var("LINEAGE_STALENESS_WINDOW_SECS");

        assert_eq!(config.max_path_visits, DEFAULT_MAX_PATH_VISITS);
        assert_eq!(config.staleness_window, Duration::from_secs(60));
    }
}
