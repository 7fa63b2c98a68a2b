use serde::{Deserialize, Serialize};

/// Nesting depth past which callback-induced diffs abort a drain.
pub const DEFAULT_RECURSION_LIMIT: usize = 10;

/// Configuration for a [`Listener`](crate::Listener).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// How deep a chain of diffs caused by `on_change` callbacks may nest.
    ///
    /// A diff queued by the dispatcher directly has depth 0; a diff queued
    /// while the callback for a depth-`d` diff runs has depth `d + 1`.
    /// Draining a diff deeper than this limit fails with
    /// `RecursionLimitExceeded`.
    pub recursion_limit: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            recursion_limit: DEFAULT_RECURSION_LIMIT,
        }
    }
}

impl ListenerConfig {
    pub fn with_recursion_limit(recursion_limit: usize) -> Self {
        Self { recursion_limit }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = ListenerConfig::default();
        assert_eq!(c.recursion_limit, 10);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let c: ListenerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(c, ListenerConfig::default());

        let c: ListenerConfig = serde_json::from_str(r#"{"recursion_limit": 3}"#).unwrap();
        assert_eq!(c.recursion_limit, 3);
    }
}
