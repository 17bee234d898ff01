use serde::{Deserialize, Serialize};

/// Execution knobs for the script fan-out and the overall invocation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Upper bound on concurrent script executions, to avoid overwhelming
    /// the controlling process or the provider's API rate limits.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Retry budget for transient failures, per instance. Permanent script
    /// failures are never retried.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between retries, doubled per attempt.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Overall deadline for one action invocation. `None` = no deadline.
    #[serde(default)]
    pub action_timeout_secs: Option<u64>,
}

fn default_max_concurrency() -> usize {
    8
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

impl Default for ExecConfig {
    fn default() -> Self {
        ExecConfig {
            max_concurrency: default_max_concurrency(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            action_timeout_secs: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: ExecConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.retry_backoff_ms, 500);
        assert_eq!(config.action_timeout_secs, None);
    }

    #[test]
    fn explicit_fields_override_defaults() {
        let config: ExecConfig =
            serde_json::from_str(r#"{"max_concurrency": 2, "action_timeout_secs": 30}"#).unwrap();
        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.action_timeout_secs, Some(30));
        assert_eq!(config.max_retries, 2);
    }
}
