use crate::types::InstanceId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Which half of the handler bracket a hook failure occurred in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookPhase {
    Before,
    After,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPhase::Before => f.write_str("before"),
            HookPhase::After => f.write_str("after"),
        }
    }
}

/// Invocation-level failures of the dispatch engine.
///
/// Per-instance script failures are not represented here: they are isolated
/// outcomes in the aggregated report and never abort sibling executions.
#[derive(Debug, Error)]
pub enum ActionError {
    /// The requested restriction matched no instances. A restriction that
    /// matches nothing is treated as misconfiguration, not a silent no-op.
    #[error("scope matches no instances")]
    EmptyScope,

    #[error("unknown instance: {0}")]
    UnknownInstance(InstanceId),

    #[error("unknown role: {0}")]
    UnknownRole(String),

    /// A role hook reported failure. Hooks already run are not rolled back;
    /// compensating for partially-applied state is the handler's own
    /// responsibility.
    #[error("handler for role '{role}' failed in {phase} hook: {source}")]
    Handler {
        role: String,
        phase: HookPhase,
        #[source]
        source: anyhow::Error,
    },

    #[error("action cancelled")]
    Cancelled,
}

/// Per-instance script execution error, as reported by the transport.
/// The transport never retries; the retry policy lives in the engine.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// Network/timeout class failure, eligible for retry.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The script ran and returned a non-zero status. Not retried.
    #[error("script exited with status {status}: {message}")]
    Script { status: i32, message: String },
}

impl ScriptError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ScriptError::Transient(_))
    }
}
