use crate::error::HookPhase;
use crate::scope::ActionScope;
use crate::types::{ActionId, Cluster, InstanceId, InstanceOutcome};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Mutable context threaded through a single action invocation.
///
/// Exclusively owned by that invocation and dropped when it completes. The
/// cluster and scope are read-only; the annotations map is the owned mutable
/// surface handlers may write, and the per-instance outcomes become visible
/// once the script phase has completed (i.e. to post-hooks).
pub struct ClusterActionEvent {
    action: ActionId,
    cluster: Arc<Cluster>,
    scope: ActionScope,
    annotations: BTreeMap<String, String>,
    outcomes: BTreeMap<InstanceId, InstanceOutcome>,
}

impl ClusterActionEvent {
    pub(crate) fn new(action: ActionId, cluster: Arc<Cluster>, scope: ActionScope) -> Self {
        Self {
            action,
            cluster,
            scope,
            annotations: BTreeMap::new(),
            outcomes: BTreeMap::new(),
        }
    }

    pub fn action(&self) -> ActionId {
        self.action
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    pub fn scope(&self) -> &ActionScope {
        &self.scope
    }

    /// Free-form handler bookkeeping, visible to later hooks in the same
    /// invocation (e.g. a coordinator pre-hook leaving an address for the
    /// worker post-hook).
    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.annotations.insert(key.into(), value.into());
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// Per-instance script outcomes. Empty until the script phase completes.
    pub fn outcomes(&self) -> &BTreeMap<InstanceId, InstanceOutcome> {
        &self.outcomes
    }

    pub(crate) fn record_outcomes(&mut self, outcomes: BTreeMap<InstanceId, InstanceOutcome>) {
        self.outcomes = outcomes;
    }
}

/// Audit trail of one action invocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionEvent {
    ScopeResolved {
        instances: usize,
        roles: Vec<String>,
    },
    HookStarted {
        role: String,
        phase: HookPhase,
    },
    HookCompleted {
        role: String,
        phase: HookPhase,
    },
    HookFailed {
        role: String,
        phase: HookPhase,
        message: String,
    },
    ScriptsStarted {
        instances: usize,
    },
    /// A transient per-instance failure consumed one retry.
    ScriptRetried {
        instance_id: InstanceId,
        attempt: u32,
        message: String,
    },
    ScriptsCompleted {
        failed: usize,
    },
    ActionCancelled,
    ActionCompleted {
        success: bool,
    },
}
