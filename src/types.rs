use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ─── Scalar aliases ───────────────────────────────────────────

/// Epoch milliseconds (UTC).
pub type Timestamp = i64;

/// Provider-assigned instance identifier, unique within a cluster.
pub type InstanceId = String;

pub(crate) fn now_ms() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}

// ─── Action identifiers ───────────────────────────────────────

/// A named lifecycle phase. Threaded through the event as plain data;
/// handlers and instance-side scripts select behavior by it, the dispatcher
/// itself is action-agnostic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionId {
    Bootstrap,
    Configure,
    Start,
    Stop,
    Cleanup,
}

impl ActionId {
    pub const ALL: [ActionId; 5] = [
        ActionId::Bootstrap,
        ActionId::Configure,
        ActionId::Start,
        ActionId::Stop,
        ActionId::Cleanup,
    ];

    /// Stable lowercase name, the form scripts are keyed by.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionId::Bootstrap => "bootstrap",
            ActionId::Configure => "configure",
            ActionId::Start => "start",
            ActionId::Stop => "stop",
            ActionId::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Instance ─────────────────────────────────────────────────

/// One cluster member, as materialized from the compute provider.
/// Immutable once constructed; destroyed only by explicit termination
/// outside this engine's scope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Instance {
    pub instance_id: InstanceId,
    /// Roles this instance carries. Never empty in a well-formed cluster.
    pub roles: BTreeSet<String>,
    pub public_address: String,
    pub private_address: Option<String>,
    /// Provider-assigned metadata (zone, image id, ...). Opaque to the engine.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Instance {
    pub fn new(
        instance_id: impl Into<InstanceId>,
        roles: impl IntoIterator<Item = impl Into<String>>,
        public_address: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            roles: roles.into_iter().map(Into::into).collect(),
            public_address: public_address.into(),
            private_address: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn has_any_role(&self, roles: &BTreeSet<String>) -> bool {
        self.roles.iter().any(|r| roles.contains(r))
    }
}

// ─── Cluster ──────────────────────────────────────────────────

/// Declared role → count pair. Declaration order drives hook ordering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSpec {
    pub role: String,
    pub count: u32,
}

impl RoleSpec {
    pub fn new(role: impl Into<String>, count: u32) -> Self {
        Self {
            role: role.into(),
            count,
        }
    }
}

/// The authoritative instance set for one cluster, read-only to the action
/// engine. Instance order reflects provisioning sequence and carries no
/// semantic weight for actions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cluster {
    name: String,
    instances: Vec<Instance>,
    /// Declared topology, in declaration order.
    topology: Vec<RoleSpec>,
}

impl Cluster {
    pub fn new(name: impl Into<String>, instances: Vec<Instance>, topology: Vec<RoleSpec>) -> Self {
        Self {
            name: name.into(),
            instances,
            topology,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn topology(&self) -> &[RoleSpec] {
        &self.topology
    }

    pub fn get(&self, instance_id: &str) -> Option<&Instance> {
        self.instances
            .iter()
            .find(|i| i.instance_id == instance_id)
    }

    pub fn contains(&self, instance_id: &str) -> bool {
        self.get(instance_id).is_some()
    }

    pub fn instances_with_any_role<'a>(&'a self, roles: &'a BTreeSet<String>) -> impl Iterator<Item = &'a Instance> {
        self.instances.iter().filter(|i| i.has_any_role(roles))
    }

    /// Order the given roles by topology declaration order. Roles absent
    /// from the declared topology follow in lexical order.
    pub fn order_roles(&self, roles: &BTreeSet<String>) -> Vec<String> {
        let mut ordered: Vec<String> = self
            .topology
            .iter()
            .filter(|spec| roles.contains(&spec.role))
            .map(|spec| spec.role.clone())
            .collect();
        for role in roles {
            if !ordered.iter().any(|r| r == role) {
                ordered.push(role.clone());
            }
        }
        ordered
    }
}

// ─── Per-instance outcomes ────────────────────────────────────

/// Terminal result of script execution on one instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceOutcome {
    /// Script ran to completion with a zero exit status.
    Succeeded { attempts: u32 },
    /// Script returned a non-zero status. Permanent, never retried.
    ScriptFailed {
        exit_status: i32,
        message: String,
        attempts: u32,
    },
    /// Transient failures exhausted the retry budget.
    TransientExhausted { message: String, attempts: u32 },
    /// Execution was cancelled before reaching a terminal outcome.
    Cancelled,
}

impl InstanceOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, InstanceOutcome::Succeeded { .. })
    }
}
