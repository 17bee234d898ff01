use crate::error::ScriptError;
use crate::types::{ActionId, Cluster, Instance, RoleSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Payload delivered to an instance's script runner.
///
/// Carries the action plus the in-scope roles present on that instance, so
/// the runner can select the matching per-role script fragments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptPayload {
    pub action: ActionId,
    pub roles: BTreeSet<String>,
}

impl ScriptPayload {
    /// Build the payload for one instance: the action, restricted to the
    /// scoped roles that instance actually carries.
    pub fn for_instance(action: ActionId, scoped_roles: &BTreeSet<String>, instance: &Instance) -> Self {
        Self {
            action,
            roles: instance
                .roles
                .intersection(scoped_roles)
                .cloned()
                .collect(),
        }
    }
}

/// What the transport reports back for a script that ran to completion.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScriptOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Opaque compute capability consumed by the engine.
///
/// The transport must not retry on its own; the retry/backoff policy for
/// transient failures lives in the engine's script phase.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Current instance set for the named cluster.
    async fn list_instances(&self, cluster_name: &str) -> anyhow::Result<Vec<Instance>>;

    /// Run the script selected by `payload` on one instance.
    async fn run_script(
        &self,
        instance: &Instance,
        payload: &ScriptPayload,
    ) -> Result<ScriptOutput, ScriptError>;
}

/// Materialize a [`Cluster`] from live provider state.
pub async fn materialize_cluster(
    provider: &dyn ComputeProvider,
    name: &str,
    topology: Vec<RoleSpec>,
) -> anyhow::Result<Cluster> {
    let instances = provider.list_instances(name).await?;
    Ok(Cluster::new(name, instances, topology))
}
