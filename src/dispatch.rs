use crate::compute::ComputeProvider;
use crate::config::ExecConfig;
use crate::error::{ActionError, HookPhase};
use crate::event::{ActionEvent, ClusterActionEvent};
use crate::handler::{ClusterActionHandler, HandlerRegistry};
use crate::scope::{self, ActionScope};
use crate::script::ScriptExecutionPhase;
use crate::types::{now_ms, ActionId, Cluster, InstanceId, InstanceOutcome, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

// ─── Invocation state ─────────────────────────────────────────

/// Dispatch progress for one invocation. `Failed` is terminal and reachable
/// from any non-terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Created,
    ScopeResolved,
    PreHooksRun,
    ScriptsExecuted,
    PostHooksRun,
    Completed,
    Failed,
}

impl ActionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionState::Completed | ActionState::Failed)
    }
}

// ─── Report ───────────────────────────────────────────────────

/// Aggregated result of one action invocation.
#[derive(Debug)]
pub struct ActionReport {
    pub action: ActionId,
    pub invocation_id: Uuid,
    pub scope: ActionScope,
    /// Terminal state the invocation reached.
    pub state: ActionState,
    pub outcomes: BTreeMap<InstanceId, InstanceOutcome>,
    pub events: Vec<ActionEvent>,
    /// Hook failure or cancellation that aborted the invocation, if any.
    pub error: Option<ActionError>,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
}

impl ActionReport {
    /// Overall success: the pipeline completed, no hook failed, and every
    /// scoped instance succeeded.
    pub fn succeeded(&self) -> bool {
        self.state == ActionState::Completed
            && self.error.is_none()
            && self.outcomes.values().all(InstanceOutcome::is_success)
    }

    pub fn any_script_failed(&self) -> bool {
        self.outcomes.values().any(|o| !o.is_success())
    }

    /// Instances that did not succeed: the retarget set for a retry with an
    /// instance-id filter.
    pub fn failed_instance_ids(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| !o.is_success())
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

// ─── Dispatch engine ──────────────────────────────────────────

/// The cluster action dispatch engine.
///
/// Orchestrates one invocation: resolve scope, run pre-hooks per role in
/// declaration order, fan script execution out across the scoped instances,
/// run post-hooks, aggregate. Registries are read-only here and may be
/// shared across concurrent invocations on *different* clusters; serializing
/// actions per cluster is the caller's responsibility.
pub struct ClusterAction {
    provider: Arc<dyn ComputeProvider>,
    handlers: Arc<HandlerRegistry>,
    config: ExecConfig,
}

impl ClusterAction {
    pub fn new(provider: Arc<dyn ComputeProvider>, handlers: Arc<HandlerRegistry>) -> Self {
        Self::with_config(provider, handlers, ExecConfig::default())
    }

    pub fn with_config(
        provider: Arc<dyn ComputeProvider>,
        handlers: Arc<HandlerRegistry>,
        config: ExecConfig,
    ) -> Self {
        Self {
            provider,
            handlers,
            config,
        }
    }

    /// Run `action` against `cluster`, optionally restricted to a subset of
    /// roles and/or instance ids (empty filter sets mean the whole cluster).
    ///
    /// Returns `Err` only for failures that precede any side effect (scope
    /// resolution and handler lookup), which are safe to retry immediately.
    /// Hook failures and cancellation are reported inside the
    /// [`ActionReport`] so already-collected per-instance outcomes survive.
    pub async fn run(
        &self,
        action: ActionId,
        cluster: &Cluster,
        role_filter: &BTreeSet<String>,
        instance_filter: &BTreeSet<InstanceId>,
        cancel: CancellationToken,
    ) -> Result<ActionReport, ActionError> {
        let invocation_id = Uuid::now_v7();
        let started_at = now_ms();

        // Created → ScopeResolved. Fails fast: no partial work yet.
        let scope = scope::resolve(cluster, role_filter, instance_filter)?;
        info!(
            invocation = %invocation_id,
            action = %action,
            cluster = cluster.name(),
            instances = scope.instance_count(),
            "scope resolved"
        );

        // Handler lookup happens up front as well, so a missing role
        // registration surfaces before any remote side effect.
        let ordered_roles = cluster.order_roles(&scope.roles);
        let mut role_handlers: Vec<(String, Arc<dyn ClusterActionHandler>)> = Vec::new();
        for role in &ordered_roles {
            role_handlers.push((role.clone(), self.handlers.lookup(role)?));
        }

        let cancel = self.arm_timeout(cancel);
        let mut inv = Invocation {
            action,
            invocation_id,
            scope: scope.clone(),
            state: ActionState::ScopeResolved,
            outcomes: BTreeMap::new(),
            events: vec![ActionEvent::ScopeResolved {
                instances: scope.instance_count(),
                roles: ordered_roles.clone(),
            }],
            started_at,
        };
        let mut event = ClusterActionEvent::new(action, Arc::new(cluster.clone()), scope.clone());

        // ScopeResolved → PreHooksRun.
        if let Err(abort) =
            run_hooks(action, HookPhase::Before, &role_handlers, &mut event, &cancel, &mut inv).await
        {
            return Ok(inv.fail(abort));
        }
        inv.state = ActionState::PreHooksRun;

        // PreHooksRun → ScriptsExecuted. Partial instance failures are
        // recorded, never aborting the phase.
        let scoped_instances: Vec<_> = cluster
            .instances()
            .iter()
            .filter(|i| scope.contains_instance(&i.instance_id))
            .cloned()
            .collect();
        inv.events.push(ActionEvent::ScriptsStarted {
            instances: scoped_instances.len(),
        });
        let phase = ScriptExecutionPhase::new(Arc::clone(&self.provider), self.config.clone());
        let phase_outcome = phase
            .execute(action, &scope.roles, &scoped_instances, &cancel)
            .await;
        inv.events.extend(phase_outcome.events);
        inv.events.push(ActionEvent::ScriptsCompleted {
            failed: phase_outcome.outcomes.values().filter(|o| !o.is_success()).count(),
        });
        inv.outcomes = phase_outcome.outcomes;
        event.record_outcomes(inv.outcomes.clone());
        inv.state = ActionState::ScriptsExecuted;

        if cancel.is_cancelled() {
            return Ok(inv.fail(ActionError::Cancelled));
        }

        // ScriptsExecuted → PostHooksRun. Post-hooks run even when some
        // instances failed their scripts; they can inspect the outcomes.
        if let Err(abort) =
            run_hooks(action, HookPhase::After, &role_handlers, &mut event, &cancel, &mut inv).await
        {
            return Ok(inv.fail(abort));
        }
        inv.state = ActionState::PostHooksRun;

        // PostHooksRun → Completed.
        inv.state = ActionState::Completed;
        let report = inv.complete();
        info!(
            invocation = %invocation_id,
            action = %action,
            success = report.succeeded(),
            failed_instances = report.failed_instance_ids().len(),
            "action completed"
        );
        Ok(report)
    }

    /// Arm the overall action deadline, if configured, as a child token
    /// cancelled by a timer task.
    fn arm_timeout(&self, cancel: CancellationToken) -> CancellationToken {
        match self.config.action_timeout_secs {
            Some(secs) => {
                let child = cancel.child_token();
                let timer = child.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                    timer.cancel();
                });
                child
            }
            None => cancel,
        }
    }
}

/// Run one side of the hook bracket sequentially in role order. The first
/// failure aborts the remaining hooks of the phase; hooks already run are
/// not rolled back.
async fn run_hooks(
    action: ActionId,
    phase: HookPhase,
    role_handlers: &[(String, Arc<dyn ClusterActionHandler>)],
    event: &mut ClusterActionEvent,
    cancel: &CancellationToken,
    inv: &mut Invocation,
) -> Result<(), ActionError> {
    for (role, handler) in role_handlers {
        if cancel.is_cancelled() {
            return Err(ActionError::Cancelled);
        }
        if !handler.handles(action) {
            continue;
        }
        inv.events.push(ActionEvent::HookStarted {
            role: role.clone(),
            phase,
        });
        let result = match phase {
            HookPhase::Before => handler.before_action(action, event).await,
            HookPhase::After => handler.after_action(action, event).await,
        };
        match result {
            Ok(()) => {
                inv.events.push(ActionEvent::HookCompleted {
                    role: role.clone(),
                    phase,
                });
            }
            Err(source) => {
                warn!(role = %role, phase = %phase, error = %source, "role hook failed");
                inv.events.push(ActionEvent::HookFailed {
                    role: role.clone(),
                    phase,
                    message: source.to_string(),
                });
                return Err(ActionError::Handler {
                    role: role.clone(),
                    phase,
                    source,
                });
            }
        }
    }
    Ok(())
}

/// Bookkeeping for one in-flight invocation, folded into the final report.
struct Invocation {
    action: ActionId,
    invocation_id: Uuid,
    scope: ActionScope,
    state: ActionState,
    outcomes: BTreeMap<InstanceId, InstanceOutcome>,
    events: Vec<ActionEvent>,
    started_at: Timestamp,
}

impl Invocation {
    fn fail(mut self, error: ActionError) -> ActionReport {
        if matches!(error, ActionError::Cancelled) {
            self.events.push(ActionEvent::ActionCancelled);
        }
        self.events.push(ActionEvent::ActionCompleted { success: false });
        ActionReport {
            action: self.action,
            invocation_id: self.invocation_id,
            scope: self.scope,
            state: ActionState::Failed,
            outcomes: self.outcomes,
            events: self.events,
            error: Some(error),
            started_at: self.started_at,
            finished_at: now_ms(),
        }
    }

    fn complete(mut self) -> ActionReport {
        let success = self.outcomes.values().all(InstanceOutcome::is_success);
        self.events.push(ActionEvent::ActionCompleted { success });
        ActionReport {
            action: self.action,
            invocation_id: self.invocation_id,
            scope: self.scope,
            state: self.state,
            outcomes: self.outcomes,
            events: self.events,
            error: None,
            started_at: self.started_at,
            finished_at: now_ms(),
        }
    }
}

/// One-shot convenience entry point: dispatch `action` over `cluster` with a
/// fresh cancellation token and default execution config.
pub async fn run_action(
    action: ActionId,
    cluster: &Cluster,
    provider: Arc<dyn ComputeProvider>,
    handlers: Arc<HandlerRegistry>,
    role_filter: &BTreeSet<String>,
    instance_filter: &BTreeSet<InstanceId>,
) -> Result<ActionReport, ActionError> {
    ClusterAction::new(provider, handlers)
        .run(
            action,
            cluster,
            role_filter,
            instance_filter,
            CancellationToken::new(),
        )
        .await
}
