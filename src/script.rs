use crate::compute::{ComputeProvider, ScriptPayload};
use crate::config::ExecConfig;
use crate::error::ScriptError;
use crate::event::ActionEvent;
use crate::types::{ActionId, Instance, InstanceId, InstanceOutcome};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Aggregated result of one script fan-out.
#[derive(Debug)]
pub struct PhaseOutcome {
    /// Terminal outcome for every targeted instance. Instances cut off by
    /// cancellation are recorded as [`InstanceOutcome::Cancelled`].
    pub outcomes: BTreeMap<InstanceId, InstanceOutcome>,
    /// Retry audit records, in completion order.
    pub events: Vec<ActionEvent>,
}

impl PhaseOutcome {
    pub fn any_failed(&self) -> bool {
        self.outcomes.values().any(|o| !o.is_success())
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.values().filter(|o| !o.is_success()).count()
    }
}

/// Fans script execution out across the in-scope instances.
///
/// Instances are independent: execution runs concurrently, bounded by
/// [`ExecConfig::max_concurrency`], and a failure on one instance never
/// aborts its siblings; cleanup-type actions must attempt to release
/// resources everywhere even when some instances fail. Completion order
/// carries no guarantee and handlers must not rely on it.
pub struct ScriptExecutionPhase {
    provider: Arc<dyn ComputeProvider>,
    config: ExecConfig,
}

impl ScriptExecutionPhase {
    pub fn new(provider: Arc<dyn ComputeProvider>, config: ExecConfig) -> Self {
        Self { provider, config }
    }

    /// Execute the action's script on every instance. Returns only once each
    /// instance has reached a terminal outcome, or the token is cancelled.
    pub async fn execute(
        &self,
        action: ActionId,
        scoped_roles: &BTreeSet<String>,
        instances: &[Instance],
        cancel: &CancellationToken,
    ) -> PhaseOutcome {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut tasks: JoinSet<(InstanceId, InstanceOutcome, Vec<ActionEvent>)> = JoinSet::new();

        for instance in instances {
            let payload = ScriptPayload::for_instance(action, scoped_roles, instance);
            let provider = Arc::clone(&self.provider);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let config = self.config.clone();
            let instance = instance.clone();

            tasks.spawn(async move {
                let instance_id = instance.instance_id.clone();
                let permit = tokio::select! {
                    _ = cancel.cancelled() => {
                        return (instance_id, InstanceOutcome::Cancelled, Vec::new());
                    }
                    permit = semaphore.acquire_owned() => permit,
                };
                // Acquisition only fails on a closed semaphore, which
                // never happens here.
                let _permit = match permit {
                    Ok(p) => p,
                    Err(_) => return (instance_id, InstanceOutcome::Cancelled, Vec::new()),
                };
                run_one(provider.as_ref(), &instance, &payload, &config, &cancel).await
            });
        }

        let mut outcomes = BTreeMap::new();
        let mut events = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((instance_id, outcome, mut task_events)) => {
                    events.append(&mut task_events);
                    outcomes.insert(instance_id, outcome);
                }
                Err(err) => {
                    warn!(error = %err, "script task aborted before reporting an outcome");
                }
            }
        }

        PhaseOutcome { outcomes, events }
    }
}

/// Drive one instance to a terminal outcome: run, retry transient failures
/// with exponential backoff, escalate on exhaustion.
async fn run_one(
    provider: &dyn ComputeProvider,
    instance: &Instance,
    payload: &ScriptPayload,
    config: &ExecConfig,
    cancel: &CancellationToken,
) -> (InstanceId, InstanceOutcome, Vec<ActionEvent>) {
    let instance_id = instance.instance_id.clone();
    let mut events = Vec::new();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                return (instance_id, InstanceOutcome::Cancelled, events);
            }
            result = provider.run_script(instance, payload) => result,
        };

        match result {
            Ok(_) => {
                debug!(instance = %instance_id, action = %payload.action, attempt, "script succeeded");
                return (
                    instance_id,
                    InstanceOutcome::Succeeded { attempts: attempt },
                    events,
                );
            }
            Err(err) if err.is_transient() && attempt <= config.max_retries => {
                let backoff = backoff_ms(config.retry_backoff_ms, attempt);
                warn!(
                    instance = %instance_id,
                    attempt,
                    backoff_ms = backoff,
                    error = %err,
                    "transient script failure, retrying"
                );
                events.push(ActionEvent::ScriptRetried {
                    instance_id: instance_id.clone(),
                    attempt,
                    message: err.to_string(),
                });
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return (instance_id, InstanceOutcome::Cancelled, events);
                    }
                    _ = tokio::time::sleep(Duration::from_millis(backoff)) => {}
                }
            }
            Err(ScriptError::Transient(message)) => {
                warn!(instance = %instance_id, attempts = attempt, "transient failures exhausted retry budget");
                return (
                    instance_id,
                    InstanceOutcome::TransientExhausted {
                        message,
                        attempts: attempt,
                    },
                    events,
                );
            }
            Err(ScriptError::Script { status, message }) => {
                warn!(instance = %instance_id, status, "script failed permanently");
                return (
                    instance_id,
                    InstanceOutcome::ScriptFailed {
                        exit_status: status,
                        message,
                        attempts: attempt,
                    },
                    events,
                );
            }
        }
    }
}

fn backoff_ms(base: u64, attempt: u32) -> u64 {
    base.saturating_mul(1u64 << attempt.saturating_sub(1).min(16))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::ScriptOutput;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Provider that tracks peak concurrency and fails scripted instances.
    struct TrackingProvider {
        inflight: AtomicUsize,
        peak: AtomicUsize,
        fail_permanently: BTreeSet<String>,
        transient_budget: Mutex<BTreeMap<String, u32>>,
    }

    impl TrackingProvider {
        fn new() -> Self {
            Self {
                inflight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                fail_permanently: BTreeSet::new(),
                transient_budget: Mutex::new(BTreeMap::new()),
            }
        }
    }

    #[async_trait]
    impl ComputeProvider for TrackingProvider {
        async fn list_instances(&self, _cluster_name: &str) -> anyhow::Result<Vec<Instance>> {
            Ok(Vec::new())
        }

        async fn run_script(
            &self,
            instance: &Instance,
            _payload: &ScriptPayload,
        ) -> Result<ScriptOutput, ScriptError> {
            let current = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.inflight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_permanently.contains(&instance.instance_id) {
                return Err(ScriptError::Script {
                    status: 1,
                    message: "exit 1".into(),
                });
            }
            let mut budgets = self.transient_budget.lock().unwrap();
            if let Some(remaining) = budgets.get_mut(&instance.instance_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ScriptError::Transient("connection reset".into()));
                }
            }
            Ok(ScriptOutput::default())
        }
    }

    fn instances(n: usize) -> Vec<Instance> {
        (0..n)
            .map(|i| Instance::new(format!("i{i}"), ["web"], format!("10.0.0.{i}")))
            .collect()
    }

    fn roles() -> BTreeSet<String> {
        BTreeSet::from(["web".to_string()])
    }

    #[tokio::test]
    async fn fan_out_respects_concurrency_bound() {
        let provider = Arc::new(TrackingProvider::new());
        let config = ExecConfig {
            max_concurrency: 2,
            ..ExecConfig::default()
        };
        let phase = ScriptExecutionPhase::new(provider.clone(), config);

        let outcome = phase
            .execute(
                ActionId::Start,
                &roles(),
                &instances(6),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.outcomes.len(), 6);
        assert!(!outcome.any_failed());
        assert!(provider.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn permanent_failures_do_not_abort_siblings() {
        let mut provider = TrackingProvider::new();
        provider.fail_permanently.insert("i1".into());
        provider.fail_permanently.insert("i3".into());
        let phase = ScriptExecutionPhase::new(Arc::new(provider), ExecConfig::default());

        let outcome = phase
            .execute(
                ActionId::Cleanup,
                &roles(),
                &instances(5),
                &CancellationToken::new(),
            )
            .await;

        // All five reach a terminal outcome despite the two failures.
        assert_eq!(outcome.outcomes.len(), 5);
        assert_eq!(outcome.failed_count(), 2);
        assert!(outcome.any_failed());
        assert!(matches!(
            outcome.outcomes["i1"],
            InstanceOutcome::ScriptFailed { exit_status: 1, .. }
        ));
        assert!(outcome.outcomes["i0"].is_success());
    }

    #[tokio::test]
    async fn transient_failure_is_retried_then_succeeds() {
        let provider = TrackingProvider::new();
        provider
            .transient_budget
            .lock()
            .unwrap()
            .insert("i0".into(), 1);
        let config = ExecConfig {
            retry_backoff_ms: 1,
            ..ExecConfig::default()
        };
        let phase = ScriptExecutionPhase::new(Arc::new(provider), config);

        let outcome = phase
            .execute(
                ActionId::Configure,
                &roles(),
                &instances(1),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(
            outcome.outcomes["i0"],
            InstanceOutcome::Succeeded { attempts: 2 }
        );
        assert_eq!(
            outcome.events,
            vec![ActionEvent::ScriptRetried {
                instance_id: "i0".into(),
                attempt: 1,
                message: "transient failure: connection reset".into(),
            }]
        );
    }

    #[tokio::test]
    async fn transient_exhaustion_escalates() {
        let provider = TrackingProvider::new();
        provider
            .transient_budget
            .lock()
            .unwrap()
            .insert("i0".into(), 10);
        let config = ExecConfig {
            max_retries: 2,
            retry_backoff_ms: 1,
            ..ExecConfig::default()
        };
        let phase = ScriptExecutionPhase::new(Arc::new(provider), config);

        let outcome = phase
            .execute(
                ActionId::Stop,
                &roles(),
                &instances(1),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(
            outcome.outcomes["i0"],
            InstanceOutcome::TransientExhausted {
                message: "connection reset".into(),
                attempts: 3,
            }
        );
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        assert_eq!(backoff_ms(500, 1), 500);
        assert_eq!(backoff_ms(500, 2), 1000);
        assert_eq!(backoff_ms(500, 3), 2000);
        // Deep attempts must not overflow.
        assert!(backoff_ms(u64::MAX, 40) > 0);
    }
}
