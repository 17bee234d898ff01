use crate::error::ActionError;
use crate::event::ClusterActionEvent;
use crate::types::ActionId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Role-specific lifecycle behavior bracketing the remote script phase.
///
/// One handler is registered per role, once, at startup; handlers are shared
/// read-only across invocations and must be safe to call from concurrent
/// actions on different clusters. Both hooks default to no-ops, so a role
/// that does not participate in a given action is skipped, not an error.
#[async_trait]
pub trait ClusterActionHandler: Send + Sync {
    /// Whether this handler contributes any behavior for `action`. Handlers
    /// returning `false` are skipped entirely for that invocation.
    fn handles(&self, action: ActionId) -> bool {
        let _ = action;
        true
    }

    /// Runs before the script phase, in role declaration order. A failure
    /// aborts the remaining pre-hooks; state already applied is not rolled
    /// back, so implementations should be individually idempotent.
    async fn before_action(
        &self,
        action: ActionId,
        event: &mut ClusterActionEvent,
    ) -> anyhow::Result<()> {
        let _ = (action, event);
        Ok(())
    }

    /// Runs after the script phase, in role declaration order, regardless of
    /// per-instance script failures. Implementations that need to react to a
    /// degraded scope can inspect [`ClusterActionEvent::outcomes`].
    async fn after_action(
        &self,
        action: ActionId,
        event: &mut ClusterActionEvent,
    ) -> anyhow::Result<()> {
        let _ = (action, event);
        Ok(())
    }
}

/// Role name → handler. Built once at startup, read-only during actions.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ClusterActionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, role: impl Into<String>, handler: Arc<dyn ClusterActionHandler>) {
        self.handlers.insert(role.into(), handler);
    }

    pub fn get(&self, role: &str) -> Option<Arc<dyn ClusterActionHandler>> {
        self.handlers.get(role).cloned()
    }

    pub fn lookup(&self, role: &str) -> Result<Arc<dyn ClusterActionHandler>, ActionError> {
        self.get(role)
            .ok_or_else(|| ActionError::UnknownRole(role.to_string()))
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
