//! Cluster action dispatch engine.
//!
//! Takes a declared cluster topology (roles → instances), a named lifecycle
//! action (bootstrap, configure, start, stop, cleanup), and an optional
//! restriction to a subset of roles and/or instance identifiers, then drives
//! per-role handlers and remote scripts across the cluster, aggregating
//! success/failure per instance.
//!
//! The engine is action-agnostic: the action identifier is plain data
//! threaded through the per-invocation [`ClusterActionEvent`]; role handlers
//! and instance-side scripts select behavior by it. Cloud compute APIs and
//! the script transport are consumed through [`ComputeProvider`]; role
//! behavior through [`ClusterActionHandler`].
//!
//! An invocation walks `resolve scope → pre-hooks (role declaration order) →
//! script fan-out (bounded concurrency, per-instance retry) → post-hooks →
//! aggregate`. Script failures are isolated per instance and never abort
//! siblings; the aggregated [`ActionReport`] names exactly which instances
//! failed so a retry can be retargeted at them.

pub mod compute;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod handler;
pub mod scope;
pub mod script;
pub mod types;

pub use compute::{materialize_cluster, ComputeProvider, ScriptOutput, ScriptPayload};
pub use config::ExecConfig;
pub use dispatch::{run_action, ActionReport, ActionState, ClusterAction};
pub use error::{ActionError, HookPhase, ScriptError};
pub use event::{ActionEvent, ClusterActionEvent};
pub use handler::{ClusterActionHandler, HandlerRegistry};
pub use scope::ActionScope;
pub use script::{PhaseOutcome, ScriptExecutionPhase};
pub use types::{ActionId, Cluster, Instance, InstanceId, InstanceOutcome, RoleSpec, Timestamp};
