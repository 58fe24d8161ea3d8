//! Agent runtime for the openvia gateway.
//!
//! This crate holds everything between the channels and the LLM protocol
//! layer:
//!
//! - [`registry`] / [`executor`] -- schema-driven tool dispatch with
//!   argument validation and result normalization.
//! - [`policy`] / [`audit`] -- per-call allow / deny / require-approval
//!   classification with a bounded audit ring.
//! - [`permissions`] -- correlation of out-of-band approval requests and
//!   responses across concurrent sessions.
//! - [`session`] -- per-user session lifecycle with activity-based
//!   eviction.
//! - [`orchestrator`] -- the multi-round tool-calling loop that drives one
//!   user turn and streams [`AgentEvent`](openvia_types::AgentEvent)s.

pub mod audit;
pub mod executor;
pub mod orchestrator;
pub mod permissions;
pub mod policy;
pub mod registry;
pub mod session;

pub use audit::{AuditEntry, AuditLog, MAX_AUDIT};
pub use executor::{ExecContext, ExecRequest, ToolExecutor};
pub use orchestrator::{Orchestrator, OrchestratorConfig, PermissionCallback, TurnRequest};
pub use permissions::{PermissionBridge, PermissionHandler};
pub use policy::{PolicyDecision, PolicyEngine, PolicyRule, RuleDecision};
pub use registry::{FieldType, Tool, ToolError, ToolInputSchema, ToolRegistry};
pub use session::{SessionManager, SESSION_TIMEOUT, SWEEP_INTERVAL};
