//! Audit logging for key persistence operations.
//!
//! Provides a structured audit trail for alias and wrapped-key writes and
//! accesses. Compliance standards for key management require recording who
//! performed an action, what was affected, when it happened, and whether
//! it succeeded.
//!
//! # Architecture
//!
//! The [`AuditLogger`] trait enables different audit backends:
//!
//! - [`TracingAuditLogger`]: Emits structured `tracing` events at INFO level, suitable for log
//!   aggregation and SIEM integration.
//! - Custom implementations can write to databases, external audit services, etc.
//!
//! # Usage
//!
//! ```no_run
//! use keymint_storage::audit::{
//!     AuditAction, AuditEvent, AuditLogger, AuditResult, TracingAuditLogger,
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let logger = TracingAuditLogger;
//! let event = AuditEvent::builder()
//!     .actor("keymint-service")
//!     .action(AuditAction::InsertAlias)
//!     .resource("app:KERNEL/alias:7f8a2c...")
//!     .result(AuditResult::Success)
//!     .build();
//! logger.log(&event).await;
//! # });
//! ```

use std::{collections::HashMap, fmt};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Action performed on a persisted key resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    /// An alias row was appended to the index.
    InsertAlias,
    /// Alias rows for a scope were listed.
    ListAliases,
    /// A wrapped keypair row was stored.
    InsertWrappedKey,
    /// A wrapped keypair row was read.
    AccessWrappedKey,
    /// A wrapped keypair row was deleted during mint cleanup.
    DeleteWrappedKey,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsertAlias => write!(f, "insert_alias"),
            Self::ListAliases => write!(f, "list_aliases"),
            Self::InsertWrappedKey => write!(f, "insert_wrapped_key"),
            Self::AccessWrappedKey => write!(f, "access_wrapped_key"),
            Self::DeleteWrappedKey => write!(f, "delete_wrapped_key"),
        }
    }
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditResult {
    /// Operation completed successfully.
    Success,
    /// Operation failed with the given reason.
    Failure(String),
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure(reason) => write!(f, "failure: {reason}"),
        }
    }
}

/// Structured audit event for key persistence operations.
///
/// Each event captures who performed an action, what was affected,
/// when it happened, and whether it succeeded. Events never carry key
/// material — only identifiers.
#[derive(Debug, Clone, bon::Builder)]
pub struct AuditEvent {
    /// When the event occurred (defaults to now).
    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,
    /// Identity of the actor performing the operation.
    #[builder(into)]
    pub actor: String,
    /// The action that was performed.
    pub action: AuditAction,
    /// Resource identifier (e.g., "app:KERNEL/alias:7f8a2c...").
    #[builder(into)]
    pub resource: String,
    /// Outcome of the operation.
    pub result: AuditResult,
    /// Additional context (e.g., row counts).
    #[builder(default)]
    pub metadata: HashMap<String, String>,
}

/// Trait for audit log backends.
///
/// Implementations should be durable and tamper-evident where possible.
/// The trait is intentionally simple — a single `log` method — to
/// accommodate backends ranging from structured logging to external
/// audit services.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    /// Records an audit event.
    ///
    /// Implementations should not fail silently — log delivery failures
    /// should be surfaced through the observability stack.
    async fn log(&self, event: &AuditEvent);
}

#[async_trait]
impl<L: AuditLogger> AuditLogger for std::sync::Arc<L> {
    async fn log(&self, event: &AuditEvent) {
        (**self).log(event).await;
    }
}

/// Audit logger that emits structured `tracing` events.
///
/// Events are emitted at `INFO` level with structured fields, making
/// them easy to filter and forward to SIEM systems via
/// `tracing-subscriber` layers.
///
/// Field mapping:
/// - `audit.timestamp` — ISO 8601 timestamp
/// - `audit.actor` — who performed the action
/// - `audit.action` — the operation (e.g., "insert_alias")
/// - `audit.resource` — what was affected
/// - `audit.result` — "success" or "failure: ..."
/// - `audit.metadata` — additional context
#[derive(Debug, Clone, Copy)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        let metadata_str = if event.metadata.is_empty() {
            String::new()
        } else {
            event.metadata.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(", ")
        };

        tracing::info!(
            audit.timestamp = %event.timestamp.to_rfc3339(),
            audit.actor = %event.actor,
            audit.action = %event.action,
            audit.resource = %event.resource,
            audit.result = %event.result,
            audit.metadata = %metadata_str,
            "audit_event"
        );
    }
}

/// No-op audit logger for testing and environments where audit is not needed.
#[derive(Debug, Clone, Copy)]
pub struct NoopAuditLogger;

#[async_trait]
impl AuditLogger for NoopAuditLogger {
    async fn log(&self, _event: &AuditEvent) {}
}

/// Constructs a resource identifier string from application and alias.
pub fn alias_resource(application_id: impl fmt::Display, alias: impl fmt::Display) -> String {
    format!("app:{application_id}/alias:{alias}")
}

/// Constructs a resource identifier string for a whole scope.
pub fn scope_resource(
    application_id: impl fmt::Display,
    reference_id: Option<impl fmt::Display>,
) -> String {
    match reference_id {
        Some(reference) => format!("app:{application_id}/ref:{reference}"),
        None => format!("app:{application_id}"),
    }
}
