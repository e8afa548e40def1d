//! The error type shared by every store backend.
//!
//! Backends translate their native failures into [`StorageError`] so the
//! layers above react uniformly: a missing row reads the same whether it
//! came from the in-memory index or the relational database. When an
//! error is built it snapshots the active [`tracing`] span as a
//! [`SpanRef`], which renders at the tail of the message, so a failure
//! logged far from where it happened still points back at the request
//! that produced it.
//!
//! ```
//! use keymint_storage::{StorageError, StorageResult};
//!
//! fn lookup(alias: &str) -> StorageResult<Vec<u8>> {
//!     Err(StorageError::not_found(alias))
//! }
//! ```

use std::{fmt, sync::Arc};

use thiserror::Error;

/// Shared, thread-safe error kept as the tail of a source chain.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Snapshot of the [`tracing`] span that was active when an error was
/// built.
///
/// Empty when no subscriber was installed at that moment. Renders as
/// ` [span=N]` at the end of error messages, or as nothing when empty,
/// which keeps messages grep-able back to the request span without any
/// extra plumbing at the log site.
#[derive(Debug)]
pub struct SpanRef(Option<tracing::span::Id>);

impl SpanRef {
    fn capture() -> Self {
        Self(tracing::Span::current().id())
    }

    /// The snapshotted span ID, when a subscriber was active.
    #[must_use]
    pub fn id(&self) -> Option<&tracing::span::Id> {
        self.0.as_ref()
    }
}

impl fmt::Display for SpanRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(id) => write!(f, " [span={}]", id.into_u64()),
            None => Ok(()),
        }
    }
}

/// Failures a store backend can surface.
///
/// Every variant is built through a constructor on this type, which is
/// where the [`SpanRef`] snapshot happens; backends never assemble
/// variants by hand. Underlying causes are attached afterwards with
/// [`caused_by`](StorageError::caused_by) and exposed through
/// [`std::error::Error::source`].
///
/// # Non-exhaustive
///
/// More variants can appear in a minor release, so downstream `match`es
/// need a trailing `_` arm.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The addressed row does not exist.
    ///
    /// Read paths treat this as an ordinary miss; write paths treat it
    /// as a failed precondition.
    #[error("row not found: {key}{span}")]
    NotFound {
        /// The key that had no row.
        key: String,
        /// Span snapshot taken when the error was built.
        span: SpanRef,
    },

    /// An insert collided with a row already stored under the same
    /// primary key.
    ///
    /// Every table in this layer is append-only, so the collision is
    /// refused rather than resolved by overwriting.
    #[error("row already present: {key}{span}")]
    Conflict {
        /// The key that was already occupied.
        key: String,
        /// Span snapshot taken when the error was built.
        span: SpanRef,
    },

    /// The backend could not be reached at all.
    #[error("store unreachable: {message}{span}")]
    Connection {
        /// What failed while reaching the backend.
        message: String,
        /// The error that broke the connection, when known.
        #[source]
        source: Option<BoxError>,
        /// Span snapshot taken when the error was built.
        span: SpanRef,
    },

    /// A row's bytes did not match its schema, in either direction.
    ///
    /// Usually means corruption or a row written by an incompatible
    /// version.
    #[error("bad row encoding: {message}{span}")]
    Serialization {
        /// What failed to encode or decode.
        message: String,
        /// The codec error behind the failure, when known.
        #[source]
        source: Option<BoxError>,
        /// Span snapshot taken when the error was built.
        span: SpanRef,
    },

    /// The backend failed in a way that fits no other variant.
    #[error("store fault: {message}{span}")]
    Internal {
        /// What the backend reported.
        message: String,
        /// The backend error behind the failure, when known.
        #[source]
        source: Option<BoxError>,
        /// Span snapshot taken when the error was built.
        span: SpanRef,
    },

    /// The backend did not answer within its time limit.
    #[error("store call timed out{span}")]
    Timeout {
        /// Span snapshot taken when the error was built.
        span: SpanRef,
    },
}

impl StorageError {
    /// A miss for the row addressed by `key`.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into(), span: SpanRef::capture() }
    }

    /// A duplicate-insert collision on `key`.
    #[must_use]
    pub fn conflict(key: impl Into<String>) -> Self {
        Self::Conflict { key: key.into(), span: SpanRef::capture() }
    }

    /// A failure to reach the backend.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None, span: SpanRef::capture() }
    }

    /// A row that would not encode or decode.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None, span: SpanRef::capture() }
    }

    /// A backend fault with no better classification.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None, span: SpanRef::capture() }
    }

    /// An elapsed backend time limit.
    #[must_use]
    pub fn timeout() -> Self {
        Self::Timeout { span: SpanRef::capture() }
    }

    /// Attaches the underlying error that produced `self`.
    ///
    /// Only `Connection`, `Serialization` and `Internal` have somewhere
    /// to hold a cause; on the remaining variants this does nothing.
    #[must_use]
    pub fn caused_by(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        match &mut self {
            Self::Connection { source, .. }
            | Self::Serialization { source, .. }
            | Self::Internal { source, .. } => *source = Some(Arc::new(cause)),
            _ => {},
        }
        self
    }

    /// The span snapshot taken when this error was built.
    #[must_use]
    pub fn span(&self) -> &SpanRef {
        match self {
            Self::NotFound { span, .. }
            | Self::Conflict { span, .. }
            | Self::Connection { span, .. }
            | Self::Serialization { span, .. }
            | Self::Internal { span, .. }
            | Self::Timeout { span, .. } => span,
        }
    }

    /// Whether retrying the same call could plausibly succeed.
    ///
    /// Only reachability problems qualify: an unreachable store or an
    /// elapsed time limit may clear up on their own, while misses,
    /// conflicts and malformed rows will fail identically every time.
    /// The core never retries; this is a hint for callers that do.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}
