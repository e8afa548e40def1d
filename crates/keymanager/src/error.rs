//! Key management error types.
//!
//! This module defines the errors that can occur while resolving, minting
//! and using key material. Every error is terminal for the operation that
//! produced it — the core never retries; retries are the caller's concern.

use keymint_storage::StorageError;
use thiserror::Error;

/// Result type alias for key management operations.
pub type Result<T> = std::result::Result<T, KeymanagerError>;

/// Key management and crypto facade errors.
///
/// # Non-exhaustive
///
/// More variants can appear in a minor release, so downstream `match`es
/// need a trailing `_` arm.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KeymanagerError {
    /// No key policy is provisioned for the application.
    #[error("No key policy found for application: {application_id}")]
    InvalidApplication {
        /// Application that has no policy row.
        application_id: String,
    },

    /// More than one alias covers the requested instant, or a resolved
    /// alias has no retrievable backing material. Either way the index and
    /// the material stores disagree, which the core cannot repair.
    #[error("No unique current alias for scope: {scope}")]
    NoUniqueAlias {
        /// Scope whose selection was ambiguous or inconsistent.
        scope: String,
    },

    /// No alias covers the requested instant on a path that must not mint.
    #[error("No current key for scope: {scope}")]
    NoCurrentKey {
        /// Scope that has no covering alias.
        scope: String,
    },

    /// The expiry planner could not produce a positive-length validity
    /// window after truncating against existing windows.
    #[error("Key policy cannot produce a valid window for application: {application_id}")]
    PolicyConflict {
        /// Application whose mint was rejected.
        application_id: String,
    },

    /// The certificate is outside its validity window or its chain is
    /// empty.
    #[error("Certificate invalid: {reason}")]
    CertificateInvalid {
        /// Why the certificate was rejected.
        reason: String,
    },

    /// A wrap, unwrap, sign or verify primitive failed.
    #[error("Crypto operation failed: {0}")]
    Crypto(String),

    /// A persistent store operation failed.
    #[error("Storage failure")]
    Store(#[from] StorageError),

    /// The operation deadline elapsed before completion. In-flight storage
    /// calls are abandoned best-effort; committed writes are not rolled
    /// back.
    #[error("Operation deadline exceeded")]
    Timeout,

    /// A caller-supplied timestamp was not a valid ISO-8601 local
    /// date-time.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

impl KeymanagerError {
    /// Stable machine-readable kind, used for boundary logging and
    /// metrics. Key material never appears in these values.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidApplication { .. } => "INVALID_APPLICATION",
            Self::NoUniqueAlias { .. } => "NO_UNIQUE_ALIAS",
            Self::NoCurrentKey { .. } => "NO_CURRENT_KEY",
            Self::PolicyConflict { .. } => "POLICY_CONFLICT",
            Self::CertificateInvalid { .. } => "CERT_INVALID",
            Self::Crypto(_) => "CRYPTO_FAILURE",
            Self::Store(_) => "STORE_FAILURE",
            Self::Timeout => "TIMEOUT",
            Self::InvalidTimestamp(_) => "INVALID_TIMESTAMP",
        }
    }
}
