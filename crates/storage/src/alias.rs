//! Key alias entity: the selection index row.
//!
//! A [`KeyAlias`] binds a scope — `(application_id, reference_id?)` — and a
//! closed validity window `[key_generation_time, key_expiry_time]` to the
//! opaque alias under which the concrete key material is stored.
//!
//! # Window Invariants
//!
//! For any scope, the windows of its aliases must be pairwise
//! non-overlapping, so that any instant is covered by at most one alias.
//! The index itself does not enforce this — the resolver preserves it by
//! planning expiry against the existing windows and serializing mints per
//! scope.
//!
//! # Example
//!
//! ```
//! use keymint_storage::{AliasId, ApplicationId, KeyAlias, MetadataStamper};
//!
//! let alias = KeyAlias::builder()
//!     .alias(AliasId::random())
//!     .application_id("KERNEL")
//!     .key_generation_time("2024-01-01T00:00:00".parse().unwrap())
//!     .key_expiry_time("2024-06-29T00:00:00".parse().unwrap())
//!     .metadata(MetadataStamper::new("doc-test").stamp())
//!     .build();
//!
//! assert!(alias.covers("2024-03-01T12:00:00".parse().unwrap()));
//! assert!(!alias.covers("2024-06-29T00:00:01".parse().unwrap()));
//! ```

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::{
    metadata::RecordMetadata,
    types::{AliasId, ApplicationId, ReferenceId},
};

/// A row of the alias index.
///
/// # Scope
///
/// `reference_id` being absent means the material behind this alias lives
/// in the HSM (master keys and certificate-bound keys). A present
/// `reference_id` means the material lives in the relational store, with
/// its private half wrapped under the application master key.
///
/// # Window
///
/// The validity window is the closed interval
/// `[key_generation_time, key_expiry_time]`; both endpoints are selectable
/// instants. Expiry is data, not an action — expired rows stay in the
/// index and are simply never selected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct KeyAlias {
    /// Opaque identifier the key material is stored under.
    pub alias: AliasId,

    /// Application (tenant) this alias belongs to.
    #[builder(into)]
    pub application_id: ApplicationId,

    /// Sub-scope within the application, when the material is
    /// store-resident rather than HSM-resident.
    #[builder(into)]
    pub reference_id: Option<ReferenceId>,

    /// Start of the validity window (inclusive).
    pub key_generation_time: NaiveDateTime,

    /// End of the validity window (inclusive).
    pub key_expiry_time: NaiveDateTime,

    /// Audit columns, stamped on insert.
    pub metadata: RecordMetadata,
}

impl KeyAlias {
    /// Returns `true` when `instant` falls inside the validity window.
    ///
    /// Both window endpoints are included.
    #[must_use]
    pub fn covers(&self, instant: NaiveDateTime) -> bool {
        self.key_generation_time <= instant && instant <= self.key_expiry_time
    }

    /// Returns `true` when the closed interval `[start, end]` shares any
    /// instant with this alias's window.
    #[must_use]
    pub fn overlaps(&self, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        start <= self.key_expiry_time && self.key_generation_time <= end
    }
}
