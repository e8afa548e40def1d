//! Record metadata columns and the stamper that fills them.
//!
//! Every persisted row carries the same four audit columns: who created it
//! and when, and who last touched it and when. The service layer never sets
//! these by hand — a [`MetadataStamper`] is applied on every write so the
//! columns stay consistent across stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Audit columns attached to every persisted row.
///
/// Rows in this system are append-only, so `updated_by`/`updated_at` equal
/// the creation values until some external migration touches the row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct RecordMetadata {
    /// Identity that created the row.
    #[builder(into)]
    pub created_by: String,

    /// When the row was created.
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,

    /// Identity that last modified the row.
    #[builder(into)]
    pub updated_by: String,

    /// When the row was last modified.
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

/// Stamps [`RecordMetadata`] onto rows at write time.
///
/// Holds the acting identity (typically the service account the process
/// runs as) and produces fresh column values per write.
///
/// # Examples
///
/// ```
/// use keymint_storage::MetadataStamper;
///
/// let stamper = MetadataStamper::new("keymint-service");
/// let metadata = stamper.stamp();
/// assert_eq!(metadata.created_by, "keymint-service");
/// assert_eq!(metadata.created_by, metadata.updated_by);
/// ```
#[derive(Clone, Debug)]
pub struct MetadataStamper {
    actor: Arc<str>,
}

impl MetadataStamper {
    /// Creates a stamper acting as the given identity.
    pub fn new(actor: impl Into<Arc<str>>) -> Self {
        Self { actor: actor.into() }
    }

    /// Returns the acting identity.
    #[must_use]
    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// Produces metadata for a freshly created row.
    #[must_use]
    pub fn stamp(&self) -> RecordMetadata {
        let now = Utc::now();
        RecordMetadata {
            created_by: self.actor.to_string(),
            created_at: now,
            updated_by: self.actor.to_string(),
            updated_at: now,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_sets_all_columns() {
        let stamper = MetadataStamper::new("svc");
        let metadata = stamper.stamp();

        assert_eq!(metadata.created_by, "svc");
        assert_eq!(metadata.updated_by, "svc");
        assert_eq!(metadata.created_at, metadata.updated_at);

        let age = Utc::now() - metadata.created_at;
        assert!(age.num_seconds() < 2);
    }

    #[test]
    fn test_builder_defaults() {
        let metadata = RecordMetadata::builder().created_by("a").updated_by("b").build();
        assert_eq!(metadata.created_by, "a");
        assert_eq!(metadata.updated_by, "b");
    }

    #[test]
    fn test_serialization_roundtrip() {
        let metadata = MetadataStamper::new("svc").stamp();
        let json = serde_json::to_string(&metadata).unwrap();
        let back: RecordMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(metadata, back);
    }
}
