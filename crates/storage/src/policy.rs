//! Key policy entity.
//!
//! A [`KeyPolicy`] maps an application to the validity duration, in days,
//! of the keys minted for it. Policies are provisioned out of band and are
//! immutable from the core's perspective during a process lifetime;
//! reloading them is an external concern.

use serde::{Deserialize, Serialize};

use crate::{metadata::RecordMetadata, types::ApplicationId};

/// Validity policy for the keys of one application.
///
/// # Example
///
/// ```
/// use keymint_storage::{KeyPolicy, MetadataStamper};
///
/// let policy = KeyPolicy::builder()
///     .application_id("KERNEL")
///     .validity_days(180)
///     .metadata(MetadataStamper::new("doc-test").stamp())
///     .build();
///
/// assert_eq!(policy.validity_days, 180);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct KeyPolicy {
    /// Application the policy applies to. Unique per store.
    #[builder(into)]
    pub application_id: ApplicationId,

    /// How long a freshly minted key stays valid, in whole days.
    /// Always positive.
    pub validity_days: u32,

    /// Audit columns, stamped on insert.
    pub metadata: RecordMetadata,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::metadata::MetadataStamper;

    #[test]
    fn test_builder() {
        let policy = KeyPolicy::builder()
            .application_id("KERNEL")
            .validity_days(365)
            .metadata(MetadataStamper::new("test").stamp())
            .build();

        assert_eq!(policy.application_id, ApplicationId::from("KERNEL"));
        assert_eq!(policy.validity_days, 365);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let policy = KeyPolicy::builder()
            .application_id("KERNEL")
            .validity_days(180)
            .metadata(MetadataStamper::new("test").stamp())
            .build();

        let json = serde_json::to_string(&policy).unwrap();
        let back: KeyPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, back);
    }
}
