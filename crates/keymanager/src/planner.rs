//! Expiry planning for freshly minted keys.
//!
//! A new key's window starts at its generation time; where it ends depends
//! on the candidate source — the application policy for ordinary keys, the
//! certificate's `notAfter` for certificate-bound keys. Either way the
//! candidate is truncated against the scope's existing windows so windows
//! never overlap: when the candidate interval touches an existing window,
//! the new key expires one second before that window begins.

use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use keymint_storage::{ApplicationId, KeyAlias, PolicyStore};

use crate::error::{KeymanagerError, Result};

/// Where the initial expiry candidate comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryCandidate {
    /// Generation time plus the application policy's validity days.
    Policy,
    /// The certificate's `notAfter` instant.
    Certificate {
        /// Leaf certificate `notAfter`.
        not_after: NaiveDateTime,
    },
}

/// Plans expiry times for new keys.
#[derive(Clone)]
pub struct ExpiryPlanner {
    policies: Arc<dyn PolicyStore>,
}

impl ExpiryPlanner {
    /// Creates a planner reading validity policies from `policies`.
    pub fn new(policies: Arc<dyn PolicyStore>) -> Self {
        Self { policies }
    }

    /// Computes the expiry for a key generated at `generated_at`.
    ///
    /// `existing` must be the scope's full alias listing, ordered by
    /// generation time ascending — the first overlapping window in that
    /// order is the earliest future window, so truncating against it
    /// keeps every pair of windows disjoint.
    ///
    /// # Errors
    ///
    /// - [`KeymanagerError::InvalidApplication`] when `candidate` is [`ExpiryCandidate::Policy`]
    ///   and no policy row exists for the application.
    /// - [`KeymanagerError::PolicyConflict`] when truncation leaves no positive-length window.
    #[tracing::instrument(skip(self, existing), fields(application_id = %application_id))]
    pub async fn plan(
        &self,
        application_id: &ApplicationId,
        generated_at: NaiveDateTime,
        existing: &[KeyAlias],
        candidate: ExpiryCandidate,
    ) -> Result<NaiveDateTime> {
        let mut expiry = match candidate {
            ExpiryCandidate::Policy => {
                let policy = self.policies.get(application_id).await?.ok_or_else(|| {
                    KeymanagerError::InvalidApplication {
                        application_id: application_id.to_string(),
                    }
                })?;
                generated_at + Duration::days(i64::from(policy.validity_days))
            },
            ExpiryCandidate::Certificate { not_after } => not_after,
        };

        for alias in existing {
            if alias.overlaps(generated_at, expiry) {
                expiry = alias.key_generation_time - Duration::seconds(1);
                break;
            }
        }

        if expiry <= generated_at {
            return Err(KeymanagerError::PolicyConflict {
                application_id: application_id.to_string(),
            });
        }
        Ok(expiry)
    }
}
