//! Certificate entries and the source that loads them.
//!
//! Signing and verification use certificate-bound keys: an X.509 chain
//! plus the private key matching the leaf. Entries are loaded from
//! configured resources on first use for a scope and then live in the HSM
//! vault under the minted alias.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use der::{Decode, DecodePem, Encode};
use keymint_storage::{ApplicationId, ReferenceId};
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::RsaPrivateKey;
use x509_cert::Certificate;
use zeroize::Zeroizing;

use crate::{
    clock::Clock,
    error::{KeymanagerError, Result},
};

/// An X.509 chain with the private key matching the leaf.
///
/// The leaf's validity bounds and SubjectPublicKeyInfo are extracted once
/// at construction so the hot paths never re-parse DER.
#[derive(Clone)]
pub struct CertificateEntry {
    /// DER-encoded certificates, leaf first.
    pub chain_der: Vec<Vec<u8>>,
    /// PKCS#8 DER of the private key matching the leaf.
    pub private_key_der: Zeroizing<Vec<u8>>,
    /// DER SubjectPublicKeyInfo of the leaf.
    pub public_key_der: Vec<u8>,
    /// Leaf `notBefore`.
    pub not_before: NaiveDateTime,
    /// Leaf `notAfter`.
    pub not_after: NaiveDateTime,
}

impl CertificateEntry {
    /// Builds an entry from a DER chain and PKCS#8 private key, parsing
    /// the leaf for its validity bounds and public key.
    pub fn from_der_chain(
        chain_der: Vec<Vec<u8>>,
        private_key_der: Zeroizing<Vec<u8>>,
    ) -> Result<Self> {
        let leaf_der = chain_der.first().ok_or_else(|| KeymanagerError::CertificateInvalid {
            reason: "certificate chain is empty".into(),
        })?;
        let leaf = Certificate::from_der(leaf_der).map_err(|e| {
            KeymanagerError::CertificateInvalid { reason: format!("leaf does not parse: {e}") }
        })?;

        let validity = &leaf.tbs_certificate.validity;
        let not_before = x509_time_to_naive(&validity.not_before)?;
        let not_after = x509_time_to_naive(&validity.not_after)?;

        let public_key_der =
            leaf.tbs_certificate.subject_public_key_info.to_der().map_err(|e| {
                KeymanagerError::CertificateInvalid {
                    reason: format!("leaf public key does not encode: {e}"),
                }
            })?;

        Ok(Self { chain_der, private_key_der, public_key_der, not_before, not_after })
    }

    /// Builds an entry from PEM-encoded certificate and private key text.
    pub fn from_pem(certificate_pem: &str, private_key_pem: &str) -> Result<Self> {
        let leaf = Certificate::from_pem(certificate_pem.as_bytes()).map_err(|e| {
            KeymanagerError::CertificateInvalid {
                reason: format!("certificate PEM does not parse: {e}"),
            }
        })?;
        let leaf_der = leaf.to_der().map_err(|e| KeymanagerError::CertificateInvalid {
            reason: format!("certificate does not re-encode: {e}"),
        })?;

        let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem).map_err(|e| {
            KeymanagerError::CertificateInvalid {
                reason: format!("private key PEM does not parse: {e}"),
            }
        })?;
        let private_key_der = Zeroizing::new(
            private_key
                .to_pkcs8_der()
                .map_err(|e| KeymanagerError::CertificateInvalid {
                    reason: format!("private key does not re-encode: {e}"),
                })?
                .as_bytes()
                .to_vec(),
        );

        Self::from_der_chain(vec![leaf_der], private_key_der)
    }

    /// Rejects entries that are unusable at `now` as seen by `clock`.
    ///
    /// An entry is invalid when the chain is empty, `notBefore` is still in
    /// the future, or `notAfter` has passed.
    pub fn ensure_valid(&self, clock: &dyn Clock) -> Result<()> {
        if self.chain_der.is_empty() {
            return Err(KeymanagerError::CertificateInvalid {
                reason: "certificate chain is empty".into(),
            });
        }
        let now = clock.now();
        if now < self.not_before {
            return Err(KeymanagerError::CertificateInvalid {
                reason: format!("not valid before {}", self.not_before),
            });
        }
        if now > self.not_after {
            return Err(KeymanagerError::CertificateInvalid {
                reason: format!("expired at {}", self.not_after),
            });
        }
        Ok(())
    }
}

fn x509_time_to_naive(time: &x509_cert::time::Time) -> Result<NaiveDateTime> {
    let unix = time.to_date_time().unix_duration();
    let secs = i64::try_from(unix.as_secs()).map_err(|_| KeymanagerError::CertificateInvalid {
        reason: "certificate validity out of range".into(),
    })?;
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| KeymanagerError::CertificateInvalid {
            reason: "certificate validity out of range".into(),
        })
}

/// Loads certificate entries for a scope from configured resources.
#[async_trait]
pub trait CertificateSource: Send + Sync {
    /// Loads the chain and private key for the given scope.
    async fn load(
        &self,
        application_id: &ApplicationId,
        reference_id: Option<&ReferenceId>,
    ) -> Result<CertificateEntry>;
}

/// Certificate source backed by a PEM certificate and key file pair.
///
/// Every scope resolves to the same configured pair, mirroring a
/// deployment where the signing certificate is provisioned alongside the
/// service.
#[derive(Debug, Clone)]
pub struct PemFileCertificateSource {
    certificate_path: PathBuf,
    private_key_path: PathBuf,
}

impl PemFileCertificateSource {
    /// Creates a source reading the given files on each load.
    pub fn new(certificate_path: impl Into<PathBuf>, private_key_path: impl Into<PathBuf>) -> Self {
        Self {
            certificate_path: certificate_path.into(),
            private_key_path: private_key_path.into(),
        }
    }
}

#[async_trait]
impl CertificateSource for PemFileCertificateSource {
    async fn load(
        &self,
        _application_id: &ApplicationId,
        _reference_id: Option<&ReferenceId>,
    ) -> Result<CertificateEntry> {
        let certificate_pem = std::fs::read_to_string(&self.certificate_path).map_err(|e| {
            KeymanagerError::CertificateInvalid {
                reason: format!("cannot read {}: {e}", self.certificate_path.display()),
            }
        })?;
        let private_key_pem = std::fs::read_to_string(&self.private_key_path).map_err(|e| {
            KeymanagerError::CertificateInvalid {
                reason: format!("cannot read {}: {e}", self.private_key_path.display()),
            }
        })?;
        CertificateEntry::from_pem(&certificate_pem, &private_key_pem)
    }
}

/// Certificate source that always returns one prepared entry.
///
/// Intended for tests and development setups.
#[derive(Clone)]
pub struct StaticCertificateSource {
    entry: CertificateEntry,
}

impl StaticCertificateSource {
    /// Creates a source vending clones of `entry`.
    #[must_use]
    pub fn new(entry: CertificateEntry) -> Self {
        Self { entry }
    }
}

#[async_trait]
impl CertificateSource for StaticCertificateSource {
    async fn load(
        &self,
        _application_id: &ApplicationId,
        _reference_id: Option<&ReferenceId>,
    ) -> Result<CertificateEntry> {
        Ok(self.entry.clone())
    }
}
