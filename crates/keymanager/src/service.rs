//! The crypto facade: the five public key management operations.
//!
//! [`Keymanager`] orchestrates resolution, minting and the crypto
//! primitives behind a small API: fetch a current public key, unwrap a
//! caller-supplied symmetric key, encrypt, sign, and verify. Callers
//! supply ISO-8601 local date-time strings naming the instant to resolve
//! against; binary inputs and outputs cross the boundary Base64-encoded.
//!
//! Every operation runs under a deadline — per-call when supplied,
//! otherwise the configured default — and fails with
//! [`KeymanagerError::Timeout`] when it elapses. Committed storage writes
//! are not rolled back on timeout.
//!
//! Errors are logged once here, at the boundary, with the scope and the
//! error kind. Key material never appears in logs.

use std::{future::Future, sync::Arc, time::Duration};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::NaiveDateTime;
use keymint_storage::{AliasId, AliasIndex, MetadataStamper, PolicyStore, WrappedKeyStore};
use thiserror::Error;

use crate::{
    cert::CertificateSource,
    clock::Clock,
    crypto::{AsymmetricCrypto, RsaCrypto, RsaKeypairGenerator},
    error::{KeymanagerError, Result},
    planner::ExpiryPlanner,
    resolver::KeyResolver,
    scope::KeyScope,
    vault::HsmKeyVault,
};

/// Smallest RSA modulus the service will mint, in bits.
///
/// Keys below this size offer no meaningful protection for wrapped
/// private material, so the config refuses them outright.
pub const MIN_RSA_KEY_BITS: usize = 2048;

/// A [`KeymanagerConfig`] the facade refuses to start with.
///
/// Raised from [`KeymanagerConfig::validate`] before any collaborator is
/// wired, so a bad config never yields a half-built facade.
///
/// # Non-exhaustive
///
/// Future validation rules may add variants, so downstream `match`es
/// need a trailing `_` arm.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// `operation_deadline` was zero, which would time every call out
    /// before its first store round-trip.
    #[error("operation_deadline of zero leaves no time for any operation")]
    ZeroDeadline,

    /// `rsa_key_bits` asked for keys smaller than the service is willing
    /// to mint.
    #[error("rsa_key_bits of {got} is below the 2048-bit minimum")]
    ModulusTooSmall {
        /// The configured modulus size.
        got: usize,
    },
}

/// Configuration for the [`Keymanager`] facade.
///
/// # Examples
///
/// ```
/// use keymint_keymanager::service::KeymanagerConfig;
///
/// let config = KeymanagerConfig::default();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, bon::Builder)]
pub struct KeymanagerConfig {
    /// Identity stamped into audit columns and audit events.
    #[builder(into, default = "keymint-service".to_owned())]
    pub actor: String,

    /// Deadline applied to operations that do not carry their own.
    #[builder(default = Duration::from_secs(30))]
    pub operation_deadline: Duration,

    /// Modulus size of minted RSA keys, in bits.
    #[builder(default = 2048)]
    pub rsa_key_bits: usize,
}

impl Default for KeymanagerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl KeymanagerConfig {
    /// Validates field constraints at construction time.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::ZeroDeadline`] when `operation_deadline` is zero
    /// - [`ConfigError::ModulusTooSmall`] when `rsa_key_bits` is below [`MIN_RSA_KEY_BITS`]
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.operation_deadline.is_zero() {
            return Err(ConfigError::ZeroDeadline);
        }
        if self.rsa_key_bits < MIN_RSA_KEY_BITS {
            return Err(ConfigError::ModulusTooSmall { got: self.rsa_key_bits });
        }
        Ok(())
    }
}

/// A vended public key with its validity window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyResponse {
    /// Alias of the key the response was served from.
    pub alias: AliasId,
    /// Base64 of the DER SubjectPublicKeyInfo.
    pub public_key: String,
    /// Start of the key's validity window.
    pub issued_at: NaiveDateTime,
    /// End of the key's validity window.
    pub expires_at: NaiveDateTime,
}

/// The key management facade.
///
/// Holds the resolver and the crypto primitives; collaborator handles are
/// injected at construction so tests can substitute in-memory stores and
/// a pinned clock.
pub struct Keymanager {
    resolver: KeyResolver,
    crypto: Arc<dyn AsymmetricCrypto>,
    clock: Arc<dyn Clock>,
    config: KeymanagerConfig,
}

impl Keymanager {
    /// Wires a facade over the given collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when `config` fails validation.
    pub fn new(
        config: KeymanagerConfig,
        aliases: Arc<dyn AliasIndex>,
        policies: Arc<dyn PolicyStore>,
        wrapped: Arc<dyn WrappedKeyStore>,
        vault: Arc<dyn HsmKeyVault>,
        certificates: Arc<dyn CertificateSource>,
        clock: Arc<dyn Clock>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;

        let crypto: Arc<dyn AsymmetricCrypto> = Arc::new(RsaCrypto);
        let resolver = KeyResolver::new(
            aliases,
            wrapped,
            vault,
            certificates,
            Arc::new(RsaKeypairGenerator::new(config.rsa_key_bits)),
            Arc::clone(&crypto),
            ExpiryPlanner::new(policies),
            MetadataStamper::new(config.actor.as_str()),
        );
        Ok(Self { resolver, crypto, clock, config })
    }

    /// Fetches the public key current at `timestamp` for the scope,
    /// minting a keypair on first use.
    pub async fn get_public_key(
        &self,
        application_id: &str,
        timestamp: &str,
        reference_id: Option<&str>,
        deadline: Option<Duration>,
    ) -> Result<PublicKeyResponse> {
        let scope = KeyScope::new(application_id, reference_id);
        let result = self
            .with_deadline(deadline, async {
                let ts = parse_timestamp(timestamp)?;
                let material = self.resolver.resolve_public(&scope, ts).await?;
                Ok(PublicKeyResponse {
                    alias: material.key.alias,
                    public_key: BASE64.encode(&material.spki_der),
                    issued_at: material.key.generated_at,
                    expires_at: material.key.expires_at,
                })
            })
            .await;
        finish("get_public_key", &scope, result)
    }

    /// Unwraps a symmetric key the caller encrypted under a previously
    /// vended public key. Returns the Base64 of the plaintext key bytes.
    ///
    /// This path never mints: the caller already encrypted against some
    /// public key, and a fresh keypair could not unwrap it. When no alias
    /// covers `timestamp` the call fails with
    /// [`KeymanagerError::NoCurrentKey`].
    pub async fn decrypt_symmetric_key(
        &self,
        application_id: &str,
        reference_id: Option<&str>,
        timestamp: &str,
        encrypted_symmetric_key: &str,
        deadline: Option<Duration>,
    ) -> Result<String> {
        let scope = KeyScope::new(application_id, reference_id);
        let result = self
            .with_deadline(deadline, async {
                let ts = parse_timestamp(timestamp)?;
                let resolved = self.resolver.resolve_existing(&scope, ts).await?;
                let private_key = self.resolver.private_key(&scope, &resolved).await?;
                let wrapped = decode_base64(encrypted_symmetric_key)?;
                let symmetric_key = self.crypto.private_decrypt(&private_key, &wrapped)?;
                Ok(BASE64.encode(&symmetric_key))
            })
            .await;
        finish("decrypt_symmetric_key", &scope, result)
    }

    /// Applies the scope's private key to `data` and returns the Base64
    /// result, minting via the public-key path first when needed.
    ///
    /// Note that applying the private key is signing semantics, not
    /// confidentiality — anyone holding the public key can recover
    /// `data`. The operation is kept with these semantics for callers
    /// that bind data to the scope's key; review before using it to
    /// protect secrets.
    pub async fn encrypt(
        &self,
        application_id: &str,
        reference_id: Option<&str>,
        timestamp: &str,
        data: &[u8],
        deadline: Option<Duration>,
    ) -> Result<String> {
        let scope = KeyScope::new(application_id, reference_id);
        let result = self
            .with_deadline(deadline, async {
                let ts = parse_timestamp(timestamp)?;
                // Mint through the public-key path so the key served here
                // is the same one a caller fetching the public key sees.
                let material = self.resolver.resolve_public(&scope, ts).await?;
                let private_key = self.resolver.private_key(&scope, &material.key).await?;
                let transformed = self.crypto.private_encrypt(&private_key, data)?;
                Ok(BASE64.encode(&transformed))
            })
            .await;
        finish("encrypt", &scope, result)
    }

    /// Signs `data` with the scope's certificate-bound key, minting the
    /// certificate entry on first use. Returns the Base64 signature.
    ///
    /// The certificate is validated against the injected clock before
    /// use; entries outside their validity window fail with
    /// [`KeymanagerError::CertificateInvalid`].
    pub async fn sign(
        &self,
        application_id: &str,
        reference_id: Option<&str>,
        timestamp: &str,
        data: &[u8],
        deadline: Option<Duration>,
    ) -> Result<String> {
        let scope = KeyScope::new(application_id, reference_id);
        let result = self
            .with_deadline(deadline, async {
                let ts = parse_timestamp(timestamp)?;
                let entry = self.resolver.resolve_certificate(&scope, ts).await?;
                entry.ensure_valid(self.clock.as_ref())?;
                let signature = self.crypto.private_encrypt(&entry.private_key_der, data)?;
                Ok(BASE64.encode(&signature))
            })
            .await;
        finish("sign", &scope, result)
    }

    /// Verifies a signature produced by [`sign`](Keymanager::sign) against
    /// the scope's certificate-bound key, returning the Base64 of the
    /// recovered data.
    ///
    /// Resolution mints on miss exactly like `sign` does; a signature
    /// made under an earlier certificate entry cannot verify against a
    /// freshly minted one, so callers must verify within the signing
    /// key's window.
    pub async fn verify(
        &self,
        application_id: &str,
        reference_id: Option<&str>,
        timestamp: &str,
        signature: &str,
        deadline: Option<Duration>,
    ) -> Result<String> {
        let scope = KeyScope::new(application_id, reference_id);
        let result = self
            .with_deadline(deadline, async {
                let ts = parse_timestamp(timestamp)?;
                let entry = self.resolver.resolve_certificate(&scope, ts).await?;
                entry.ensure_valid(self.clock.as_ref())?;
                let signature = decode_base64(signature)?;
                let recovered = self.crypto.public_decrypt(&entry.public_key_der, &signature)?;
                Ok(BASE64.encode(&recovered))
            })
            .await;
        finish("verify", &scope, result)
    }

    async fn with_deadline<T, F>(&self, deadline: Option<Duration>, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let limit = deadline.unwrap_or(self.config.operation_deadline);
        match tokio::time::timeout(limit, operation).await {
            Ok(result) => result,
            Err(_) => Err(KeymanagerError::Timeout),
        }
    }
}

fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    raw.parse().map_err(|_| KeymanagerError::InvalidTimestamp(raw.to_owned()))
}

fn decode_base64(raw: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(raw)
        .map_err(|e| KeymanagerError::Crypto(format!("invalid base64 input: {e}")))
}

/// Logs a failed operation once at the boundary and passes the result on.
fn finish<T>(operation: &'static str, scope: &KeyScope, result: Result<T>) -> Result<T> {
    if let Err(ref err) = result {
        tracing::warn!(
            operation,
            scope = %scope,
            kind = err.kind(),
            error = %err,
            "key management operation failed"
        );
    }
    result
}
