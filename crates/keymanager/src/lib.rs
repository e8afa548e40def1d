//! # keymint key manager
//!
//! Tenant-scoped asymmetric key management: lazily mints, persists and
//! vends RSA key material keyed by `(application, reference, timestamp)`,
//! with validity windows derived from per-application policies.
//!
//! This crate provides:
//! - **Key resolution**: the unique current alias for a scope and instant, minted on first use
//! - **Two-tier hierarchy**: HSM-resident master keys wrap the private halves of store-resident
//!   reference keys
//! - **Crypto facade**: public-key fetch, symmetric-key unwrap, encrypt, sign, verify
//!
//! ## Invariants
//!
//! - At any instant at most one current alias exists per scope
//! - Validity windows of a scope never overlap
//! - Resolution is idempotent until the selected window ends
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use keymint_keymanager::cert::PemFileCertificateSource;
//! use keymint_keymanager::clock::SystemClock;
//! use keymint_keymanager::service::{Keymanager, KeymanagerConfig};
//! use keymint_keymanager::vault::SoftHsmVault;
//! use keymint_storage::{MemoryAliasIndex, MemoryPolicyStore, MemoryWrappedKeyStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let keymanager = Keymanager::new(
//!     KeymanagerConfig::default(),
//!     Arc::new(MemoryAliasIndex::new()),
//!     Arc::new(MemoryPolicyStore::new()),
//!     Arc::new(MemoryWrappedKeyStore::new()),
//!     Arc::new(SoftHsmVault::new()),
//!     Arc::new(PemFileCertificateSource::new("cert.pem", "privkey.pem")),
//!     Arc::new(SystemClock),
//! )?;
//!
//! let response = keymanager
//!     .get_public_key("KERNEL", "2024-01-01T00:00:00", None, None)
//!     .await?;
//! println!("current key {} expires {}", response.alias, response.expires_at);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Certificate entries and sources.
pub mod cert;
/// Injectable time source.
pub mod clock;
/// RSA primitives behind the crypto seams.
pub mod crypto;
/// Key management error types.
pub mod error;
/// Per-scope mint serialization.
pub mod locks;
/// Expiry planning.
pub mod planner;
/// Key resolution and minting.
pub mod resolver;
/// Key scopes.
pub mod scope;
/// The crypto facade.
pub mod service;
/// HSM key vault.
pub mod vault;

// Re-export key types for convenience
pub use cert::{CertificateEntry, CertificateSource};
pub use clock::{Clock, SystemClock};
pub use error::{KeymanagerError, Result};
pub use resolver::{KeyResolver, PublicKeyMaterial, ResolvedKey};
pub use scope::{KeyLocation, KeyScope};
pub use service::{ConfigError, Keymanager, KeymanagerConfig, PublicKeyResponse};
pub use vault::{HsmKeyVault, SoftHsmVault};
