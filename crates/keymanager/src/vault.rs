//! HSM key vault: opaque storage for HSM-resident key material.
//!
//! Master keypairs and certificate-bound keys never leave the HSM wrapped
//! or otherwise — the vault vends key material by alias and the alias
//! index decides which alias is current. The [`HsmKeyVault`] trait is the
//! seam a PKCS#11-backed implementation plugs into; [`SoftHsmVault`] is
//! the software stand-in used for tests and development.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use keymint_storage::{AliasId, StorageError, StorageResult};
use parking_lot::RwLock;
use zeroize::Zeroizing;

use crate::{cert::CertificateEntry, crypto::GeneratedKeypair};

/// Opaque store for asymmetric key entries and certificate chains,
/// addressed by alias.
///
/// The vault is authoritative for master keys and certificate-bound keys.
/// It tolerates concurrent readers and serializes writes per alias;
/// writing an alias that already exists is a conflict, never an
/// overwrite.
#[async_trait]
pub trait HsmKeyVault: Send + Sync {
    /// Persists an unwrapped asymmetric keypair at `alias` with its
    /// validity window.
    async fn store_keypair(
        &self,
        alias: &AliasId,
        keypair: &GeneratedKeypair,
        generated_at: NaiveDateTime,
        expires_at: NaiveDateTime,
    ) -> StorageResult<()>;

    /// Persists a certificate chain plus matching private key at `alias`.
    async fn store_certificate(
        &self,
        alias: &AliasId,
        entry: &CertificateEntry,
    ) -> StorageResult<()>;

    /// Returns the DER SubjectPublicKeyInfo stored at `alias`.
    ///
    /// Works for both raw keypairs and certificate entries (the leaf's
    /// public key).
    async fn public_key(&self, alias: &AliasId) -> StorageResult<Vec<u8>>;

    /// Returns the PKCS#8 DER private key stored at `alias`.
    async fn private_key(&self, alias: &AliasId) -> StorageResult<Zeroizing<Vec<u8>>>;

    /// Returns the certificate entry stored at `alias`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when the alias is absent or
    /// holds a raw keypair rather than a certificate entry.
    async fn certificate_entry(&self, alias: &AliasId) -> StorageResult<CertificateEntry>;

    /// Lists every alias the vault holds.
    async fn aliases(&self) -> StorageResult<Vec<AliasId>>;
}

enum VaultEntry {
    Keypair {
        public_key_der: Vec<u8>,
        private_key_der: Zeroizing<Vec<u8>>,
        generated_at: NaiveDateTime,
        expires_at: NaiveDateTime,
    },
    Certificate(CertificateEntry),
}

/// Software vault holding entries in process memory.
///
/// # Cloning
///
/// Cheaply cloneable via [`Arc`]; all clones share the same entries.
#[derive(Clone, Default)]
pub struct SoftHsmVault {
    entries: Arc<RwLock<HashMap<AliasId, VaultEntry>>>,
}

impl SoftHsmVault {
    /// Creates an empty vault.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the validity window stored with a keypair entry.
    ///
    /// Test introspection; the alias index is the source of truth for
    /// selection.
    pub fn stored_window(&self, alias: &AliasId) -> StorageResult<(NaiveDateTime, NaiveDateTime)> {
        let entries = self.entries.read();
        match entries.get(alias) {
            Some(VaultEntry::Keypair { generated_at, expires_at, .. }) => {
                Ok((*generated_at, *expires_at))
            },
            _ => Err(StorageError::not_found(alias.to_string())),
        }
    }

    fn insert(&self, alias: &AliasId, entry: VaultEntry) -> StorageResult<()> {
        let mut entries = self.entries.write();
        match entries.entry(*alias) {
            std::collections::hash_map::Entry::Occupied(_) => {
                Err(StorageError::conflict(alias.to_string()))
            },
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            },
        }
    }
}

#[async_trait]
impl HsmKeyVault for SoftHsmVault {
    #[tracing::instrument(skip(self, keypair), fields(alias = %alias))]
    async fn store_keypair(
        &self,
        alias: &AliasId,
        keypair: &GeneratedKeypair,
        generated_at: NaiveDateTime,
        expires_at: NaiveDateTime,
    ) -> StorageResult<()> {
        self.insert(
            alias,
            VaultEntry::Keypair {
                public_key_der: keypair.public_key_der.clone(),
                private_key_der: keypair.private_key_der.clone(),
                generated_at,
                expires_at,
            },
        )
    }

    #[tracing::instrument(skip(self, entry), fields(alias = %alias))]
    async fn store_certificate(
        &self,
        alias: &AliasId,
        entry: &CertificateEntry,
    ) -> StorageResult<()> {
        self.insert(alias, VaultEntry::Certificate(entry.clone()))
    }

    #[tracing::instrument(skip(self), fields(alias = %alias))]
    async fn public_key(&self, alias: &AliasId) -> StorageResult<Vec<u8>> {
        let entries = self.entries.read();
        match entries.get(alias) {
            Some(VaultEntry::Keypair { public_key_der, .. }) => Ok(public_key_der.clone()),
            Some(VaultEntry::Certificate(entry)) => Ok(entry.public_key_der.clone()),
            None => Err(StorageError::not_found(alias.to_string())),
        }
    }

    #[tracing::instrument(skip(self), fields(alias = %alias))]
    async fn private_key(&self, alias: &AliasId) -> StorageResult<Zeroizing<Vec<u8>>> {
        let entries = self.entries.read();
        match entries.get(alias) {
            Some(VaultEntry::Keypair { private_key_der, .. }) => Ok(private_key_der.clone()),
            Some(VaultEntry::Certificate(entry)) => Ok(entry.private_key_der.clone()),
            None => Err(StorageError::not_found(alias.to_string())),
        }
    }

    #[tracing::instrument(skip(self), fields(alias = %alias))]
    async fn certificate_entry(&self, alias: &AliasId) -> StorageResult<CertificateEntry> {
        let entries = self.entries.read();
        match entries.get(alias) {
            Some(VaultEntry::Certificate(entry)) => Ok(entry.clone()),
            _ => Err(StorageError::not_found(alias.to_string())),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn aliases(&self) -> StorageResult<Vec<AliasId>> {
        Ok(self.entries.read().keys().copied().collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::crypto::{KeypairGenerator, RsaKeypairGenerator};

    fn ts(s: &str) -> NaiveDateTime {
        s.parse().unwrap()
    }

    fn certificate_entry() -> CertificateEntry {
        CertificateEntry {
            chain_der: vec![vec![0x30, 0x03]],
            private_key_der: Zeroizing::new(vec![0x02]),
            public_key_der: vec![0x01],
            not_before: ts("2024-01-01T00:00:00"),
            not_after: ts("2025-01-01T00:00:00"),
        }
    }

    #[tokio::test]
    async fn test_keypair_roundtrip() {
        let vault = SoftHsmVault::new();
        let alias = AliasId::random();
        let keypair = RsaKeypairGenerator::default().generate().unwrap();

        vault
            .store_keypair(&alias, &keypair, ts("2024-01-01T00:00:00"), ts("2024-06-29T00:00:00"))
            .await
            .unwrap();

        assert_eq!(vault.public_key(&alias).await.unwrap(), keypair.public_key_der);
        assert_eq!(
            vault.private_key(&alias).await.unwrap().as_slice(),
            keypair.private_key_der.as_slice()
        );
        assert_eq!(
            vault.stored_window(&alias).unwrap(),
            (ts("2024-01-01T00:00:00"), ts("2024-06-29T00:00:00"))
        );
    }

    #[tokio::test]
    async fn test_certificate_roundtrip() {
        let vault = SoftHsmVault::new();
        let alias = AliasId::random();
        let entry = certificate_entry();

        vault.store_certificate(&alias, &entry).await.unwrap();

        let fetched = vault.certificate_entry(&alias).await.unwrap();
        assert_eq!(fetched.chain_der, entry.chain_der);
        assert_eq!(fetched.not_after, entry.not_after);
        // The public and private halves are reachable through the generic
        // accessors as well.
        assert_eq!(vault.public_key(&alias).await.unwrap(), entry.public_key_der);
        assert_eq!(
            vault.private_key(&alias).await.unwrap().as_slice(),
            entry.private_key_der.as_slice()
        );
    }

    #[tokio::test]
    async fn test_unknown_alias_is_not_found() {
        let vault = SoftHsmVault::new();
        let alias = AliasId::random();
        assert!(matches!(
            vault.public_key(&alias).await,
            Err(StorageError::NotFound { .. })
        ));
        assert!(matches!(
            vault.private_key(&alias).await,
            Err(StorageError::NotFound { .. })
        ));
        assert!(matches!(
            vault.certificate_entry(&alias).await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_keypair_alias_is_not_a_certificate_entry() {
        let vault = SoftHsmVault::new();
        let alias = AliasId::random();
        let keypair = RsaKeypairGenerator::default().generate().unwrap();
        vault
            .store_keypair(&alias, &keypair, ts("2024-01-01T00:00:00"), ts("2024-06-29T00:00:00"))
            .await
            .unwrap();

        assert!(matches!(
            vault.certificate_entry(&alias).await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_writes_per_alias_never_overwrite() {
        let vault = SoftHsmVault::new();
        let alias = AliasId::random();
        let keypair = RsaKeypairGenerator::default().generate().unwrap();

        vault
            .store_keypair(&alias, &keypair, ts("2024-01-01T00:00:00"), ts("2024-06-29T00:00:00"))
            .await
            .unwrap();

        let again = vault
            .store_keypair(&alias, &keypair, ts("2024-01-01T00:00:00"), ts("2024-06-29T00:00:00"))
            .await;
        assert!(matches!(again, Err(StorageError::Conflict { .. })));

        let cert = vault.store_certificate(&alias, &certificate_entry()).await;
        assert!(matches!(cert, Err(StorageError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_aliases_lists_every_entry() {
        let vault = SoftHsmVault::new();
        let keypair = RsaKeypairGenerator::default().generate().unwrap();

        let a = AliasId::random();
        let b = AliasId::random();
        vault
            .store_keypair(&a, &keypair, ts("2024-01-01T00:00:00"), ts("2024-06-29T00:00:00"))
            .await
            .unwrap();
        vault.store_certificate(&b, &certificate_entry()).await.unwrap();

        let mut aliases = vault.aliases().await.unwrap();
        aliases.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(aliases, expected);
    }
}
