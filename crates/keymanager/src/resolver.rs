//! Key resolution: selection plus lazy minting.
//!
//! The resolver answers one question — which alias is current for a scope
//! at an instant — and mints the key on first use when the answer is
//! "none". Selection reads the alias index; minting writes the backing
//! material (HSM vault or wrapped-key store) first and the alias row
//! second, under a per-scope lock with a read-after-acquire re-check so
//! concurrent first users agree on a single alias.
//!
//! # Mint placement
//!
//! | Scope | Material | Expiry candidate |
//! |-------|----------|------------------|
//! | master (no reference) | fresh keypair in the HSM vault | policy |
//! | reference | fresh keypair in the store, private half wrapped under the master key | policy |
//! | either, certificate-bound | configured chain + key in the HSM vault | certificate `notAfter` |
//!
//! A reference-scope mint resolves the master scope first — taking and
//! releasing the master lock before acquiring the reference lock — so two
//! scope locks are never held at once.

use std::sync::Arc;

use chrono::NaiveDateTime;
use keymint_storage::{
    AliasId, AliasIndex, KeyAlias, MetadataStamper, StorageError, WrappedKey, WrappedKeyStore,
};
use zeroize::Zeroizing;

use crate::{
    cert::{CertificateEntry, CertificateSource},
    crypto::{AsymmetricCrypto, KeypairGenerator},
    error::{KeymanagerError, Result},
    locks::ScopeLocks,
    planner::{ExpiryCandidate, ExpiryPlanner},
    scope::{KeyLocation, KeyScope},
    vault::HsmKeyVault,
};

/// The outcome of a resolution: an alias, its window, and where its
/// material lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedKey {
    /// Alias the key material is stored under.
    pub alias: AliasId,
    /// Start of the validity window.
    pub generated_at: NaiveDateTime,
    /// End of the validity window.
    pub expires_at: NaiveDateTime,
    /// Which store holds the material.
    pub location: KeyLocation,
}

/// A resolved key together with its public half.
#[derive(Debug)]
pub struct PublicKeyMaterial {
    /// The resolved alias and window.
    pub key: ResolvedKey,
    /// DER SubjectPublicKeyInfo of the public half.
    pub spki_der: Vec<u8>,
}

/// Resolves scopes to current key material, minting on first use.
pub struct KeyResolver {
    aliases: Arc<dyn AliasIndex>,
    wrapped: Arc<dyn WrappedKeyStore>,
    vault: Arc<dyn HsmKeyVault>,
    certificates: Arc<dyn CertificateSource>,
    keypairs: Arc<dyn KeypairGenerator>,
    crypto: Arc<dyn AsymmetricCrypto>,
    planner: ExpiryPlanner,
    locks: ScopeLocks,
    stamper: MetadataStamper,
}

impl KeyResolver {
    /// Creates a resolver over the given collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        aliases: Arc<dyn AliasIndex>,
        wrapped: Arc<dyn WrappedKeyStore>,
        vault: Arc<dyn HsmKeyVault>,
        certificates: Arc<dyn CertificateSource>,
        keypairs: Arc<dyn KeypairGenerator>,
        crypto: Arc<dyn AsymmetricCrypto>,
        planner: ExpiryPlanner,
        stamper: MetadataStamper,
    ) -> Self {
        Self {
            aliases,
            wrapped,
            vault,
            certificates,
            keypairs,
            crypto,
            planner,
            locks: ScopeLocks::new(),
            stamper,
        }
    }

    /// Resolves the current public key for a scope, minting when no
    /// window covers `ts`.
    #[tracing::instrument(skip(self), fields(scope = %scope, ts = %ts))]
    pub async fn resolve_public(
        &self,
        scope: &KeyScope,
        ts: NaiveDateTime,
    ) -> Result<PublicKeyMaterial> {
        match scope.location() {
            KeyLocation::Hsm => self.resolve_hsm(scope, ts).await,
            KeyLocation::Store => self.resolve_store(scope, ts).await,
        }
    }

    /// Resolves the current alias for a scope without ever minting.
    ///
    /// # Errors
    ///
    /// - [`KeymanagerError::NoCurrentKey`] when no window covers `ts`
    /// - [`KeymanagerError::NoUniqueAlias`] when more than one does
    #[tracing::instrument(skip(self), fields(scope = %scope, ts = %ts))]
    pub async fn resolve_existing(&self, scope: &KeyScope, ts: NaiveDateTime) -> Result<ResolvedKey> {
        let rows = self.list(scope).await?;
        match current_of(scope, &rows, ts)? {
            Some(current) => Ok(resolved_from(scope, current)),
            None => Err(KeymanagerError::NoCurrentKey { scope: scope.to_string() }),
        }
    }

    /// Resolves the certificate entry for a scope, minting a
    /// certificate-bound alias when no window covers `ts`.
    ///
    /// The freshly loaded entry's expiry candidate is the certificate's
    /// `notAfter`, not the application policy.
    #[tracing::instrument(skip(self), fields(scope = %scope, ts = %ts))]
    pub async fn resolve_certificate(
        &self,
        scope: &KeyScope,
        ts: NaiveDateTime,
    ) -> Result<CertificateEntry> {
        let rows = self.list(scope).await?;
        if let Some(current) = current_of(scope, &rows, ts)? {
            return self.certificate_material(scope, current).await;
        }

        let _guard = self.locks.acquire(scope).await;
        let rows = self.list(scope).await?;
        if let Some(current) = current_of(scope, &rows, ts)? {
            return self.certificate_material(scope, current).await;
        }

        let entry =
            self.certificates.load(scope.application_id(), scope.reference_id()).await?;
        let expires_at = self
            .planner
            .plan(
                scope.application_id(),
                ts,
                &rows,
                ExpiryCandidate::Certificate { not_after: entry.not_after },
            )
            .await?;

        let alias = AliasId::random();
        self.vault.store_certificate(&alias, &entry).await?;
        self.insert_alias(scope, alias, ts, expires_at).await?;
        tracing::info!(scope = %scope, alias = %alias, "minted certificate-bound key");
        Ok(entry)
    }

    /// Recovers the private key for a resolved alias.
    ///
    /// HSM-resident keys come straight from the vault. Store-resident keys
    /// are unwrapped with the master private key and must parse as PKCS#8
    /// before they are handed out.
    #[tracing::instrument(skip(self, resolved), fields(scope = %scope, alias = %resolved.alias))]
    pub async fn private_key(
        &self,
        scope: &KeyScope,
        resolved: &ResolvedKey,
    ) -> Result<Zeroizing<Vec<u8>>> {
        match resolved.location {
            KeyLocation::Hsm => self
                .vault
                .private_key(&resolved.alias)
                .await
                .map_err(|e| material_error(scope, e)),
            KeyLocation::Store => {
                let row = self
                    .wrapped
                    .get(&resolved.alias)
                    .await?
                    .ok_or_else(|| KeymanagerError::NoUniqueAlias { scope: scope.to_string() })?;
                let master_private = self
                    .vault
                    .private_key(&row.master_alias)
                    .await
                    .map_err(|e| material_error(scope, e))?;
                let private = self.crypto.private_decrypt(&master_private, &row.private_key)?;
                self.crypto.validate_private_key(&private)?;
                Ok(private)
            },
        }
    }

    async fn resolve_hsm(&self, scope: &KeyScope, ts: NaiveDateTime) -> Result<PublicKeyMaterial> {
        let rows = self.list(scope).await?;
        if let Some(current) = current_of(scope, &rows, ts)? {
            return self.hsm_material(scope, current).await;
        }

        let _guard = self.locks.acquire(scope).await;
        let rows = self.list(scope).await?;
        if let Some(current) = current_of(scope, &rows, ts)? {
            return self.hsm_material(scope, current).await;
        }

        let expires_at =
            self.planner.plan(scope.application_id(), ts, &rows, ExpiryCandidate::Policy).await?;
        let alias = AliasId::random();
        let keypair = self.keypairs.generate()?;
        self.vault.store_keypair(&alias, &keypair, ts, expires_at).await?;
        self.insert_alias(scope, alias, ts, expires_at).await?;
        tracing::info!(scope = %scope, alias = %alias, "minted HSM-resident keypair");

        Ok(PublicKeyMaterial {
            key: ResolvedKey { alias, generated_at: ts, expires_at, location: KeyLocation::Hsm },
            spki_der: keypair.public_key_der,
        })
    }

    async fn resolve_store(&self, scope: &KeyScope, ts: NaiveDateTime) -> Result<PublicKeyMaterial> {
        let rows = self.list(scope).await?;
        if let Some(current) = current_of(scope, &rows, ts)? {
            return self.store_material(scope, current).await;
        }

        // Master material first. The master lock is taken and released
        // inside this call, before the reference lock below, so two scope
        // locks are never held at once.
        let master = self.resolve_hsm(&scope.master_scope(), ts).await?;

        let _guard = self.locks.acquire(scope).await;
        let rows = self.list(scope).await?;
        if let Some(current) = current_of(scope, &rows, ts)? {
            return self.store_material(scope, current).await;
        }

        let expires_at =
            self.planner.plan(scope.application_id(), ts, &rows, ExpiryCandidate::Policy).await?;
        let alias = AliasId::random();
        let keypair = self.keypairs.generate()?;
        let wrapped_private =
            self.crypto.public_encrypt(&master.spki_der, &keypair.private_key_der)?;

        let row = WrappedKey::builder()
            .alias(alias)
            .master_alias(master.key.alias)
            .public_key(keypair.public_key_der.clone())
            .private_key(wrapped_private)
            .metadata(self.stamper.stamp())
            .build();
        self.wrapped.insert(&row).await?;

        if let Err(err) = self.insert_alias(scope, alias, ts, expires_at).await {
            // The alias row never became visible; remove the unreachable
            // material best-effort.
            if let Err(cleanup) = self.wrapped.delete(&alias).await {
                tracing::warn!(
                    scope = %scope,
                    alias = %alias,
                    error = %cleanup,
                    "orphaned wrapped key left behind after failed mint"
                );
            }
            return Err(err);
        }
        tracing::info!(scope = %scope, alias = %alias, master_alias = %master.key.alias, "minted store-resident keypair");

        Ok(PublicKeyMaterial {
            key: ResolvedKey { alias, generated_at: ts, expires_at, location: KeyLocation::Store },
            spki_der: keypair.public_key_der,
        })
    }

    async fn hsm_material(&self, scope: &KeyScope, current: &KeyAlias) -> Result<PublicKeyMaterial> {
        let spki_der = self
            .vault
            .public_key(&current.alias)
            .await
            .map_err(|e| material_error(scope, e))?;
        Ok(PublicKeyMaterial { key: resolved_from(scope, current), spki_der })
    }

    async fn store_material(
        &self,
        scope: &KeyScope,
        current: &KeyAlias,
    ) -> Result<PublicKeyMaterial> {
        let row = self
            .wrapped
            .get(&current.alias)
            .await?
            .ok_or_else(|| KeymanagerError::NoUniqueAlias { scope: scope.to_string() })?;
        Ok(PublicKeyMaterial { key: resolved_from(scope, current), spki_der: row.public_key })
    }

    async fn certificate_material(
        &self,
        scope: &KeyScope,
        current: &KeyAlias,
    ) -> Result<CertificateEntry> {
        self.vault.certificate_entry(&current.alias).await.map_err(|e| material_error(scope, e))
    }

    async fn list(&self, scope: &KeyScope) -> Result<Vec<KeyAlias>> {
        Ok(self.aliases.list_by_scope(scope.application_id(), scope.reference_id()).await?)
    }

    async fn insert_alias(
        &self,
        scope: &KeyScope,
        alias: AliasId,
        generated_at: NaiveDateTime,
        expires_at: NaiveDateTime,
    ) -> Result<()> {
        let row = KeyAlias::builder()
            .alias(alias)
            .application_id(scope.application_id().clone())
            .maybe_reference_id(scope.reference_id().cloned())
            .key_generation_time(generated_at)
            .key_expiry_time(expires_at)
            .metadata(self.stamper.stamp())
            .build();
        Ok(self.aliases.insert(&row).await?)
    }
}

/// Picks the unique covering alias, failing when more than one covers.
fn current_of<'a>(
    scope: &KeyScope,
    rows: &'a [KeyAlias],
    ts: NaiveDateTime,
) -> Result<Option<&'a KeyAlias>> {
    let mut covering = rows.iter().filter(|row| row.covers(ts));
    let first = covering.next();
    if covering.next().is_some() {
        return Err(KeymanagerError::NoUniqueAlias { scope: scope.to_string() });
    }
    Ok(first)
}

fn resolved_from(scope: &KeyScope, row: &KeyAlias) -> ResolvedKey {
    ResolvedKey {
        alias: row.alias,
        generated_at: row.key_generation_time,
        expires_at: row.key_expiry_time,
        location: scope.location(),
    }
}

/// Maps a material-store miss onto the index/material inconsistency
/// signal: a resolved alias whose material is not retrievable must never
/// be handed to a caller.
fn material_error(scope: &KeyScope, err: StorageError) -> KeymanagerError {
    match err {
        StorageError::NotFound { .. } => {
            KeymanagerError::NoUniqueAlias { scope: scope.to_string() }
        },
        other => KeymanagerError::Store(other),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use keymint_storage::{
        MemoryAliasIndex, MemoryPolicyStore, MemoryWrappedKeyStore, KeyPolicy,
    };

    use super::*;
    use crate::{
        cert::StaticCertificateSource,
        crypto::{RsaCrypto, RsaKeypairGenerator},
    };

    fn ts(s: &str) -> NaiveDateTime {
        s.parse().unwrap()
    }

    fn test_entry() -> CertificateEntry {
        CertificateEntry {
            chain_der: vec![vec![0x30, 0x03, 0x02, 0x01, 0x00]],
            private_key_der: Zeroizing::new(vec![0x30]),
            public_key_der: vec![0x30],
            not_before: ts("2024-01-01T00:00:00"),
            not_after: ts("2026-01-01T00:00:00"),
        }
    }

    struct Fixture {
        aliases: Arc<MemoryAliasIndex>,
        wrapped: Arc<MemoryWrappedKeyStore>,
        policies: Arc<MemoryPolicyStore>,
        resolver: KeyResolver,
    }

    fn fixture() -> Fixture {
        let aliases = Arc::new(MemoryAliasIndex::new());
        let wrapped = Arc::new(MemoryWrappedKeyStore::new());
        let policies = Arc::new(MemoryPolicyStore::new());
        let vault = Arc::new(crate::vault::SoftHsmVault::new());

        let resolver = KeyResolver::new(
            aliases.clone(),
            wrapped.clone(),
            vault,
            Arc::new(StaticCertificateSource::new(test_entry())),
            Arc::new(RsaKeypairGenerator::default()),
            Arc::new(RsaCrypto),
            ExpiryPlanner::new(policies.clone()),
            MetadataStamper::new("resolver-test"),
        );
        Fixture { aliases, wrapped, policies, resolver }
    }

    fn seed_policy(fixture: &Fixture, app: &str, days: u32) {
        fixture.policies.insert(
            KeyPolicy::builder()
                .application_id(app)
                .validity_days(days)
                .metadata(MetadataStamper::new("resolver-test").stamp())
                .build(),
        );
    }

    #[tokio::test]
    async fn test_hsm_mint_and_idempotent_reresolve() {
        let fx = fixture();
        seed_policy(&fx, "KERNEL", 180);
        let scope = KeyScope::master("KERNEL");

        let first = fx.resolver.resolve_public(&scope, ts("2024-01-01T00:00:00")).await.unwrap();
        assert_eq!(first.key.generated_at, ts("2024-01-01T00:00:00"));
        assert_eq!(first.key.expires_at, ts("2024-06-29T00:00:00"));
        assert_eq!(first.key.location, KeyLocation::Hsm);
        assert_eq!(fx.aliases.len(), 1);

        // Any instant inside the window selects the same alias, no mint.
        let again = fx.resolver.resolve_public(&scope, ts("2024-03-01T00:00:00")).await.unwrap();
        assert_eq!(again.key.alias, first.key.alias);
        assert_eq!(again.spki_der, first.spki_der);
        assert_eq!(fx.aliases.len(), 1);
    }

    #[tokio::test]
    async fn test_store_mint_also_mints_master() {
        let fx = fixture();
        seed_policy(&fx, "KERNEL", 180);
        let scope = KeyScope::new("KERNEL", Some("CLIENT-A"));

        let resolved = fx.resolver.resolve_public(&scope, ts("2024-01-01T00:00:00")).await.unwrap();
        assert_eq!(resolved.key.location, KeyLocation::Store);

        // Two alias rows: the reference key plus the master it required.
        assert_eq!(fx.aliases.len(), 2);
        assert_eq!(fx.wrapped.len(), 1);

        let row = fx.wrapped.get(&resolved.key.alias).await.unwrap().unwrap();
        let master_rows = fx
            .aliases
            .list_by_scope(scope.application_id(), None)
            .await
            .unwrap();
        assert_eq!(master_rows.len(), 1);
        assert_eq!(row.master_alias, master_rows[0].alias);
    }

    #[tokio::test]
    async fn test_store_private_key_unwraps_to_valid_pkcs8() {
        let fx = fixture();
        seed_policy(&fx, "KERNEL", 180);
        let scope = KeyScope::new("KERNEL", Some("CLIENT-A"));

        let resolved = fx.resolver.resolve_public(&scope, ts("2024-01-01T00:00:00")).await.unwrap();
        let private = fx.resolver.private_key(&scope, &resolved.key).await.unwrap();
        assert!(RsaCrypto.validate_private_key(&private).is_ok());
    }

    #[tokio::test]
    async fn test_resolve_existing_never_mints() {
        let fx = fixture();
        seed_policy(&fx, "KERNEL", 180);
        let scope = KeyScope::master("KERNEL");

        let err =
            fx.resolver.resolve_existing(&scope, ts("2024-01-01T00:00:00")).await.unwrap_err();
        assert_eq!(err.kind(), "NO_CURRENT_KEY");
        assert!(fx.aliases.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_application_fails_before_any_write() {
        let fx = fixture();
        let scope = KeyScope::master("UNKNOWN");

        let err = fx.resolver.resolve_public(&scope, ts("2024-01-01T00:00:00")).await.unwrap_err();
        assert_eq!(err.kind(), "INVALID_APPLICATION");
        assert!(fx.aliases.is_empty());
    }

    #[tokio::test]
    async fn test_two_covering_windows_is_no_unique_alias() {
        let fx = fixture();
        seed_policy(&fx, "KERNEL", 180);
        let scope = KeyScope::master("KERNEL");

        // Simulate a corrupted index: two rows covering the same instant.
        for _ in 0..2 {
            let row = KeyAlias::builder()
                .alias(AliasId::random())
                .application_id("KERNEL")
                .key_generation_time(ts("2024-01-01T00:00:00"))
                .key_expiry_time(ts("2024-06-29T00:00:00"))
                .metadata(MetadataStamper::new("corrupt").stamp())
                .build();
            fx.aliases.insert(&row).await.unwrap();
        }

        let err = fx.resolver.resolve_public(&scope, ts("2024-02-01T00:00:00")).await.unwrap_err();
        assert_eq!(err.kind(), "NO_UNIQUE_ALIAS");
    }

    #[tokio::test]
    async fn test_missing_wrapped_row_is_no_unique_alias() {
        let fx = fixture();
        seed_policy(&fx, "KERNEL", 180);
        let scope = KeyScope::new("KERNEL", Some("CLIENT-A"));

        // An alias row with no backing material.
        let row = KeyAlias::builder()
            .alias(AliasId::random())
            .application_id("KERNEL")
            .reference_id(keymint_storage::ReferenceId::from("CLIENT-A"))
            .key_generation_time(ts("2024-01-01T00:00:00"))
            .key_expiry_time(ts("2024-06-29T00:00:00"))
            .metadata(MetadataStamper::new("corrupt").stamp())
            .build();
        fx.aliases.insert(&row).await.unwrap();

        let err = fx.resolver.resolve_public(&scope, ts("2024-02-01T00:00:00")).await.unwrap_err();
        assert_eq!(err.kind(), "NO_UNIQUE_ALIAS");
    }

    #[tokio::test]
    async fn test_certificate_mint_uses_not_after() {
        let fx = fixture();
        let scope = KeyScope::master("KERNEL");

        let entry =
            fx.resolver.resolve_certificate(&scope, ts("2024-01-01T00:00:00")).await.unwrap();
        assert_eq!(entry.not_after, ts("2026-01-01T00:00:00"));

        let rows = fx.aliases.list_by_scope(scope.application_id(), None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key_expiry_time, ts("2026-01-01T00:00:00"));

        // Re-resolution returns the vault entry without loading again.
        let again =
            fx.resolver.resolve_certificate(&scope, ts("2024-06-01T00:00:00")).await.unwrap();
        assert_eq!(again.not_after, entry.not_after);
        assert_eq!(fx.aliases.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_window_mints_new_alias() {
        let fx = fixture();
        seed_policy(&fx, "KERNEL", 180);
        let scope = KeyScope::master("KERNEL");

        let first = fx.resolver.resolve_public(&scope, ts("2024-01-01T00:00:00")).await.unwrap();
        // Past the first window's expiry a new alias is minted.
        let second = fx.resolver.resolve_public(&scope, ts("2024-07-01T00:00:00")).await.unwrap();
        assert_ne!(first.key.alias, second.key.alias);
        assert_eq!(fx.aliases.len(), 2);

        // The two windows stay disjoint.
        let rows = fx.aliases.list_by_scope(scope.application_id(), None).await.unwrap();
        assert!(!rows[0].overlaps(rows[1].key_generation_time, rows[1].key_expiry_time));
    }

    #[tokio::test]
    async fn test_backdated_mint_truncates_against_existing_window() {
        let fx = fixture();
        seed_policy(&fx, "KERNEL", 365);
        let scope = KeyScope::master("KERNEL");

        fx.resolver.resolve_public(&scope, ts("2024-06-01T00:00:00")).await.unwrap();
        let backdated =
            fx.resolver.resolve_public(&scope, ts("2024-01-01T00:00:00")).await.unwrap();
        assert_eq!(backdated.key.expires_at, ts("2024-05-31T23:59:59"));
    }
}
