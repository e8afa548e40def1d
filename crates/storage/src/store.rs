//! Store traits for alias, policy and wrapped-key persistence.
//!
//! This module provides the three persistence traits the key management
//! core consumes, plus in-memory implementations for testing and
//! development. Production deployments back [`AliasIndex`] and
//! [`WrappedKeyStore`] with the relational database and [`PolicyStore`]
//! with the provisioning tables; the in-memory variants share the exact
//! same interface.
//!
//! # Tables
//!
//! ```text
//! key_alias  (alias PK, app_id, ref_id NULL, gen_ts, exp_ts, audit*)
//! key_policy (app_id PK, validity_days, audit*)
//! key_store  (alias PK, master_alias, public_key, private_key, audit*)
//! ```
//!
//! # Usage
//!
//! ```
//! use keymint_storage::{
//!     AliasId, AliasIndex, ApplicationId, KeyAlias, MemoryAliasIndex, MetadataStamper,
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let index = MemoryAliasIndex::new();
//! let row = KeyAlias::builder()
//!     .alias(AliasId::random())
//!     .application_id("KERNEL")
//!     .key_generation_time("2024-01-01T00:00:00".parse().unwrap())
//!     .key_expiry_time("2024-06-29T00:00:00".parse().unwrap())
//!     .metadata(MetadataStamper::new("doc-test").stamp())
//!     .build();
//!
//! index.insert(&row).await.unwrap();
//! let rows = index.list_by_scope(&ApplicationId::from("KERNEL"), None).await.unwrap();
//! assert_eq!(rows.len(), 1);
//! # });
//! ```

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{
    alias::KeyAlias,
    error::{StorageError, StorageResult},
    policy::KeyPolicy,
    types::{AliasId, ApplicationId, ReferenceId},
    wrapped::WrappedKey,
};

/// Persistent index of key aliases, the single source of truth for key
/// selection.
///
/// # Matching
///
/// [`list_by_scope`](AliasIndex::list_by_scope) matches the
/// `(application_id, reference_id)` pair exactly, including
/// `reference_id = NULL` when absent. Coercing empty or whitespace
/// reference strings to absent is the caller's job; the store matches
/// literally.
///
/// # Ordering
///
/// Rows come back ordered by generation time ascending. The expiry
/// planner's overlap truncation depends on this order.
///
/// # Concurrency
///
/// Concurrent inserts may briefly leave two windows covering the same
/// instant in flight. The resolver guards against this by re-listing under
/// a per-scope lock before minting; the index itself only promises durable
/// appends.
#[async_trait]
pub trait AliasIndex: Send + Sync {
    /// Lists every alias row for the exact scope, ordered by generation
    /// time ascending.
    ///
    /// # Arguments
    ///
    /// * `application_id` - Application the scope belongs to
    /// * `reference_id` - Sub-scope, or `None` for HSM-resident material
    async fn list_by_scope(
        &self,
        application_id: &ApplicationId,
        reference_id: Option<&ReferenceId>,
    ) -> StorageResult<Vec<KeyAlias>>;

    /// Appends a new alias row.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] if a row with the same alias
    /// already exists. There is no uniqueness constraint beyond the
    /// primary key.
    async fn insert(&self, row: &KeyAlias) -> StorageResult<()>;
}

/// Persistent map from application to key validity policy.
///
/// Policies are immutable during a process lifetime from the core's
/// perspective; there is deliberately no mutation surface here.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Fetches the policy for an application.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(policy))` if the application is provisioned
    /// - `Ok(None)` if it is not
    /// - `Err(...)` on storage errors
    async fn get(&self, application_id: &ApplicationId) -> StorageResult<Option<KeyPolicy>>;
}

/// Persistent map from alias to store-resident wrapped keypair.
#[async_trait]
pub trait WrappedKeyStore: Send + Sync {
    /// Fetches the wrapped keypair stored under `alias`.
    async fn get(&self, alias: &AliasId) -> StorageResult<Option<WrappedKey>>;

    /// Inserts a new wrapped keypair row.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] if a row with the same alias
    /// already exists. Rows are never updated in place.
    async fn insert(&self, row: &WrappedKey) -> StorageResult<()>;

    /// Deletes the row stored under `alias`.
    ///
    /// Only used to clean up backing material when the paired alias-index
    /// insert of a mint failed; resolved aliases are never deleted.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if no such row exists.
    async fn delete(&self, alias: &AliasId) -> StorageResult<()>;
}

/// In-memory implementation of [`AliasIndex`] for testing.
///
/// Stores rows in a thread-safe vector per scope. Does not persist data
/// between restarts.
///
/// # Cloning
///
/// Cheaply cloneable via [`Arc`]; all clones share the same rows.
#[derive(Debug, Default, Clone)]
pub struct MemoryAliasIndex {
    rows: Arc<RwLock<Vec<KeyAlias>>>,
}

impl MemoryAliasIndex {
    /// Creates a new empty in-memory index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of rows across all scopes.
    ///
    /// Test helper for asserting how many mints actually happened.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns `true` when the index holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[async_trait]
impl AliasIndex for MemoryAliasIndex {
    #[tracing::instrument(skip(self), fields(application_id = %application_id))]
    async fn list_by_scope(
        &self,
        application_id: &ApplicationId,
        reference_id: Option<&ReferenceId>,
    ) -> StorageResult<Vec<KeyAlias>> {
        let rows = self.rows.read();
        let mut matched: Vec<KeyAlias> = rows
            .iter()
            .filter(|row| {
                row.application_id == *application_id
                    && row.reference_id.as_ref() == reference_id
            })
            .cloned()
            .collect();
        matched.sort_by_key(|row| row.key_generation_time);
        Ok(matched)
    }

    #[tracing::instrument(skip(self, row), fields(alias = %row.alias))]
    async fn insert(&self, row: &KeyAlias) -> StorageResult<()> {
        let mut rows = self.rows.write();
        if rows.iter().any(|existing| existing.alias == row.alias) {
            return Err(StorageError::conflict(row.alias.to_string()));
        }
        rows.push(row.clone());
        Ok(())
    }
}

/// In-memory implementation of [`PolicyStore`] for testing.
///
/// Policies are seeded through [`insert`](MemoryPolicyStore::insert),
/// which exists only on the concrete type: the [`PolicyStore`] trait is
/// read-only because policy provisioning is an external concern.
#[derive(Debug, Default, Clone)]
pub struct MemoryPolicyStore {
    policies: Arc<RwLock<HashMap<ApplicationId, KeyPolicy>>>,
}

impl MemoryPolicyStore {
    /// Creates a new empty in-memory policy store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a policy, replacing any previous policy for the same
    /// application.
    pub fn insert(&self, policy: KeyPolicy) {
        self.policies.write().insert(policy.application_id.clone(), policy);
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    #[tracing::instrument(skip(self), fields(application_id = %application_id))]
    async fn get(&self, application_id: &ApplicationId) -> StorageResult<Option<KeyPolicy>> {
        Ok(self.policies.read().get(application_id).cloned())
    }
}

/// In-memory implementation of [`WrappedKeyStore`] for testing.
#[derive(Debug, Default, Clone)]
pub struct MemoryWrappedKeyStore {
    rows: Arc<RwLock<HashMap<AliasId, WrappedKey>>>,
}

impl MemoryWrappedKeyStore {
    /// Creates a new empty in-memory wrapped-key store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of rows held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns `true` when the store holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[async_trait]
impl WrappedKeyStore for MemoryWrappedKeyStore {
    #[tracing::instrument(skip(self), fields(alias = %alias))]
    async fn get(&self, alias: &AliasId) -> StorageResult<Option<WrappedKey>> {
        Ok(self.rows.read().get(alias).cloned())
    }

    #[tracing::instrument(skip(self, row), fields(alias = %row.alias))]
    async fn insert(&self, row: &WrappedKey) -> StorageResult<()> {
        let mut rows = self.rows.write();
        match rows.entry(row.alias) {
            std::collections::hash_map::Entry::Occupied(_) => {
                Err(StorageError::conflict(row.alias.to_string()))
            },
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(row.clone());
                Ok(())
            },
        }
    }

    #[tracing::instrument(skip(self), fields(alias = %alias))]
    async fn delete(&self, alias: &AliasId) -> StorageResult<()> {
        let mut rows = self.rows.write();
        if rows.remove(alias).is_none() {
            return Err(StorageError::not_found(alias.to_string()));
        }
        Ok(())
    }
}
