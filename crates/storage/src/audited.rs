//! Audit-logging decorators for the persistence traits.
//!
//! Wraps an [`AliasIndex`] or [`WrappedKeyStore`] to emit structured
//! [`AuditEvent`]s for every mutation and access, without modifying the
//! underlying store.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::{
    alias::KeyAlias,
    audit::{alias_resource, AuditAction, AuditEvent, AuditLogger, AuditResult},
    error::StorageResult,
    store::{AliasIndex, WrappedKeyStore},
    types::{AliasId, ApplicationId, ReferenceId},
    wrapped::WrappedKey,
};

fn result_from<T>(res: &StorageResult<T>) -> AuditResult {
    match res {
        Ok(_) => AuditResult::Success,
        Err(e) => AuditResult::Failure(e.to_string()),
    }
}

fn wrapped_resource(alias: &AliasId) -> String {
    format!("alias:{alias}")
}

/// Decorator that adds audit logging to any [`AliasIndex`].
///
/// Every insert is logged as an [`AuditEvent`] via the configured
/// [`AuditLogger`], with the actor, action, resource identifier and
/// outcome. Scope listings are read traffic on the hot path and are not
/// individually audited.
///
/// # Usage
///
/// ```no_run
/// use keymint_storage::audit::TracingAuditLogger;
/// use keymint_storage::{AuditedAliasIndex, MemoryAliasIndex};
///
/// let index = MemoryAliasIndex::new();
/// let audited = AuditedAliasIndex::new(index, TracingAuditLogger, "keymint-service");
/// ```
pub struct AuditedAliasIndex<I, L> {
    inner: I,
    logger: L,
    actor: std::sync::Arc<str>,
}

impl<I, L> AuditedAliasIndex<I, L>
where
    I: AliasIndex,
    L: AuditLogger,
{
    /// Creates a new audited index wrapping the given index and logger.
    pub fn new(inner: I, logger: L, actor: impl Into<std::sync::Arc<str>>) -> Self {
        Self { inner, logger, actor: actor.into() }
    }

    /// Returns a reference to the inner index.
    pub fn inner(&self) -> &I {
        &self.inner
    }

    async fn emit(&self, action: AuditAction, resource: String, result: &AuditResult) {
        let event = AuditEvent::builder()
            .actor(self.actor.to_string())
            .action(action)
            .resource(resource)
            .result(result.clone())
            .build();
        self.logger.log(&event).await;
    }
}

#[async_trait]
impl<I, L> AliasIndex for AuditedAliasIndex<I, L>
where
    I: AliasIndex,
    L: AuditLogger,
{
    async fn list_by_scope(
        &self,
        application_id: &ApplicationId,
        reference_id: Option<&ReferenceId>,
    ) -> StorageResult<Vec<KeyAlias>> {
        // Listing is the selection hot path; not individually audited.
        self.inner.list_by_scope(application_id, reference_id).await
    }

    async fn insert(&self, row: &KeyAlias) -> StorageResult<()> {
        let res = self.inner.insert(row).await;
        let audit_result = result_from(&res);
        self.emit(
            AuditAction::InsertAlias,
            alias_resource(&row.application_id, row.alias),
            &audit_result,
        )
        .await;
        res
    }
}

/// Decorator that adds audit logging to any [`WrappedKeyStore`].
pub struct AuditedWrappedKeyStore<S, L> {
    inner: S,
    logger: L,
    actor: std::sync::Arc<str>,
}

impl<S, L> AuditedWrappedKeyStore<S, L>
where
    S: WrappedKeyStore,
    L: AuditLogger,
{
    /// Creates a new audited store wrapping the given store and logger.
    pub fn new(inner: S, logger: L, actor: impl Into<std::sync::Arc<str>>) -> Self {
        Self { inner, logger, actor: actor.into() }
    }

    /// Returns a reference to the inner store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn emit(
        &self,
        action: AuditAction,
        resource: String,
        result: &AuditResult,
        metadata: HashMap<String, String>,
    ) {
        let event = AuditEvent::builder()
            .actor(self.actor.to_string())
            .action(action)
            .resource(resource)
            .result(result.clone())
            .metadata(metadata)
            .build();
        self.logger.log(&event).await;
    }
}

#[async_trait]
impl<S, L> WrappedKeyStore for AuditedWrappedKeyStore<S, L>
where
    S: WrappedKeyStore,
    L: AuditLogger,
{
    async fn get(&self, alias: &AliasId) -> StorageResult<Option<WrappedKey>> {
        let res = self.inner.get(alias).await;
        let audit_result = result_from(&res);
        let mut metadata = HashMap::new();
        if let Ok(ref opt) = res {
            metadata.insert(
                "found".to_owned(),
                if opt.is_some() { "true" } else { "false" }.to_owned(),
            );
        }
        self.emit(AuditAction::AccessWrappedKey, wrapped_resource(alias), &audit_result, metadata)
            .await;
        res
    }

    async fn insert(&self, row: &WrappedKey) -> StorageResult<()> {
        let res = self.inner.insert(row).await;
        let audit_result = result_from(&res);
        let mut metadata = HashMap::new();
        metadata.insert("master_alias".to_owned(), row.master_alias.to_string());
        self.emit(
            AuditAction::InsertWrappedKey,
            wrapped_resource(&row.alias),
            &audit_result,
            metadata,
        )
        .await;
        res
    }

    async fn delete(&self, alias: &AliasId) -> StorageResult<()> {
        let res = self.inner.delete(alias).await;
        let audit_result = result_from(&res);
        self.emit(
            AuditAction::DeleteWrappedKey,
            wrapped_resource(alias),
            &audit_result,
            HashMap::new(),
        )
        .await;
        res
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::{
        metadata::MetadataStamper,
        store::{MemoryAliasIndex, MemoryWrappedKeyStore},
    };

    /// Captures events in memory so assertions can inspect them.
    #[derive(Default, Clone)]
    struct CapturingLogger {
        events: Arc<Mutex<Vec<AuditEvent>>>,
    }

    #[async_trait]
    impl AuditLogger for CapturingLogger {
        async fn log(&self, event: &AuditEvent) {
            self.events.lock().push(event.clone());
        }
    }

    fn sample_alias() -> KeyAlias {
        KeyAlias::builder()
            .alias(AliasId::random())
            .application_id("KERNEL")
            .key_generation_time("2024-01-01T00:00:00".parse().unwrap())
            .key_expiry_time("2024-06-29T00:00:00".parse().unwrap())
            .metadata(MetadataStamper::new("test").stamp())
            .build()
    }

    fn sample_wrapped() -> WrappedKey {
        WrappedKey::builder()
            .alias(AliasId::random())
            .master_alias(AliasId::random())
            .public_key(vec![1])
            .private_key(vec![2])
            .metadata(MetadataStamper::new("test").stamp())
            .build()
    }

    #[tokio::test]
    async fn test_alias_insert_emits_success_event() {
        let logger = CapturingLogger::default();
        let audited = AuditedAliasIndex::new(MemoryAliasIndex::new(), logger.clone(), "svc");

        let row = sample_alias();
        audited.insert(&row).await.unwrap();

        let events = logger.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, AuditAction::InsertAlias);
        assert_eq!(events[0].result, AuditResult::Success);
        assert!(events[0].resource.contains("app:KERNEL"));
    }

    #[tokio::test]
    async fn test_alias_insert_failure_recorded() {
        let logger = CapturingLogger::default();
        let audited = AuditedAliasIndex::new(MemoryAliasIndex::new(), logger.clone(), "svc");

        let row = sample_alias();
        audited.insert(&row).await.unwrap();
        let _conflict = audited.insert(&row).await;

        let events = logger.events.lock();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1].result, AuditResult::Failure(_)));
    }

    #[tokio::test]
    async fn test_list_is_not_audited() {
        let logger = CapturingLogger::default();
        let audited = AuditedAliasIndex::new(MemoryAliasIndex::new(), logger.clone(), "svc");

        audited.list_by_scope(&ApplicationId::from("KERNEL"), None).await.unwrap();
        assert!(logger.events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_wrapped_access_records_found_flag() {
        let logger = CapturingLogger::default();
        let audited =
            AuditedWrappedKeyStore::new(MemoryWrappedKeyStore::new(), logger.clone(), "svc");

        let row = sample_wrapped();
        audited.insert(&row).await.unwrap();
        audited.get(&row.alias).await.unwrap();
        audited.get(&AliasId::random()).await.unwrap();

        let events = logger.events.lock();
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].metadata.get("found").map(String::as_str), Some("true"));
        assert_eq!(events[2].metadata.get("found").map(String::as_str), Some("false"));
    }

    #[tokio::test]
    async fn test_wrapped_insert_records_master_alias() {
        let logger = CapturingLogger::default();
        let audited =
            AuditedWrappedKeyStore::new(MemoryWrappedKeyStore::new(), logger.clone(), "svc");

        let row = sample_wrapped();
        audited.insert(&row).await.unwrap();

        let events = logger.events.lock();
        assert_eq!(
            events[0].metadata.get("master_alias"),
            Some(&row.master_alias.to_string())
        );
    }
}
