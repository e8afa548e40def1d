//! Persistence layer for the keymint key management service.
//!
//! This crate provides the entities and store traits that back key
//! selection and minting. Both the service layer and its tests consume the
//! same traits, so production backends and the in-memory implementations
//! here are interchangeable.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  keymint-keymanager                         │
//! │        (resolver, expiry planner, crypto facade)            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  keymint-storage                            │
//! │   AliasIndex  │  PolicyStore  │  WrappedKeyStore            │
//! │        (selection rows, policies, wrapped keypairs)         │
//! ├──────────────────────┬──────────────────────────────────────┤
//! │   Memory* backends   │        relational backends           │
//! │      (testing)       │          (production)                │
//! └──────────────────────┴──────────────────────────────────────┘
//! ```
//!
//! # Tables
//!
//! | Trait | Table | Keyed by |
//! |-------|-------|----------|
//! | [`AliasIndex`] | `key_alias` | `(application_id, reference_id)` scope |
//! | [`PolicyStore`] | `key_policy` | `application_id` |
//! | [`WrappedKeyStore`] | `key_store` | `alias` |
//!
//! Every row carries [`RecordMetadata`] audit columns, stamped on write by
//! a [`MetadataStamper`].
//!
//! # Quick Start
//!
//! ```
//! use keymint_storage::{
//!     AliasId, AliasIndex, ApplicationId, KeyAlias, MemoryAliasIndex, MetadataStamper,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let index = MemoryAliasIndex::new();
//!     let stamper = MetadataStamper::new("quickstart");
//!
//!     let row = KeyAlias::builder()
//!         .alias(AliasId::random())
//!         .application_id("KERNEL")
//!         .key_generation_time("2024-01-01T00:00:00".parse()?)
//!         .key_expiry_time("2024-06-29T00:00:00".parse()?)
//!         .metadata(stamper.stamp())
//!         .build();
//!
//!     index.insert(&row).await?;
//!
//!     let rows = index.list_by_scope(&ApplicationId::from("KERNEL"), None).await?;
//!     assert_eq!(rows.len(), 1);
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! Every operation returns [`StorageResult<T>`]. Backends fold their
//! native failures into [`StorageError`], which snapshots the active
//! tracing span at construction so errors stay correlatable with the
//! request that produced them.

#![deny(unsafe_code)]

pub mod alias;
pub mod audit;
pub mod audited;
pub mod error;
pub mod metadata;
pub mod policy;
pub mod store;
pub mod types;
pub mod wrapped;

// Re-export primary types at crate root for convenience
pub use alias::KeyAlias;
pub use audited::{AuditedAliasIndex, AuditedWrappedKeyStore};
pub use error::{BoxError, SpanRef, StorageError, StorageResult};
pub use metadata::{MetadataStamper, RecordMetadata};
pub use policy::KeyPolicy;
pub use store::{
    AliasIndex, MemoryAliasIndex, MemoryPolicyStore, MemoryWrappedKeyStore, PolicyStore,
    WrappedKeyStore,
};
pub use types::{AliasId, ApplicationId, ReferenceId};
pub use wrapped::WrappedKey;
pub use zeroize::Zeroizing;
