//! Wrapped key entity: store-resident keypairs.
//!
//! Reference-scoped keypairs live in the relational store rather than the
//! HSM. Their public half is plain DER SubjectPublicKeyInfo; their private
//! half is PKCS#8 DER encrypted under the RSA public key of the
//! application master alias, so a store compromise alone never exposes
//! usable private material.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{metadata::RecordMetadata, types::AliasId};

/// A store-resident keypair row.
///
/// `alias` is the primary key and refers to a [`KeyAlias`](crate::KeyAlias)
/// whose `reference_id` is present. `master_alias` refers to the
/// HSM-resident alias of the same application whose window contained this
/// row's generation time; that master key is the only way to recover the
/// private half.
///
/// The wrapped private key bytes are held in [`Zeroizing`] so they are
/// scrubbed from memory on drop. They are ciphertext, but the less key
/// material lingering in freed allocations the better.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct WrappedKey {
    /// Alias this keypair is stored under. Unique per store.
    pub alias: AliasId,

    /// HSM-resident master alias whose public key wrapped `private_key`.
    pub master_alias: AliasId,

    /// DER-encoded SubjectPublicKeyInfo of the public half.
    pub public_key: Vec<u8>,

    /// PKCS#8 DER of the private half, encrypted under the master public
    /// key.
    #[builder(into)]
    pub private_key: Zeroizing<Vec<u8>>,

    /// Audit columns, stamped on insert.
    pub metadata: RecordMetadata,
}
