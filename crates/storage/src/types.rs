//! Identifier newtypes used across storage operations.
//!
//! This module defines the strongly-typed identifiers shared by the store
//! traits and their consumers.

use std::fmt;

use uuid::Uuid;

/// Macro to define a newtype wrapper around `String` with standard trait
/// implementations.
///
/// Each generated type:
/// - Is a transparent wrapper around `String` (no runtime cost beyond the allocation it wraps)
/// - Derives `Clone`, `Debug`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - Derives `Serialize` and `Deserialize` (transparent)
/// - Implements `From<String>` / `From<&str>` for ergonomic construction
/// - Implements `Display` that outputs the inner value
macro_rules! define_string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_string_id!(
    /// Application (tenant) identifier that scopes key material.
    ///
    /// Every alias, policy and wrapped key belongs to exactly one
    /// application. This type wraps a raw `String` to prevent accidental
    /// misuse — passing a `ReferenceId` where an `ApplicationId` is
    /// expected is a compile-time error.
    ///
    /// # Examples
    ///
    /// ```
    /// use keymint_storage::ApplicationId;
    ///
    /// let app = ApplicationId::from("KERNEL");
    /// assert_eq!(app.as_str(), "KERNEL");
    /// assert_eq!(app.to_string(), "KERNEL");
    /// ```
    ApplicationId
);

define_string_id!(
    /// Reference identifier for the sub-scope of an application.
    ///
    /// Aliases carrying a reference identifier address key material that is
    /// persisted in the relational store with its private half wrapped
    /// under the application master key; aliases without one address
    /// HSM-resident material. Whether an incoming reference string counts
    /// as present is a service-layer concern — the stores match the value
    /// literally.
    ///
    /// # Examples
    ///
    /// ```
    /// use keymint_storage::ReferenceId;
    ///
    /// let reference = ReferenceId::from("CLIENT-A");
    /// assert_eq!(reference.as_str(), "CLIENT-A");
    /// ```
    ReferenceId
);

/// Opaque 128-bit alias binding a scope and validity window to concrete
/// key material.
///
/// Aliases are UUID v4 values rendered as lowercase hyphenated hex, the
/// form they take in the alias index, the wrapped key store and the HSM.
///
/// # Examples
///
/// ```
/// use keymint_storage::AliasId;
///
/// let alias = AliasId::random();
/// let rendered = alias.to_string();
/// assert_eq!(rendered, rendered.to_lowercase());
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct AliasId(pub Uuid);

impl AliasId {
    /// Generates a fresh random (v4) alias.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl From<Uuid> for AliasId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for AliasId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Uuid renders lowercase hyphenated by default.
        write!(f, "{}", self.0)
    }
}
