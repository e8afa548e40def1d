//! Key scopes: the unit of selection and locking.
//!
//! A scope is `(application_id, reference_id-or-absent)`. An absent
//! reference addresses the application's HSM-resident material (master
//! keys, certificate entries); a present reference addresses
//! store-resident material wrapped under the master key.
//!
//! Callers routinely send empty or whitespace reference strings to mean
//! "no reference". [`KeyScope::new`] owns that coercion so every path —
//! public key fetch, unwrap, sign, verify — scopes identically and the
//! stores only ever see a genuinely present reference.

use std::fmt;

use keymint_storage::{ApplicationId, ReferenceId};

/// Where the material behind a resolved alias lives.
///
/// Discriminated once when the scope is formed; downstream code branches
/// on this instead of re-checking reference presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLocation {
    /// Material lives in the HSM, addressed directly by alias.
    Hsm,
    /// Material lives in the relational store, private half wrapped under
    /// the application master key.
    Store,
}

/// A selection scope: application plus optional reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyScope {
    application_id: ApplicationId,
    reference_id: Option<ReferenceId>,
}

impl KeyScope {
    /// Forms a scope, coercing an empty or whitespace reference to absent.
    ///
    /// # Examples
    ///
    /// ```
    /// use keymint_keymanager::scope::KeyScope;
    ///
    /// let explicit = KeyScope::new("KERNEL", Some("CLIENT-A"));
    /// assert!(!explicit.is_master());
    ///
    /// let blank = KeyScope::new("KERNEL", Some("   "));
    /// assert!(blank.is_master());
    /// assert_eq!(blank, KeyScope::new("KERNEL", None));
    /// ```
    #[must_use]
    pub fn new(application_id: impl Into<ApplicationId>, reference_id: Option<&str>) -> Self {
        let reference_id = reference_id
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(ReferenceId::from);
        Self { application_id: application_id.into(), reference_id }
    }

    /// Forms the master scope of an application (absent reference).
    #[must_use]
    pub fn master(application_id: impl Into<ApplicationId>) -> Self {
        Self { application_id: application_id.into(), reference_id: None }
    }

    /// The application this scope belongs to.
    #[must_use]
    pub fn application_id(&self) -> &ApplicationId {
        &self.application_id
    }

    /// The reference sub-scope, if present.
    #[must_use]
    pub fn reference_id(&self) -> Option<&ReferenceId> {
        self.reference_id.as_ref()
    }

    /// `true` when this is the application's master scope.
    #[must_use]
    pub fn is_master(&self) -> bool {
        self.reference_id.is_none()
    }

    /// The master scope of the same application.
    #[must_use]
    pub fn master_scope(&self) -> KeyScope {
        Self { application_id: self.application_id.clone(), reference_id: None }
    }

    /// Where material for this scope lives.
    #[must_use]
    pub fn location(&self) -> KeyLocation {
        if self.is_master() { KeyLocation::Hsm } else { KeyLocation::Store }
    }
}

impl fmt::Display for KeyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reference_id {
            Some(reference) => write!(f, "{}/{}", self.application_id, reference),
            None => write!(f, "{}", self.application_id),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_whitespace_references_coerce_to_absent() {
        assert!(KeyScope::new("KERNEL", None).is_master());
        assert!(KeyScope::new("KERNEL", Some("")).is_master());
        assert!(KeyScope::new("KERNEL", Some("  ")).is_master());
        assert!(KeyScope::new("KERNEL", Some("\t\n")).is_master());
        assert!(!KeyScope::new("KERNEL", Some("CLIENT-A")).is_master());
    }

    #[test]
    fn test_reference_is_trimmed() {
        let scope = KeyScope::new("KERNEL", Some("  CLIENT-A  "));
        assert_eq!(scope.reference_id().map(ReferenceId::as_str), Some("CLIENT-A"));
    }

    #[test]
    fn test_coerced_scope_equals_master_scope() {
        let coerced = KeyScope::new("KERNEL", Some(" "));
        let master = KeyScope::master("KERNEL");
        assert_eq!(coerced, master);

        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut h1 = DefaultHasher::new();
        let mut h2 = DefaultHasher::new();
        coerced.hash(&mut h1);
        master.hash(&mut h2);
        assert_eq!(h1.finish(), h2.finish());
    }

    #[test]
    fn test_location_discriminates_once() {
        assert_eq!(KeyScope::new("KERNEL", None).location(), KeyLocation::Hsm);
        assert_eq!(KeyScope::new("KERNEL", Some("CLIENT-A")).location(), KeyLocation::Store);
    }

    #[test]
    fn test_display() {
        assert_eq!(KeyScope::new("KERNEL", None).to_string(), "KERNEL");
        assert_eq!(KeyScope::new("KERNEL", Some("CLIENT-A")).to_string(), "KERNEL/CLIENT-A");
    }

    #[test]
    fn test_master_scope_of_reference_scope() {
        let scope = KeyScope::new("KERNEL", Some("CLIENT-A"));
        assert_eq!(scope.master_scope(), KeyScope::master("KERNEL"));
    }
}
