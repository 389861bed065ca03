//! Typed credentials and the variant registry.
//!
//! A [`Credential`] is built fresh from a raw attribute bag on every poll and
//! is never mutated afterwards. Variants are looked up by name in a
//! [`CredentialRegistry`], so adding one only means registering another
//! constructor; the resolver and the supervision loop stay untouched.

pub mod symmetric;

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

pub use symmetric::SymmetricKey;

/// Raw attribute bag for a single credential entry in the document.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// Constructor registered for a credential variant.
pub type Constructor =
    fn(&Attributes, &ValidityWindow) -> Result<Box<dyn Credential>, ConstructionError>;

/// Errors produced while building a credential from its attributes.
#[derive(Debug, thiserror::Error)]
pub enum ConstructionError {
    /// A required attribute is absent.
    #[error("missing attribute '{0}'")]
    MissingAttribute(&'static str),

    /// An attribute is present but has the wrong type.
    #[error("invalid attribute '{name}': expected {expected}")]
    InvalidAttribute {
        /// Attribute name.
        name: &'static str,
        /// Human-readable description of the expected type.
        expected: &'static str,
    },

    /// The credential expires before it would next be re-checked.
    #[error("credential expires at {expires_at}, must stay valid past {not_after}")]
    Expired {
        /// Expiry instant carried by the credential.
        expires_at: DateTime<Utc>,
        /// Earliest acceptable expiry (now plus the poll interval).
        not_after: DateTime<Utc>,
    },
}

/// Errors produced when comparing two credentials.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// The two credentials are of different variants.
    #[error("credential variant changed from '{expected}' to '{found}'")]
    VariantMismatch {
        /// Variant of the credential performing the comparison.
        expected: &'static str,
        /// Variant of the credential it was compared against.
        found: &'static str,
    },
}

/// A typed credential that can be injected into a child's environment.
pub trait Credential: fmt::Debug + Send + Sync {
    /// Registry name of this credential's variant.
    fn variant(&self) -> &'static str;

    /// Environment variables exposing this credential to a child process.
    fn environment(&self) -> BTreeMap<String, String>;

    /// Expiry instant, if the credential carries one.
    fn expires_at(&self) -> Option<DateTime<Utc>>;

    /// Compare identity fields against another credential.
    ///
    /// Expiry is not part of the comparison: a renewed credential with the
    /// same identity is not a rotation.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::VariantMismatch`] when `other` is of a
    /// different variant.
    fn same_as(&self, other: &dyn Credential) -> Result<bool, CredentialError>;

    /// Upcast used for same-variant downcasting in [`Credential::same_as`].
    fn as_any(&self) -> &dyn Any;
}

/// The instant a credential is evaluated at and how long it must remain valid.
///
/// A credential expiring at or before `now + min_validity` would lapse before
/// the next poll, so it is rejected up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityWindow {
    now: DateTime<Utc>,
    min_validity: Duration,
}

impl ValidityWindow {
    /// Create a window starting at `now` that requires `min_validity` of
    /// remaining lifetime.
    pub fn new(now: DateTime<Utc>, min_validity: Duration) -> Self {
        Self { now, min_validity }
    }

    /// Earliest expiry instant that is still accepted (exclusive).
    pub fn not_after(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.min_validity)
            .ok()
            .and_then(|d| self.now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether a credential expiring at `expires_at` must be rejected.
    pub fn rejects(&self, expires_at: DateTime<Utc>) -> bool {
        expires_at <= self.not_after()
    }
}

/// Maps variant names to their constructors.
#[derive(Clone)]
pub struct CredentialRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl fmt::Debug for CredentialRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRegistry")
            .field("variants", &self.variants())
            .finish()
    }
}

impl CredentialRegistry {
    /// Create a registry with no variants.
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Create a registry with every built-in variant registered.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(symmetric::VARIANT, symmetric::construct);
        registry
    }

    /// Register (or replace) the constructor for `variant`.
    pub fn register(&mut self, variant: impl Into<String>, constructor: Constructor) {
        self.constructors.insert(variant.into(), constructor);
    }

    /// Constructor for `variant`, if registered.
    pub fn get(&self, variant: &str) -> Option<Constructor> {
        self.constructors.get(variant).copied()
    }

    /// Registered variant names in sorted order.
    pub fn variants(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }
}

impl Default for CredentialRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
