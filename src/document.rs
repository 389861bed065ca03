//! The credential configuration document.
//!
//! A JSON object where each top-level entry is either a logical name mapping
//! to an ordered list of `{"group": ..., "name": ...}` references, or a group
//! mapping key names to attribute bags:
//!
//! ```json
//! {
//!   "svc": [{"group": "prod", "name": "k1"}],
//!   "prod": {"k1": {"key": "A", "secret": "B", "expiration": 1900000000}}
//! }
//! ```
//!
//! The document is re-read on every poll. Nothing is cached between polls.

use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

/// Errors produced while loading a document.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    /// The document file could not be read.
    #[error("failed to read document at {}: {source}", .path.display())]
    Read {
        /// Document path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The document is not valid JSON.
    #[error("failed to parse document at {}: {source}", .path.display())]
    Parse {
        /// Document path.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// The top-level JSON value is not an object.
    #[error("document root must be a JSON object")]
    NotAnObject,
}

/// Read-only snapshot of the credential store.
#[derive(Debug, Clone)]
pub struct ConfigDocument {
    root: Map<String, Value>,
}

impl ConfigDocument {
    /// Load a document snapshot from disk.
    ///
    /// # Errors
    ///
    /// Returns a [`DocumentError`] if the file cannot be read, is not JSON,
    /// or its root is not an object.
    pub async fn load(path: &Path) -> Result<Self, DocumentError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| DocumentError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
        let value: Value =
            serde_json::from_str(&contents).map_err(|source| DocumentError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_value(value)
    }

    /// Wrap an already-parsed JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::NotAnObject`] if `value` is not an object.
    pub fn from_value(value: Value) -> Result<Self, DocumentError> {
        match value {
            Value::Object(root) => Ok(Self { root }),
            _ => Err(DocumentError::NotAnObject),
        }
    }

    /// Raw entry for a logical name (expected to be a reference list).
    pub fn references(&self, logical_name: &str) -> Option<&Value> {
        self.root.get(logical_name)
    }

    /// Raw entry for a group (expected to be an object of attribute bags).
    pub fn group(&self, group: &str) -> Option<&Value> {
        self.root.get(group)
    }
}

/// A `(group, key)` pointer into the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Group name.
    pub group: String,
    /// Key name within the group.
    pub name: String,
}

impl Reference {
    /// Parse a `{"group": ..., "name": ...}` reference object.
    ///
    /// # Errors
    ///
    /// Returns the [`SkipReason`] describing which part is missing or mistyped.
    pub fn parse(value: &Value) -> Result<Self, SkipReason> {
        let object = value.as_object().ok_or(SkipReason::ReferenceNotAnObject)?;
        let group = object
            .get("group")
            .and_then(Value::as_str)
            .ok_or(SkipReason::MissingGroupName)?;
        let name = object
            .get("name")
            .and_then(Value::as_str)
            .ok_or(SkipReason::MissingKeyName)?;
        Ok(Self {
            group: group.to_owned(),
            name: name.to_owned(),
        })
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// Why a single reference was passed over during resolution.
#[derive(Debug, thiserror::Error)]
pub enum SkipReason {
    /// The list entry is not an object.
    #[error("reference is not an object")]
    ReferenceNotAnObject,
    /// The reference has no string `group` field.
    #[error("reference has no group name")]
    MissingGroupName,
    /// The reference has no string `name` field.
    #[error("reference has no key name")]
    MissingKeyName,
    /// The referenced group does not exist.
    #[error("group '{0}' not found")]
    GroupNotFound(String),
    /// The referenced group is not an object.
    #[error("group '{0}' is not an object")]
    GroupNotAnObject(String),
    /// The referenced key does not exist in its group.
    #[error("key '{0}' not found")]
    KeyNotFound(Reference),
    /// The referenced key is not an attribute object.
    #[error("key '{0}' is not an object")]
    KeyNotAnObject(Reference),
    /// No constructor is registered for the wanted variant.
    #[error("unsupported credential variant '{0}'")]
    UnsupportedVariant(String),
    /// The attribute bag failed validation.
    #[error("key '{reference}' is invalid: {source}")]
    Invalid {
        /// Reference that failed.
        reference: Reference,
        /// Construction failure.
        source: crate::credential::ConstructionError,
    },
}
