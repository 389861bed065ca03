//! Resolve a logical credential name into a concrete credential.
//!
//! References are tried in list order. The first one that both resolves
//! (group and key exist) and validates (per variant rules) wins; every
//! other reference is skipped with a `debug` log line, never a hard error.

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::credential::{Credential, CredentialRegistry, ValidityWindow};
use crate::document::{ConfigDocument, DocumentError, Reference, SkipReason};

/// Errors produced when no credential can be resolved for a logical name.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    /// The document could not be loaded.
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// The logical name has no entry in the document.
    #[error("logical name '{0}' not found")]
    NameNotFound(String),

    /// The logical name's entry is not a list of references.
    #[error("invalid reference list for '{0}'")]
    InvalidReferenceList(String),

    /// No reference in the list produced a valid credential.
    #[error("no valid credential configured for '{0}'")]
    NoValidCredential(String),
}

impl ResolutionError {
    /// Short machine-friendly tag used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Document(DocumentError::Read { .. }) => "document_unreadable",
            Self::Document(DocumentError::Parse { .. }) => "document_unparsable",
            Self::Document(DocumentError::NotAnObject) => "document_malformed",
            Self::NameNotFound(_) => "name_not_found",
            Self::InvalidReferenceList(_) => "invalid_reference_list",
            Self::NoValidCredential(_) => "no_valid_credential",
        }
    }
}

/// Resolve `logical_name` in `document` into a credential of `variant`.
///
/// # Errors
///
/// Returns [`ResolutionError::NameNotFound`] if the name is absent,
/// [`ResolutionError::InvalidReferenceList`] if its entry is not an array,
/// and [`ResolutionError::NoValidCredential`] if no reference yields a valid
/// credential.
pub fn resolve(
    logical_name: &str,
    document: &ConfigDocument,
    variant: &str,
    registry: &CredentialRegistry,
    window: &ValidityWindow,
) -> Result<Box<dyn Credential>, ResolutionError> {
    let entry = document
        .references(logical_name)
        .ok_or_else(|| ResolutionError::NameNotFound(logical_name.to_owned()))?;
    let references = entry
        .as_array()
        .ok_or_else(|| ResolutionError::InvalidReferenceList(logical_name.to_owned()))?;

    for (index, raw) in references.iter().enumerate() {
        match try_reference(raw, document, variant, registry, window) {
            Ok(credential) => {
                debug!(logical_name, index, "credential resolved");
                return Ok(credential);
            }
            Err(reason) => {
                debug!(logical_name, index, reason = %reason, "skipping credential reference");
            }
        }
    }

    Err(ResolutionError::NoValidCredential(logical_name.to_owned()))
}

/// Load the document at `path` and resolve `logical_name` from it.
///
/// # Errors
///
/// Returns [`ResolutionError::Document`] if loading fails, otherwise the
/// errors of [`resolve`].
pub async fn load_and_resolve(
    path: &Path,
    logical_name: &str,
    variant: &str,
    registry: &CredentialRegistry,
    window: &ValidityWindow,
) -> Result<Box<dyn Credential>, ResolutionError> {
    let document = ConfigDocument::load(path).await?;
    resolve(logical_name, &document, variant, registry, window)
}

fn try_reference(
    raw: &Value,
    document: &ConfigDocument,
    variant: &str,
    registry: &CredentialRegistry,
    window: &ValidityWindow,
) -> Result<Box<dyn Credential>, SkipReason> {
    let reference = Reference::parse(raw)?;

    let group = document
        .group(&reference.group)
        .ok_or_else(|| SkipReason::GroupNotFound(reference.group.clone()))?
        .as_object()
        .ok_or_else(|| SkipReason::GroupNotAnObject(reference.group.clone()))?;

    let attributes = match group.get(&reference.name) {
        None => return Err(SkipReason::KeyNotFound(reference)),
        Some(Value::Object(attributes)) => attributes,
        Some(_) => return Err(SkipReason::KeyNotAnObject(reference)),
    };

    let constructor = registry
        .get(variant)
        .ok_or_else(|| SkipReason::UnsupportedVariant(variant.to_owned()))?;

    constructor(attributes, window).map_err(|source| SkipReason::Invalid { reference, source })
}
