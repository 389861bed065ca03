//! Key + secret credential pair.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{Attributes, ConstructionError, Credential, CredentialError, ValidityWindow};

/// Registry name of the symmetric variant.
pub const VARIANT: &str = "symmetric";

/// Environment variable carrying the key.
pub const KEY_VAR: &str = "KEY";

/// Environment variable carrying the secret.
pub const SECRET_VAR: &str = "SECRET";

const KEY_ATTR: &str = "key";
const SECRET_ATTR: &str = "secret";
const EXPIRATION_ATTR: &str = "expiration";

/// A symmetric key/secret pair with an optional expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey {
    key: String,
    secret: String,
    expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("key", &self.key)
            .field("secret", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl SymmetricKey {
    /// Build a key pair from a raw attribute bag.
    ///
    /// `expiration` is optional epoch seconds; absent or `0` means the pair
    /// never expires.
    ///
    /// # Errors
    ///
    /// Returns a [`ConstructionError`] when `key` or `secret` is missing or
    /// not a string, when `expiration` is not an integer, or when the pair
    /// expires inside the validity window.
    pub fn build(
        attributes: &Attributes,
        window: &ValidityWindow,
    ) -> Result<Self, ConstructionError> {
        let expires_at = parse_expiration(attributes)?;
        if let Some(expires_at) = expires_at {
            if window.rejects(expires_at) {
                return Err(ConstructionError::Expired {
                    expires_at,
                    not_after: window.not_after(),
                });
            }
        }

        let key = required_string(attributes, KEY_ATTR)?;
        let secret = required_string(attributes, SECRET_ATTR)?;

        Ok(Self {
            key,
            secret,
            expires_at,
        })
    }

    /// The public key half.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Credential for SymmetricKey {
    fn variant(&self) -> &'static str {
        VARIANT
    }

    fn environment(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (KEY_VAR.to_owned(), self.key.clone()),
            (SECRET_VAR.to_owned(), self.secret.clone()),
        ])
    }

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    fn same_as(&self, other: &dyn Credential) -> Result<bool, CredentialError> {
        let other = other
            .as_any()
            .downcast_ref::<Self>()
            .ok_or(CredentialError::VariantMismatch {
                expected: VARIANT,
                found: other.variant(),
            })?;
        Ok(self.key == other.key && self.secret == other.secret)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Registry constructor for the symmetric variant.
pub(super) fn construct(
    attributes: &Attributes,
    window: &ValidityWindow,
) -> Result<Box<dyn Credential>, ConstructionError> {
    Ok(Box::new(SymmetricKey::build(attributes, window)?))
}

fn parse_expiration(attributes: &Attributes) -> Result<Option<DateTime<Utc>>, ConstructionError> {
    let invalid = ConstructionError::InvalidAttribute {
        name: EXPIRATION_ATTR,
        expected: "integer epoch seconds",
    };

    let secs = match attributes.get(EXPIRATION_ATTR) {
        None => return Ok(None),
        Some(Value::Number(n)) => n.as_i64().ok_or(invalid)?,
        Some(_) => return Err(invalid),
    };

    if secs == 0 {
        return Ok(None);
    }

    DateTime::from_timestamp(secs, 0)
        .map(Some)
        .ok_or(ConstructionError::InvalidAttribute {
            name: EXPIRATION_ATTR,
            expected: "timestamp within the representable range",
        })
}

fn required_string(attributes: &Attributes, name: &'static str) -> Result<String, ConstructionError> {
    match attributes.get(name) {
        None => Err(ConstructionError::MissingAttribute(name)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ConstructionError::InvalidAttribute {
            name,
            expected: "string",
        }),
    }
}
