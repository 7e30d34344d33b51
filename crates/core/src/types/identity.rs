//! The merchant identity record and its structural validation.
//!
//! A record is either fully well-formed or it does not exist: payloads with a
//! missing or mistyped field are rejected by [`IdentityRecord::from_payload`]
//! and must never be cached or trusted.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::id::{CustomerId, MerchantId};

/// Errors describing why a payload is not a well-formed identity record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    /// The payload is valid JSON but not an object.
    #[error("identity payload is not a JSON object")]
    NotAnObject,
    /// A declared field is absent.
    #[error("identity payload is missing `{0}`")]
    MissingField(&'static str),
    /// A declared field has the wrong JSON type.
    #[error("identity field `{field}` must be {expected}")]
    WrongType {
        /// Wire name of the field.
        field: &'static str,
        /// Human-readable description of the accepted type.
        expected: &'static str,
    },
    /// An identifier field is an empty string.
    #[error("identity field `{0}` must not be empty")]
    EmptyField(&'static str),
}

/// The domain identity of a signed-in merchant.
///
/// On the wire the tax identifier is called `ico` (the registry number used
/// by the backend); `taxId` is accepted as an alias when reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    /// Merchant account ID.
    pub merchant_id: MerchantId,
    /// Customer ID used for card content and enrollment calls.
    pub customer_id: CustomerId,
    /// Business display name.
    pub name: Option<String>,
    /// Business registry / tax number.
    #[serde(rename = "ico", alias = "taxId")]
    pub tax_id: Option<String>,
    /// Contact phone.
    pub phone: Option<String>,
    /// Postal address.
    pub address: Option<String>,
    /// Public website.
    pub website_url: Option<String>,
    /// Whether the merchant finished onboarding.
    pub onboarding_completed: bool,
}

impl IdentityRecord {
    /// Validate a decoded JSON payload and build a record from it.
    ///
    /// Every declared field must be present: the two IDs as non-empty strings,
    /// the profile fields as strings or `null`, and `onboardingCompleted` as a
    /// boolean.
    ///
    /// # Errors
    ///
    /// Returns a [`ShapeError`] naming the first field that violates the shape.
    pub fn from_payload(payload: &Value) -> Result<Self, ShapeError> {
        let object = payload.as_object().ok_or(ShapeError::NotAnObject)?;

        Ok(Self {
            merchant_id: MerchantId::new(required_id(object, "merchantId")?),
            customer_id: CustomerId::new(required_id(object, "customerId")?),
            name: nullable_string(object, &["name"])?,
            tax_id: nullable_string(object, &["ico", "taxId"])?,
            phone: nullable_string(object, &["phone"])?,
            address: nullable_string(object, &["address"])?,
            website_url: nullable_string(object, &["websiteUrl"])?,
            onboarding_completed: required_bool(object, "onboardingCompleted")?,
        })
    }

    /// Display name, falling back to the merchant ID when none is set yet.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| self.merchant_id.as_str())
    }
}

fn required_id(object: &Map<String, Value>, field: &'static str) -> Result<String, ShapeError> {
    match object.get(field) {
        None => Err(ShapeError::MissingField(field)),
        Some(Value::String(s)) if s.is_empty() => Err(ShapeError::EmptyField(field)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ShapeError::WrongType {
            field,
            expected: "a string",
        }),
    }
}

/// Read a field that must be present but may be `null`.
///
/// The first name in `names` is the canonical wire name; the rest are aliases.
fn nullable_string(
    object: &Map<String, Value>,
    names: &[&'static str],
) -> Result<Option<String>, ShapeError> {
    let Some((field, value)) = names
        .iter()
        .find_map(|name| object.get(*name).map(|value| (*name, value)))
    else {
        return Err(ShapeError::MissingField(names.first().copied().unwrap_or("?")));
    };

    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        _ => Err(ShapeError::WrongType {
            field,
            expected: "a string or null",
        }),
    }
}

fn required_bool(object: &Map<String, Value>, field: &'static str) -> Result<bool, ShapeError> {
    match object.get(field) {
        None => Err(ShapeError::MissingField(field)),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(ShapeError::WrongType {
            field,
            expected: "a boolean",
        }),
    }
}
