//! Token identity

use std::fmt;

use crate::error::{status, DriverError};
use crate::logic::{escape_field, unescape_field};

/// Descriptor of one token present in a slot
///
/// Compared by value, so the same physical token found in two enumeration
/// passes is the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenIdentity {
    pub manufacturer_id: String,
    pub model: String,
    pub serial_number: String,
    pub label: String,
}

impl TokenIdentity {
    pub fn new(
        manufacturer_id: impl Into<String>,
        model: impl Into<String>,
        serial_number: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            manufacturer_id: manufacturer_id.into(),
            model: model.into(),
            serial_number: serial_number.into(),
            label: label.into(),
        }
    }

    /// Driver serialization: the four fields escaped and joined by `/`.
    pub fn serialize(&self) -> String {
        [
            &self.manufacturer_id,
            &self.model,
            &self.serial_number,
            &self.label,
        ]
        .iter()
        .map(|field| escape_field(field))
        .collect::<Vec<_>>()
        .join("/")
    }

    pub fn deserialize(serialized: &str) -> Result<Self, DriverError> {
        let fields: Vec<&str> = serialized.split('/').collect();
        let [manufacturer_id, model, serial_number, label] = fields.as_slice() else {
            return Err(DriverError::new(
                status::CKR_ATTRIBUTE_VALUE_INVALID,
                format!("expected 4 token fields, found {}", fields.len()),
            ));
        };

        Ok(Self {
            manufacturer_id: unescape_field(manufacturer_id)?,
            model: unescape_field(model)?,
            serial_number: unescape_field(serial_number)?,
            label: unescape_field(label)?,
        })
    }
}

impl fmt::Display for TokenIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} {})", self.label, self.model, self.serial_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> TokenIdentity {
        TokenIdentity::new("ACME", "Card/2", "0001", "My Token")
    }

    #[test]
    fn test_equality_by_value() {
        assert_eq!(token(), token().clone());
        assert_ne!(token(), TokenIdentity::new("ACME", "Card/2", "0002", "My Token"));
    }

    #[test]
    fn test_serialize_escapes_separator() {
        assert_eq!(token().serialize(), "ACME/Card\\x2f2/0001/My Token");
    }

    #[test]
    fn test_deserialize_round_trip() {
        let serialized = token().serialize();
        assert_eq!(TokenIdentity::deserialize(&serialized).unwrap(), token());
    }

    #[test]
    fn test_deserialize_wrong_field_count() {
        let err = TokenIdentity::deserialize("a/b/c").unwrap_err();
        assert_eq!(err.code, status::CKR_ATTRIBUTE_VALUE_INVALID);
    }
}
