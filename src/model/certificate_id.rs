//! Certificate identity

use crate::error::{status, DriverError};
use crate::model::TokenIdentity;

/// A certificate object on a token: owning token, `CKA_ID` and DER value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CertificateIdentity {
    pub token: TokenIdentity,
    pub id: Vec<u8>,
    pub certificate_blob: Vec<u8>,
}

impl CertificateIdentity {
    pub fn new(token: TokenIdentity, id: Vec<u8>, certificate_blob: Vec<u8>) -> Self {
        Self {
            token,
            id,
            certificate_blob,
        }
    }

    /// Driver serialization `<token>/<hex id>`; the blob is carried separately.
    pub fn serialize(&self) -> String {
        format!("{}/{}", self.token.serialize(), hex::encode(&self.id))
    }

    /// Parses a driver serialization. The result has no certificate blob.
    pub fn deserialize(serialized: &str) -> Result<Self, DriverError> {
        let (token, id) = serialized.rsplit_once('/').ok_or_else(|| {
            DriverError::new(
                status::CKR_ATTRIBUTE_VALUE_INVALID,
                "missing certificate id field",
            )
        })?;
        let id = hex::decode(id).map_err(|e| {
            DriverError::new(
                status::CKR_ATTRIBUTE_VALUE_INVALID,
                format!("invalid certificate id: {e}"),
            )
        })?;

        Ok(Self {
            token: TokenIdentity::deserialize(token)?,
            id,
            certificate_blob: Vec::new(),
        })
    }

    pub fn has_certificate(&self) -> bool {
        !self.certificate_blob.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_round_trip_without_blob() {
        let token = TokenIdentity::new("ACME", "Card", "42", "Signing");
        let id = CertificateIdentity::new(token, vec![0x0a, 0xff], vec![1, 2, 3]);

        let serialized = id.serialize();
        assert_eq!(serialized, "ACME/Card/42/Signing/0aff");

        let parsed = CertificateIdentity::deserialize(&serialized).unwrap();
        assert_eq!(parsed.token, id.token);
        assert_eq!(parsed.id, id.id);
        assert!(!parsed.has_certificate());
    }

    #[test]
    fn test_deserialize_bad_hex() {
        assert!(CertificateIdentity::deserialize("a/b/c/d/xyz").is_err());
        assert!(CertificateIdentity::deserialize("nohex").is_err());
    }
}
