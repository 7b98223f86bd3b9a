//! Parsed X.509 certificate

use std::fmt;

use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use sha1::{Digest, Sha1};
use thiserror::Error;
use x509_parser::prelude::*;

/// An owned, parsed X.509 certificate
#[derive(Clone)]
pub struct Certificate {
    der: Vec<u8>,
    subject: String,
    subject_common_name: Option<String>,
    issuer_common_name: Option<String>,
    raw_subject: Vec<u8>,
    raw_issuer: Vec<u8>,
    subject_key_id: Option<Vec<u8>>,
    authority_key_id: Option<Vec<u8>>,
    public_key: Option<RsaPublicKey>,
    public_key_algorithm: String,
}

impl Certificate {
    pub fn from_der(der: &[u8]) -> Result<Self, CertificateError> {
        if der.is_empty() {
            return Err(CertificateError::Empty);
        }

        let (_, cert) = X509Certificate::from_der(der).map_err(|e| CertificateError::Parse {
            reason: e.to_string(),
        })?;

        let mut subject_key_id = None;
        let mut authority_key_id = None;
        for extension in cert.extensions() {
            match extension.parsed_extension() {
                ParsedExtension::SubjectKeyIdentifier(kid) => {
                    subject_key_id = Some(kid.0.to_vec());
                }
                ParsedExtension::AuthorityKeyIdentifier(aki) => {
                    authority_key_id = aki.key_identifier.as_ref().map(|kid| kid.0.to_vec());
                }
                _ => {}
            }
        }

        let spki = cert.public_key();

        Ok(Self {
            der: der.to_vec(),
            subject: cert.subject().to_string(),
            subject_common_name: first_common_name(cert.subject()),
            issuer_common_name: first_common_name(cert.issuer()),
            raw_subject: cert.subject().as_raw().to_vec(),
            raw_issuer: cert.issuer().as_raw().to_vec(),
            subject_key_id,
            authority_key_id,
            public_key: RsaPublicKey::from_public_key_der(spki.raw).ok(),
            public_key_algorithm: spki.algorithm.algorithm.to_id_string(),
        })
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Full subject name, e.g. `O=Test Org, CN=Alice`
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn subject_common_name(&self) -> Option<&str> {
        self.subject_common_name.as_deref()
    }

    pub fn issuer_common_name(&self) -> Option<&str> {
        self.issuer_common_name.as_deref()
    }

    /// RSA public key, `None` for other key types
    pub fn public_key(&self) -> Option<&RsaPublicKey> {
        self.public_key.as_ref()
    }

    /// Dotted OID of the subject public key algorithm
    pub fn public_key_algorithm(&self) -> &str {
        &self.public_key_algorithm
    }

    /// Content hash: lowercase hex SHA-1 of the DER encoding.
    pub fn hash(&self) -> String {
        hex::encode(Sha1::digest(&self.der))
    }

    /// Whether `self` issued `other`.
    ///
    /// Names must match; key identifiers must also match when both sides
    /// carry them.
    pub fn is_issuer_of(&self, other: &Certificate) -> bool {
        if self.raw_subject != other.raw_issuer {
            return false;
        }
        match (&self.subject_key_id, &other.authority_key_id) {
            (Some(ski), Some(aki)) => ski == aki,
            _ => true,
        }
    }

    pub fn is_self_signed(&self) -> bool {
        self.is_issuer_of(self)
    }

    /// `"<subject> by <issuer CN|Unknown>"`
    pub fn default_display_name(&self) -> String {
        format!(
            "{} by {}",
            self.subject,
            self.issuer_common_name.as_deref().unwrap_or("Unknown")
        )
    }
}

fn first_common_name(name: &X509Name<'_>) -> Option<String> {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("issuer", &self.issuer_common_name)
            .field("hash", &self.hash())
            .finish()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CertificateError {
    #[error("Empty certificate")]
    Empty,

    #[error("Cannot parse certificate: {reason}")]
    Parse { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fake_token::fixtures;
    use rsa::traits::PublicKeyParts;

    #[test]
    fn test_parse_leaf() {
        let leaf = Certificate::from_der(fixtures::LEAF_DER).unwrap();
        assert_eq!(leaf.subject_common_name(), Some("Alice Smartcard"));
        assert_eq!(leaf.issuer_common_name(), Some("Test Root CA"));
        assert!(leaf.subject().contains("CN=Alice Smartcard"));
        assert_eq!(leaf.public_key().unwrap().n().bits(), 2048);
        assert_eq!(leaf.public_key_algorithm(), "1.2.840.113549.1.1.1");
    }

    #[test]
    fn test_issuer_relationship() {
        let ca = Certificate::from_der(fixtures::CA_DER).unwrap();
        let leaf = Certificate::from_der(fixtures::LEAF_DER).unwrap();
        let other = Certificate::from_der(fixtures::OTHER_DER).unwrap();

        assert!(ca.is_issuer_of(&leaf));
        assert!(!leaf.is_issuer_of(&ca));
        assert!(!other.is_issuer_of(&leaf));
        assert!(ca.is_self_signed());
        assert!(other.is_self_signed());
        assert!(!leaf.is_self_signed());
    }

    #[test]
    fn test_hash_is_sha1_hex() {
        let ca = Certificate::from_der(fixtures::CA_DER).unwrap();
        assert_eq!(ca.hash().len(), 40);
        assert_eq!(ca.hash(), hex::encode(Sha1::digest(fixtures::CA_DER)));
    }

    #[test]
    fn test_default_display_name() {
        let leaf = Certificate::from_der(fixtures::LEAF_DER).unwrap();
        assert!(leaf.default_display_name().ends_with(" by Test Root CA"));
    }

    #[test]
    fn test_parse_garbage() {
        assert_eq!(Certificate::from_der(&[]), Err(CertificateError::Empty));
        assert!(matches!(
            Certificate::from_der(b"not a certificate"),
            Err(CertificateError::Parse { .. })
        ));
    }
}
