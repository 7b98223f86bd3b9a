//! Algorithm identifiers for token-backed RSA keys

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Signature algorithm requested by the caller
///
/// The EMSA3 variants are PKCS#1 v1.5 signatures over the named digest;
/// `Emsa3Raw` signs caller-formatted bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    Emsa3Sha1,
    Emsa3Md5,
    Emsa3Md2,
    Emsa3Sha256,
    Emsa3Raw,
    /// EMSA1 (IEEE 1363) over SHA-1
    Emsa1Sha1,
    Emsa3Ripemd160,
}

impl SignatureAlgorithm {
    /// Digest accumulated by this algorithm, if the key can sign with it
    pub fn digest(self) -> Option<DigestAlgorithm> {
        match self {
            SignatureAlgorithm::Emsa3Sha1 => Some(DigestAlgorithm::Sha1),
            SignatureAlgorithm::Emsa3Md5 => Some(DigestAlgorithm::Md5),
            SignatureAlgorithm::Emsa3Md2 => Some(DigestAlgorithm::Md2),
            SignatureAlgorithm::Emsa3Sha256 => Some(DigestAlgorithm::Sha256),
            _ => None,
        }
    }

    pub fn is_raw(self) -> bool {
        self == SignatureAlgorithm::Emsa3Raw
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignatureAlgorithm::Emsa3Sha1 => "emsa3-sha1",
            SignatureAlgorithm::Emsa3Md5 => "emsa3-md5",
            SignatureAlgorithm::Emsa3Md2 => "emsa3-md2",
            SignatureAlgorithm::Emsa3Sha256 => "emsa3-sha256",
            SignatureAlgorithm::Emsa3Raw => "emsa3-raw",
            SignatureAlgorithm::Emsa1Sha1 => "emsa1-sha1",
            SignatureAlgorithm::Emsa3Ripemd160 => "emsa3-ripemd160",
        };
        f.write_str(name)
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = AlgorithmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "emsa3-sha1" | "sha1" => Ok(SignatureAlgorithm::Emsa3Sha1),
            "emsa3-md5" | "md5" => Ok(SignatureAlgorithm::Emsa3Md5),
            "emsa3-md2" | "md2" => Ok(SignatureAlgorithm::Emsa3Md2),
            "emsa3-sha256" | "sha256" => Ok(SignatureAlgorithm::Emsa3Sha256),
            "emsa3-raw" | "raw" => Ok(SignatureAlgorithm::Emsa3Raw),
            "emsa1-sha1" => Ok(SignatureAlgorithm::Emsa1Sha1),
            "emsa3-ripemd160" => Ok(SignatureAlgorithm::Emsa3Ripemd160),
            _ => Err(AlgorithmError::Unsupported {
                algorithm: s.to_string(),
            }),
        }
    }
}

/// Encoding of the produced signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SignatureFormat {
    /// Plain big-endian integer, the only form RSA produces
    #[default]
    Ieee1363,
    Der,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Sha1,
    Md5,
    Md2,
    Sha256,
}

/// Padding scheme for RSA encryption and decryption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionAlgorithm {
    /// PKCS#1 v1.5 (EME-PKCS1-v1_5)
    Pkcs1v15,
    /// OAEP with SHA-1 and MGF1-SHA-1
    Pkcs1Oaep,
    NoPadding,
}

impl EncryptionAlgorithm {
    /// Hardware mechanism for decryption with this padding
    pub fn decrypt_mechanism(self) -> Result<Mechanism, AlgorithmError> {
        match self {
            EncryptionAlgorithm::Pkcs1v15 => Ok(Mechanism::RsaPkcs),
            EncryptionAlgorithm::Pkcs1Oaep => Ok(Mechanism::RsaPkcsOaep),
            EncryptionAlgorithm::NoPadding => Err(AlgorithmError::Unsupported {
                algorithm: self.to_string(),
            }),
        }
    }
}

impl fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EncryptionAlgorithm::Pkcs1v15 => "pkcs1v15",
            EncryptionAlgorithm::Pkcs1Oaep => "oaep",
            EncryptionAlgorithm::NoPadding => "raw",
        };
        f.write_str(name)
    }
}

impl FromStr for EncryptionAlgorithm {
    type Err = AlgorithmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pkcs1v15" | "pkcs1" => Ok(EncryptionAlgorithm::Pkcs1v15),
            "oaep" | "pkcs1-oaep" => Ok(EncryptionAlgorithm::Pkcs1Oaep),
            "raw" | "none" => Ok(EncryptionAlgorithm::NoPadding),
            _ => Err(AlgorithmError::Unsupported {
                algorithm: s.to_string(),
            }),
        }
    }
}

/// RSA mechanisms used against the token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mechanism {
    /// CKM_RSA_PKCS
    RsaPkcs,
    /// CKM_RSA_PKCS_OAEP with SHA-1
    RsaPkcsOaep,
    /// CKM_RSA_X_509, raw RSA
    RsaX509,
}

/// Errors that can occur when working with algorithms
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlgorithmError {
    #[error("Algorithm not supported: {algorithm}")]
    Unsupported { algorithm: String },
}
