//! Error types for tokenstore
//!
//! This module defines the error hierarchy for all tokenstore operations.
//! Errors are organized hierarchically and use thiserror for implementation.

use thiserror::Error;

/// Result type alias for tokenstore operations
///
/// This is a convenience alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for raw driver calls
pub type DriverResult<T> = Result<T, DriverError>;

/// Result type alias for private key operations
pub type KeyResult<T> = Result<T, KeyError>;

/// Top-level error type for all tokenstore operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Hardware driver errors not otherwise classified
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// Malformed serialized entry reference
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Private key operation errors
    #[error("Key operation error: {0}")]
    Key(#[from] KeyError),

    /// Domain validation errors
    #[error("Domain validation error: {0}")]
    Domain(#[from] DomainError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Status codes reported by the driver, as defined by PKCS#11.
pub mod status {
    pub const CKR_OK: u64 = 0x0000_0000;
    pub const CKR_CANCEL: u64 = 0x0000_0001;
    pub const CKR_HOST_MEMORY: u64 = 0x0000_0002;
    pub const CKR_GENERAL_ERROR: u64 = 0x0000_0005;
    pub const CKR_FUNCTION_FAILED: u64 = 0x0000_0006;
    pub const CKR_ARGUMENTS_BAD: u64 = 0x0000_0007;
    pub const CKR_ATTRIBUTE_VALUE_INVALID: u64 = 0x0000_0013;
    pub const CKR_DATA_LEN_RANGE: u64 = 0x0000_0021;
    pub const CKR_DEVICE_REMOVED: u64 = 0x0000_0032;
    pub const CKR_ENCRYPTED_DATA_INVALID: u64 = 0x0000_0040;
    pub const CKR_ENCRYPTED_DATA_LEN_RANGE: u64 = 0x0000_0041;
    pub const CKR_FUNCTION_CANCELED: u64 = 0x0000_0050;
    pub const CKR_FUNCTION_NOT_SUPPORTED: u64 = 0x0000_0054;
    pub const CKR_KEY_HANDLE_INVALID: u64 = 0x0000_0060;
    pub const CKR_KEY_FUNCTION_NOT_PERMITTED: u64 = 0x0000_0068;
    pub const CKR_MECHANISM_INVALID: u64 = 0x0000_0070;
    pub const CKR_OBJECT_HANDLE_INVALID: u64 = 0x0000_0082;
    pub const CKR_OPERATION_ACTIVE: u64 = 0x0000_0090;
    pub const CKR_PIN_INCORRECT: u64 = 0x0000_00A0;
    pub const CKR_PIN_LOCKED: u64 = 0x0000_00A4;
    pub const CKR_SESSION_HANDLE_INVALID: u64 = 0x0000_00B3;
    pub const CKR_TOKEN_NOT_PRESENT: u64 = 0x0000_00E0;
    pub const CKR_USER_NOT_LOGGED_IN: u64 = 0x0000_0101;
    pub const CKR_BUFFER_TOO_SMALL: u64 = 0x0000_0150;
    pub const CKR_CRYPTOKI_NOT_INITIALIZED: u64 = 0x0000_0190;

    /// Short native text for a status code.
    pub fn message(code: u64) -> &'static str {
        match code {
            CKR_OK => "CKR_OK",
            CKR_CANCEL => "CKR_CANCEL",
            CKR_HOST_MEMORY => "CKR_HOST_MEMORY",
            CKR_GENERAL_ERROR => "CKR_GENERAL_ERROR",
            CKR_FUNCTION_FAILED => "CKR_FUNCTION_FAILED",
            CKR_ARGUMENTS_BAD => "CKR_ARGUMENTS_BAD",
            CKR_ATTRIBUTE_VALUE_INVALID => "CKR_ATTRIBUTE_VALUE_INVALID",
            CKR_DATA_LEN_RANGE => "CKR_DATA_LEN_RANGE",
            CKR_DEVICE_REMOVED => "CKR_DEVICE_REMOVED",
            CKR_ENCRYPTED_DATA_INVALID => "CKR_ENCRYPTED_DATA_INVALID",
            CKR_ENCRYPTED_DATA_LEN_RANGE => "CKR_ENCRYPTED_DATA_LEN_RANGE",
            CKR_FUNCTION_CANCELED => "CKR_FUNCTION_CANCELED",
            CKR_FUNCTION_NOT_SUPPORTED => "CKR_FUNCTION_NOT_SUPPORTED",
            CKR_KEY_HANDLE_INVALID => "CKR_KEY_HANDLE_INVALID",
            CKR_KEY_FUNCTION_NOT_PERMITTED => "CKR_KEY_FUNCTION_NOT_PERMITTED",
            CKR_MECHANISM_INVALID => "CKR_MECHANISM_INVALID",
            CKR_OBJECT_HANDLE_INVALID => "CKR_OBJECT_HANDLE_INVALID",
            CKR_OPERATION_ACTIVE => "CKR_OPERATION_ACTIVE",
            CKR_PIN_INCORRECT => "CKR_PIN_INCORRECT",
            CKR_PIN_LOCKED => "CKR_PIN_LOCKED",
            CKR_SESSION_HANDLE_INVALID => "CKR_SESSION_HANDLE_INVALID",
            CKR_TOKEN_NOT_PRESENT => "CKR_TOKEN_NOT_PRESENT",
            CKR_USER_NOT_LOGGED_IN => "CKR_USER_NOT_LOGGED_IN",
            CKR_BUFFER_TOO_SMALL => "CKR_BUFFER_TOO_SMALL",
            CKR_CRYPTOKI_NOT_INITIALIZED => "CKR_CRYPTOKI_NOT_INITIALIZED",
            _ => "Unknown error",
        }
    }
}

/// A hardware status failure: the driver's status code plus its native text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}-'{message}'")]
pub struct DriverError {
    pub code: u64,
    pub message: String,
}

impl DriverError {
    pub fn new(code: u64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Error carrying the driver's own text for `code`.
    pub fn from_status(code: u64) -> Self {
        Self::new(code, status::message(code))
    }
}

/// Malformed serialized entry reference
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Fewer than five `/`-separated fields
    #[error("Invalid serialization: expected at least 5 fields, found {found}")]
    TooFewFields { found: usize },

    /// First field is not the store prefix
    #[error("Invalid serialization: unexpected prefix '{found}'")]
    Prefix { found: String },

    /// Unknown serialization version
    #[error("Invalid serialization version '{found}'")]
    Version { found: String },

    /// Private-key flag is neither `0` nor `1`
    #[error("Invalid serialization: bad private flag '{found}'")]
    PrivateFlag { found: String },

    /// Broken `\xHHHH` escape sequence
    #[error("Invalid escape sequence at offset {offset}")]
    Escape { offset: usize },

    /// Certificate field is not valid base64
    #[error("Invalid base64 in field {field}: {source}")]
    Base64 {
        field: usize,
        #[source]
        source: base64::DecodeError,
    },

    /// Subject certificate field is empty
    #[error("Invalid serialization: missing certificate")]
    MissingCertificate,

    /// Issuer certificate does not parse
    #[error("Invalid issuer certificate: {0}")]
    Certificate(#[from] crate::model::CertificateError),

    /// Driver refused the certificate id
    #[error("Invalid certificate id: {0}")]
    CertificateId(#[source] DriverError),
}

/// Private key operation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// Algorithm has no matching hardware mechanism
    #[error("Algorithm not supported: {algorithm}")]
    UnsupportedAlgorithm { algorithm: String },

    /// Driver could not materialize the certificate/key handle
    #[error("Cannot create low-level certificate: {0}")]
    HandleCreationFailed(DriverError),

    /// Session lock could not be acquired
    #[error("Cannot lock session: {0}")]
    SessionLockFailed(DriverError),

    /// Session lock could not be released
    #[error("Cannot release session: {0}")]
    SessionReleaseFailed(DriverError),

    /// Hardware decrypt primitive failed
    #[error("Decryption error: {0}")]
    DecryptFailed(DriverError),

    /// Hardware sign primitive failed
    #[error("Signature failed: {0}")]
    SignFailed(DriverError),

    /// Message could not be encoded for signing
    #[error("Cannot encode signature")]
    EncodingFailed,

    /// Key has no private-key role
    #[error("Key has no private-key role")]
    NotPrivate,

    /// Public key operation failed
    #[error("Public key operation failed: {reason}")]
    PublicKey { reason: String },
}

impl KeyError {
    /// Status code and native text used in diagnostics.
    pub fn status(&self) -> (u64, String) {
        match self {
            KeyError::HandleCreationFailed(e)
            | KeyError::SessionLockFailed(e)
            | KeyError::SessionReleaseFailed(e)
            | KeyError::DecryptFailed(e)
            | KeyError::SignFailed(e) => (e.code, e.message.clone()),
            KeyError::UnsupportedAlgorithm { .. } => (
                status::CKR_FUNCTION_NOT_SUPPORTED,
                self.to_string(),
            ),
            KeyError::EncodingFailed | KeyError::NotPrivate | KeyError::PublicKey { .. } => {
                (status::CKR_FUNCTION_FAILED, self.to_string())
            }
        }
    }
}

/// Domain validation errors
#[derive(Error, Debug)]
pub enum DomainError {
    /// Certificate parsing error
    #[error("Certificate error: {0}")]
    Certificate(#[from] crate::model::CertificateError),

    /// PIN error
    #[error("PIN error: {0}")]
    Pin(#[from] crate::model::PinError),

    /// Certificate id carries no certificate
    #[error("Missing certificate")]
    MissingCertificate,

    /// Leaf key is not RSA
    #[error("Unsupported key type: {algorithm}")]
    UnsupportedKeyType { algorithm: String },

    /// No entry matches the given reference
    #[error("No key store entry matches '{reference}'")]
    EntryNotFound { reference: String },
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Key holds a value of the wrong type or range
    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

impl From<crate::model::CertificateError> for StoreError {
    fn from(err: crate::model::CertificateError) -> Self {
        StoreError::Domain(DomainError::Certificate(err))
    }
}

impl From<crate::model::PinError> for StoreError {
    fn from(err: crate::model::PinError) -> Self {
        StoreError::Domain(DomainError::Pin(err))
    }
}

impl StoreError {
    /// Status code and message used when reporting this error as a diagnostic.
    pub fn status(&self) -> (u64, String) {
        match self {
            StoreError::Driver(e) => (e.code, e.message.clone()),
            StoreError::Decode(DecodeError::CertificateId(e)) => (e.code, e.message.clone()),
            StoreError::Key(e) => e.status(),
            StoreError::Domain(_) => (status::CKR_ARGUMENTS_BAD, self.to_string()),
            StoreError::Decode(_) | StoreError::Config(_) => {
                (status::CKR_FUNCTION_FAILED, self.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::Driver(DriverError::from_status(status::CKR_TOKEN_NOT_PRESENT));
        assert!(err.to_string().contains("CKR_TOKEN_NOT_PRESENT"));
    }

    #[test]
    fn test_driver_error_format() {
        let err = DriverError::new(0xa0, "CKR_PIN_INCORRECT");
        assert_eq!(err.to_string(), "160-'CKR_PIN_INCORRECT'");
    }

    #[test]
    fn test_key_error_status_keeps_driver_code() {
        let err = KeyError::SessionLockFailed(DriverError::from_status(status::CKR_DEVICE_REMOVED));
        let (code, message) = err.status();
        assert_eq!(code, status::CKR_DEVICE_REMOVED);
        assert_eq!(message, "CKR_DEVICE_REMOVED");
    }

    #[test]
    fn test_pin_error_conversion() {
        let pin_err = crate::model::PinError::DoesNotFit {
            length: 10,
            capacity: 4,
        };
        let err: StoreError = pin_err.into();
        assert!(err.to_string().contains("PIN"));
    }

    #[test]
    fn test_result_type_alias() {
        let result: StoreResult<i32> = Ok(42);
        assert_eq!(result.unwrap(), 42);

        let result: StoreResult<i32> = Err(DecodeError::MissingCertificate.into());
        assert!(result.is_err());
    }
}
