mod algorithm;
mod certificate;
mod certificate_id;
mod chain;
mod pin;
mod token;

pub use algorithm::{
    AlgorithmError, DigestAlgorithm, EncryptionAlgorithm, Mechanism, SignatureAlgorithm,
    SignatureFormat,
};
pub use certificate::{Certificate, CertificateError};
pub use certificate_id::CertificateIdentity;
pub use chain::CertificateChain;
pub use pin::{Pin, PinError};
pub use token::TokenIdentity;
