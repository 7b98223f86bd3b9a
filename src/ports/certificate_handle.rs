use crate::error::DriverResult;
use crate::model::Mechanism;

/// A private key object on a token, reached through its certificate
///
/// `sign_any` and `decrypt_any` follow the two-phase convention: with no
/// output buffer they return the required length, with a buffer they fill
/// it and return the length written. Callers hold the session lock across
/// both calls.
pub trait CertificateHandle: Send + Sync {
    /// Blocks until the session is free, then takes it.
    fn lock_session(&self) -> DriverResult<()>;

    fn release_session(&self) -> DriverResult<()>;

    fn sign_any(
        &self,
        mechanism: Mechanism,
        input: &[u8],
        output: Option<&mut [u8]>,
    ) -> DriverResult<usize>;

    fn decrypt_any(
        &self,
        mechanism: Mechanism,
        input: &[u8],
        output: Option<&mut [u8]>,
    ) -> DriverResult<usize>;
}
