//! RSA key backed by a token
//!
//! Public operations use the key from the certificate and never touch the
//! hardware. Private operations lock the key's session, size the output with
//! a first driver call and fill it with a second one.

use std::fmt;
use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Oaep, Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPublicKey};
use sha1::Sha1;
use tracing::{debug, warn};

use crate::error::{DriverError, DriverResult, KeyError, KeyResult, StoreError};
use crate::events::EventSink;
use crate::logic::emsa3::{self, Digester};
use crate::model::{
    CertificateIdentity, EncryptionAlgorithm, Mechanism, SignatureAlgorithm, SignatureFormat,
};
use crate::ports::{CertificateHandle, TokenDriver};

const SHA1_OUTPUT_LEN: usize = 20;

/// Hardware handle shared by every clone of one key
#[derive(Default)]
struct HardwareKey {
    handle: Mutex<Option<Arc<dyn CertificateHandle>>>,
}

/// Sign or verify in progress
enum SignState {
    Idle,
    Digest(Digester),
    Raw(Vec<u8>),
    /// Algorithm the key cannot sign with; ends in `EncodingFailed`
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    None,
    /// EMSA-PKCS1-v1_5 padding to the token's modulus length
    Emsa3,
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Sign,
    Decrypt,
}

impl Operation {
    fn call(
        self,
        handle: &dyn CertificateHandle,
        mechanism: Mechanism,
        input: &[u8],
        output: Option<&mut [u8]>,
    ) -> DriverResult<usize> {
        match self {
            Operation::Sign => handle.sign_any(mechanism, input, output),
            Operation::Decrypt => handle.decrypt_any(mechanism, input, output),
        }
    }

    fn failure(self, error: DriverError) -> KeyError {
        match self {
            Operation::Sign => KeyError::SignFailed(error),
            Operation::Decrypt => KeyError::DecryptFailed(error),
        }
    }
}

/// Holds a handle's session lock; releases it on drop unless released
/// explicitly.
struct SessionGuard<'a> {
    handle: &'a dyn CertificateHandle,
    held: bool,
}

impl<'a> SessionGuard<'a> {
    fn acquire(handle: &'a dyn CertificateHandle) -> KeyResult<Self> {
        handle.lock_session().map_err(KeyError::SessionLockFailed)?;
        Ok(Self { handle, held: true })
    }

    fn release(mut self) -> KeyResult<()> {
        self.held = false;
        self.handle
            .release_session()
            .map_err(KeyError::SessionReleaseFailed)
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if self.held {
            if let Err(e) = self.handle.release_session() {
                warn!("Cannot release session after failure: {e}");
            }
        }
    }
}

pub struct PrivateKeyOperator {
    driver: Arc<dyn TokenDriver>,
    sink: EventSink,
    certificate_id: CertificateIdentity,
    public_key: RsaPublicKey,
    private: bool,
    hardware: Arc<HardwareKey>,
    prompt_context: Option<String>,
    state: SignState,
}

impl PrivateKeyOperator {
    pub fn new(
        driver: Arc<dyn TokenDriver>,
        sink: EventSink,
        certificate_id: CertificateIdentity,
        public_key: RsaPublicKey,
    ) -> Self {
        Self {
            driver,
            sink,
            certificate_id,
            public_key,
            private: true,
            hardware: Arc::new(HardwareKey::default()),
            prompt_context: None,
            state: SignState::Idle,
        }
    }

    /// Sets the string handed to prompt hooks for this key, normally its
    /// serialized entry reference.
    pub fn with_prompt_context(mut self, context: impl Into<String>) -> Self {
        self.prompt_context = Some(context.into());
        self
    }

    pub fn certificate_id(&self) -> &CertificateIdentity {
        &self.certificate_id
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    pub fn is_private(&self) -> bool {
        self.private
    }

    pub fn can_export(&self) -> bool {
        !self.private
    }

    /// Drops the private-key role and the hardware handle.
    pub fn convert_to_public(&mut self) {
        if self.private {
            self.private = false;
            self.hardware = Arc::new(HardwareKey::default());
        }
    }

    pub fn bits(&self) -> usize {
        self.public_key.n().bits()
    }

    pub fn modulus(&self) -> &BigUint {
        self.public_key.n()
    }

    pub fn exponent(&self) -> &BigUint {
        self.public_key.e()
    }

    /// Modulus length in bytes of the certificate key, `ceil(bits / 8)`
    pub fn modulus_len(&self) -> usize {
        self.bits().div_ceil(8)
    }

    pub fn public_key_der(&self) -> KeyResult<Vec<u8>> {
        self.public_key
            .to_public_key_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| KeyError::PublicKey {
                reason: e.to_string(),
            })
    }

    pub fn public_key_pem(&self) -> KeyResult<String> {
        self.public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| KeyError::PublicKey {
                reason: e.to_string(),
            })
    }

    pub fn maximum_encrypt_size(&self, algorithm: EncryptionAlgorithm) -> usize {
        let k = self.modulus_len();
        match algorithm {
            EncryptionAlgorithm::Pkcs1v15 => k.saturating_sub(11),
            EncryptionAlgorithm::Pkcs1Oaep => k.saturating_sub(2 * SHA1_OUTPUT_LEN + 2),
            EncryptionAlgorithm::NoPadding => k,
        }
    }

    pub fn encrypt(&self, plaintext: &[u8], algorithm: EncryptionAlgorithm) -> KeyResult<Vec<u8>> {
        let result = match algorithm {
            EncryptionAlgorithm::Pkcs1v15 => {
                self.public_key.encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext)
            }
            EncryptionAlgorithm::Pkcs1Oaep => {
                self.public_key
                    .encrypt(&mut OsRng, Oaep::new::<Sha1>(), plaintext)
            }
            EncryptionAlgorithm::NoPadding => {
                return Err(KeyError::UnsupportedAlgorithm {
                    algorithm: algorithm.to_string(),
                })
            }
        };
        result.map_err(|e| KeyError::PublicKey {
            reason: e.to_string(),
        })
    }

    /// Decrypts on the token. Failures are also reported as diagnostics.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        algorithm: EncryptionAlgorithm,
    ) -> KeyResult<Vec<u8>> {
        debug!(%algorithm, len = ciphertext.len(), "decrypt - entry");
        let result = self.decrypt_on_token(ciphertext, algorithm);
        if let Err(e) = &result {
            self.report("Cannot decrypt", e);
        }
        debug!(ok = result.is_ok(), "decrypt - return");
        result
    }

    fn decrypt_on_token(
        &self,
        ciphertext: &[u8],
        algorithm: EncryptionAlgorithm,
    ) -> KeyResult<Vec<u8>> {
        if !self.private {
            return Err(KeyError::NotPrivate);
        }
        let mechanism =
            algorithm
                .decrypt_mechanism()
                .map_err(|_| KeyError::UnsupportedAlgorithm {
                    algorithm: algorithm.to_string(),
                })?;
        let handle = self.ensure_handle()?;
        self.two_phase(
            handle.as_ref(),
            Operation::Decrypt,
            mechanism,
            ciphertext,
            Encoding::None,
        )
    }

    /// Starts a signature; any previous sign or verify state is discarded.
    pub fn start_sign(&mut self, algorithm: SignatureAlgorithm, format: SignatureFormat) {
        debug!(%algorithm, ?format, "start_sign");
        self.state = Self::initial_state(algorithm);
    }

    /// Starts a verification with the public key.
    pub fn start_verify(&mut self, algorithm: SignatureAlgorithm, format: SignatureFormat) {
        debug!(%algorithm, ?format, "start_verify");
        self.state = Self::initial_state(algorithm);
    }

    fn initial_state(algorithm: SignatureAlgorithm) -> SignState {
        match algorithm.digest() {
            Some(digest) => SignState::Digest(Digester::new(digest)),
            None if algorithm.is_raw() => SignState::Raw(Vec::new()),
            None => {
                warn!("PKCS#11: Invalid hash algorithm {algorithm}");
                SignState::Unsupported
            }
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            SignState::Digest(digester) => digester.update(data),
            SignState::Raw(buffer) => buffer.extend_from_slice(data),
            SignState::Idle | SignState::Unsupported => {}
        }
    }

    /// Finishes the signature on the token. The state returns to idle on
    /// every path; failures are also reported as diagnostics.
    pub fn end_sign(&mut self) -> KeyResult<Vec<u8>> {
        let state = mem::replace(&mut self.state, SignState::Idle);
        let result = self.sign_on_token(state);
        if let Err(e) = &result {
            self.report("Cannot sign", e);
        }
        result
    }

    fn sign_on_token(&self, state: SignState) -> KeyResult<Vec<u8>> {
        if !self.private {
            return Err(KeyError::NotPrivate);
        }

        let (payload, mechanism, encoding) = match state {
            SignState::Digest(digester) => (
                digester.finalize_digest_info(),
                Mechanism::RsaX509,
                Encoding::Emsa3,
            ),
            SignState::Raw(buffer) => (buffer, Mechanism::RsaPkcs, Encoding::None),
            SignState::Idle | SignState::Unsupported => {
                (Vec::new(), Mechanism::RsaPkcs, Encoding::None)
            }
        };
        if payload.is_empty() {
            return Err(KeyError::EncodingFailed);
        }

        let handle = self.ensure_handle()?;
        self.two_phase(handle.as_ref(), Operation::Sign, mechanism, &payload, encoding)
    }

    /// Checks `signature` against the data fed since `start_verify`.
    pub fn valid_signature(&mut self, signature: &[u8]) -> bool {
        let hashed = match mem::replace(&mut self.state, SignState::Idle) {
            SignState::Digest(digester) => digester.finalize_digest_info(),
            SignState::Raw(buffer) => buffer,
            SignState::Idle | SignState::Unsupported => return false,
        };
        self.public_key
            .verify(Pkcs1v15Sign::new_unprefixed(), &hashed, signature)
            .is_ok()
    }

    pub fn sign_message(&mut self, algorithm: SignatureAlgorithm, data: &[u8]) -> KeyResult<Vec<u8>> {
        self.start_sign(algorithm, SignatureFormat::default());
        self.update(data);
        self.end_sign()
    }

    pub fn verify_message(
        &mut self,
        algorithm: SignatureAlgorithm,
        data: &[u8],
        signature: &[u8],
    ) -> bool {
        self.start_verify(algorithm, SignatureFormat::default());
        self.update(data);
        self.valid_signature(signature)
    }

    /// Asks the driver to make the token available, prompting if needed.
    pub fn ensure_token_access(&self) -> bool {
        match self
            .driver
            .ensure_token_access(&self.certificate_id, self.prompt_context.as_deref())
        {
            Ok(available) => available,
            Err(e) => {
                self.sink
                    .report("Cannot access token", &StoreError::Driver(e));
                false
            }
        }
    }

    fn ensure_handle(&self) -> KeyResult<Arc<dyn CertificateHandle>> {
        let mut slot = self.hardware.handle.lock();
        if let Some(handle) = slot.as_ref() {
            return Ok(handle.clone());
        }
        let handle = self
            .driver
            .create_certificate(&self.certificate_id, self.prompt_context.as_deref())
            .map_err(KeyError::HandleCreationFailed)?;
        *slot = Some(handle.clone());
        Ok(handle)
    }

    /// Runs the size query then the fill call under the session lock. With
    /// `Encoding::Emsa3` the input is padded to the length the token reports.
    fn two_phase(
        &self,
        handle: &dyn CertificateHandle,
        operation: Operation,
        mechanism: Mechanism,
        input: &[u8],
        encoding: Encoding,
    ) -> KeyResult<Vec<u8>> {
        let session = SessionGuard::acquire(handle)?;

        let size = operation
            .call(handle, mechanism, input, None)
            .map_err(|e| operation.failure(e))?;
        let encoded;
        let input = match encoding {
            Encoding::None => input,
            Encoding::Emsa3 => {
                encoded = emsa3::encode(input, size);
                if encoded.is_empty() {
                    return Err(KeyError::EncodingFailed);
                }
                encoded.as_slice()
            }
        };

        let mut output = vec![0u8; size];
        let written = operation
            .call(handle, mechanism, input, Some(&mut output))
            .map_err(|e| operation.failure(e))?;
        output.truncate(written);

        session.release()?;
        Ok(output)
    }

    fn report(&self, description: &str, error: &KeyError) {
        self.sink
            .report(description, &StoreError::Key(error.clone()));
    }
}

impl Clone for PrivateKeyOperator {
    /// Clones share the hardware handle and start with no sign in progress.
    fn clone(&self) -> Self {
        Self {
            driver: self.driver.clone(),
            sink: self.sink.clone(),
            certificate_id: self.certificate_id.clone(),
            public_key: self.public_key.clone(),
            private: self.private,
            hardware: self.hardware.clone(),
            prompt_context: self.prompt_context.clone(),
            state: SignState::Idle,
        }
    }
}

impl fmt::Debug for PrivateKeyOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKeyOperator")
            .field("token", &self.certificate_id.token)
            .field("id", &hex::encode(&self.certificate_id.id))
            .field("bits", &self.bits())
            .field("private", &self.private)
            .finish()
    }
}
