use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, Oaep, Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey};
use sha1::Sha1;

use crate::adapters::SessionLock;
use crate::config::{LogLevel, ModuleConfig, PinCache, PrivateMask};
use crate::error::{status, DriverError, DriverResult};
use crate::model::{CertificateIdentity, Mechanism, Pin, TokenIdentity};
use crate::ports::{
    CertificateHandle, DriverHooks, EnumMethod, TokenCertificates, TokenDriver,
};

/// DER fixtures under `tests/data`
pub mod fixtures {
    use rsa::pkcs8::DecodePrivateKey;
    use rsa::RsaPrivateKey;

    /// Self-signed RSA-2048 root, `O=Test Org, CN=Test Root CA`
    pub const CA_DER: &[u8] = include_bytes!("../../tests/data/ca.der");
    /// RSA-2048 leaf issued by the root, `O=Test Org, CN=Alice Smartcard`
    pub const LEAF_DER: &[u8] = include_bytes!("../../tests/data/leaf.der");
    pub const LEAF_KEY_PK8: &[u8] = include_bytes!("../../tests/data/leaf_key.pk8.der");
    /// Self-signed RSA-1024, `CN=Bob Token`
    pub const OTHER_DER: &[u8] = include_bytes!("../../tests/data/other.der");
    pub const RSA1024_PK8: &[u8] = include_bytes!("../../tests/data/rsa1024.pk8.der");
    pub const RSA2047_PK8: &[u8] = include_bytes!("../../tests/data/rsa2047.pk8.der");

    pub fn leaf_key() -> RsaPrivateKey {
        RsaPrivateKey::from_pkcs8_der(LEAF_KEY_PK8).unwrap()
    }

    pub fn rsa1024_key() -> RsaPrivateKey {
        RsaPrivateKey::from_pkcs8_der(RSA1024_PK8).unwrap()
    }

    pub fn rsa2047_key() -> RsaPrivateKey {
        RsaPrivateKey::from_pkcs8_der(RSA2047_PK8).unwrap()
    }
}

pub const LEAF_OBJECT_ID: &[u8] = &[0x01];
pub const CA_OBJECT_ID: &[u8] = &[0x02];

#[derive(Debug, Clone)]
pub struct FakeObject {
    pub id: Vec<u8>,
    pub certificate: Vec<u8>,
    pub key: Option<RsaPrivateKey>,
}

#[derive(Debug, Clone)]
pub struct FakeToken {
    pub identity: TokenIdentity,
    pub objects: Vec<FakeObject>,
    pub present: bool,
    pub pin: Option<Pin>,
    pub logged_in: bool,
}

impl FakeToken {
    pub fn new(label: &str) -> Self {
        Self {
            identity: TokenIdentity::new("Fake Vendor", "FakeCard", format!("SN-{label}"), label),
            objects: Vec::new(),
            present: true,
            pin: None,
            logged_in: false,
        }
    }

    /// Token holding the leaf with its key and the root without one.
    pub fn with_default_objects(label: &str) -> Self {
        Self::new(label)
            .with_object(FakeObject {
                id: LEAF_OBJECT_ID.to_vec(),
                certificate: fixtures::LEAF_DER.to_vec(),
                key: Some(fixtures::leaf_key()),
            })
            .with_object(FakeObject {
                id: CA_OBJECT_ID.to_vec(),
                certificate: fixtures::CA_DER.to_vec(),
                key: None,
            })
    }

    pub fn with_object(mut self, object: FakeObject) -> Self {
        self.objects.push(object);
        self
    }

    pub fn with_pin(mut self, pin: &str) -> Self {
        self.pin = Some(Pin::from_str(pin).unwrap());
        self
    }

    pub fn certificate_id(&self, object_id: &[u8]) -> CertificateIdentity {
        let object = self
            .objects
            .iter()
            .find(|o| o.id == object_id)
            .expect("object on fake token");
        CertificateIdentity::new(
            self.identity.clone(),
            object.id.clone(),
            object.certificate.clone(),
        )
    }
}

/// Driver calls that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    EnumTokens,
    EnumCertificates,
    CreateCertificate,
    Lock,
    Release,
    SignSize,
    SignFill,
    DecryptSize,
    DecryptFill,
    AddProvider,
}

#[derive(Default)]
pub struct FakeState {
    tokens: Mutex<Vec<FakeToken>>,
    hooks: Mutex<DriverHooks>,
    failures: Mutex<HashMap<FailurePoint, DriverError>>,
    providers: Mutex<Vec<String>>,
    private_mask: Mutex<PrivateMask>,
    log_level: Mutex<LogLevel>,
    pin_cache: Mutex<PinCache>,
    protected_authentication: AtomicBool,
    operation_delay: Mutex<Duration>,
    live_handles: AtomicUsize,
    locked_sessions: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    operations: AtomicUsize,
    pin_prompts: AtomicUsize,
    token_prompts: AtomicUsize,
    slot_events_started: AtomicBool,
    terminated: AtomicBool,
}

impl FakeState {
    fn check(&self, point: FailurePoint) -> DriverResult<()> {
        match self.failures.lock().get(&point) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn hooks(&self) -> DriverHooks {
        self.hooks.lock().clone()
    }

    fn find_token(&self, identity: &TokenIdentity) -> Option<FakeToken> {
        self.tokens
            .lock()
            .iter()
            .find(|t| &t.identity == identity)
            .cloned()
    }

    fn update_token(&self, identity: &TokenIdentity, f: impl FnOnce(&mut FakeToken)) {
        if let Some(token) = self.tokens.lock().iter_mut().find(|t| &t.identity == identity) {
            f(token);
        }
    }

    /// Prompts for the token until it is present or the user cancels.
    fn require_token(&self, identity: &TokenIdentity, user_data: Option<&str>) -> DriverResult<()> {
        for retry in 0..3 {
            match self.find_token(identity) {
                Some(token) if token.present => return Ok(()),
                Some(_) => {}
                None => return Err(DriverError::from_status(status::CKR_TOKEN_NOT_PRESENT)),
            }
            self.token_prompts.fetch_add(1, Ordering::SeqCst);
            let prompt = self.hooks().token_prompt;
            if !prompt(user_data, identity, retry) {
                return Err(DriverError::from_status(status::CKR_FUNCTION_CANCELED));
            }
            // Accepting the prompt stands in for inserting the card.
            self.update_token(identity, |t| t.present = true);
        }
        Err(DriverError::from_status(status::CKR_TOKEN_NOT_PRESENT))
    }

    fn login(&self, identity: &TokenIdentity, user_data: Option<&str>) -> DriverResult<()> {
        let token = self
            .find_token(identity)
            .ok_or_else(|| DriverError::from_status(status::CKR_TOKEN_NOT_PRESENT))?;
        let Some(expected) = token.pin else {
            return Ok(());
        };
        if token.logged_in {
            return Ok(());
        }

        for retry in 0..3 {
            let mut buffer = [0u8; 64];
            self.pin_prompts.fetch_add(1, Ordering::SeqCst);
            let prompt = self.hooks().pin_prompt;
            if !prompt(user_data, identity, retry, &mut buffer) {
                return Err(DriverError::from_status(status::CKR_FUNCTION_CANCELED));
            }
            if Pin::from_buffer(&buffer).ok().as_ref() == Some(&expected) {
                self.update_token(identity, |t| t.logged_in = true);
                return Ok(());
            }
        }
        Err(DriverError::from_status(status::CKR_PIN_INCORRECT))
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.operations.fetch_add(1, Ordering::SeqCst);
        let delay = *self.operation_delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        InFlight(self)
    }
}

struct InFlight<'a>(&'a FakeState);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory driver backed by real keys and certificates
#[derive(Clone, Default)]
pub struct FakeTokenDriver {
    state: Arc<FakeState>,
}

impl FakeTokenDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_token() -> Self {
        let driver = Self::new();
        driver.add_token(FakeToken::with_default_objects("Test Token"));
        driver
    }

    pub fn add_token(&self, token: FakeToken) {
        self.state.tokens.lock().push(token);
    }

    pub fn remove_token(&self, identity: &TokenIdentity) {
        self.state.tokens.lock().retain(|t| &t.identity != identity);
    }

    pub fn set_present(&self, identity: &TokenIdentity, present: bool) {
        self.state.update_token(identity, |t| {
            t.present = present;
            t.logged_in = false;
        });
    }

    pub fn token(&self, index: usize) -> FakeToken {
        self.state.tokens.lock()[index].clone()
    }

    pub fn fail_at(&self, point: FailurePoint, error: DriverError) {
        self.state.failures.lock().insert(point, error);
    }

    pub fn clear_failure(&self, point: FailurePoint) {
        self.state.failures.lock().remove(&point);
    }

    pub fn set_operation_delay(&self, delay: Duration) {
        *self.state.operation_delay.lock() = delay;
    }

    /// Calls the installed slot event hook, as a driver thread would.
    pub fn fire_slot_event(&self) {
        let hook = self.state.hooks().slot_event;
        hook();
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        let hook = self.state.hooks().log;
        hook(level, message);
    }

    pub fn live_handles(&self) -> usize {
        self.state.live_handles.load(Ordering::SeqCst)
    }

    /// Sessions currently held through `lock_session`
    pub fn locked_sessions(&self) -> usize {
        self.state.locked_sessions.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn operations(&self) -> usize {
        self.state.operations.load(Ordering::SeqCst)
    }

    pub fn pin_prompts(&self) -> usize {
        self.state.pin_prompts.load(Ordering::SeqCst)
    }

    pub fn token_prompts(&self) -> usize {
        self.state.token_prompts.load(Ordering::SeqCst)
    }

    pub fn providers(&self) -> Vec<String> {
        self.state.providers.lock().clone()
    }

    pub fn log_level(&self) -> LogLevel {
        *self.state.log_level.lock()
    }

    pub fn pin_cache(&self) -> PinCache {
        *self.state.pin_cache.lock()
    }

    pub fn protected_authentication(&self) -> bool {
        self.state.protected_authentication.load(Ordering::SeqCst)
    }

    pub fn slot_events_started(&self) -> bool {
        self.state.slot_events_started.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.state.terminated.load(Ordering::SeqCst)
    }
}

impl TokenDriver for FakeTokenDriver {
    fn enum_tokens(&self, _method: EnumMethod) -> DriverResult<Vec<TokenIdentity>> {
        self.state.check(FailurePoint::EnumTokens)?;
        Ok(self
            .state
            .tokens
            .lock()
            .iter()
            .filter(|t| t.present)
            .map(|t| t.identity.clone())
            .collect())
    }

    fn enum_token_certificates(
        &self,
        token: &TokenIdentity,
        _method: EnumMethod,
        _user_data: Option<&str>,
    ) -> DriverResult<TokenCertificates> {
        self.state.check(FailurePoint::EnumCertificates)?;
        let token = self
            .state
            .find_token(token)
            .filter(|t| t.present)
            .ok_or_else(|| DriverError::from_status(status::CKR_TOKEN_NOT_PRESENT))?;

        let mut found = TokenCertificates::default();
        for object in &token.objects {
            let id = CertificateIdentity::new(
                token.identity.clone(),
                object.id.clone(),
                object.certificate.clone(),
            );
            if object.key.is_some() {
                found.certificates.push(id);
            } else {
                found.issuers.push(id);
            }
        }
        Ok(found)
    }

    fn create_certificate(
        &self,
        id: &CertificateIdentity,
        user_data: Option<&str>,
    ) -> DriverResult<Arc<dyn CertificateHandle>> {
        self.state.check(FailurePoint::CreateCertificate)?;
        self.state.require_token(&id.token, user_data)?;

        let token = self
            .state
            .find_token(&id.token)
            .ok_or_else(|| DriverError::from_status(status::CKR_TOKEN_NOT_PRESENT))?;
        let object = token
            .objects
            .iter()
            .find(|o| o.id == id.id)
            .ok_or_else(|| DriverError::from_status(status::CKR_OBJECT_HANDLE_INVALID))?;

        self.state.live_handles.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeCertificate {
            state: self.state.clone(),
            token: id.token.clone(),
            key: object.key.clone(),
            user_data: user_data.map(str::to_string),
            lock: SessionLock::new(),
        }))
    }

    fn ensure_token_access(
        &self,
        id: &CertificateIdentity,
        user_data: Option<&str>,
    ) -> DriverResult<bool> {
        self.state.require_token(&id.token, user_data)?;
        self.state.login(&id.token, user_data)?;
        Ok(true)
    }

    fn install_hooks(&self, hooks: DriverHooks) {
        *self.state.hooks.lock() = hooks;
    }

    fn start_slot_events(&self) -> DriverResult<()> {
        self.state.slot_events_started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn set_log_level(&self, level: LogLevel) -> DriverResult<()> {
        *self.state.log_level.lock() = level;
        Ok(())
    }

    fn set_protected_authentication(&self, allow: bool) -> DriverResult<()> {
        self.state
            .protected_authentication
            .store(allow, Ordering::SeqCst);
        Ok(())
    }

    fn set_pin_cache_period(&self, period: PinCache) -> DriverResult<()> {
        *self.state.pin_cache.lock() = period;
        Ok(())
    }

    fn add_provider(&self, module: &ModuleConfig) -> DriverResult<()> {
        self.state.check(FailurePoint::AddProvider)?;
        self.state.providers.lock().push(module.display_name());
        *self.state.private_mask.lock() = module.private_mask;
        Ok(())
    }

    fn remove_provider(&self, name: &str) -> DriverResult<()> {
        let mut providers = self.state.providers.lock();
        let before = providers.len();
        providers.retain(|p| p != name);
        if providers.len() == before {
            return Err(DriverError::from_status(status::CKR_ARGUMENTS_BAD));
        }
        Ok(())
    }

    fn terminate(&self) {
        self.state.providers.lock().clear();
        self.state.terminated.store(true, Ordering::SeqCst);
    }
}

pub struct FakeCertificate {
    state: Arc<FakeState>,
    token: TokenIdentity,
    key: Option<RsaPrivateKey>,
    user_data: Option<String>,
    lock: SessionLock,
}

impl FakeCertificate {
    fn prepare(&self, point: FailurePoint) -> DriverResult<&RsaPrivateKey> {
        if !self.lock.is_locked() {
            return Err(DriverError::new(
                status::CKR_GENERAL_ERROR,
                "session is not locked",
            ));
        }
        self.state.check(point)?;
        self.state.login(&self.token, self.user_data.as_deref())?;
        self.key
            .as_ref()
            .ok_or_else(|| DriverError::from_status(status::CKR_KEY_HANDLE_INVALID))
    }
}

fn raw_rsa(key: &RsaPrivateKey, input: &[u8]) -> DriverResult<Vec<u8>> {
    let k = key.size();
    let m = BigUint::from_bytes_be(input);
    if input.len() > k || &m >= key.n() {
        return Err(DriverError::from_status(status::CKR_DATA_LEN_RANGE));
    }
    let s = m.modpow(key.d(), key.n()).to_bytes_be();
    let mut out = vec![0u8; k - s.len()];
    out.extend_from_slice(&s);
    Ok(out)
}

fn copy_out(result: &[u8], output: &mut [u8]) -> DriverResult<usize> {
    if output.len() < result.len() {
        return Err(DriverError::from_status(status::CKR_BUFFER_TOO_SMALL));
    }
    output[..result.len()].copy_from_slice(result);
    Ok(result.len())
}

impl CertificateHandle for FakeCertificate {
    fn lock_session(&self) -> DriverResult<()> {
        self.state.check(FailurePoint::Lock)?;
        self.lock.lock();
        self.state.locked_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release_session(&self) -> DriverResult<()> {
        let result = self.lock.unlock();
        if result.is_ok() {
            self.state.locked_sessions.fetch_sub(1, Ordering::SeqCst);
        }
        self.state.check(FailurePoint::Release)?;
        result
    }

    fn sign_any(
        &self,
        mechanism: Mechanism,
        input: &[u8],
        output: Option<&mut [u8]>,
    ) -> DriverResult<usize> {
        let point = if output.is_some() {
            FailurePoint::SignFill
        } else {
            FailurePoint::SignSize
        };
        let key = self.prepare(point)?;
        if !self.state.private_mask.lock().permits_sign(true) {
            return Err(DriverError::from_status(
                status::CKR_KEY_FUNCTION_NOT_PERMITTED,
            ));
        }
        let Some(output) = output else {
            return Ok(key.size());
        };
        let _in_flight = self.state.enter();

        let signature = match mechanism {
            Mechanism::RsaPkcs => key
                .sign(Pkcs1v15Sign::new_unprefixed(), input)
                .map_err(|_| DriverError::from_status(status::CKR_DATA_LEN_RANGE))?,
            Mechanism::RsaX509 => raw_rsa(key, input)?,
            Mechanism::RsaPkcsOaep => {
                return Err(DriverError::from_status(status::CKR_MECHANISM_INVALID))
            }
        };
        copy_out(&signature, output)
    }

    fn decrypt_any(
        &self,
        mechanism: Mechanism,
        input: &[u8],
        output: Option<&mut [u8]>,
    ) -> DriverResult<usize> {
        let point = if output.is_some() {
            FailurePoint::DecryptFill
        } else {
            FailurePoint::DecryptSize
        };
        let key = self.prepare(point)?;
        if !self.state.private_mask.lock().permits_decrypt(true) {
            return Err(DriverError::from_status(
                status::CKR_KEY_FUNCTION_NOT_PERMITTED,
            ));
        }
        if input.len() != key.size() {
            return Err(DriverError::from_status(
                status::CKR_ENCRYPTED_DATA_LEN_RANGE,
            ));
        }
        let Some(output) = output else {
            return Ok(key.size());
        };
        let _in_flight = self.state.enter();

        let invalid = |_| DriverError::from_status(status::CKR_ENCRYPTED_DATA_INVALID);
        let plaintext = match mechanism {
            Mechanism::RsaPkcs => key.decrypt(Pkcs1v15Encrypt, input).map_err(invalid)?,
            Mechanism::RsaPkcsOaep => key.decrypt(Oaep::new::<Sha1>(), input).map_err(invalid)?,
            Mechanism::RsaX509 => raw_rsa(key, input)?,
        };
        copy_out(&plaintext, output)
    }
}

impl Drop for FakeCertificate {
    fn drop(&mut self) {
        self.state.live_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract_tests_for;
    use crate::ports::contract_tests::driver_contract;

    contract_tests_for!(
        fake_token_contract,
        make = FakeTokenDriver::with_default_token,
        tests = {
            test_enum_tokens_lists_token => driver_contract::test_enum_tokens_lists_token,
            test_cached_enumeration_matches_reload => driver_contract::test_cached_enumeration_matches_reload,
            test_certificates_carry_parsable_blobs => driver_contract::test_certificates_carry_parsable_blobs,
            test_certificate_id_round_trip => driver_contract::test_certificate_id_round_trip,
            test_deserialize_garbage_fails => driver_contract::test_deserialize_garbage_fails,
            test_two_phase_sign => driver_contract::test_two_phase_sign,
            test_sign_buffer_too_small => driver_contract::test_sign_buffer_too_small,
            test_two_phase_decrypt => driver_contract::test_two_phase_decrypt,
            test_release_without_lock_fails => driver_contract::test_release_without_lock_fails,
        }
    );

    #[test]
    fn test_absent_token_is_not_listed() {
        let driver = FakeTokenDriver::with_default_token();
        let identity = driver.token(0).identity;
        driver.set_present(&identity, false);
        assert!(driver.enum_tokens(EnumMethod::Reload).unwrap().is_empty());
    }

    #[test]
    fn test_live_handles_are_counted() {
        let driver = FakeTokenDriver::with_default_token();
        let id = driver.token(0).certificate_id(LEAF_OBJECT_ID);
        let handle = driver.create_certificate(&id, None).unwrap();
        assert_eq!(driver.live_handles(), 1);
        drop(handle);
        assert_eq!(driver.live_handles(), 0);
    }

    #[test]
    fn test_pin_prompt_hook_logs_in() {
        let driver = FakeTokenDriver::new();
        driver.add_token(FakeToken::with_default_objects("Locked").with_pin("4321"));
        driver.install_hooks(DriverHooks::default().with_pin_prompt(|_, _, _, buffer| {
            Pin::from_str("4321").unwrap().copy_to_buffer(buffer).is_ok()
        }));

        let id = driver.token(0).certificate_id(LEAF_OBJECT_ID);
        assert!(driver.ensure_token_access(&id, None).unwrap());
        assert_eq!(driver.pin_prompts(), 1);
        assert!(driver.token(0).logged_in);
    }

    #[test]
    fn test_cancelled_pin_prompt() {
        let driver = FakeTokenDriver::new();
        driver.add_token(FakeToken::with_default_objects("Locked").with_pin("4321"));

        let id = driver.token(0).certificate_id(LEAF_OBJECT_ID);
        let err = driver.ensure_token_access(&id, None).unwrap_err();
        assert_eq!(err.code, status::CKR_FUNCTION_CANCELED);
    }

    #[test]
    fn test_raw_rsa_matches_pkcs1_signature() {
        let key = fixtures::leaf_key();
        let message = b"\x30\x21digest-info-stand-in";
        let em = crate::logic::emsa3::encode(message, key.size());
        let raw = raw_rsa(&key, &em).unwrap();
        let pkcs = key.sign(Pkcs1v15Sign::new_unprefixed(), message).unwrap();
        assert_eq!(raw, pkcs);
    }
}
