//! PKCS#11 implementation of the driver port
//!
//! Modules are loaded with cryptoki. Tokens are found by scanning every slot
//! with a token; certificates with a matching key object (same `CKA_ID`) are
//! leaves, the rest are issuers. Each certificate handle owns a read-only
//! session guarded by a `SessionLock`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::error::{Error as CkError, RvError};
use cryptoki::mechanism::rsa::{PkcsMgfType, PkcsOaepParams, PkcsOaepSource};
use cryptoki::mechanism::{Mechanism as CkMechanism, MechanismType};
use cryptoki::object::{Attribute, AttributeType, ObjectClass, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::slot::{Slot, TokenInfo};
use cryptoki::types::AuthPin;
use parking_lot::{Condvar, Mutex};
use rsa::traits::PublicKeyParts;
use rsa::BigUint;
use tracing::{debug, info, warn};

use crate::adapters::SessionLock;
use crate::config::{LogLevel, ModuleConfig, PinCache, PrivateMask};
use crate::error::{status, DriverError, DriverResult};
use crate::model::{Certificate, CertificateIdentity, Mechanism, Pin, TokenIdentity};
use crate::ports::{
    CertificateHandle, DriverHooks, EnumMethod, TokenCertificates, TokenDriver,
};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const MAX_PROMPTS: u32 = 3;
const PIN_BUFFER_LEN: usize = 256;

/// Maps a cryptoki failure onto a status code and the driver's text.
pub(crate) fn driver_error(err: CkError) -> DriverError {
    match err {
        CkError::Pkcs11(rv, function) => {
            let code = rv_code(rv);
            let message = match status::message(code) {
                "Unknown error" => format!("{rv} in {function:?}"),
                known => known.to_string(),
            };
            DriverError::new(code, message)
        }
        other => DriverError::new(status::CKR_GENERAL_ERROR, other.to_string()),
    }
}

fn rv_code(rv: RvError) -> u64 {
    match rv {
        RvError::Cancel => status::CKR_CANCEL,
        RvError::HostMemory => status::CKR_HOST_MEMORY,
        RvError::GeneralError => status::CKR_GENERAL_ERROR,
        RvError::FunctionFailed => status::CKR_FUNCTION_FAILED,
        RvError::ArgumentsBad => status::CKR_ARGUMENTS_BAD,
        RvError::AttributeValueInvalid => status::CKR_ATTRIBUTE_VALUE_INVALID,
        RvError::DataLenRange => status::CKR_DATA_LEN_RANGE,
        RvError::DeviceRemoved => status::CKR_DEVICE_REMOVED,
        RvError::EncryptedDataInvalid => status::CKR_ENCRYPTED_DATA_INVALID,
        RvError::EncryptedDataLenRange => status::CKR_ENCRYPTED_DATA_LEN_RANGE,
        RvError::FunctionCanceled => status::CKR_FUNCTION_CANCELED,
        RvError::FunctionNotSupported => status::CKR_FUNCTION_NOT_SUPPORTED,
        RvError::KeyHandleInvalid => status::CKR_KEY_HANDLE_INVALID,
        RvError::KeyFunctionNotPermitted => status::CKR_KEY_FUNCTION_NOT_PERMITTED,
        RvError::MechanismInvalid => status::CKR_MECHANISM_INVALID,
        RvError::ObjectHandleInvalid => status::CKR_OBJECT_HANDLE_INVALID,
        RvError::OperationActive => status::CKR_OPERATION_ACTIVE,
        RvError::PinIncorrect => status::CKR_PIN_INCORRECT,
        RvError::PinLocked => status::CKR_PIN_LOCKED,
        RvError::SessionHandleInvalid => status::CKR_SESSION_HANDLE_INVALID,
        RvError::TokenNotPresent => status::CKR_TOKEN_NOT_PRESENT,
        RvError::UserNotLoggedIn => status::CKR_USER_NOT_LOGGED_IN,
        RvError::BufferTooSmall => status::CKR_BUFFER_TOO_SMALL,
        RvError::CryptokiNotInitialized => status::CKR_CRYPTOKI_NOT_INITIALIZED,
        _ => status::CKR_FUNCTION_FAILED,
    }
}

fn to_cryptoki(mechanism: Mechanism) -> CkMechanism<'static> {
    match mechanism {
        Mechanism::RsaPkcs => CkMechanism::RsaPkcs,
        Mechanism::RsaX509 => CkMechanism::RsaX509,
        Mechanism::RsaPkcsOaep => CkMechanism::RsaPkcsOaep(PkcsOaepParams::new(
            MechanismType::SHA1,
            PkcsMgfType::MGF1_SHA1,
            PkcsOaepSource::empty(),
        )),
    }
}

fn token_identity(info: &TokenInfo) -> TokenIdentity {
    TokenIdentity::new(
        info.manufacturer_id().trim_end(),
        info.model().trim_end(),
        info.serial_number().trim_end(),
        info.label().trim_end(),
    )
}

fn not_present() -> DriverError {
    DriverError::from_status(status::CKR_TOKEN_NOT_PRESENT)
}

struct LoadedModule {
    name: String,
    context: Pkcs11,
    config: ModuleConfig,
}

/// Where a token currently sits
struct Location {
    context: Pkcs11,
    slot: Slot,
    config: ModuleConfig,
    protected_path: bool,
}

struct Settings {
    log_level: LogLevel,
    protected_authentication: bool,
    pin_cache: PinCache,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Quiet,
            protected_authentication: true,
            pin_cache: PinCache::Infinite,
        }
    }
}

/// Session that keeps a token logged in
struct LoginSession {
    session: Session,
    since: Instant,
}

#[derive(Default)]
struct DriverState {
    modules: Mutex<Vec<LoadedModule>>,
    hooks: Mutex<DriverHooks>,
    settings: Mutex<Settings>,
    tokens: Mutex<Option<Vec<TokenIdentity>>>,
    certificates: Mutex<HashMap<TokenIdentity, TokenCertificates>>,
    logins: Mutex<HashMap<TokenIdentity, LoginSession>>,
    stop: Mutex<bool>,
    wake: Condvar,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl DriverState {
    /// Waits up to `interval`; true once the watcher has been told to stop.
    fn wait_for_stop(&self, interval: Duration) -> bool {
        let mut stopped = self.stop.lock();
        if !*stopped {
            self.wake.wait_for(&mut stopped, interval);
        }
        *stopped
    }

    fn set_stopped(&self, stopped: bool) {
        *self.stop.lock() = stopped;
        self.wake.notify_all();
    }

    fn log(&self, level: LogLevel, message: &str) {
        if level == LogLevel::Quiet || level > self.settings.lock().log_level {
            return;
        }
        let hook = self.hooks.lock().log.clone();
        hook(level, message);
    }

    fn scan(&self) -> Vec<TokenIdentity> {
        let modules = self.modules.lock();
        let mut found = Vec::new();
        for module in modules.iter() {
            let slots = match module.context.get_slots_with_token() {
                Ok(slots) => slots,
                Err(e) => {
                    self.log(LogLevel::Warn, &format!("{}: cannot list slots: {e}", module.name));
                    continue;
                }
            };
            for slot in slots {
                match module.context.get_token_info(slot) {
                    Ok(info) => found.push(token_identity(&info)),
                    Err(e) => self.log(LogLevel::Warn, &format!("{}: {slot:?}: {e}", module.name)),
                }
            }
        }
        found
    }

    fn locate(&self, token: &TokenIdentity) -> Option<Location> {
        let modules = self.modules.lock();
        for module in modules.iter() {
            let Ok(slots) = module.context.get_slots_with_token() else {
                continue;
            };
            for slot in slots {
                let Ok(info) = module.context.get_token_info(slot) else {
                    continue;
                };
                if &token_identity(&info) == token {
                    return Some(Location {
                        context: module.context.clone(),
                        slot,
                        config: module.config.clone(),
                        protected_path: info.protected_authentication_path(),
                    });
                }
            }
        }
        None
    }

    /// Finds the token, asking the user to insert it while it is absent.
    fn locate_with_prompt(
        &self,
        token: &TokenIdentity,
        user_data: Option<&str>,
    ) -> DriverResult<Location> {
        for retry in 0..MAX_PROMPTS {
            if let Some(location) = self.locate(token) {
                return Ok(location);
            }
            let prompt = self.hooks.lock().token_prompt.clone();
            if !prompt(user_data, token, retry) {
                return Err(DriverError::from_status(status::CKR_FUNCTION_CANCELED));
            }
        }
        self.locate(token).ok_or_else(not_present)
    }

    /// Logs the token in, reusing a cached login while the PIN cache allows.
    fn ensure_login(&self, token: &TokenIdentity, user_data: Option<&str>) -> DriverResult<()> {
        let pin_cache = self.settings.lock().pin_cache;
        {
            let mut logins = self.logins.lock();
            if let Some(login) = logins.get(token) {
                let expired = match pin_cache {
                    PinCache::Infinite => false,
                    PinCache::Period(period) => login.since.elapsed() >= period,
                };
                if !expired {
                    return Ok(());
                }
                if let Some(login) = logins.remove(token) {
                    if let Err(e) = login.session.logout() {
                        debug!("logout after PIN cache expiry: {e}");
                    }
                }
            }
        }

        // No lock is held while prompting.
        let location = self.locate_with_prompt(token, user_data)?;
        let session = location
            .context
            .open_ro_session(location.slot)
            .map_err(driver_error)?;
        self.login(&location, &session, token, user_data)?;

        self.logins.lock().insert(
            token.clone(),
            LoginSession {
                session,
                since: Instant::now(),
            },
        );
        Ok(())
    }

    fn login(
        &self,
        location: &Location,
        session: &Session,
        token: &TokenIdentity,
        user_data: Option<&str>,
    ) -> DriverResult<()> {
        let protected = location.protected_path
            && location.config.allow_protected_authentication
            && self.settings.lock().protected_authentication;
        if protected {
            self.log(LogLevel::Info, "login through protected authentication path");
            return match session.login(UserType::User, None) {
                Ok(()) | Err(CkError::Pkcs11(RvError::UserAlreadyLoggedIn, _)) => Ok(()),
                Err(e) => Err(driver_error(e)),
            };
        }

        for retry in 0..MAX_PROMPTS {
            let mut buffer = [0u8; PIN_BUFFER_LEN];
            let prompt = self.hooks.lock().pin_prompt.clone();
            let accepted = prompt(user_data, token, retry, &mut buffer);
            let pin = Pin::from_buffer(&buffer);
            buffer.fill(0);
            if !accepted {
                return Err(DriverError::from_status(status::CKR_FUNCTION_CANCELED));
            }

            let pin = pin
                .ok()
                .and_then(|pin| String::from_utf8(pin.as_bytes().to_vec()).ok())
                .ok_or_else(|| DriverError::from_status(status::CKR_PIN_INCORRECT))?;
            match session.login(UserType::User, Some(&AuthPin::new(pin))) {
                Ok(()) | Err(CkError::Pkcs11(RvError::UserAlreadyLoggedIn, _)) => {
                    debug!(token = %token, "logged in");
                    return Ok(());
                }
                Err(CkError::Pkcs11(RvError::PinIncorrect, _)) => {
                    self.log(LogLevel::Warn, &format!("incorrect PIN for {token}"));
                }
                Err(e) => return Err(driver_error(e)),
            }
        }
        Err(DriverError::from_status(status::CKR_PIN_INCORRECT))
    }

    fn list_certificates(
        &self,
        token: &TokenIdentity,
        user_data: Option<&str>,
    ) -> DriverResult<TokenCertificates> {
        let location = self.locate(token).ok_or_else(not_present)?;
        if location.config.cert_private {
            self.ensure_login(token, user_data)?;
        }
        let session = location
            .context
            .open_ro_session(location.slot)
            .map_err(driver_error)?;

        let mut key_ids = HashSet::new();
        for class in [ObjectClass::PRIVATE_KEY, ObjectClass::PUBLIC_KEY] {
            for handle in session
                .find_objects(&[Attribute::Class(class)])
                .map_err(driver_error)?
            {
                if let Some(id) = object_id(&session, handle)? {
                    key_ids.insert(id);
                }
            }
        }

        let mut found = TokenCertificates::default();
        for handle in session
            .find_objects(&[Attribute::Class(ObjectClass::CERTIFICATE)])
            .map_err(driver_error)?
        {
            let attributes = session
                .get_attributes(handle, &[AttributeType::Id, AttributeType::Value])
                .map_err(driver_error)?;
            let mut id = Vec::new();
            let mut value = Vec::new();
            for attribute in attributes {
                match attribute {
                    Attribute::Id(bytes) => id = bytes,
                    Attribute::Value(bytes) => value = bytes,
                    _ => {}
                }
            }

            let has_key = key_ids.contains(&id);
            let identity = CertificateIdentity::new(token.clone(), id, value);
            if has_key {
                found.certificates.push(identity);
            } else {
                found.issuers.push(identity);
            }
        }

        debug!(
            token = %token,
            certificates = found.certificates.len(),
            issuers = found.issuers.len(),
            "enumerated certificates"
        );
        Ok(found)
    }

    fn invalidate(&self) {
        *self.tokens.lock() = None;
        self.certificates.lock().clear();
    }

    fn poll_interval(&self) -> Duration {
        self.modules
            .lock()
            .iter()
            .map(|m| m.config.slot_event_timeout)
            .filter(|timeout| !timeout.is_zero())
            .min()
            .unwrap_or(DEFAULT_POLL_INTERVAL)
    }
}

fn object_id(session: &Session, handle: ObjectHandle) -> DriverResult<Option<Vec<u8>>> {
    let attributes = session
        .get_attributes(handle, &[AttributeType::Id])
        .map_err(driver_error)?;
    Ok(attributes.into_iter().find_map(|attribute| match attribute {
        Attribute::Id(id) => Some(id),
        _ => None,
    }))
}

/// Polls the slots and fires the slot event hook when the token set changes.
fn watch_slots(state: Weak<DriverState>, interval: Duration) {
    loop {
        let Some(state) = state.upgrade() else {
            break;
        };
        if state.wait_for_stop(interval) {
            break;
        }

        let current = state.scan();
        let changed = {
            let mut cached = state.tokens.lock();
            let changed = cached.as_ref() != Some(&current);
            *cached = Some(current);
            changed
        };
        if changed {
            state.certificates.lock().clear();
            state.log(LogLevel::Debug1, "slot event");
            let hook = state.hooks.lock().slot_event.clone();
            hook();
        }
    }
}

/// Driver over PKCS#11 modules loaded with cryptoki
pub struct Pkcs11Driver {
    state: Arc<DriverState>,
}

impl Default for Pkcs11Driver {
    fn default() -> Self {
        Self::new()
    }
}

impl Pkcs11Driver {
    /// Driver with no module loaded
    pub fn new() -> Self {
        Self {
            state: Arc::new(DriverState::default()),
        }
    }

    /// Driver with one module loaded from `library`
    pub fn with_library(library: impl Into<std::path::PathBuf>) -> DriverResult<Self> {
        let driver = Self::new();
        driver.add_provider(&ModuleConfig::for_library(0, library))?;
        Ok(driver)
    }
}

impl TokenDriver for Pkcs11Driver {
    fn enum_tokens(&self, method: EnumMethod) -> DriverResult<Vec<TokenIdentity>> {
        if method == EnumMethod::Cached {
            if let Some(tokens) = self.state.tokens.lock().as_ref() {
                return Ok(tokens.clone());
            }
        }
        let tokens = self.state.scan();
        *self.state.tokens.lock() = Some(tokens.clone());
        Ok(tokens)
    }

    fn enum_token_certificates(
        &self,
        token: &TokenIdentity,
        method: EnumMethod,
        user_data: Option<&str>,
    ) -> DriverResult<TokenCertificates> {
        if method == EnumMethod::Cached {
            if let Some(found) = self.state.certificates.lock().get(token) {
                return Ok(found.clone());
            }
        }
        let found = self.state.list_certificates(token, user_data)?;
        self.state
            .certificates
            .lock()
            .insert(token.clone(), found.clone());
        Ok(found)
    }

    fn create_certificate(
        &self,
        id: &CertificateIdentity,
        user_data: Option<&str>,
    ) -> DriverResult<Arc<dyn CertificateHandle>> {
        let location = self.state.locate_with_prompt(&id.token, user_data)?;
        let session = location
            .context
            .open_ro_session(location.slot)
            .map_err(driver_error)?;

        let fallback_len = Certificate::from_der(&id.certificate_blob)
            .ok()
            .and_then(|cert| cert.public_key().map(|key| key.size()));

        Ok(Arc::new(Pkcs11Certificate {
            state: self.state.clone(),
            identity: id.clone(),
            user_data: user_data.map(str::to_string),
            private_mask: location.config.private_mask,
            lock: SessionLock::new(),
            key: Mutex::new(KeySession {
                session,
                key: None,
                modulus_len: fallback_len,
                can_sign: true,
                can_decrypt: true,
            }),
        }))
    }

    fn ensure_token_access(
        &self,
        id: &CertificateIdentity,
        user_data: Option<&str>,
    ) -> DriverResult<bool> {
        self.state.ensure_login(&id.token, user_data)?;
        Ok(true)
    }

    fn install_hooks(&self, hooks: DriverHooks) {
        *self.state.hooks.lock() = hooks;
    }

    fn start_slot_events(&self) -> DriverResult<()> {
        let mut watcher = self.state.watcher.lock();
        if watcher.is_some() {
            return Ok(());
        }

        let current = self.state.scan();
        *self.state.tokens.lock() = Some(current);
        self.state.set_stopped(false);

        let interval = self.state.poll_interval();
        let weak = Arc::downgrade(&self.state);
        let handle = thread::Builder::new()
            .name("tokenstore-slots".into())
            .spawn(move || watch_slots(weak, interval))
            .map_err(|e| DriverError::new(status::CKR_GENERAL_ERROR, e.to_string()))?;
        *watcher = Some(handle);
        debug!(?interval, "slot watcher started");
        Ok(())
    }

    fn set_log_level(&self, level: LogLevel) -> DriverResult<()> {
        self.state.settings.lock().log_level = level;
        Ok(())
    }

    fn set_protected_authentication(&self, allow: bool) -> DriverResult<()> {
        self.state.settings.lock().protected_authentication = allow;
        Ok(())
    }

    fn set_pin_cache_period(&self, period: PinCache) -> DriverResult<()> {
        self.state.settings.lock().pin_cache = period;
        Ok(())
    }

    fn add_provider(&self, module: &ModuleConfig) -> DriverResult<()> {
        let name = module.display_name();
        let context = Pkcs11::new(&module.library).map_err(|e| {
            DriverError::new(
                status::CKR_GENERAL_ERROR,
                format!("cannot load '{}': {e}", module.library.display()),
            )
        })?;
        match context.initialize(CInitializeArgs::OsThreads) {
            Ok(()) | Err(CkError::Pkcs11(RvError::CryptokiAlreadyInitialized, _)) => {}
            Err(e) => return Err(driver_error(e)),
        }

        info!(provider = %name, "provider loaded");
        self.state.modules.lock().push(LoadedModule {
            name,
            context,
            config: module.clone(),
        });
        self.state.invalidate();
        Ok(())
    }

    fn remove_provider(&self, name: &str) -> DriverResult<()> {
        let mut modules = self.state.modules.lock();
        let before = modules.len();
        modules.retain(|m| m.name != name);
        if modules.len() == before {
            return Err(DriverError::new(
                status::CKR_ARGUMENTS_BAD,
                format!("no provider named '{name}'"),
            ));
        }
        drop(modules);
        self.state.logins.lock().clear();
        self.state.invalidate();
        Ok(())
    }

    fn terminate(&self) {
        self.state.set_stopped(true);
        let watcher = self.state.watcher.lock().take();
        if let Some(handle) = watcher {
            if handle.join().is_err() {
                warn!("slot watcher panicked");
            }
        }
        self.state.logins.lock().clear();
        self.state.invalidate();
        self.state.modules.lock().clear();
    }
}

impl Drop for Pkcs11Driver {
    fn drop(&mut self) {
        self.terminate();
    }
}

struct KeySession {
    session: Session,
    key: Option<ObjectHandle>,
    modulus_len: Option<usize>,
    can_sign: bool,
    can_decrypt: bool,
}

/// Private key behind one certificate
pub struct Pkcs11Certificate {
    state: Arc<DriverState>,
    identity: CertificateIdentity,
    user_data: Option<String>,
    private_mask: PrivateMask,
    lock: SessionLock,
    key: Mutex<KeySession>,
}

impl Pkcs11Certificate {
    /// Logs in, finds the key and its modulus length.
    fn prepare(&self, key: &mut KeySession) -> DriverResult<(ObjectHandle, usize)> {
        if !self.lock.is_locked() {
            return Err(DriverError::new(
                status::CKR_GENERAL_ERROR,
                "session is not locked",
            ));
        }
        self.state
            .ensure_login(&self.identity.token, self.user_data.as_deref())?;

        let handle = match key.key {
            Some(handle) => handle,
            None => {
                let handle = key
                    .session
                    .find_objects(&[
                        Attribute::Class(ObjectClass::PRIVATE_KEY),
                        Attribute::Id(self.identity.id.clone()),
                    ])
                    .map_err(driver_error)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| DriverError::from_status(status::CKR_KEY_HANDLE_INVALID))?;
                let attributes = key
                    .session
                    .get_attributes(
                        handle,
                        &[
                            AttributeType::Modulus,
                            AttributeType::Sign,
                            AttributeType::Decrypt,
                        ],
                    )
                    .map_err(driver_error)?;
                for attribute in attributes {
                    match attribute {
                        Attribute::Modulus(n) => {
                            key.modulus_len = Some(BigUint::from_bytes_be(&n).bits().div_ceil(8));
                        }
                        Attribute::Sign(allowed) => key.can_sign = allowed,
                        Attribute::Decrypt(allowed) => key.can_decrypt = allowed,
                        _ => {}
                    }
                }
                key.key = Some(handle);
                handle
            }
        };

        let modulus_len = key
            .modulus_len
            .ok_or_else(|| DriverError::from_status(status::CKR_KEY_HANDLE_INVALID))?;
        Ok((handle, modulus_len))
    }
}

fn copy_out(result: &[u8], output: &mut [u8]) -> DriverResult<usize> {
    if output.len() < result.len() {
        return Err(DriverError::from_status(status::CKR_BUFFER_TOO_SMALL));
    }
    output[..result.len()].copy_from_slice(result);
    Ok(result.len())
}

impl CertificateHandle for Pkcs11Certificate {
    fn lock_session(&self) -> DriverResult<()> {
        self.lock.lock();
        Ok(())
    }

    fn release_session(&self) -> DriverResult<()> {
        self.lock.unlock()
    }

    fn sign_any(
        &self,
        mechanism: Mechanism,
        input: &[u8],
        output: Option<&mut [u8]>,
    ) -> DriverResult<usize> {
        let mut key = self.key.lock();
        let (handle, modulus_len) = self.prepare(&mut key)?;
        if !self.private_mask.permits_sign(key.can_sign) {
            return Err(DriverError::from_status(
                status::CKR_KEY_FUNCTION_NOT_PERMITTED,
            ));
        }
        let Some(output) = output else {
            return Ok(modulus_len);
        };
        if output.len() < modulus_len {
            return Err(DriverError::from_status(status::CKR_BUFFER_TOO_SMALL));
        }

        let signature = key
            .session
            .sign(&to_cryptoki(mechanism), handle, input)
            .map_err(driver_error)?;
        copy_out(&signature, output)
    }

    fn decrypt_any(
        &self,
        mechanism: Mechanism,
        input: &[u8],
        output: Option<&mut [u8]>,
    ) -> DriverResult<usize> {
        let mut key = self.key.lock();
        let (handle, modulus_len) = self.prepare(&mut key)?;
        if !self.private_mask.permits_decrypt(key.can_decrypt) {
            return Err(DriverError::from_status(
                status::CKR_KEY_FUNCTION_NOT_PERMITTED,
            ));
        }
        if input.len() != modulus_len {
            return Err(DriverError::from_status(
                status::CKR_ENCRYPTED_DATA_LEN_RANGE,
            ));
        }
        let Some(output) = output else {
            return Ok(modulus_len);
        };

        let plaintext = key
            .session
            .decrypt(&to_cryptoki(mechanism), handle, input)
            .map_err(driver_error)?;
        copy_out(&plaintext, output)
    }
}
