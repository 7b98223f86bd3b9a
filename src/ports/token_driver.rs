use std::sync::Arc;

use crate::config::{LogLevel, ModuleConfig, PinCache};
use crate::error::DriverResult;
use crate::model::{CertificateIdentity, TokenIdentity};
use crate::ports::CertificateHandle;

/// Whether the driver may answer from its cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnumMethod {
    Cached,
    Reload,
}

/// Certificates found on one token
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenCertificates {
    /// Certificates without a private key
    pub issuers: Vec<CertificateIdentity>,
    /// Certificates with an associated private key
    pub certificates: Vec<CertificateIdentity>,
}

pub type LogHook = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;
pub type SlotEventHook = Arc<dyn Fn() + Send + Sync>;
/// `(user_data, token, retry) -> accepted`
pub type TokenPromptHook = Arc<dyn Fn(Option<&str>, &TokenIdentity, u32) -> bool + Send + Sync>;
/// `(user_data, token, retry, pin buffer) -> accepted`
pub type PinPromptHook =
    Arc<dyn Fn(Option<&str>, &TokenIdentity, u32, &mut [u8]) -> bool + Send + Sync>;

/// Callbacks the driver invokes, possibly from its own threads
#[derive(Clone)]
pub struct DriverHooks {
    pub log: LogHook,
    pub slot_event: SlotEventHook,
    pub token_prompt: TokenPromptHook,
    pub pin_prompt: PinPromptHook,
}

impl Default for DriverHooks {
    fn default() -> Self {
        Self {
            log: Arc::new(ignore_log),
            slot_event: Arc::new(ignore_slot_event),
            token_prompt: Arc::new(refuse_token),
            pin_prompt: Arc::new(refuse_pin),
        }
    }
}

impl DriverHooks {
    pub fn with_log(mut self, hook: impl Fn(LogLevel, &str) + Send + Sync + 'static) -> Self {
        self.log = Arc::new(hook);
        self
    }

    pub fn with_slot_event(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.slot_event = Arc::new(hook);
        self
    }

    pub fn with_token_prompt(
        mut self,
        hook: impl Fn(Option<&str>, &TokenIdentity, u32) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.token_prompt = Arc::new(hook);
        self
    }

    pub fn with_pin_prompt(
        mut self,
        hook: impl Fn(Option<&str>, &TokenIdentity, u32, &mut [u8]) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.pin_prompt = Arc::new(hook);
        self
    }
}

fn ignore_log(_level: LogLevel, _message: &str) {}

fn ignore_slot_event() {}

fn refuse_token(_user_data: Option<&str>, _token: &TokenIdentity, _retry: u32) -> bool {
    false
}

fn refuse_pin(
    _user_data: Option<&str>,
    _token: &TokenIdentity,
    _retry: u32,
    _buffer: &mut [u8],
) -> bool {
    false
}

/// Access to a PKCS#11 driver
///
/// `user_data` is an opaque string handed back to the prompt hooks so the
/// prompt can be tied to a key store entry.
pub trait TokenDriver: Send + Sync {
    fn enum_tokens(&self, method: EnumMethod) -> DriverResult<Vec<TokenIdentity>>;

    fn enum_token_certificates(
        &self,
        token: &TokenIdentity,
        method: EnumMethod,
        user_data: Option<&str>,
    ) -> DriverResult<TokenCertificates>;

    fn serialize_token_id(&self, token: &TokenIdentity) -> DriverResult<String> {
        Ok(token.serialize())
    }

    fn serialize_certificate_id(&self, id: &CertificateIdentity) -> DriverResult<String> {
        Ok(id.serialize())
    }

    fn deserialize_certificate_id(&self, serialized: &str) -> DriverResult<CertificateIdentity> {
        CertificateIdentity::deserialize(serialized)
    }

    /// Materializes the key object behind a certificate.
    fn create_certificate(
        &self,
        id: &CertificateIdentity,
        user_data: Option<&str>,
    ) -> DriverResult<Arc<dyn CertificateHandle>>;

    /// Makes sure the token is present and logged in, prompting if needed.
    fn ensure_token_access(
        &self,
        id: &CertificateIdentity,
        user_data: Option<&str>,
    ) -> DriverResult<bool>;

    fn install_hooks(&self, hooks: DriverHooks);

    fn start_slot_events(&self) -> DriverResult<()> {
        Ok(())
    }

    fn set_log_level(&self, _level: LogLevel) -> DriverResult<()> {
        Ok(())
    }

    fn set_protected_authentication(&self, _allow: bool) -> DriverResult<()> {
        Ok(())
    }

    fn set_pin_cache_period(&self, _period: PinCache) -> DriverResult<()> {
        Ok(())
    }

    fn add_provider(&self, module: &ModuleConfig) -> DriverResult<()>;

    fn remove_provider(&self, name: &str) -> DriverResult<()>;

    /// Releases all modules and stops background threads.
    fn terminate(&self);
}
