//! Provider configuration
//!
//! The configuration is a flat key/value map, usually loaded from JSON:
//!
//! ```json
//! {
//!   "allow_protected_authentication": true,
//!   "pin_cache": "infinite",
//!   "log_level": "quiet",
//!   "provider_00_enabled": true,
//!   "provider_00_library": "/usr/lib/softhsm/libsofthsm2.so"
//! }
//! ```
//!
//! Missing keys take their defaults; `ProviderConfig::default_map` produces
//! the full template. `provider_NN_slotevent_method` is validated but slot
//! changes are always polled every `provider_NN_slotevent_timeout`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// Number of `provider_NN_*` module slots
pub const MAX_PROVIDERS: usize = 10;

/// Driver log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Quiet,
    Error,
    Warn,
    Info,
    Debug1,
    Debug2,
}

impl LogLevel {
    fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(LogLevel::Quiet),
            1 => Some(LogLevel::Error),
            2 => Some(LogLevel::Warn),
            3 => Some(LogLevel::Info),
            4 => Some(LogLevel::Debug1),
            5 => Some(LogLevel::Debug2),
            _ => None,
        }
    }
}

/// How long the driver keeps a PIN after login
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PinCache {
    #[default]
    Infinite,
    Period(Duration),
}

/// Private key operations a module is used for
///
/// Zero lets each key's own `CKA_SIGN` / `CKA_DECRYPT` attributes decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PrivateMask(u32);

impl PrivateMask {
    pub const AUTO: Self = Self(0);
    pub const SIGN: u32 = 0x1;
    pub const RECOVER: u32 = 0x2;
    pub const DECRYPT: u32 = 0x4;
    pub const UNWRAP: u32 = 0x8;

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_auto(self) -> bool {
        self.0 == 0
    }

    /// `key_can_sign` is the key's `CKA_SIGN`, consulted only in auto mode.
    pub const fn permits_sign(self, key_can_sign: bool) -> bool {
        if self.is_auto() {
            key_can_sign
        } else {
            self.0 & Self::SIGN != 0
        }
    }

    /// `key_can_decrypt` is the key's `CKA_DECRYPT`, consulted only in auto mode.
    pub const fn permits_decrypt(self, key_can_decrypt: bool) -> bool {
        if self.is_auto() {
            key_can_decrypt
        } else {
            self.0 & Self::DECRYPT != 0
        }
    }
}

const SLOT_EVENT_METHODS: [&str; 3] = ["auto", "trigger", "poll"];

/// One `provider_NN_*` block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleConfig {
    pub index: usize,
    pub enabled: bool,
    pub name: String,
    pub library: PathBuf,
    pub allow_protected_authentication: bool,
    pub cert_private: bool,
    pub private_mask: PrivateMask,
    pub slot_event_timeout: Duration,
}

impl ModuleConfig {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            enabled: false,
            name: String::new(),
            library: PathBuf::new(),
            allow_protected_authentication: true,
            cert_private: false,
            private_mask: PrivateMask::AUTO,
            slot_event_timeout: Duration::ZERO,
        }
    }

    /// Module with only a library path, enabled
    pub fn for_library(index: usize, library: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            library: library.into(),
            ..Self::new(index)
        }
    }

    /// Name the module is registered under: `name`, or the library path.
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            self.library.display().to_string()
        } else {
            self.name.clone()
        }
    }

    fn key(index: usize, field: &str) -> String {
        format!("provider_{index:02}_{field}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub allow_protected_authentication: bool,
    pub pin_cache: PinCache,
    pub log_level: LogLevel,
    pub modules: Vec<ModuleConfig>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            allow_protected_authentication: true,
            pin_cache: PinCache::Infinite,
            log_level: LogLevel::Quiet,
            modules: (0..MAX_PROVIDERS).map(ModuleConfig::new).collect(),
        }
    }
}

impl ProviderConfig {
    /// Reads a flat configuration map. Unknown keys are ignored.
    pub fn from_map(map: &Map<String, Value>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = map.get("allow_protected_authentication") {
            config.allow_protected_authentication =
                read_bool("allow_protected_authentication", value)?;
        }
        if let Some(value) = map.get("pin_cache") {
            config.pin_cache = read_pin_cache(value)?;
        }
        if let Some(value) = map.get("log_level") {
            config.log_level = read_log_level(value)?;
        }

        for module in &mut config.modules {
            let i = module.index;
            if let Some(value) = map.get(&ModuleConfig::key(i, "enabled")) {
                module.enabled = read_bool(&ModuleConfig::key(i, "enabled"), value)?;
            }
            if let Some(value) = map.get(&ModuleConfig::key(i, "name")) {
                module.name = read_string(&ModuleConfig::key(i, "name"), value)?;
            }
            if let Some(value) = map.get(&ModuleConfig::key(i, "library")) {
                module.library = read_string(&ModuleConfig::key(i, "library"), value)?.into();
            }
            let key = ModuleConfig::key(i, "allow_protected_authentication");
            if let Some(value) = map.get(&key) {
                module.allow_protected_authentication = read_bool(&key, value)?;
            }
            if let Some(value) = map.get(&ModuleConfig::key(i, "cert_private")) {
                module.cert_private = read_bool(&ModuleConfig::key(i, "cert_private"), value)?;
            }
            let key = ModuleConfig::key(i, "private_mask");
            if let Some(value) = map.get(&key) {
                module.private_mask = read_mask(&key, value)?;
            }
            let key = ModuleConfig::key(i, "slotevent_method");
            if let Some(value) = map.get(&key) {
                let method = read_string(&key, value)?;
                if !SLOT_EVENT_METHODS.contains(&method.as_str()) {
                    return Err(invalid(&key, "expected auto, trigger or poll"));
                }
            }
            let key = ModuleConfig::key(i, "slotevent_timeout");
            if let Some(value) = map.get(&key) {
                let millis = value
                    .as_u64()
                    .ok_or_else(|| invalid(&key, "expected a non-negative integer"))?;
                module.slot_event_timeout = Duration::from_millis(millis);
            }
        }

        Ok(config)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let map: Map<String, Value> =
            serde_json::from_str(json).map_err(|e| invalid("<document>", e))?;
        Self::from_map(&map)
    }

    /// The configuration template with every key at its default.
    pub fn default_map() -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("formtype".into(), Value::from("http://affinix.com/qca/forms/qca-pkcs11#1.0"));
        map.insert("allow_protected_authentication".into(), Value::from(true));
        map.insert("pin_cache".into(), Value::from(-1));
        map.insert("log_level".into(), Value::from("quiet"));

        for module in ProviderConfig::default().modules {
            let i = module.index;
            map.insert(ModuleConfig::key(i, "enabled"), Value::from(module.enabled));
            map.insert(ModuleConfig::key(i, "name"), Value::from(module.name));
            map.insert(ModuleConfig::key(i, "library"), Value::from(""));
            map.insert(
                ModuleConfig::key(i, "allow_protected_authentication"),
                Value::from(module.allow_protected_authentication),
            );
            map.insert(ModuleConfig::key(i, "cert_private"), Value::from(module.cert_private));
            map.insert(ModuleConfig::key(i, "private_mask"), Value::from(module.private_mask.bits()));
            map.insert(ModuleConfig::key(i, "slotevent_method"), Value::from("auto"));
            map.insert(ModuleConfig::key(i, "slotevent_timeout"), Value::from(0));
        }

        map
    }

    pub fn enabled_modules(&self) -> impl Iterator<Item = &ModuleConfig> {
        self.modules.iter().filter(|m| m.enabled)
    }
}

fn invalid(key: &str, reason: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn read_bool(key: &str, value: &Value) -> Result<bool, ConfigError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s == "true" => Ok(true),
        Value::String(s) if s == "false" => Ok(false),
        _ => Err(invalid(key, "expected a boolean")),
    }
}

fn read_string(key: &str, value: &Value) -> Result<String, ConfigError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| invalid(key, "expected a string"))
}

fn read_mask(key: &str, value: &Value) -> Result<PrivateMask, ConfigError> {
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .map(PrivateMask::from_bits)
        .ok_or_else(|| invalid(key, "expected a 32-bit mask"))
}

fn read_pin_cache(value: &Value) -> Result<PinCache, ConfigError> {
    match value {
        Value::String(s) if s == "infinite" => Ok(PinCache::Infinite),
        Value::Number(n) => match n.as_i64() {
            Some(-1) => Ok(PinCache::Infinite),
            Some(seconds) if seconds >= 0 => {
                Ok(PinCache::Period(Duration::from_secs(seconds.unsigned_abs())))
            }
            _ => Err(invalid("pin_cache", "expected seconds or -1")),
        },
        _ => Err(invalid("pin_cache", "expected seconds or \"infinite\"")),
    }
}

fn read_log_level(value: &Value) -> Result<LogLevel, ConfigError> {
    if let Some(index) = value.as_i64() {
        return LogLevel::from_index(index).ok_or_else(|| invalid("log_level", "expected 0-5"));
    }
    serde_json::from_value(value.clone()).map_err(|e| invalid("log_level", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = ProviderConfig::from_map(&Map::new()).unwrap();
        assert_eq!(config, ProviderConfig::default());
        assert_eq!(config.modules.len(), MAX_PROVIDERS);
        assert!(config.allow_protected_authentication);
        assert_eq!(config.pin_cache, PinCache::Infinite);
        assert_eq!(config.enabled_modules().count(), 0);
    }

    #[test]
    fn test_default_map_round_trip() {
        let map = ProviderConfig::default_map();
        assert!(map.contains_key("provider_09_slotevent_timeout"));
        assert!(!map.contains_key("provider_10_enabled"));
        assert_eq!(ProviderConfig::from_map(&map).unwrap(), ProviderConfig::default());
    }

    #[test]
    fn test_reads_module_block() {
        let config = ProviderConfig::from_json_str(
            &json!({
                "pin_cache": 300,
                "log_level": "debug1",
                "provider_03_enabled": true,
                "provider_03_library": "/usr/lib/softhsm/libsofthsm2.so",
                "provider_03_private_mask": 3,
                "provider_03_slotevent_method": "poll",
                "provider_03_slotevent_timeout": 500
            })
            .to_string(),
        )
        .unwrap();

        assert_eq!(config.pin_cache, PinCache::Period(Duration::from_secs(300)));
        assert_eq!(config.log_level, LogLevel::Debug1);

        let enabled: Vec<_> = config.enabled_modules().collect();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].index, 3);
        assert_eq!(enabled[0].private_mask.bits(), 3);
        assert_eq!(enabled[0].slot_event_timeout, Duration::from_millis(500));
        assert_eq!(enabled[0].display_name(), "/usr/lib/softhsm/libsofthsm2.so");
    }

    #[test]
    fn test_numeric_log_level() {
        let mut map = Map::new();
        map.insert("log_level".into(), json!(2));
        assert_eq!(ProviderConfig::from_map(&map).unwrap().log_level, LogLevel::Warn);
    }

    #[test]
    fn test_invalid_value() {
        let mut map = Map::new();
        map.insert("provider_00_enabled".into(), json!(17));
        assert_eq!(
            ProviderConfig::from_map(&map).unwrap_err(),
            ConfigError::InvalidValue {
                key: "provider_00_enabled".into(),
                reason: "expected a boolean".into()
            }
        );

        let mut map = Map::new();
        map.insert("provider_01_slotevent_method".into(), json!("sometimes"));
        assert!(ProviderConfig::from_map(&map).is_err());

        let mut map = Map::new();
        map.insert("provider_01_slotevent_method".into(), json!("trigger"));
        assert_eq!(ProviderConfig::from_map(&map).unwrap(), ProviderConfig::default());
    }

    #[test]
    fn test_private_mask_decides_operations() {
        let auto = PrivateMask::AUTO;
        assert!(auto.permits_sign(true));
        assert!(!auto.permits_sign(false));
        assert!(auto.permits_decrypt(true));
        assert!(!auto.permits_decrypt(false));

        let sign_only = PrivateMask::from_bits(PrivateMask::SIGN);
        assert!(sign_only.permits_sign(false));
        assert!(!sign_only.permits_decrypt(true));

        let recover_unwrap = PrivateMask::from_bits(PrivateMask::RECOVER | PrivateMask::UNWRAP);
        assert!(!recover_unwrap.permits_sign(true));
        assert!(!recover_unwrap.permits_decrypt(true));
    }

    #[test]
    fn test_name_takes_precedence() {
        let mut module = ModuleConfig::for_library(0, "/lib/p11.so");
        assert_eq!(module.display_name(), "/lib/p11.so");
        module.name = "softhsm".into();
        assert_eq!(module.display_name(), "softhsm");
    }
}
