//! Ports (traits) for token access and user prompts
//!
//! The key store depends on these abstractions, not on a concrete PKCS#11
//! binding or UI toolkit.

mod certificate_handle;
mod prompt_responder;
mod token_driver;

pub use certificate_handle::CertificateHandle;
pub use prompt_responder::{PromptKind, PromptReply, PromptRequest, PromptResponder, PromptResponse};
pub use token_driver::{
    DriverHooks, EnumMethod, LogHook, PinPromptHook, SlotEventHook, TokenCertificates,
    TokenDriver, TokenPromptHook,
};
