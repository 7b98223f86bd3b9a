//! Adapters - concrete implementations of ports (traits)

mod channel_prompter;
mod pkcs11_driver;
mod session_lock;

#[cfg(test)]
pub mod fake_token;

pub use channel_prompter::{ChannelPrompter, PromptReceiver};
pub use pkcs11_driver::{Pkcs11Certificate, Pkcs11Driver};
pub use session_lock::SessionLock;
