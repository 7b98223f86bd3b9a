use tokio::sync::oneshot;

use crate::keystore::KeyStoreRecord;
use crate::model::Pin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    /// Insert or confirm the token
    Token,
    /// Enter the user PIN
    Pin,
}

/// What the driver is asking the user for
#[derive(Debug, Clone)]
pub struct PromptRequest {
    pub kind: PromptKind,
    pub store_id: String,
    pub store_name: String,
    /// Entry the prompt is about, when the driver call carried one
    pub entry: Option<KeyStoreRecord>,
    pub retry: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptResponse {
    Accepted { pin: Option<Pin> },
    Cancelled,
}

/// One-shot answer to a `PromptRequest`
///
/// Dropping it without answering cancels the prompt.
#[derive(Debug)]
pub struct PromptReply {
    tx: oneshot::Sender<PromptResponse>,
}

impl PromptReply {
    pub fn new(tx: oneshot::Sender<PromptResponse>) -> Self {
        Self { tx }
    }

    pub fn accept(self) {
        self.respond(PromptResponse::Accepted { pin: None });
    }

    pub fn accept_with_pin(self, pin: Pin) {
        self.respond(PromptResponse::Accepted { pin: Some(pin) });
    }

    pub fn cancel(self) {
        self.respond(PromptResponse::Cancelled);
    }

    fn respond(self, response: PromptResponse) {
        // The asking side may have been torn down meanwhile.
        let _ = self.tx.send(response);
    }
}

/// The user-facing side of token and PIN prompts
///
/// `ask` must return promptly; the answer may be sent later from any thread.
pub trait PromptResponder: Send + Sync {
    fn ask(&self, request: PromptRequest, reply: PromptReply);
}
