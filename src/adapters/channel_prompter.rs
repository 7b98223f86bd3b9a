use tokio::sync::mpsc;
use tracing::debug;

use crate::ports::{PromptReply, PromptRequest, PromptResponder};

/// Forwards prompts to whoever owns the receiving end
///
/// The UI thread (or an async task) pulls `(request, reply)` pairs and
/// answers at its own pace. If the receiver is gone, the reply is dropped
/// and the prompt counts as cancelled.
#[derive(Debug, Clone)]
pub struct ChannelPrompter {
    tx: mpsc::UnboundedSender<(PromptRequest, PromptReply)>,
}

pub type PromptReceiver = mpsc::UnboundedReceiver<(PromptRequest, PromptReply)>;

impl ChannelPrompter {
    pub fn new() -> (Self, PromptReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PromptResponder for ChannelPrompter {
    fn ask(&self, request: PromptRequest, reply: PromptReply) {
        debug!(kind = ?request.kind, store = %request.store_id, "forwarding prompt");
        if let Err(mpsc::error::SendError((request, _reply))) = self.tx.send((request, reply)) {
            debug!(store = %request.store_id, "no prompt listener, cancelling");
        }
    }
}
