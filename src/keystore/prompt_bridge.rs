//! Token and PIN prompts from driver threads
//!
//! The driver calls in on its own thread and waits for the answer. The
//! request goes to the `PromptResponder`, which may answer from any thread;
//! the bridge never needs the UI to run on the thread it blocks.

use std::sync::Arc;
use std::thread;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::oneshot;
use tracing::debug;

use crate::keystore::{KeyCatalog, KeyStoreRecord};
use crate::model::TokenIdentity;
use crate::ports::{PromptKind, PromptReply, PromptRequest, PromptResponder, PromptResponse};

pub struct PromptBridge {
    catalog: Arc<KeyCatalog>,
    responder: Arc<dyn PromptResponder>,
}

impl PromptBridge {
    pub fn new(catalog: Arc<KeyCatalog>, responder: Arc<dyn PromptResponder>) -> Self {
        Self { catalog, responder }
    }

    /// Asks the user to present `token`. Blocks until answered.
    pub fn token_prompt(&self, user_data: Option<&str>, token: &TokenIdentity, retry: u32) -> bool {
        let Some(request) = self.request(PromptKind::Token, user_data, token, retry) else {
            return false;
        };
        matches!(self.ask(request), PromptResponse::Accepted { .. })
    }

    /// Asks the user for the PIN of `token` and copies it into `buffer`.
    /// Blocks until answered.
    ///
    /// The buffer is only written when the PIN fits with its terminator.
    pub fn pin_prompt(
        &self,
        user_data: Option<&str>,
        token: &TokenIdentity,
        retry: u32,
        buffer: &mut [u8],
    ) -> bool {
        let Some(request) = self.request(PromptKind::Pin, user_data, token, retry) else {
            return false;
        };
        match self.ask(request) {
            PromptResponse::Accepted { pin: Some(pin) } => match pin.copy_to_buffer(buffer) {
                Ok(()) => true,
                Err(e) => {
                    debug!("rejecting PIN: {e}");
                    false
                }
            },
            PromptResponse::Accepted { pin: None } | PromptResponse::Cancelled => false,
        }
    }

    fn request(
        &self,
        kind: PromptKind,
        user_data: Option<&str>,
        token: &TokenIdentity,
        retry: u32,
    ) -> Option<PromptRequest> {
        let entry: Option<KeyStoreRecord> =
            user_data.and_then(|serialized| self.catalog.entry_passive(serialized));

        let (store_id, store_name) = match &entry {
            Some(entry) => (entry.store_id.clone(), entry.label.clone()),
            None => {
                let token = self.catalog.registry().register(token).token;
                match self.catalog.codec().store_id(&token) {
                    Ok(store_id) => (store_id, token.label),
                    Err(e) => {
                        debug!("cannot resolve store for prompt: {e}");
                        return None;
                    }
                }
            }
        };

        Some(PromptRequest {
            kind,
            store_id,
            store_name,
            entry,
            retry,
        })
    }

    fn ask(&self, request: PromptRequest) -> PromptResponse {
        debug!(kind = ?request.kind, store = %request.store_id, retry = request.retry, "prompt - entry");
        let (tx, rx) = oneshot::channel();
        self.responder.ask(request, PromptReply::new(tx));
        let response = wait_for_reply(rx).unwrap_or(PromptResponse::Cancelled);
        debug!(accepted = matches!(response, PromptResponse::Accepted { .. }), "prompt - return");
        response
    }
}

/// Blocks the calling thread until the reply arrives or is dropped.
///
/// Inside a multi-thread runtime the worker is handed off with
/// `block_in_place`. Inside a current-thread runtime the wait moves to a
/// helper thread; the runtime is stalled meanwhile, so the answer must come
/// from outside it.
fn wait_for_reply(rx: oneshot::Receiver<PromptResponse>) -> Option<PromptResponse> {
    match Handle::try_current() {
        Err(_) => rx.blocking_recv().ok(),
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| rx.blocking_recv().ok())
        }
        Ok(_) => thread::spawn(move || rx.blocking_recv().ok())
            .join()
            .ok()
            .flatten(),
    }
}
