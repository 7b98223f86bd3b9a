//! Provider event queue
//!
//! Driver threads never touch the catalog; they enqueue events here and the
//! owner of the `EventStream` reacts on its own thread.

use tokio::sync::mpsc;
use tracing::warn;

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// The provider finished starting
    Ready,
    /// The set of tokens or their contents changed
    Updated,
    /// A non-fatal failure, already formatted for the user
    Diagnostic(String),
}

/// Sending half, cheap to clone into hooks
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<StoreEvent>,
}

/// Receiving half
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<StoreEvent>,
}

pub fn channel() -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, EventStream { rx })
}

impl EventSink {
    pub fn emit(&self, event: StoreEvent) {
        // A closed stream only means nobody is listening.
        let _ = self.tx.send(event);
    }

    pub fn diagnostic(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.emit(StoreEvent::Diagnostic(message));
    }

    /// Reports `error` as `PKCS#11: <description>: <code>-'<message>'.`
    pub fn report(&self, description: &str, error: &StoreError) {
        self.diagnostic(format_diagnostic(description, error));
    }
}

impl EventStream {
    pub async fn next(&mut self) -> Option<StoreEvent> {
        self.rx.recv().await
    }

    /// Blocks the current thread. Must not be called from async code.
    pub fn blocking_next(&mut self) -> Option<StoreEvent> {
        self.rx.blocking_recv()
    }

    pub fn try_next(&mut self) -> Option<StoreEvent> {
        self.rx.try_recv().ok()
    }

    /// Everything queued so far
    pub fn drain(&mut self) -> Vec<StoreEvent> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    /// Diagnostics queued so far; other events are discarded.
    pub fn drain_diagnostics(&mut self) -> Vec<String> {
        self.drain()
            .into_iter()
            .filter_map(|event| match event {
                StoreEvent::Diagnostic(message) => Some(message),
                _ => None,
            })
            .collect()
    }
}

pub fn format_diagnostic(description: &str, error: &StoreError) -> String {
    let (code, message) = error.status();
    format!("PKCS#11: {description}: {code}-'{message}'.")
}
