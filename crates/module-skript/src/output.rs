//! Where `broadcast` and `send` write to.

use parking_lot::Mutex;
use skript_lang::Value;
use tracing::info;

pub trait OutputSink: Send + Sync {
    /// A message for everyone.
    fn broadcast(&self, message: &str);

    /// A message for one recipient, usually a player.
    fn send(&self, recipient: &Value, message: &str);
}

/// Writes every message to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn broadcast(&self, message: &str) {
        info!(target: "skript::chat", "{message}");
    }

    fn send(&self, recipient: &Value, message: &str) {
        info!(target: "skript::chat", to = %recipient, "{message}");
    }
}

/// Keeps every message, in order. Direct messages are stored as
/// `recipient: message`.
#[derive(Debug, Default)]
pub struct CollectingSink {
    messages: Mutex<Vec<String>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.messages.lock())
    }
}

impl OutputSink for CollectingSink {
    fn broadcast(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }

    fn send(&self, recipient: &Value, message: &str) {
        self.messages.lock().push(format!("{recipient}: {message}"));
    }
}
