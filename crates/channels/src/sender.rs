use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// A rendered message ready to leave the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub lead_id: Uuid,
    pub to: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub provider_message_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendErrorKind {
    /// Worth retrying later: timeouts, rate limits, provider outages.
    Transient,
    /// Retrying cannot help: bad number, rejected content.
    Permanent,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?} send failure: {message}")]
pub struct SendError {
    pub kind: SendErrorKind,
    pub message: String,
}

impl SendError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: SendErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: SendErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == SendErrorKind::Permanent
    }
}

/// Capability to deliver one message to one lead.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Channel name written to the message log.
    fn channel(&self) -> &str;

    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, SendError>;
}

#[derive(Default)]
struct Recorded {
    sent: Vec<OutboundMessage>,
    scripted: VecDeque<SendError>,
    failing_numbers: HashMap<String, SendError>,
}

/// Keeps every message in memory instead of sending it.
///
/// Failures can be scripted either for the next N sends or permanently for
/// a phone number.
#[derive(Default)]
pub struct RecordingSender {
    inner: Mutex<Recorded>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The next send fails with `error`. Calls queue up.
    pub fn fail_next(&self, error: SendError) {
        self.state().scripted.push_back(error);
    }

    /// Every send to `phone` fails with `error`.
    pub fn fail_number(&self, phone: &str, error: SendError) {
        self.state().failing_numbers.insert(phone.to_string(), error);
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.state().sent.clone()
    }

    pub fn sent_to(&self, phone: &str) -> Vec<OutboundMessage> {
        self.state()
            .sent
            .iter()
            .filter(|m| m.to == phone)
            .cloned()
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.state().sent.len()
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    fn channel(&self) -> &str {
        "recording"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, SendError> {
        let mut state = self.state();
        if let Some(error) = state.scripted.pop_front() {
            return Err(error);
        }
        if let Some(error) = state.failing_numbers.get(&message.to) {
            return Err(error.clone());
        }
        state.sent.push(message.clone());
        Ok(SendReceipt {
            provider_message_id: format!("rec-{}", state.sent.len()),
        })
    }
}
