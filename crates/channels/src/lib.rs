//! Outbound messaging.
//!
//! The campaign engine and workflow actions only need the [`MessageSender`]
//! capability; [`WhatsAppBridge`] is the production implementation and
//! [`RecordingSender`] the in-process double.

pub mod sender;
pub mod templates;
pub mod whatsapp;

pub use sender::{
    MessageSender, OutboundMessage, RecordingSender, SendError, SendErrorKind, SendReceipt,
};
pub use templates::{render_template, validate_template, KNOWN_PLACEHOLDERS};
pub use whatsapp::WhatsAppBridge;
