//! OCXP data types: the response envelope and the WebSocket message
//! vocabulary.

pub mod envelope;
pub mod messages;

pub use envelope::{ApiEnvelope, EnvelopeError};
pub use messages::{
    ChatMessage, ClientMessage, ConnectedMessage, ErrorMessage, Heartbeat, ServerMessage,
    StatusMessage, StreamFrame,
};
