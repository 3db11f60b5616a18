//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket messages the server pushes to a browser watching the
//! comments of a candidate or policy. The client sends nothing but close frames.

use serde::Serialize;
use voter_guide_core::domain::Comment;

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The full current comment set. Sent on connect and after every change.
    Comments { comments: Vec<Comment> },

    /// Reports a fatal error; the server closes the connection after sending it.
    Error { message: String },
}
