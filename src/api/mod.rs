//! Wire payloads exchanged with the chat backend.
//!
//! Field names follow the backend's JSON contract (`texto`, `respuesta`,
//! `modelo`, ...); the Rust side keeps its own naming through serde
//! renames.

use serde::{Deserialize, Serialize};

use crate::core::message::Message;

/// Question body shared by the streaming endpoint and the traditional
/// fallback.
#[derive(Serialize, Clone, Debug)]
pub struct AskRequest {
    #[serde(rename = "texto")]
    pub text: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "chatToken")]
    pub chat_token: String,
    pub history: Vec<Message>,
    #[serde(rename = "modelo")]
    pub model: String,
}

/// One `data:` frame payload from the streaming endpoint. All fields are
/// optional; the decoder maps whichever is present to a protocol event.
#[derive(Deserialize, Debug)]
pub struct StreamPayload {
    pub status: Option<String>,
    pub chunk: Option<String>,
    pub result: Option<StreamResult>,
    pub error: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct StreamResult {
    pub response: Option<String>,
}

/// Response of the traditional (non-streaming) endpoint.
#[derive(Deserialize, Debug)]
pub struct AskResponse {
    #[serde(rename = "respuesta")]
    pub answer: Option<String>,
    pub error: Option<String>,
}

/// Body of the history persistence call.
#[derive(Serialize, Debug)]
pub struct HistoryUpload<'a> {
    pub user_id: &'a str,
    pub session_id: &'a str,
    pub history: &'a [Message],
}
