use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Sender {
    User,
    Bot,
}

impl Sender {
    pub fn as_str(self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Bot => "bot",
        }
    }

    pub fn is_user(self) -> bool {
        self == Sender::User
    }

    pub fn is_bot(self) -> bool {
        self == Sender::Bot
    }
}

impl AsRef<str> for Sender {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl TryFrom<&str> for Sender {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Sender::User),
            "bot" => Ok(Sender::Bot),
            _ => Err(format!("invalid sender: {value}")),
        }
    }
}

impl TryFrom<String> for Sender {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<Sender> for String {
    fn from(value: Sender) -> Self {
        value.as_str().to_string()
    }
}

/// A single transcript entry.
///
/// `raw_text` is immutable once the message is stored; `rendered_html` is a
/// derived projection cached for redisplay and is never what the history
/// store persists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub sender: Sender,
    #[serde(rename = "text")]
    pub raw_text: String,
    #[serde(skip)]
    pub rendered_html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_label: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(sender: Sender, raw_text: impl Into<String>) -> Self {
        Self {
            sender,
            raw_text: raw_text.into(),
            rendered_html: None,
            model_label: None,
            timestamp: Utc::now(),
        }
    }

    pub fn user(raw_text: impl Into<String>) -> Self {
        Self::new(Sender::User, raw_text)
    }

    pub fn bot(raw_text: impl Into<String>) -> Self {
        Self::new(Sender::Bot, raw_text)
    }

    pub fn with_rendered_html(mut self, html: impl Into<String>) -> Self {
        self.rendered_html = Some(html.into());
        self
    }

    pub fn with_model_label(mut self, label: Option<String>) -> Self {
        self.model_label = label;
        self
    }

    pub fn is_user(&self) -> bool {
        self.sender.is_user()
    }

    pub fn is_bot(&self) -> bool {
        self.sender.is_bot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_round_trips_through_strings() {
        assert_eq!(Sender::try_from("user"), Ok(Sender::User));
        assert_eq!(Sender::try_from("bot"), Ok(Sender::Bot));
        assert_eq!(String::from(Sender::Bot), "bot");
    }

    #[test]
    fn invalid_sender_strings_are_rejected() {
        assert!(Sender::try_from("assistant").is_err());
    }

    #[test]
    fn rendered_html_is_not_persisted() {
        let message = Message::bot("hola").with_rendered_html("<p>hola</p>");
        let json = serde_json::to_value(&message).expect("serialize message");
        assert!(json.get("rendered_html").is_none());
        assert_eq!(json["text"], "hola");
        assert_eq!(json["sender"], "bot");
    }
}
