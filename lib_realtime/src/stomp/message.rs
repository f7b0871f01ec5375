use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::stomp::frame::Frame;

/// Callback invoked for every MESSAGE delivered on a subscription.
///
/// Handlers run on the client task, so they should hand heavy work off
/// (for example through a channel) instead of blocking.
pub type MessageHandler = Arc<dyn Fn(&StompMessage) + Send + Sync>;

/// A MESSAGE frame as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompMessage {
    pub destination: String,
    pub subscription: Option<String>,
    pub message_id: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl StompMessage {
    pub fn from_frame(frame: Frame) -> Self {
        let lookup = |name: &str| frame.get_header(name).map(str::to_string);
        Self {
            destination: lookup("destination").unwrap_or_default(),
            subscription: lookup("subscription"),
            message_id: lookup("message-id"),
            headers: frame.headers,
            body: frame.body,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parses the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stomp::frame::Command;

    #[test]
    fn builds_from_message_frame() {
        let frame = Frame::new(Command::Message)
            .header("destination", "/topic/risk-updates")
            .header("subscription", "sub-3")
            .header("message-id", "m-9")
            .with_body(r#"{"supplierId":"S-1","riskScore":0.82}"#);

        let message = StompMessage::from_frame(frame);
        assert_eq!(message.destination, "/topic/risk-updates");
        assert_eq!(message.subscription.as_deref(), Some("sub-3"));
        assert_eq!(message.message_id.as_deref(), Some("m-9"));
        assert_eq!(message.header("message-id"), Some("m-9"));

        let value: serde_json::Value = message.json().unwrap();
        assert_eq!(value["supplierId"], "S-1");
    }

    #[test]
    fn json_errors_are_returned_not_raised() {
        let message = StompMessage::from_frame(Frame::new(Command::Message).with_body("not json"));
        assert!(message.json::<serde_json::Value>().is_err());
        assert_eq!(message.body_text(), "not json");
    }
}
