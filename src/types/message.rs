//! Inbound event messages.
//!
//! Every inbound frame is a JSON array of objects, each carrying at least an
//! `ev` field with the event code. A single frame may batch events from
//! several topics:
//!
//! ```text
//! [{"ev":"T","sym":"AMD","p":101.5,"s":100,"t":1611082428813},
//!  {"ev":"status","status":"auth_success","message":"authenticated"}]
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::STATUS_EVENT;
use crate::error::{ReceiveError, Result};

/// One decoded event from the stream.
///
/// The `ev` code is kept apart for routing; everything else is preserved
/// as-is in [`fields`](Self::fields). Use [`decode`](Self::decode) to turn a
/// message into one of the typed payloads in [`crate::types::events`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Event code (`T`, `Q`, `AM`, `status`, …).
    pub ev: String,
    /// All remaining fields of the event object.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Message {
    /// Build a message from an event code and a JSON object of fields.
    ///
    /// Non-object values produce a message with no fields.
    pub fn new(ev: impl Into<String>, fields: Value) -> Self {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            ev: ev.into(),
            fields,
        }
    }

    /// Decode one raw inbound frame into its messages, in array order.
    ///
    /// A frame that is not a JSON array is a [`ReceiveError::Decode`]. An
    /// element without a string `ev` is logged and skipped; the rest of the
    /// batch is still returned.
    pub fn parse_frame(raw: &str) -> std::result::Result<Vec<Message>, ReceiveError> {
        let elements: Vec<Value> = serde_json::from_str(raw).map_err(|source| ReceiveError::Decode {
            raw: raw.to_owned(),
            source,
        })?;
        Ok(elements
            .into_iter()
            .enumerate()
            .filter_map(|(index, element)| match serde_json::from_value::<Message>(element) {
                Ok(msg) => Some(msg),
                Err(e) => {
                    tracing::warn!(index, error = %e, "Skipping malformed event in frame");
                    None
                }
            })
            .collect())
    }

    /// The event code.
    pub fn ev(&self) -> &str {
        &self.ev
    }

    /// Raw access to a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// A string field, if present and a string.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Ticker the event refers to (`sym` for stocks/options, `pair` or `p`
    /// for forex/crypto). `None` for status events.
    pub fn symbol(&self) -> Option<&str> {
        self.str_field("sym")
            .or_else(|| self.str_field("pair"))
            .or_else(|| self.str_field("p"))
    }

    /// Whether this is a control (`status`) message.
    pub fn is_status(&self) -> bool {
        self.ev == STATUS_EVENT
    }

    /// The status kind of a control message; `None` for market events.
    pub fn status(&self) -> Option<StatusKind> {
        if !self.is_status() {
            return None;
        }
        self.str_field("status").map(StatusKind::from_wire)
    }

    /// Human-readable text of a control message.
    pub fn status_message(&self) -> Option<&str> {
        self.str_field("message")
    }

    /// Deserialize this message into a typed payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let mut object = self.fields.clone();
        object.insert("ev".to_owned(), Value::String(self.ev.clone()));
        Ok(serde_json::from_value(Value::Object(object))?)
    }
}

/// Value of the `status` field on control messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StatusKind {
    /// Socket accepted, awaiting authentication.
    Connected,
    /// API key accepted. Resets the reconnect counter.
    AuthSuccess,
    /// API key rejected. Terminal.
    AuthFailed,
    /// Generic error report (bad action, unknown symbol, …).
    Error,
    /// Subscription acknowledgement.
    Success,
    /// Anything else the gateway sends.
    Other(String),
}

impl StatusKind {
    /// Parse the wire value.
    pub fn from_wire(value: &str) -> Self {
        match value {
            "connected" => Self::Connected,
            "auth_success" => Self::AuthSuccess,
            "auth_failed" => Self::AuthFailed,
            "error" => Self::Error,
            "success" => Self::Success,
            other => Self::Other(other.to_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_batched_frame_in_order() {
        let raw = r#"[{"ev":"T","sym":"AMD"},{"ev":"status","status":"auth_success","message":"authenticated"}]"#;
        let messages = Message::parse_frame(raw).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].ev(), "T");
        assert_eq!(messages[0].symbol(), Some("AMD"));
        assert_eq!(messages[1].status(), Some(StatusKind::AuthSuccess));
        assert_eq!(messages[1].status_message(), Some("authenticated"));
    }

    #[test]
    fn empty_array_is_valid() {
        assert!(Message::parse_frame("[]").unwrap().is_empty());
    }

    #[test]
    fn vendor_error_string_is_a_decode_error() {
        let err = Message::parse_frame("invalid symbol: ZZZZ").unwrap_err();
        match err {
            ReceiveError::Decode { raw, .. } => assert_eq!(raw, "invalid symbol: ZZZZ"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn element_without_ev_is_skipped() {
        let messages =
            Message::parse_frame(r#"[{"sym":"AMD"},{"ev":"T","sym":"NVDA"},{"ev":7}]"#).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].symbol(), Some("NVDA"));
    }

    #[test]
    fn bare_object_is_a_decode_error() {
        assert!(matches!(
            Message::parse_frame(r#"{"ev":"T","sym":"AMD"}"#),
            Err(ReceiveError::Decode { .. })
        ));
    }

    #[test]
    fn market_events_have_no_status() {
        let msg = Message::new("Q", json!({"sym": "MSFT", "status": "auth_failed"}));
        assert_eq!(msg.status(), None);
        assert!(!msg.is_status());
    }

    #[test]
    fn unknown_status_is_preserved() {
        let msg = Message::new("status", json!({"status": "max_connections"}));
        assert_eq!(
            msg.status(),
            Some(StatusKind::Other("max_connections".into()))
        );
    }
}
