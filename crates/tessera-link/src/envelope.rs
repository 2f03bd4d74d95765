//! Wire envelopes.
//!
//! Every protocol message is a tagged object (`{"tag": "listen"}`,
//! `{"tag": "offer", "payload": ...}`, ...) wrapped under a namespaced
//! key. Data without the expected key is not addressed to this protocol
//! and is ignored by receivers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::channel::{Message, Transferable};

/// Key wrapping window messages addressed to the client.
pub const TO_CLIENT: &str = "tessera.link/to-client";

/// Key wrapping window messages addressed to the service.
pub const TO_SERVICE: &str = "tessera.link/to-service";

/// Key wrapping messages on dedicated match and exchange ports.
pub const CHANNEL: &str = "tessera.link/channel";

/// Launch details shared with trusted services only.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchInfo {
    /// Human-readable client name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    /// Configured service URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum Envelope {
    /// Service is ready for a request.
    Listen,
    /// Client's answer to `listen`; the match port rides along.
    Request {
        /// The client's connectors in wire form.
        connector_list: Value,
        /// Preferred language.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lang: Option<String>,
        /// Launch details (trusted services only).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        launch: Option<LaunchInfo>,
    },
    /// Service accepts the request; the exchange port rides along.
    Connect {
        /// The service's connectors in wire form.
        connector_list: Value,
    },
    /// Replace the set of authorized origins.
    Origins {
        /// Expected to be an array of strings.
        origins: Value,
    },
    /// Close the session.
    Close,
    /// The offered payload.
    Offer {
        /// Application data.
        #[serde(default)]
        payload: Value,
    },
    /// The accepting side's answer.
    Result {
        /// Application data.
        #[serde(default)]
        payload: Value,
    },
    /// The exchange is complete.
    Release,
    /// A newer match channel replaced this one.
    Invalidated,
    /// The request already connected elsewhere.
    Expired,
}

impl Envelope {
    /// Wrap this envelope under `namespace`.
    #[must_use]
    pub fn wrap(&self, namespace: &str) -> Value {
        // Serializing a derived enum with string keys cannot fail.
        let body = serde_json::to_value(self).unwrap_or(Value::Null);
        let mut outer = Map::new();
        outer.insert(namespace.to_owned(), body);
        Value::Object(outer)
    }

    /// A port message carrying this envelope under `namespace`.
    #[must_use]
    pub fn message(&self, namespace: &str) -> Message {
        Message::new(self.wrap(namespace))
    }

    /// Like [`Envelope::message`], with transferables.
    #[must_use]
    pub fn message_with(&self, namespace: &str, transfer: Vec<Transferable>) -> Message {
        Message::with_transfer(self.wrap(namespace), transfer)
    }

    /// Unwrap an envelope addressed under `namespace`.
    ///
    /// Returns `None` when `data` is not addressed to this protocol, and
    /// `Some(Err)` when it is but the envelope is unknown or malformed.
    pub fn open(data: &Value, namespace: &str) -> Option<Result<Self, serde_json::Error>> {
        let body = data.get(namespace)?;
        Some(Self::deserialize(body))
    }
}

/// Strings in a JSON array; `None` if `value` is not an array.
#[must_use]
pub fn string_list(value: &Value) -> Option<Vec<String>> {
    let items = value.as_array()?;
    Some(
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect(),
    )
}
