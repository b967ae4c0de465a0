//! Messages of the DDP publish/subscribe protocol spoken by the state server.
//!
//! Only the subset the controller needs is modelled. Server messages the
//! controller has no use for decode to [`ServerMessage::Unknown`] so newer
//! servers can add kinds without breaking old controllers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Result;

pub const PROTOCOL_VERSION: &str = "1";

/// Field mapping of a single remote record.
pub type Fields = Map<String, Value>;

/// Messages sent by the controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ClientMessage {
    Connect {
        version: String,
        support: Vec<String>,
    },
    Sub {
        id: String,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        params: Option<Vec<Value>>,
    },
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Method {
        id: String,
        method: String,
        params: Vec<Value>,
    },
}

impl ClientMessage {
    pub fn connect() -> Self {
        Self::Connect {
            version: PROTOCOL_VERSION.to_string(),
            support: vec![PROTOCOL_VERSION.to_string()],
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages received from the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ServerMessage {
    Connected {
        #[serde(default)]
        session: Option<String>,
    },
    Failed {
        #[serde(default)]
        version: Option<String>,
    },
    Ping {
        #[serde(default)]
        id: Option<String>,
    },
    Nosub {
        id: String,
        #[serde(default)]
        error: Option<Value>,
    },
    Added {
        collection: String,
        id: String,
        #[serde(default)]
        fields: Fields,
    },
    Changed {
        collection: String,
        id: String,
        #[serde(default)]
        fields: Fields,
        #[serde(default)]
        cleared: Vec<String>,
    },
    Removed {
        collection: String,
        id: String,
    },
    Result {
        id: String,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<Value>,
    },
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// Decodes one text frame. Frames without a `msg` tag (such as the
    /// initial `server_id` greeting) decode to [`ServerMessage::Unknown`].
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        if value.get("msg").is_none() {
            return Ok(Self::Unknown);
        }
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encodes_handshake_and_subscription() {
        let connect = serde_json::to_value(ClientMessage::connect()).unwrap();
        assert_eq!(connect, json!({"msg": "connect", "version": "1", "support": ["1"]}));

        let sub = ClientMessage::Sub {
            id: "1".to_string(),
            name: "lights".to_string(),
            params: None,
        };
        assert_eq!(
            serde_json::to_value(sub).unwrap(),
            json!({"msg": "sub", "id": "1", "name": "lights"})
        );

        let sub = ClientMessage::Sub {
            id: "2".to_string(),
            name: "presence".to_string(),
            params: Some(vec![json!("token")]),
        };
        assert_eq!(
            serde_json::to_value(sub).unwrap(),
            json!({"msg": "sub", "id": "2", "name": "presence", "params": ["token"]})
        );
    }

    #[test]
    fn pong_echoes_optional_id() {
        let pong = serde_json::to_value(ClientMessage::Pong { id: None }).unwrap();
        assert_eq!(pong, json!({"msg": "pong"}));
        let pong = serde_json::to_value(ClientMessage::Pong {
            id: Some("7".to_string()),
        })
        .unwrap();
        assert_eq!(pong, json!({"msg": "pong", "id": "7"}));
    }

    #[test]
    fn decodes_data_messages() {
        let changed = ServerMessage::from_json(
            r#"{"msg":"changed","collection":"lights","id":"A","fields":{"y":2},"cleared":["x"]}"#,
        )
        .unwrap();
        match changed {
            ServerMessage::Changed {
                collection,
                id,
                fields,
                cleared,
            } => {
                assert_eq!(collection, "lights");
                assert_eq!(id, "A");
                assert_eq!(fields.get("y"), Some(&json!(2)));
                assert_eq!(cleared, vec!["x".to_string()]);
            }
            other => panic!("unexpected message {other:?}"),
        }

        let removed =
            ServerMessage::from_json(r#"{"msg":"removed","collection":"lights","id":"A"}"#).unwrap();
        assert_eq!(
            removed,
            ServerMessage::Removed {
                collection: "lights".to_string(),
                id: "A".to_string()
            }
        );
    }

    #[test]
    fn decodes_method_results() {
        let ok = ServerMessage::from_json(r#"{"msg":"result","id":"3","result":{"id":2}}"#).unwrap();
        assert_eq!(
            ok,
            ServerMessage::Result {
                id: "3".to_string(),
                result: Some(json!({"id": 2})),
                error: None,
            }
        );
    }

    #[test]
    fn unknown_kinds_are_tolerated() {
        let ready = ServerMessage::from_json(r#"{"msg":"ready","subs":["1"]}"#).unwrap();
        assert_eq!(ready, ServerMessage::Unknown);
        let updated = ServerMessage::from_json(r#"{"msg":"updated","methods":["3"]}"#).unwrap();
        assert_eq!(updated, ServerMessage::Unknown);
        let greeting = ServerMessage::from_json(r#"{"server_id":"0"}"#).unwrap();
        assert_eq!(greeting, ServerMessage::Unknown);
    }

    #[test]
    fn malformed_messages_fail_to_decode() {
        assert!(ServerMessage::from_json("not json").is_err());
        assert!(ServerMessage::from_json(r#"{"msg":"added","id":"A"}"#).is_err());
    }
}
