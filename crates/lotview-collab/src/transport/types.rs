//! Commands, events, and protocol types for the transport layer.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use lotview_common::CollabError;

// ---------------------------------------------------------------------------
// Change notifications
// ---------------------------------------------------------------------------

/// The three change-feed notification types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    Insert,
    Update,
    Delete,
}

impl ChangeEvent {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INSERT" => Some(ChangeEvent::Insert),
            "UPDATE" => Some(ChangeEvent::Update),
            "DELETE" => Some(ChangeEvent::Delete),
            _ => None,
        }
    }
}

/// A raw change notification for one watched table.
#[derive(Debug, Clone)]
pub struct RecordChange {
    pub table: String,
    pub event: ChangeEvent,
    /// The new row for inserts/updates; `Null` for deletes.
    pub record: Value,
    /// The old row for deletes (and updates where the provider sends it);
    /// `Null` otherwise.
    pub old_record: Value,
}

impl RecordChange {
    /// The payload a normalized update is built from: the new record for
    /// inserts/updates, the old record for deletes.
    pub fn payload(&self) -> &Value {
        match self.event {
            ChangeEvent::Insert | ChangeEvent::Update => &self.record,
            ChangeEvent::Delete => &self.old_record,
        }
    }
}

// ---------------------------------------------------------------------------
// Phoenix protocol
// ---------------------------------------------------------------------------

/// A Phoenix protocol message envelope (v1 JSON format).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    pub payload: Value,
    #[serde(rename = "ref")]
    pub msg_ref: Option<String>,
}

/// What a channel was joined for. Determines the join payload sent to
/// the provider and what gets restored after a reconnect.
#[derive(Debug, Clone)]
pub enum JoinSpec {
    /// Presence channel keyed by the session's user id.
    Presence { key: String },
    /// Change feed for one record table, all event types.
    TableFeed { table: String },
    /// Ad-hoc broadcast channel.
    Signals,
}

impl JoinSpec {
    /// Serialize to the JSON payload expected by Supabase `phx_join`.
    pub(crate) fn to_join_payload(&self) -> Value {
        match self {
            JoinSpec::Presence { key } => serde_json::json!({
                "config": {
                    "broadcast": { "self": false, "ack": false },
                    "presence": { "key": key }
                }
            }),
            JoinSpec::TableFeed { table } => serde_json::json!({
                "config": {
                    "postgres_changes": [
                        { "event": "*", "schema": "public", "table": table }
                    ]
                }
            }),
            JoinSpec::Signals => serde_json::json!({
                "config": {
                    "broadcast": { "self": false, "ack": true }
                }
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Events & commands
// ---------------------------------------------------------------------------

/// Events emitted by a transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Connection to the provider established.
    Connected,
    /// Connection lost. Presence is considered empty until it returns.
    Disconnected,
    /// A channel join was acknowledged.
    ChannelJoined { topic: String },
    /// Channel closed or errored. The transport retries; updates from
    /// this source simply stop until it succeeds.
    ChannelError { topic: String, message: String },
    /// Full presence snapshot for a channel, keyed by participant id.
    /// Emitted on every sync, join, and leave, never as a diff.
    PresenceSnapshot {
        topic: String,
        state: HashMap<String, Value>,
    },
    /// A change notification on a watched table.
    Change { topic: String, change: RecordChange },
    /// An ad-hoc broadcast from another participant.
    Broadcast {
        topic: String,
        event: String,
        payload: Value,
    },
    /// Transport-level error.
    Error(CollabError),
}

/// Commands sent to a transport from the service.
#[derive(Debug)]
pub enum TransportCommand {
    Join { topic: String, spec: JoinSpec },
    Leave { topic: String },
    Broadcast {
        topic: String,
        event: String,
        payload: Value,
    },
    PresenceTrack { topic: String, payload: Value },
    Disconnect,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn change_event_parse() {
        assert_eq!(ChangeEvent::parse("INSERT"), Some(ChangeEvent::Insert));
        assert_eq!(ChangeEvent::parse("UPDATE"), Some(ChangeEvent::Update));
        assert_eq!(ChangeEvent::parse("DELETE"), Some(ChangeEvent::Delete));
        assert_eq!(ChangeEvent::parse("TRUNCATE"), None);
    }

    #[test]
    fn delete_payload_uses_old_record() {
        let change = RecordChange {
            table: "cars".into(),
            event: ChangeEvent::Delete,
            record: Value::Null,
            old_record: json!({ "id": "car-1" }),
        };
        assert_eq!(change.payload()["id"], "car-1");

        let change = RecordChange {
            table: "cars".into(),
            event: ChangeEvent::Update,
            record: json!({ "id": "car-2" }),
            old_record: json!({ "id": "car-1" }),
        };
        assert_eq!(change.payload()["id"], "car-2");
    }

    #[test]
    fn presence_join_payload_shape() {
        let payload = JoinSpec::Presence { key: "u1".into() }.to_join_payload();
        assert_eq!(payload["config"]["presence"]["key"], "u1");
        assert_eq!(payload["config"]["broadcast"]["self"], false);
    }

    #[test]
    fn table_feed_join_payload_shape() {
        let payload = JoinSpec::TableFeed {
            table: "cars".into(),
        }
        .to_join_payload();
        let changes = &payload["config"]["postgres_changes"][0];
        assert_eq!(changes["event"], "*");
        assert_eq!(changes["table"], "cars");
    }
}
