//! Incoming Phoenix message handling and presence folding.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::connection::PendingChannel;
use super::types::{ChangeEvent, PhoenixMessage, RecordChange, TransportEvent};

/// Extract the short topic name from a Phoenix topic (strip "realtime:" prefix).
fn strip_topic_prefix(topic: &str) -> &str {
    topic.strip_prefix("realtime:").unwrap_or(topic)
}

/// Parse a Phoenix presence map into `key -> first meta`.
///
/// The provider sends presence as `{ "key": { "metas": [{ ... }] } }`;
/// the most recent meta entry is the participant's announced state.
fn parse_presence_map(value: &Value) -> HashMap<String, Value> {
    let mut result = HashMap::new();
    if let Some(obj) = value.as_object() {
        for (key, val) in obj {
            if let Some(meta) = val
                .get("metas")
                .and_then(|m| m.as_array())
                .and_then(|metas| metas.first())
            {
                result.insert(key.clone(), meta.clone());
            }
        }
    }
    result
}

/// Handle a single incoming Phoenix message.
///
/// Presence diffs are folded into the per-topic state here so that
/// downstream only ever observes full snapshots, never partial patches.
///
/// An ok `phx_reply` becomes `ChannelJoined` only when its ref matches
/// the topic's recorded `phx_join` ref. The provider also replies ok to
/// every track and broadcast push, and treating those acks as joins
/// would re-trigger join-time work (the presence announce) per ack.
pub(crate) async fn handle_phoenix_message(
    msg: &PhoenixMessage,
    presence: &mut HashMap<String, HashMap<String, Value>>,
    joined_channels: &Mutex<HashMap<String, PendingChannel>>,
    event_tx: &mpsc::Sender<TransportEvent>,
) {
    let topic = strip_topic_prefix(&msg.topic);

    match msg.event.as_str() {
        "phx_reply" => {
            if let Some(status) = msg.payload.get("status").and_then(|s| s.as_str()) {
                if status == "ok" {
                    let is_join_reply = {
                        let channels = joined_channels.lock().await;
                        msg.msg_ref.is_some()
                            && channels
                                .get(topic)
                                .map(|pending| pending.join_ref == msg.msg_ref)
                                .unwrap_or(false)
                    };
                    if is_join_reply {
                        debug!(topic = %topic, "Channel join acknowledged");
                        let _ = event_tx
                            .send(TransportEvent::ChannelJoined {
                                topic: topic.to_string(),
                            })
                            .await;
                    } else {
                        debug!(topic = %topic, "Push acknowledged");
                    }
                } else {
                    let message = msg
                        .payload
                        .get("response")
                        .and_then(|r| r.get("reason"))
                        .and_then(|r| r.as_str())
                        .unwrap_or("unknown error")
                        .to_string();
                    warn!(topic = %topic, status = %status, "Channel reply error");
                    let _ = event_tx
                        .send(TransportEvent::ChannelError {
                            topic: topic.to_string(),
                            message,
                        })
                        .await;
                }
            }
        }
        "phx_error" => {
            warn!(topic = %topic, "Channel error");
            let _ = event_tx
                .send(TransportEvent::ChannelError {
                    topic: topic.to_string(),
                    message: "Channel error".to_string(),
                })
                .await;
        }
        "phx_close" => {
            info!(topic = %topic, "Channel closed");
            let _ = event_tx
                .send(TransportEvent::ChannelError {
                    topic: topic.to_string(),
                    message: "Channel closed".to_string(),
                })
                .await;
        }
        "broadcast" => {
            let inner_event = msg
                .payload
                .get("event")
                .and_then(|e| e.as_str())
                .unwrap_or("unknown")
                .to_string();
            let inner_payload = msg.payload.get("payload").cloned().unwrap_or(Value::Null);
            debug!(topic = %topic, event = %inner_event, "Broadcast received");
            let _ = event_tx
                .send(TransportEvent::Broadcast {
                    topic: topic.to_string(),
                    event: inner_event,
                    payload: inner_payload,
                })
                .await;
        }
        "presence_state" => {
            let state = parse_presence_map(&msg.payload);
            debug!(topic = %topic, users = state.len(), "Presence state received");
            presence.insert(topic.to_string(), state.clone());
            let _ = event_tx
                .send(TransportEvent::PresenceSnapshot {
                    topic: topic.to_string(),
                    state,
                })
                .await;
        }
        "presence_diff" => {
            let joins = msg
                .payload
                .get("joins")
                .map(parse_presence_map)
                .unwrap_or_default();
            let leaves = msg
                .payload
                .get("leaves")
                .map(parse_presence_map)
                .unwrap_or_default();
            debug!(
                topic = %topic,
                joins = joins.len(),
                leaves = leaves.len(),
                "Presence diff received"
            );
            let state = presence.entry(topic.to_string()).or_default();
            for (key, meta) in joins {
                state.insert(key, meta);
            }
            for key in leaves.keys() {
                state.remove(key);
            }
            let snapshot = state.clone();
            let _ = event_tx
                .send(TransportEvent::PresenceSnapshot {
                    topic: topic.to_string(),
                    state: snapshot,
                })
                .await;
        }
        "postgres_changes" => {
            if let Some(change) = parse_postgres_change(&msg.payload) {
                debug!(
                    topic = %topic,
                    table = %change.table,
                    "Change notification received"
                );
                let _ = event_tx
                    .send(TransportEvent::Change {
                        topic: topic.to_string(),
                        change,
                    })
                    .await;
            } else {
                warn!(topic = %topic, "Malformed change notification dropped");
            }
        }
        _ => {
            debug!(
                topic = %topic,
                event = %msg.event,
                "Unhandled Phoenix event"
            );
        }
    }
}

/// Parse a `postgres_changes` payload into a `RecordChange`.
///
/// The provider nests the row data as
/// `{ "data": { "type": "UPDATE", "table": ..., "record": ..., "old_record": ... } }`.
fn parse_postgres_change(payload: &Value) -> Option<RecordChange> {
    let data = payload.get("data")?;
    let event = data
        .get("type")
        .and_then(|t| t.as_str())
        .and_then(ChangeEvent::parse)?;
    let table = data.get("table").and_then(|t| t.as_str())?;
    if table.is_empty() {
        return None;
    }
    Some(RecordChange {
        table: table.to_string(),
        event,
        record: data.get("record").cloned().unwrap_or(Value::Null),
        old_record: data.get("old_record").cloned().unwrap_or(Value::Null),
    })
}
