//! Runs the collaboration service against the loopback transport and
//! plays back a short two-seat session: a presence snapshot, a car
//! record update from another seat, and a conflicting edit.
//!
//!     cargo run -p lotview-collab --example offline_demo

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use lotview_collab::transport::{memory, ChangeEvent, RecordChange, TransportEvent};
use lotview_collab::{CollabConfig, CollaborationService, RecordCache, UserIdentity};

struct DemoCache;

#[async_trait::async_trait]
impl RecordCache for DemoCache {
    async fn get_cached_record(
        &self,
        _table: &str,
        record_id: &str,
    ) -> lotview_common::Result<Option<Value>> {
        // Pretend this seat has an unsaved draft of car-42.
        if record_id == "car-42" {
            return Ok(Some(json!({
                "id": "car-42",
                "updated_at": "2026-08-30T09:00:00Z",
                "last_modified_by": "desk-1",
                "price": 18500,
            })));
        }
        Ok(None)
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lotview_collab=debug".into()),
        )
        .init();

    let (transport, remote) = memory::pair();
    let service = CollaborationService::new(
        CollabConfig::default(),
        Box::new(transport),
        Arc::new(DemoCache),
    );

    let _updates = service.subscribe_all(|update| {
        println!(
            "update: {} {} by {}",
            update.kind.as_str(),
            update.record_id,
            update.origin.display_name()
        );
    });
    let _conflicts = service.on_conflict(|report| {
        for conflict in &report.conflicts {
            println!(
                "conflict on {}.{}: local {} vs remote {}",
                report.record_id, conflict.field, conflict.local, conflict.remote
            );
        }
    });
    let _presence = service.on_user_presence(|users| {
        let names: Vec<&str> = users.iter().map(|u| u.name.as_str()).collect();
        println!("online: {names:?}");
    });

    if let Err(err) = service
        .initialize(UserIdentity {
            id: "desk-1".to_string(),
            name: "Front Desk".to_string(),
            email: "desk-1@lot.example".to_string(),
            avatar: None,
        })
        .await
    {
        eprintln!("initialize failed: {err}");
        return;
    }

    // Another seat comes online.
    let mut state = HashMap::new();
    state.insert(
        "desk-2".to_string(),
        json!({
            "id": "desk-2",
            "name": "Service Bay",
            "email": "desk-2@lot.example",
            "status": "online",
            "current_page": "/repairs",
            "last_seen": "2026-08-30T09:00:00Z",
        }),
    );
    let _ = remote
        .events
        .send(TransportEvent::PresenceSnapshot {
            topic: "lotview-presence".to_string(),
            state,
        })
        .await;

    // That seat edits a car this seat has a draft of.
    let _ = remote
        .events
        .send(TransportEvent::Change {
            topic: "lotview-feed-cars".to_string(),
            change: RecordChange {
                table: "cars".to_string(),
                event: ChangeEvent::Update,
                record: json!({
                    "id": "car-42",
                    "updated_at": "2026-08-30T10:15:00Z",
                    "last_modified_by": "desk-2",
                    "price": 17900,
                }),
                old_record: Value::Null,
            },
        })
        .await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    service.disconnect().await;
}
