//! Conflict detection between cached records and incoming remote updates.
//!
//! The host application plugs in a [`RecordCache`] holding its last known good
//! copy of each record, commonly backed by durable client-side storage
//! keyed by `table:record_id`. This module only detects and reports
//! divergence; it never mutates the cache and never resolves anything.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::protocol::{now_iso, ConflictReport, FieldConflict, UpdateOrigin};

/// Version-indicating field compared to decide whether two copies of a
/// record have diverged at all.
const VERSION_FIELD: &str = "updated_at";

/// Read access to the host application's local record cache.
#[async_trait]
pub trait RecordCache: Send + Sync {
    /// Last known good copy of a record, or `None` if the record was
    /// never cached.
    async fn get_cached_record(
        &self,
        table: &str,
        record_id: &str,
    ) -> lotview_common::Result<Option<Value>>;
}

/// Compare an incoming update against the cached copy of the same record.
///
/// Returns `None` when there is nothing cached, when the version fields
/// match (not-yet-diverged, even if other fields differ), or when no
/// field actually differs. Cache read errors are treated as "no
/// conflict"; the update still flows.
pub(crate) async fn detect(
    cache: &dyn RecordCache,
    table: &str,
    record_id: &str,
    incoming: &Value,
) -> Option<ConflictReport> {
    let cached = match cache.get_cached_record(table, record_id).await {
        Ok(Some(cached)) => cached,
        Ok(None) => return None,
        Err(e) => {
            warn!(table = %table, record_id = %record_id, error = %e, "Cache read failed; skipping conflict check");
            return None;
        }
    };

    let incoming_version = incoming.get(VERSION_FIELD)?;
    if cached.get(VERSION_FIELD) == Some(incoming_version) {
        return None;
    }

    let fields = incoming.as_object()?;
    let timestamp = now_iso();
    let user_id = match UpdateOrigin::from_record(incoming) {
        UpdateOrigin::User { id, .. } => id,
        UpdateOrigin::System => "system".to_string(),
    };

    let conflicts: Vec<FieldConflict> = fields
        .iter()
        .filter(|(field, _)| field.as_str() != VERSION_FIELD)
        .filter(|(field, remote)| cached.get(field.as_str()) != Some(remote))
        .map(|(field, remote)| FieldConflict {
            field: field.clone(),
            local: cached.get(field.as_str()).cloned().unwrap_or(Value::Null),
            remote: remote.clone(),
            timestamp: timestamp.clone(),
            user_id: user_id.clone(),
        })
        .collect();

    if conflicts.is_empty() {
        return None;
    }

    debug!(
        table = %table,
        record_id = %record_id,
        fields = conflicts.len(),
        "Conflict detected"
    );
    Some(ConflictReport {
        record_id: record_id.to_string(),
        table: table.to_string(),
        conflicts,
    })
}
