//! Protocol types for the Lotview collaboration layer.
//!
//! These types define the normalized shapes that flow between the
//! collaboration service and the rest of the console: presence entries,
//! live record updates, and conflict reports. The transport envelope
//! (Phoenix Channels protocol) is handled by the `transport` module.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use lotview_common::new_correlation_id;

/// Conventional attribution fields on record payloads written by the console.
const ATTRIBUTION_ID_FIELD: &str = "last_modified_by";
const ATTRIBUTION_NAME_FIELD: &str = "last_modified_by_name";

/// Well-known broadcast event names on the signals channel.
pub mod events {
    pub const VIEWING_RECORD: &str = "viewing_record";
    pub const EDITING_RECORD: &str = "editing_record";
    pub const ATTENTION_REQUEST: &str = "attention_request";
}

/// Current timestamp as an ISO-8601 string with millisecond precision.
pub(crate) fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ---------------------------------------------------------------------------
// Identity & presence
// ---------------------------------------------------------------------------

/// Identity handed to `initialize` by the authentication layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// User presence status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    #[default]
    Online,
    Away,
    Offline,
}

/// A connected user as tracked on the presence channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationUser {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub status: UserStatus,
    pub current_page: String,
    pub last_seen: String,
}

impl CollaborationUser {
    /// Build the initial presence entry for a freshly authenticated identity.
    pub fn from_identity(identity: &UserIdentity) -> Self {
        Self {
            id: identity.id.clone(),
            name: identity.name.clone(),
            email: identity.email.clone(),
            avatar: identity.avatar.clone(),
            status: UserStatus::Online,
            current_page: "/".to_string(),
            last_seen: now_iso(),
        }
    }
}

// ---------------------------------------------------------------------------
// Live updates
// ---------------------------------------------------------------------------

/// Kind of a normalized live update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateKind {
    #[serde(rename = "car_update")]
    CarRecord,
    #[serde(rename = "schedule_update")]
    Schedule,
    #[serde(rename = "repair_update")]
    RepairStatus,
    #[serde(rename = "inventory_update")]
    Inventory,
    #[serde(rename = "user_activity")]
    UserActivity,
}

impl UpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKind::CarRecord => "car_update",
            UpdateKind::Schedule => "schedule_update",
            UpdateKind::RepairStatus => "repair_update",
            UpdateKind::Inventory => "inventory_update",
            UpdateKind::UserActivity => "user_activity",
        }
    }

    /// Static table-to-kind mapping. Tables this layer does not recognize
    /// fall back to generic user activity.
    pub fn for_table(table: &str) -> Self {
        match table {
            "cars" => UpdateKind::CarRecord,
            "appointments" => UpdateKind::Schedule,
            "repair_orders" => UpdateKind::RepairStatus,
            "inventory" => UpdateKind::Inventory,
            _ => UpdateKind::UserActivity,
        }
    }

    /// Parse a broadcast event name into a kind, falling back to
    /// generic user activity for unrecognized names.
    pub fn from_event(event: &str) -> Self {
        match event {
            "car_update" => UpdateKind::CarRecord,
            "schedule_update" => UpdateKind::Schedule,
            "repair_update" => UpdateKind::RepairStatus,
            "inventory_update" => UpdateKind::Inventory,
            _ => UpdateKind::UserActivity,
        }
    }
}

/// Who caused an update.
///
/// Attribution is typed rather than a best-effort string so that a missing
/// `last_modified_by` field is visible to consumers instead of silently
/// defaulting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOrigin {
    User { id: String, name: Option<String> },
    System,
}

impl UpdateOrigin {
    /// Read attribution from a record payload's conventional
    /// `last_modified_by` field.
    pub fn from_record(record: &Value) -> Self {
        Self::from_fields(record, ATTRIBUTION_ID_FIELD, ATTRIBUTION_NAME_FIELD)
    }

    /// Read attribution from a broadcast envelope's `user_id`/`user_name`
    /// fields.
    pub fn from_envelope(payload: &Value) -> Self {
        Self::from_fields(payload, "user_id", "user_name")
    }

    fn from_fields(value: &Value, id_field: &str, name_field: &str) -> Self {
        match value.get(id_field).and_then(|v| v.as_str()) {
            Some(id) if !id.is_empty() => UpdateOrigin::User {
                id: id.to_string(),
                name: value
                    .get(name_field)
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
            },
            _ => UpdateOrigin::System,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            UpdateOrigin::User { id, .. } => Some(id),
            UpdateOrigin::System => None,
        }
    }

    /// Display name for envelopes and reports; unattributed updates
    /// read as "system".
    pub fn display_name(&self) -> &str {
        match self {
            UpdateOrigin::User { name: Some(n), .. } => n,
            UpdateOrigin::User { id, name: None } => id,
            UpdateOrigin::System => "system",
        }
    }
}

/// A normalized change notification, delivered once to each registered
/// subscriber and never persisted.
#[derive(Debug, Clone)]
pub struct LiveUpdate {
    /// Locally generated id, unique per dispatch.
    pub id: String,
    pub kind: UpdateKind,
    /// The new record for inserts/updates, the old record for deletes.
    /// Opaque to this layer.
    pub data: Value,
    pub origin: UpdateOrigin,
    pub timestamp: String,
    pub table: String,
    pub record_id: String,
}

impl LiveUpdate {
    pub(crate) fn new(
        kind: UpdateKind,
        table: &str,
        record_id: &str,
        data: Value,
        origin: UpdateOrigin,
    ) -> Self {
        let timestamp = now_iso();
        Self {
            id: format!("{table}:{timestamp}:{}", new_correlation_id()),
            kind,
            data,
            origin,
            timestamp,
            table: table.to_string(),
            record_id: record_id.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

/// A single field that diverged between the cached and incoming copies
/// of a record.
#[derive(Debug, Clone, Serialize)]
pub struct FieldConflict {
    pub field: String,
    pub local: Value,
    pub remote: Value,
    pub timestamp: String,
    pub user_id: String,
}

/// Per-record divergence report.
///
/// The collaboration layer only detects and reports; it never resolves.
/// Callers own the resolution policy (the console prompts the user,
/// defaulting to the remote copy).
#[derive(Debug, Clone, Serialize)]
pub struct ConflictReport {
    pub record_id: String,
    pub table: String,
    pub conflicts: Vec<FieldConflict>,
}
