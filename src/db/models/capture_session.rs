//! Rows read back from the `capture_sessions` and `detected_objects` tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::EndReason;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredDetection {
    pub label: String,
    pub confidence: f32,
    pub observed_at: DateTime<Utc>,
}

/// A finished session together with its best detections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSessionRecord {
    pub id: String,
    pub device_id: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub end_reason: EndReason,
    pub target_ms: u64,
    pub frame_count: u64,
    pub detections: Vec<StoredDetection>,
}
