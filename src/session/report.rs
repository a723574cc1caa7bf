use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capture::DetectionRecord;

/// Why a session left the `Active` state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
    /// The capture loop reached the deadline.
    Expired,
    /// `turn_off` was called.
    Stopped,
    /// The device stopped delivering frames.
    CaptureFailed,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Expired => "Expired",
            EndReason::Stopped => "Stopped",
            EndReason::CaptureFailed => "CaptureFailed",
        }
    }
}

/// Everything written for a session when it ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub session_id: String,
    pub device_id: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub end_reason: EndReason,
    pub target_ms: u64,
    pub frame_count: u64,
    pub detections: Vec<DetectionRecord>,
}

/// Durable destination for session aggregates. Called at most once per session.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn flush(&self, report: SessionReport) -> Result<()>;
}
