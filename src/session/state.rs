use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{capture::SessionAggregate, device::DeviceSlot};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    #[default]
    Idle,
    Active,
    /// Transient: a `turn_off` is waiting for the loop to stop.
    Terminating,
}

/// What `query_status` reports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub active: bool,
    pub remaining_seconds: u64,
    pub session_id: Option<String>,
    pub last_detection_summary: Option<String>,
}

/// The controller's single piece of shared mutable state, guarded by one mutex.
///
/// `epoch` only ever grows; a capture loop remembers the epoch it was spawned for
/// and must see `is_current(epoch)` before it touches anything here.
#[derive(Default)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub epoch: u64,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub target: Duration,
    pub deadline: Option<Instant>,
    pub device: Option<Arc<DeviceSlot>>,
    pub cancel_token: Option<CancellationToken>,
    pub loop_handle: Option<JoinHandle<()>>,
    pub aggregate: SessionAggregate,
    pub frame_count: u64,
    /// Survives the session so status can show what the last one saw.
    pub last_summary: Option<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.phase == SessionPhase::Active && self.epoch == epoch
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        match (self.phase, self.deadline) {
            (SessionPhase::Active, Some(deadline)) => deadline.saturating_duration_since(now),
            _ => Duration::ZERO,
        }
    }

    /// Remaining time rounded up to whole seconds.
    pub fn remaining_secs(&self, now: Instant) -> u64 {
        let remaining = self.remaining(now);
        let secs = remaining.as_secs();
        if remaining.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }

    pub fn status(&self, now: Instant) -> SessionStatus {
        SessionStatus {
            active: self.phase == SessionPhase::Active,
            remaining_seconds: self.remaining_secs(now),
            session_id: self.session_id.clone(),
            last_detection_summary: self.last_summary.clone(),
        }
    }

    /// Moves `Idle -> Active` and returns the new session's epoch.
    pub fn begin_session(
        &mut self,
        session_id: String,
        target: Duration,
        deadline: Instant,
        device: Arc<DeviceSlot>,
        cancel_token: CancellationToken,
        started_at: DateTime<Utc>,
    ) -> u64 {
        let epoch = self.epoch + 1;
        *self = Self {
            phase: SessionPhase::Active,
            epoch,
            session_id: Some(session_id),
            started_at: Some(started_at),
            target,
            deadline: Some(deadline),
            device: Some(device),
            cancel_token: Some(cancel_token),
            loop_handle: None,
            aggregate: SessionAggregate::new(),
            frame_count: 0,
            last_summary: None,
        };
        epoch
    }

    /// Back to `Idle`, keeping the epoch counter and the last summary.
    pub fn finish(&mut self) {
        let epoch = self.epoch;
        let last_summary = self.last_summary.take();
        *self = Self {
            epoch,
            last_summary,
            ..Self::default()
        };
    }
}
