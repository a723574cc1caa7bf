use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use log::{error, info, warn};
use serde::Serialize;
use tokio::{sync::Mutex, time::Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    capture::{capture_loop, FrameSink, LoopContext},
    config::SessionConfig,
    detector::Detector,
    device::{DeviceProvider, DeviceSlot},
};

use super::{EndReason, PersistenceSink, SessionPhase, SessionReport, SessionState, SessionStatus};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("duration {requested:?} outside allowed range {min:?}..={max:?}")]
    InvalidDuration {
        requested: Duration,
        min: Duration,
        max: Duration,
    },
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("session already active ({remaining_seconds}s remaining)")]
    AlreadyActive { remaining_seconds: u64 },
}

impl SessionError {
    pub fn reason(&self) -> &'static str {
        match self {
            SessionError::InvalidDuration { .. } => "InvalidDuration",
            SessionError::DeviceUnavailable(_) => "DeviceUnavailable",
            SessionError::AlreadyActive { .. } => "AlreadyActive",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TurnOnAccepted {
    pub session_id: String,
    pub duration_seconds: u64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TurnOffOutcome {
    pub already_off: bool,
    /// The loop ignored cancellation for longer than the stop timeout; the device was
    /// released regardless.
    pub stop_timed_out: bool,
}

/// State and collaborators shared by the controller and its capture loops.
pub(crate) struct SessionShared {
    pub(crate) state: Mutex<SessionState>,
    pub(crate) config: SessionConfig,
    pub(crate) detector: Arc<dyn Detector>,
    pub(crate) frames: Arc<dyn FrameSink>,
    devices: Arc<dyn DeviceProvider>,
    sink: Arc<dyn PersistenceSink>,
}

/// Arbitrates the single camera between on/off commands and the capture loop.
#[derive(Clone)]
pub struct SessionController {
    shared: Arc<SessionShared>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        devices: Arc<dyn DeviceProvider>,
        detector: Arc<dyn Detector>,
        frames: Arc<dyn FrameSink>,
        sink: Arc<dyn PersistenceSink>,
    ) -> Self {
        Self {
            shared: Arc::new(SessionShared {
                state: Mutex::new(SessionState::new()),
                config,
                detector,
                frames,
                devices,
                sink,
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub async fn query_status(&self) -> SessionStatus {
        let state = self.shared.state.lock().await;
        state.status(Instant::now())
    }

    /// Starts a session. A call while a session is running is informational only: it
    /// reports the remaining time and leaves the deadline alone.
    pub async fn turn_on(&self, duration: Duration) -> Result<TurnOnAccepted, SessionError> {
        let config = &self.shared.config;
        if duration < config.min_duration || duration > config.max_duration {
            warn!(
                "Rejected turn on for {:?}; allowed {:?}..={:?}",
                duration, config.min_duration, config.max_duration
            );
            return Err(self.invalid_duration(duration));
        }

        if Instant::now().checked_add(duration).is_none() {
            warn!("Rejected turn on for {:?}; deadline not representable", duration);
            return Err(self.invalid_duration(duration));
        }

        let mut state = self.shared.state.lock().await;
        if state.phase != SessionPhase::Idle {
            let remaining_seconds = state.remaining_secs(Instant::now());
            info!("Turn on ignored; session active with {remaining_seconds}s remaining");
            return Err(SessionError::AlreadyActive { remaining_seconds });
        }

        let slot = self.shared.acquire_device().await.map_err(|err| {
            error!("Failed to acquire capture device: {err:#}");
            SessionError::DeviceUnavailable(format!("{err:#}"))
        })?;
        let device_id = slot.device_id().to_string();
        let slot = Arc::new(slot);

        let Some(deadline) = Instant::now().checked_add(duration) else {
            let abandoned = Arc::clone(&slot);
            if let Err(err) = tokio::task::spawn_blocking(move || abandoned.release()).await {
                error!("Device release worker for {device_id} failed: {err}");
            }
            return Err(self.invalid_duration(duration));
        };

        let session_id = Uuid::new_v4().to_string();
        let cancel_token = CancellationToken::new();
        let epoch = state.begin_session(
            session_id.clone(),
            duration,
            deadline,
            Arc::clone(&slot),
            cancel_token.clone(),
            Utc::now(),
        );

        let context = LoopContext {
            epoch,
            session_id: session_id.clone(),
            deadline,
            device: slot,
            cancel_token,
        };
        state.loop_handle = Some(tokio::spawn(capture_loop(
            Arc::clone(&self.shared),
            context,
        )));

        info!(
            "Session {} started on {} for {:?} (epoch {})",
            session_id, device_id, duration, epoch
        );

        Ok(TurnOnAccepted {
            session_id,
            duration_seconds: duration.as_secs(),
        })
    }

    fn invalid_duration(&self, requested: Duration) -> SessionError {
        SessionError::InvalidDuration {
            requested,
            min: self.shared.config.min_duration,
            max: self.shared.config.max_duration,
        }
    }

    /// Stops the running session, if any. Never fails; a loop that does not stop in
    /// time is reported through `stop_timed_out`.
    pub async fn turn_off(&self) -> TurnOffOutcome {
        let (epoch, cancel_token, loop_handle) = {
            let mut state = self.shared.state.lock().await;
            match state.phase {
                SessionPhase::Idle => {
                    return TurnOffOutcome {
                        already_off: true,
                        stop_timed_out: false,
                    };
                }
                SessionPhase::Terminating => {
                    info!("Turn off already in progress for epoch {}", state.epoch);
                    return TurnOffOutcome {
                        already_off: true,
                        stop_timed_out: false,
                    };
                }
                SessionPhase::Active => {
                    state.phase = SessionPhase::Terminating;
                    (
                        state.epoch,
                        state.cancel_token.take(),
                        state.loop_handle.take(),
                    )
                }
            }
        };

        if let Some(token) = cancel_token {
            token.cancel();
        }

        // The lock is not held here: the loop may need it once more to notice it lost.
        let mut stop_timed_out = false;
        if let Some(handle) = loop_handle {
            match tokio::time::timeout(self.shared.config.stop_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    error!("Capture loop for epoch {epoch} ended abnormally: {join_err}");
                }
                Err(_) => {
                    warn!(
                        "Capture loop for epoch {} did not stop within {:?}; tearing down anyway",
                        epoch, self.shared.config.stop_timeout
                    );
                    stop_timed_out = true;
                }
            }
        }

        let mut state = self.shared.state.lock().await;
        if state.epoch != epoch || state.phase != SessionPhase::Terminating {
            // Only this caller moves a Terminating session on; reaching here means a bug.
            error!(
                "Session epoch {} changed while stopping (now epoch {}, {:?})",
                epoch, state.epoch, state.phase
            );
            return TurnOffOutcome {
                already_off: true,
                stop_timed_out,
            };
        }

        self.shared
            .conclude(&mut state, EndReason::Stopped, !stop_timed_out)
            .await;

        TurnOffOutcome {
            already_off: false,
            stop_timed_out,
        }
    }
}

impl SessionShared {
    async fn acquire_device(&self) -> Result<DeviceSlot> {
        let device_id = match &self.config.device_id {
            Some(id) => id.clone(),
            None => self
                .devices
                .scan()
                .ok_or_else(|| anyhow!("no capture device found"))?,
        };

        let devices = Arc::clone(&self.devices);
        let format = self.config.format;
        let id_for_open = device_id.clone();
        let handle = tokio::task::spawn_blocking(move || devices.open(&id_for_open, format))
            .await
            .context("device open worker join failed")?
            .with_context(|| format!("failed to open device {device_id}"))?;

        Ok(DeviceSlot::new(device_id, handle))
    }

    /// Termination path taken by the capture loop itself (deadline or dead camera).
    /// Returns `false` when the loop lost the race to `turn_off` or belongs to an
    /// older session.
    pub(crate) async fn conclude_if_current(&self, epoch: u64, reason: EndReason) -> bool {
        let mut state = self.state.lock().await;
        if !state.is_current(epoch) {
            return false;
        }

        state.phase = SessionPhase::Terminating;
        state.cancel_token = None;
        // Dropping our own handle detaches it; the task is about to return.
        state.loop_handle = None;
        self.conclude(&mut state, reason, true).await;
        true
    }

    /// Releases the device, flushes the aggregate once and returns to `Idle`. Only
    /// the party that moved the session out of `Active` calls this, with the lock held.
    async fn conclude(&self, state: &mut SessionState, reason: EndReason, wait_for_release: bool) {
        let mut device_id = String::new();
        if let Some(slot) = state.device.take() {
            device_id = slot.device_id().to_string();
            let release = tokio::task::spawn_blocking(move || slot.release());
            if wait_for_release {
                match release.await {
                    Ok(true) => info!("Released device {device_id}"),
                    Ok(false) => warn!("Device {device_id} was already released"),
                    Err(err) => error!("Device release worker for {device_id} failed: {err}"),
                }
            } else {
                warn!("Device {device_id} release deferred until its in-flight read returns");
            }
        }

        state.last_summary = state.aggregate.summary();
        let detections = state.aggregate.drain_records();
        let detection_count = detections.len();
        let report = SessionReport {
            session_id: state.session_id.clone().unwrap_or_default(),
            device_id,
            started_at: state.started_at.unwrap_or_else(Utc::now),
            stopped_at: Utc::now(),
            end_reason: reason,
            target_ms: state.target.as_millis() as u64,
            frame_count: state.frame_count,
            detections,
        };
        let session_id = report.session_id.clone();

        match tokio::time::timeout(FLUSH_TIMEOUT, self.sink.flush(report)).await {
            Ok(Ok(())) => info!(
                "Session {} ended ({}); flushed {} detections",
                session_id,
                reason.as_str(),
                detection_count
            ),
            Ok(Err(err)) => error!(
                "Flush for session {} failed; {} detections lost: {err:#}",
                session_id, detection_count
            ),
            Err(_) => error!(
                "Flush for session {} timed out after {:?}; {} detections lost",
                session_id, FLUSH_TIMEOUT, detection_count
            ),
        }

        state.finish();
    }
}
