use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    detector::Detection,
    device::DeviceSlot,
    session::{controller::SessionShared, EndReason},
};

// Set to false to silence per-tick logging from this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// What a capture loop needs to know about the session it was spawned for.
pub(crate) struct LoopContext {
    pub epoch: u64,
    pub session_id: String,
    pub deadline: Instant,
    pub device: Arc<DeviceSlot>,
    pub cancel_token: CancellationToken,
}

enum CaptureStep {
    Folded,
    /// Cancelled mid-tick, or the session moved on without us.
    Abandoned,
}

pub(crate) async fn capture_loop(shared: Arc<SessionShared>, ctx: LoopContext) {
    let interval = shared.config.capture_interval;
    let poll = shared.config.poll_resolution;
    let mut next_tick = Instant::now();

    log_info!(
        "Capture loop started for session {} (epoch {}, every {:?})",
        ctx.session_id,
        ctx.epoch,
        interval
    );

    loop {
        if ctx.cancel_token.is_cancelled() {
            log_info!("Capture loop for session {} cancelled", ctx.session_id);
            break;
        }

        let now = Instant::now();
        if now >= ctx.deadline {
            if shared
                .conclude_if_current(ctx.epoch, EndReason::Expired)
                .await
            {
                log_info!("Session {} reached its deadline", ctx.session_id);
            } else {
                log_debug!(
                    "Session {} deadline passed but it was already stopped",
                    ctx.session_id
                );
            }
            break;
        }

        if now >= next_tick {
            match perform_capture(&shared, &ctx).await {
                Ok(CaptureStep::Folded) => {}
                Ok(CaptureStep::Abandoned) => {
                    log_info!("Capture loop for session {} abandoned", ctx.session_id);
                    break;
                }
                Err(err) => {
                    log_error!(
                        "Capture failed for session {}; ending it: {err:#}",
                        ctx.session_id
                    );
                    shared
                        .conclude_if_current(ctx.epoch, EndReason::CaptureFailed)
                        .await;
                    break;
                }
            }

            next_tick += interval;
            let after = Instant::now();
            if next_tick <= after {
                // Fell a whole interval behind; delay rather than burst.
                next_tick = after + interval;
            }
            continue;
        }

        let wake_at = next_tick.min(ctx.deadline);
        let nap = wake_at.saturating_duration_since(now).min(poll);
        tokio::select! {
            _ = tokio::time::sleep(nap) => {}
            _ = ctx.cancel_token.cancelled() => {}
        }
    }
}

async fn perform_capture(shared: &SessionShared, ctx: &LoopContext) -> Result<CaptureStep> {
    let capture_start = Instant::now();

    let device = Arc::clone(&ctx.device);
    let frame = tokio::task::spawn_blocking(move || device.read())
        .await
        .context("capture worker join failed")??;
    let capture_ms = capture_start.elapsed().as_millis();

    if ctx.cancel_token.is_cancelled() {
        return Ok(CaptureStep::Abandoned);
    }

    // A stop must not wait out a slow inference request.
    let detect_start = Instant::now();
    let inferred = tokio::select! {
        result = shared.detector.infer(&frame) => result,
        _ = ctx.cancel_token.cancelled() => return Ok(CaptureStep::Abandoned),
    };
    let detections = match inferred {
        Ok(detections) => detections,
        Err(err) => {
            log_warn!(
                "Detection failed for session {}; frame skipped: {err:#}",
                ctx.session_id
            );
            Vec::new()
        }
    };
    let detect_ms = detect_start.elapsed().as_millis();
    let accepted = accepted_detections(shared, detections);

    {
        let mut state = shared.state.lock().await;
        if !state.is_current(ctx.epoch) {
            return Ok(CaptureStep::Abandoned);
        }
        state.frame_count += 1;
        for detection in &accepted {
            state
                .aggregate
                .fold(&detection.label, detection.confidence, frame.captured_at);
        }
        if !accepted.is_empty() {
            state.last_summary = state.aggregate.summary();
        }
    }

    let frames = Arc::clone(&shared.frames);
    let path = frames.next_name();
    let save = tokio::task::spawn_blocking(move || frames.save(&frame, &path).map(|_| path));
    let saved = tokio::select! {
        saved = save => saved,
        // The write finishes on the blocking pool; the frame is already counted.
        _ = ctx.cancel_token.cancelled() => return Ok(CaptureStep::Abandoned),
    };
    match saved {
        Ok(Ok(path)) => log_debug!("Saved frame to {}", path.display()),
        Ok(Err(err)) => log_warn!("Failed to save frame for session {}: {err:#}", ctx.session_id),
        Err(err) => log_warn!("Frame save worker failed: {err}"),
    }

    log_debug!(
        "Tick for session {}: {} detections kept (capture {}ms, detect {}ms, total {}ms)",
        ctx.session_id,
        accepted.len(),
        capture_ms,
        detect_ms,
        capture_start.elapsed().as_millis()
    );

    Ok(CaptureStep::Folded)
}

fn accepted_detections(shared: &SessionShared, detections: Vec<Detection>) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|detection| {
            if !detection.has_valid_confidence() {
                log_warn!(
                    "Dropping detection {:?} with confidence {} outside 0..=1",
                    detection.label,
                    detection.confidence
                );
                return false;
            }
            shared
                .config
                .accepts(&detection.label, detection.confidence)
        })
        .collect()
}
