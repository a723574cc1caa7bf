#![allow(dead_code)]

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;

use camwatch_lib::{
    capture::FrameSink,
    config::SessionConfig,
    detector::{Detection, Detector},
    device::{CaptureFormat, DeviceHandle, DeviceProvider, Frame},
    session::{PersistenceSink, SessionController, SessionReport, SessionStatus},
};

pub const FAKE_DEVICE_ID: &str = "fake:0";

/// Millisecond-scale knobs so tests finish quickly.
pub fn test_config(interval_ms: u64) -> SessionConfig {
    SessionConfig {
        min_duration: Duration::from_millis(50),
        max_duration: Duration::from_secs(5),
        capture_interval: Duration::from_millis(interval_ms),
        poll_resolution: Duration::from_millis(10),
        stop_timeout: Duration::from_millis(500),
        format: CaptureFormat {
            width: 2,
            height: 2,
            fps: 30,
        },
        device_id: None,
        tracked_labels: Vec::new(),
        min_confidence: 0.0,
    }
}

#[derive(Default)]
struct DeviceCounters {
    fail_open: AtomicBool,
    opened: AtomicUsize,
    closed: AtomicUsize,
    reads: AtomicUsize,
    /// Set if a handle is closed while a read on it is running, or read after close.
    violation: AtomicBool,
    read_delay_ms: AtomicUsize,
    /// Only the first handle opened sleeps this long on each read.
    first_handle_delay_ms: AtomicUsize,
    /// Reads fail once a handle has served this many frames (0 = never).
    fail_after: AtomicUsize,
}

/// Hands out 2x2 frames whose first byte is the index of the handle that read them.
#[derive(Clone, Default)]
pub struct FakeDevices {
    counters: Arc<DeviceCounters>,
}

impl FakeDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.counters.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn set_read_delay(&self, delay: Duration) {
        self.counters
            .read_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn set_first_handle_delay(&self, delay: Duration) {
        self.counters
            .first_handle_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn set_fail_after(&self, reads: usize) {
        self.counters.fail_after.store(reads, Ordering::SeqCst);
    }

    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.counters.reads.load(Ordering::SeqCst)
    }

    pub fn saw_violation(&self) -> bool {
        self.counters.violation.load(Ordering::SeqCst)
    }
}

impl DeviceProvider for FakeDevices {
    fn scan(&self) -> Option<String> {
        Some(FAKE_DEVICE_ID.to_string())
    }

    fn open(&self, device_id: &str, format: CaptureFormat) -> Result<Box<dyn DeviceHandle>> {
        if self.counters.fail_open.load(Ordering::SeqCst) {
            bail!("device {device_id} is busy");
        }
        let index = self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeHandle {
            index,
            format,
            served: 0,
            reading: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct FakeHandle {
    index: usize,
    format: CaptureFormat,
    served: usize,
    reading: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    counters: Arc<DeviceCounters>,
}

impl DeviceHandle for FakeHandle {
    fn read(&mut self) -> Result<Frame> {
        if self.closed.load(Ordering::SeqCst) {
            self.counters.violation.store(true, Ordering::SeqCst);
            bail!("read after close");
        }
        self.reading.store(true, Ordering::SeqCst);

        let mut delay = self.counters.read_delay_ms.load(Ordering::SeqCst);
        if self.index == 0 {
            delay = delay.max(self.counters.first_handle_delay_ms.load(Ordering::SeqCst));
        }
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay as u64));
        }

        let fail_after = self.counters.fail_after.load(Ordering::SeqCst);
        let result = if fail_after > 0 && self.served >= fail_after {
            Err(anyhow::anyhow!("camera unplugged"))
        } else {
            self.served += 1;
            self.counters.reads.fetch_add(1, Ordering::SeqCst);
            let len = (self.format.width * self.format.height * 3) as usize;
            let mut pixels = vec![0u8; len];
            pixels[0] = self.index as u8;
            Ok(Frame {
                width: self.format.width,
                height: self.format.height,
                pixels,
                captured_at: Utc::now(),
            })
        };

        self.reading.store(false, Ordering::SeqCst);
        result
    }

    fn close(self: Box<Self>) {
        if self.reading.load(Ordering::SeqCst) {
            self.counters.violation.store(true, Ordering::SeqCst);
        }
        self.closed.store(true, Ordering::SeqCst);
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Returns queued results in order, then nothing.
#[derive(Default)]
pub struct ScriptedDetector {
    script: Mutex<VecDeque<Result<Vec<Detection>>>>,
    calls: AtomicUsize,
}

impl ScriptedDetector {
    pub fn new(script: Vec<Vec<(&str, f32)>>) -> Self {
        let script = script
            .into_iter()
            .map(|frame| {
                Ok(frame
                    .into_iter()
                    .map(|(label, confidence)| Detection::new(label, confidence))
                    .collect())
            })
            .collect();
        Self {
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push_failure(&self, message: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(anyhow::anyhow!(message.to_string())));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Detector for ScriptedDetector {
    async fn infer(&self, _frame: &Frame) -> Result<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Labels every frame `cam<handle index>`, so a report shows which device fed it.
pub struct DeviceLabelDetector;

#[async_trait]
impl Detector for DeviceLabelDetector {
    async fn infer(&self, frame: &Frame) -> Result<Vec<Detection>> {
        Ok(vec![Detection::new(format!("cam{}", frame.pixels[0]), 0.5)])
    }
}

/// Takes `delay` per frame before reporting `label`, like an overloaded model server.
pub struct SlowDetector {
    pub delay: Duration,
    pub label: &'static str,
}

#[async_trait]
impl Detector for SlowDetector {
    async fn infer(&self, _frame: &Frame) -> Result<Vec<Detection>> {
        tokio::time::sleep(self.delay).await;
        Ok(vec![Detection::new(self.label, 0.9)])
    }
}

#[derive(Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<SessionReport>>,
    fail: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn reports(&self) -> Vec<SessionReport> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl PersistenceSink for RecordingSink {
    async fn flush(&self, report: SessionReport) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("disk full");
        }
        self.reports.lock().unwrap().push(report);
        Ok(())
    }
}

/// Counts saves instead of writing files.
#[derive(Default)]
pub struct CountingFrames {
    saved: AtomicUsize,
    named: AtomicUsize,
}

impl CountingFrames {
    pub fn saved(&self) -> usize {
        self.saved.load(Ordering::SeqCst)
    }
}

impl FrameSink for CountingFrames {
    fn next_name(&self) -> PathBuf {
        let seq = self.named.fetch_add(1, Ordering::SeqCst);
        PathBuf::from(format!("frame_{seq:06}.jpg"))
    }

    fn save(&self, _frame: &Frame, _path: &Path) -> Result<()> {
        self.saved.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct Harness {
    pub controller: SessionController,
    pub devices: FakeDevices,
    pub sink: Arc<RecordingSink>,
    pub frames: Arc<CountingFrames>,
}

pub fn harness(config: SessionConfig, detector: Arc<dyn Detector>) -> Harness {
    let devices = FakeDevices::new();
    let sink = Arc::new(RecordingSink::new());
    let frames = Arc::new(CountingFrames::default());
    let controller = SessionController::new(
        config,
        Arc::new(devices.clone()),
        detector,
        frames.clone(),
        sink.clone(),
    );
    Harness {
        controller,
        devices,
        sink,
        frames,
    }
}

/// Polls until the controller reports no active session.
pub async fn wait_until_idle(controller: &SessionController, within: Duration) -> SessionStatus {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let status = controller.query_status().await;
        if !status.active || tokio::time::Instant::now() >= deadline {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
