pub mod capture_session;

pub use capture_session::{CaptureSessionRecord, StoredDetection};
