//! Object detection collaborators.

pub mod http;

pub use http::HttpDetector;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::device::Frame;

/// One labelled detection in a frame. `confidence` is expected in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    #[serde(alias = "conf")]
    pub confidence: f32,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }

    pub fn has_valid_confidence(&self) -> bool {
        self.confidence.is_finite() && (0.0..=1.0).contains(&self.confidence)
    }
}

#[async_trait]
pub trait Detector: Send + Sync {
    async fn infer(&self, frame: &Frame) -> Result<Vec<Detection>>;
}

/// Reports nothing. Used when no inference endpoint is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDetector;

#[async_trait]
impl Detector for NullDetector {
    async fn infer(&self, _frame: &Frame) -> Result<Vec<Detection>> {
        Ok(Vec::new())
    }
}
