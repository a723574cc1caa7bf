//! Client for a remote inference service.
//!
//! The frame is JPEG-encoded and posted as multipart form data (`image` part plus a
//! `captured_at` field). The service answers with
//! `{"detections": [{"label": "person", "confidence": 0.91}, ...]}`; `conf` is
//! accepted as an alias for `confidence`.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use super::{Detection, Detector};
use crate::device::Frame;

pub struct HttpDetector {
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct InferResponse {
    #[serde(default)]
    detections: Vec<Detection>,
}

impl HttpDetector {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build inference HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn infer(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let jpeg = frame.encode_jpeg()?;
        let part = Part::bytes(jpeg)
            .file_name("frame.jpg")
            .mime_str("image/jpeg")
            .context("invalid image mime type")?;
        let form = Form::new()
            .part("image", part)
            .text("captured_at", frame.captured_at.to_rfc3339());

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("inference request to {} failed", self.url))?
            .error_for_status()
            .context("inference service returned an error status")?;

        let body: InferResponse = response
            .json()
            .await
            .context("failed to decode inference response")?;
        Ok(body.detections)
    }
}
