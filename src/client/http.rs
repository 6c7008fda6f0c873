//! HTTP prediction client.
//!
//! Sends `POST <endpoint>` with a `multipart/form-data` body holding a single
//! `image` field (the JPEG still) and expects `{"predictions": [...]}` back.
//! Any non-2xx status is reported as `FetchOutcome::Rejected`.

use anyhow::{anyhow, Context, Result};
use rand::RngCore;
use std::io::Read;
use std::time::Duration;

use super::{FetchOutcome, PredictionClient};
use crate::frame::StillImage;
use crate::prediction::PredictResponse;

const MAX_RESPONSE_BYTES: u64 = 1024 * 1024;
const IMAGE_FIELD: &str = "image";
const IMAGE_FILENAME: &str = "frame.jpg";

/// Multipart POST client for a `/predict` endpoint.
pub struct HttpPredictionClient {
    url: String,
    agent: ureq::Agent,
}

impl HttpPredictionClient {
    pub fn new(url: String, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { url, agent }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl PredictionClient for HttpPredictionClient {
    fn name(&self) -> &str {
        "http"
    }

    fn predict(&self, still: &StillImage) -> Result<FetchOutcome> {
        let body =
            MultipartBody::single_file(IMAGE_FIELD, IMAGE_FILENAME, "image/jpeg", &still.jpeg);
        log::debug!(
            "posting frame {} ({} bytes) to {}",
            still.sequence,
            still.byte_len(),
            self.url
        );
        let result = self
            .agent
            .post(&self.url)
            .set("Content-Type", &body.content_type())
            .send_bytes(&body.bytes);

        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(status, _)) => {
                return Ok(FetchOutcome::Rejected { status });
            }
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("post frame {} to {}", still.sequence, self.url)));
            }
        };

        let status = response.status();
        if !(200..300).contains(&status) {
            return Ok(FetchOutcome::Rejected { status });
        }

        let mut raw = String::new();
        response
            .into_reader()
            .take(MAX_RESPONSE_BYTES)
            .read_to_string(&mut raw)
            .with_context(|| format!("read prediction response from {}", self.url))?;
        let parsed: PredictResponse = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid prediction response from {}: {}", self.url, e))?;
        Ok(FetchOutcome::Predictions(parsed.predictions))
    }
}

/// Hand-built `multipart/form-data` payload.
pub(crate) struct MultipartBody {
    boundary: String,
    pub(crate) bytes: Vec<u8>,
}

impl MultipartBody {
    pub(crate) fn single_file(field: &str, filename: &str, mime: &str, data: &[u8]) -> Self {
        let mut nonce = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce);
        let boundary = format!("----frame-ranker-{}", hex::encode(nonce));

        let mut bytes = Vec::with_capacity(data.len() + 256);
        bytes.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        bytes.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                field, filename
            )
            .as_bytes(),
        );
        bytes.extend_from_slice(format!("Content-Type: {}\r\n\r\n", mime).as_bytes());
        bytes.extend_from_slice(data);
        bytes.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

        Self { boundary, bytes }
    }

    pub(crate) fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multipart_body_wraps_single_field() {
        let body = MultipartBody::single_file(
            "image",
            "frame.jpg",
            "image/jpeg",
            b"\xFF\xD8jpeg\xFF\xD9",
        );
        let text = String::from_utf8_lossy(&body.bytes);
        let boundary = body
            .content_type()
            .split("boundary=")
            .nth(1)
            .map(str::to_string)
            .unwrap_or_default();

        assert!(boundary.starts_with("----frame-ranker-"));
        assert!(text.starts_with(&format!("--{}\r\n", boundary)));
        assert!(text.contains("name=\"image\"; filename=\"frame.jpg\""));
        assert!(text.contains("Content-Type: image/jpeg\r\n\r\n"));
        assert!(text.ends_with(&format!("\r\n--{}--\r\n", boundary)));
        assert_eq!(text.matches(&format!("--{}", boundary)).count(), 2);
    }

    #[test]
    fn boundaries_differ_per_body() {
        let a = MultipartBody::single_file("image", "a.jpg", "image/jpeg", b"a");
        let b = MultipartBody::single_file("image", "b.jpg", "image/jpeg", b"b");
        assert_ne!(a.content_type(), b.content_type());
    }
}
