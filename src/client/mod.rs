//! Prediction clients.
//!
//! A client sends one still per cycle to a classifier and reports one of:
//! - `FetchOutcome::Predictions`: the endpoint answered 2xx with a prediction set
//!   (possibly empty);
//! - `FetchOutcome::Rejected`: the endpoint answered with a non-2xx status,
//!   meaning "no data this cycle";
//! - `Err(_)`: transport or decoding failure.
//!
//! Implementations:
//! - `HttpPredictionClient`: multipart POST to an HTTP(S) `/predict` endpoint
//! - `StubPredictionClient`: in-process classifier for `stub://` endpoints

pub mod http;
pub mod stub;

use anyhow::{anyhow, Result};

use crate::config::EndpointSettings;
use crate::frame::StillImage;
use crate::prediction::PredictionSet;

pub use http::HttpPredictionClient;
pub use stub::StubPredictionClient;

/// What a single prediction request produced.
#[derive(Clone, Debug, PartialEq)]
pub enum FetchOutcome {
    Predictions(PredictionSet),
    Rejected { status: u16 },
}

/// Sends stills to a classifier.
pub trait PredictionClient: Send + Sync {
    /// Client identifier for logs.
    fn name(&self) -> &str;

    /// Classify one still.
    fn predict(&self, still: &StillImage) -> Result<FetchOutcome>;
}

/// Build the client for `settings.url`.
pub fn client_for_endpoint(settings: &EndpointSettings) -> Result<Box<dyn PredictionClient>> {
    let url = url::Url::parse(&settings.url)
        .map_err(|e| anyhow!("invalid endpoint url {}: {}", settings.url, e))?;
    match url.scheme() {
        "http" | "https" => Ok(Box::new(HttpPredictionClient::new(
            settings.url.clone(),
            settings.timeout,
        ))),
        "stub" => Ok(Box::new(StubPredictionClient::new(&settings.url))),
        other => Err(anyhow!(
            "unsupported endpoint scheme '{}'; expected http(s) or stub",
            other
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn endpoint_scheme_selects_client() -> Result<()> {
        let http = client_for_endpoint(&EndpointSettings::default())?;
        assert_eq!(http.name(), "http");

        let stub = client_for_endpoint(&EndpointSettings {
            url: "stub://imagenet".to_string(),
            timeout: Duration::from_secs(1),
        })?;
        assert_eq!(stub.name(), "stub");

        assert!(client_for_endpoint(&EndpointSettings {
            url: "udp://127.0.0.1:9".to_string(),
            timeout: Duration::from_secs(1),
        })
        .is_err());
        Ok(())
    }
}
