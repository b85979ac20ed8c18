//! Health probes against the provider's `/list` endpoint.
use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::Value;

use crate::{charts::ChartListItem, error::ProbeFailure};

/// Outcome of one probe: the chart list on success.
pub type PollResult = Result<Vec<ChartListItem>, ProbeFailure>;

/// Something that can be asked whether the provider is healthy.
pub trait HealthProbe: Send {
    fn probe(&self) -> PollResult;
}

/// Validates a `/list` response body.
///
/// Requires a top-level `"status": "OK"` and an `items` array of objects.
pub fn parse_payload(body: &[u8]) -> PollResult {
    let payload: Value = serde_json::from_slice(body)?;

    match payload.get("status") {
        Some(Value::String(status)) if status == "OK" => {}
        Some(Value::String(status)) => return Err(ProbeFailure::NotOk(Some(status.clone()))),
        Some(other) => return Err(ProbeFailure::NotOk(Some(other.to_string()))),
        None => return Err(ProbeFailure::NotOk(None)),
    }

    let Some(Value::Array(items)) = payload.get("items") else {
        return Err(ProbeFailure::MissingItems);
    };

    items
        .iter()
        .map(|item| match item {
            Value::Object(map) => Ok(map.clone()),
            _ => Err(ProbeFailure::MissingItems),
        })
        .collect()
}

/// Probes the provider over HTTP with a bounded timeout.
pub struct HttpProbe {
    client: Client,
    url: String,
}

impl HttpProbe {
    /// Creates a probe for `url`; `timeout` bounds the whole request.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl HealthProbe for HttpProbe {
    fn probe(&self) -> PollResult {
        let transport = |err: reqwest::Error| ProbeFailure::Transport {
            url: self.url.clone(),
            message: err.to_string(),
        };

        let response = self.client.get(&self.url).send().map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProbeFailure::HttpStatus(status.as_u16()));
        }
        let body = response.bytes().map_err(transport)?;
        parse_payload(&body)
    }
}
