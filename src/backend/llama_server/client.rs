//! HTTP client for a single `llama-server` instance.
//!
//! Two [`ureq::Agent`]s share the base URL: a short-timeout one for `/health`
//! probes during start-up and one bounded by the request timeout for
//! `/completion`. Both keep non-2xx responses as responses so the server's
//! error body can be surfaced.

use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use ureq::Agent;

pub(crate) const HOST: &str = "127.0.0.1";

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("remote error {code}: {message}")]
    Remote { code: u16, message: String },

    #[error("invalid response: {0}")]
    Decode(String),
}

/// `/health` as seen during start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Ready,
    /// HTTP 503: weights are still being mapped.
    Loading,
    /// Not listening yet, or answering with something unexpected.
    Unavailable(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest<'a> {
    pub prompt: &'a str,
    pub n_predict: u32,
    pub temperature: f32,
    pub stop: &'a [String],
    pub cache_prompt: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CompletionResponse {
    pub content: String,
    pub tokens_predicted: u32,
    pub stopped_limit: bool,
    pub stop_type: Option<String>,
}

impl CompletionResponse {
    /// Older servers report `stopped_limit`, newer ones `stop_type: "limit"`.
    pub fn hit_token_limit(&self) -> bool {
        self.stopped_limit || self.stop_type.as_deref() == Some("limit")
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

#[derive(Debug, Clone)]
pub struct ServerClient {
    agent: Agent,
    probe: Agent,
    base_url: String,
    request_timeout: Duration,
}

impl ServerClient {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            agent: agent(request_timeout),
            probe: agent(PROBE_TIMEOUT.min(request_timeout)),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn health(&self) -> HealthStatus {
        match self.probe.get(format!("{}/health", self.base_url)).call() {
            Ok(resp) => match resp.status().as_u16() {
                200 => HealthStatus::Ready,
                503 => HealthStatus::Loading,
                code => HealthStatus::Unavailable(format!("/health answered HTTP {code}")),
            },
            Err(e) => HealthStatus::Unavailable(e.to_string()),
        }
    }

    pub fn completion(
        &self,
        request: &CompletionRequest<'_>,
    ) -> Result<CompletionResponse, ClientError> {
        let mut resp = self
            .agent
            .post(format!("{}/completion", self.base_url))
            .send_json(request)
            .map_err(|e| self.map_transport(e))?;

        let code = resp.status().as_u16();
        if !(200..300).contains(&code) {
            let body = resp.body_mut().read_to_string().unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or_else(|_| {
                    if body.trim().is_empty() {
                        resp.status()
                            .canonical_reason()
                            .unwrap_or("unknown error")
                            .to_string()
                    } else {
                        body.trim().to_string()
                    }
                });
            return Err(ClientError::Remote { code, message });
        }

        resp.body_mut()
            .read_json::<CompletionResponse>()
            .map_err(|e| match e {
                ureq::Error::Timeout(_) => ClientError::Timeout(self.request_timeout),
                other => ClientError::Decode(other.to_string()),
            })
    }

    fn map_transport(&self, e: ureq::Error) -> ClientError {
        match e {
            ureq::Error::Timeout(_) => ClientError::Timeout(self.request_timeout),
            ureq::Error::Io(e) => ClientError::Io(e),
            other => ClientError::Io(io::Error::new(io::ErrorKind::Other, other.to_string())),
        }
    }
}

fn agent(timeout: Duration) -> Agent {
    Agent::new_with_config(
        Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build(),
    )
}

/// Asks the OS for a free port on the loopback interface.
pub(crate) fn free_port() -> io::Result<u16> {
    let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}
