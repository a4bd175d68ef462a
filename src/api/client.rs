use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::types::ApiRequest;
use crate::config::Config;
use crate::worker::{SCRIPT_CONTENT_TYPE, SERVICE_WORKER_ALLOWED_HEADER};

/// Transport-level failures, classified for the replay policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
  #[error("connection failed: {0}")]
  Connect(String),
  #[error("request timed out")]
  Timeout,
  #[error("server returned {status}: {body}")]
  Status { status: u16, body: String },
  #[error("invalid response body: {0}")]
  Decode(String),
  #[error("invalid request url: {0}")]
  Url(String),
}

impl TransportError {
  /// The server could not be reached at all.
  pub fn is_connectivity(&self) -> bool {
    matches!(self, TransportError::Connect(_) | TransportError::Timeout)
  }

  /// Worth sending again later. Other 4xx answers will never succeed as-is.
  pub fn is_retryable(&self) -> bool {
    match self {
      TransportError::Connect(_) | TransportError::Timeout => true,
      TransportError::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
      TransportError::Decode(_) | TransportError::Url(_) => false,
    }
  }

  fn from_reqwest(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      TransportError::Timeout
    } else if e.is_builder() {
      TransportError::Url(e.to_string())
    } else if e.is_decode() {
      TransportError::Decode(e.to_string())
    } else {
      TransportError::Connect(e.to_string())
    }
  }
}

/// The network side of the worker. `ApiClient` in production, fakes in tests.
pub trait Transport: Send + Sync + 'static {
  /// Send a JSON request to the business API.
  fn send(&self, request: &ApiRequest) -> impl Future<Output = Result<Value, TransportError>> + Send;

  /// Fetch raw bytes from a path relative to the API origin (worker script).
  fn fetch_bytes(&self, path: &str) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;
}

/// REST client that attaches the bearer token and forwards JSON.
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: Url,
  token: String,
}

impl ApiClient {
  pub fn new(config: &Config) -> color_eyre::Result<Self> {
    let token = Config::get_api_token()?;
    Self::with_token(config, token)
  }

  pub fn with_token(config: &Config, token: String) -> color_eyre::Result<Self> {
    let mut base = config.api.base_url.clone();
    if !base.ends_with('/') {
      base.push('/');
    }
    let base_url = Url::parse(&base)
      .map_err(|e| color_eyre::eyre::eyre!("Invalid api.base_url '{}': {}", base, e))?;

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.api.request_timeout_secs))
      .build()
      .map_err(|e| color_eyre::eyre::eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      token,
    })
  }

  /// API paths are relative to the base URL, with or without a leading slash.
  fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
    self
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|e| TransportError::Url(e.to_string()))
  }

  /// Absolute paths resolve against the origin, as the worker script does.
  fn origin_url(&self, path: &str) -> Result<Url, TransportError> {
    self
      .base_url
      .join(path)
      .map_err(|e| TransportError::Url(e.to_string()))
  }
}

impl Transport for ApiClient {
  async fn send(&self, request: &ApiRequest) -> Result<Value, TransportError> {
    let url = self.endpoint(&request.path)?;

    let mut builder = self
      .http
      .request(request.method.into(), url)
      .bearer_auth(&self.token)
      .header(ACCEPT, "application/json");
    if let Some(key) = &request.idempotency_key {
      builder = builder.header("Idempotency-Key", key);
    }
    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let response = builder.send().await.map_err(TransportError::from_reqwest)?;
    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(TransportError::Status {
        status: status.as_u16(),
        body,
      });
    }

    let bytes = response.bytes().await.map_err(TransportError::from_reqwest)?;
    Ok(decode_success_body(&bytes))
  }

  async fn fetch_bytes(&self, path: &str) -> Result<Vec<u8>, TransportError> {
    let url = self.origin_url(path)?;
    let response = self
      .http
      .get(url)
      .header(ACCEPT, SCRIPT_CONTENT_TYPE)
      .send()
      .await
      .map_err(TransportError::from_reqwest)?;

    let status = response.status();
    if !status.is_success() {
      return Err(TransportError::Status {
        status: status.as_u16(),
        body: String::new(),
      });
    }

    let headers = response.headers();
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    if !content_type.is_some_and(|ct| ct.starts_with(SCRIPT_CONTENT_TYPE)) {
      tracing::warn!(?content_type, "worker script served with unexpected content type");
    }
    if let Some(allowed) = headers.get(SERVICE_WORKER_ALLOWED_HEADER) {
      tracing::trace!(?allowed, "worker script scope header");
    }

    let bytes = response.bytes().await.map_err(TransportError::from_reqwest)?;
    Ok(bytes.to_vec())
  }
}

/// A 2xx answer is a confirmed success whatever its body looks like.
fn decode_success_body(bytes: &[u8]) -> Value {
  if bytes.is_empty() {
    return Value::Null;
  }
  match serde_json::from_slice(bytes) {
    Ok(value) => value,
    Err(e) => {
      tracing::debug!(error = %e, "success response is not json, keeping it as text");
      Value::String(String::from_utf8_lossy(bytes).into_owned())
    }
  }
}
