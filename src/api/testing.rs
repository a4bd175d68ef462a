//! In-crate fake transport for unit tests.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{ApiRequest, Method, Transport, TransportError};

pub struct FakeTransport {
  online: AtomicBool,
  script_stalled: AtomicBool,
  fail_status: Mutex<Option<u16>>,
  responses: Mutex<HashMap<String, Value>>,
  script: Mutex<Vec<u8>>,
  sent: Mutex<Vec<ApiRequest>>,
}

impl FakeTransport {
  pub fn new() -> Self {
    Self {
      online: AtomicBool::new(true),
      script_stalled: AtomicBool::new(false),
      fail_status: Mutex::new(None),
      responses: Mutex::new(HashMap::new()),
      script: Mutex::new(b"self.addEventListener('fetch', () => {});".to_vec()),
      sent: Mutex::new(Vec::new()),
    }
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  /// Answer every non-health request with this status.
  pub fn fail_with(&self, status: Option<u16>) {
    *self.fail_status.lock().unwrap() = status;
  }

  pub fn respond(&self, path: &str, value: Value) {
    self
      .responses
      .lock()
      .unwrap()
      .insert(path.to_string(), value);
  }

  /// Script fetches hang until the caller gives up.
  pub fn stall_script(&self, stalled: bool) {
    self.script_stalled.store(stalled, Ordering::SeqCst);
  }

  pub fn set_script(&self, script: &[u8]) {
    *self.script.lock().unwrap() = script.to_vec();
  }

  /// Writes that reached the server.
  pub fn delivered_writes(&self) -> Vec<ApiRequest> {
    self
      .sent
      .lock()
      .unwrap()
      .iter()
      .filter(|r| r.method != Method::Get)
      .cloned()
      .collect()
  }
}

impl Transport for FakeTransport {
  async fn send(&self, request: &ApiRequest) -> Result<Value, TransportError> {
    if !self.online.load(Ordering::SeqCst) {
      return Err(TransportError::Connect("network unreachable".into()));
    }
    if request.path != "health" {
      if let Some(status) = *self.fail_status.lock().unwrap() {
        return Err(TransportError::Status {
          status,
          body: "rejected".into(),
        });
      }
    }
    self.sent.lock().unwrap().push(request.clone());

    match request.method {
      Method::Get => Ok(
        self
          .responses
          .lock()
          .unwrap()
          .get(&request.path)
          .cloned()
          .unwrap_or(Value::Null),
      ),
      _ => Ok(json!({ "ok": true })),
    }
  }

  async fn fetch_bytes(&self, _path: &str) -> Result<Vec<u8>, TransportError> {
    if !self.online.load(Ordering::SeqCst) {
      return Err(TransportError::Connect("network unreachable".into()));
    }
    if self.script_stalled.load(Ordering::SeqCst) {
      std::future::pending::<()>().await;
    }
    Ok(self.script.lock().unwrap().clone())
  }
}

/// A one-request HTTP server on localhost. Returns the base url to point an
/// `ApiClient` at; the task answers the first request with the given raw
/// status line, content type and body, then closes.
pub async fn serve_once(status_line: &str, content_type: &str, body: &str) -> String {
  use tokio::io::{AsyncReadExt, AsyncWriteExt};

  let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  let response = format!(
    "HTTP/1.1 {status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
    body.len()
  );

  tokio::spawn(async move {
    let (mut socket, _) = listener.accept().await.unwrap();
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
      let n = socket.read(&mut buf).await.unwrap();
      if n == 0 {
        break;
      }
      request.extend_from_slice(&buf[..n]);
      if request_complete(&request) {
        break;
      }
    }
    socket.write_all(response.as_bytes()).await.unwrap();
    socket.shutdown().await.ok();
  });

  format!("http://{addr}/api/")
}

fn request_complete(raw: &[u8]) -> bool {
  let text = String::from_utf8_lossy(raw);
  let Some(end) = text.find("\r\n\r\n") else {
    return false;
  };
  let content_length = text[..end]
    .lines()
    .filter_map(|line| line.split_once(':'))
    .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
    .unwrap_or(0);
  raw.len() >= end + 4 + content_length
}
