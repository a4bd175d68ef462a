//! Worker registration and update lifecycle.
//!
//! ```text
//! Unregistered -> Registering -> Registered <-> Updating
//!                      |
//!                      +-> Failed
//! ```
//!
//! Registration errors are captured in [`WorkerRegistrationState`] and never
//! returned to the caller. On a platform without worker support the container
//! stays `Unregistered` and every operation is a no-op.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::message::WorkerController;
use super::replay::RetryPolicy;
use super::runtime;
use crate::api::{Transport, TransportError};
use crate::config::Config;
use crate::error::OfflineError;
use crate::store::{CachePolicy, DurableStore};

/// Content type the worker script is served with.
pub const SCRIPT_CONTENT_TYPE: &str = "application/javascript";
/// Response header that widens the scope a script may control.
pub const SERVICE_WORKER_ALLOWED_HEADER: &str = "Service-Worker-Allowed";

/// Capability probe for the host.
pub trait Platform: Send + Sync {
  fn supports_workers(&self) -> bool;
}

/// The running binary: workers are available unless disabled in the config
/// or with `HACIENDA_DISABLE_WORKER`.
#[derive(Debug, Clone, Copy)]
pub struct NativePlatform {
  workers: bool,
}

impl NativePlatform {
  pub fn detect(config: &Config) -> Self {
    let disabled_by_env = std::env::var_os("HACIENDA_DISABLE_WORKER").is_some();
    Self {
      workers: config.offline.enabled && !disabled_by_env,
    }
  }
}

impl Platform for NativePlatform {
  fn supports_workers(&self) -> bool {
    self.workers
  }
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
  pub script_path: String,
  pub scope: String,
  /// Service-Worker-Allowed value; `None` limits the scope to the script's directory
  pub max_scope: Option<String>,
  pub retry: RetryPolicy,
  pub cache_policy: CachePolicy,
  pub request_timeout: Duration,
  pub mailbox: usize,
}

impl Default for WorkerOptions {
  fn default() -> Self {
    Self {
      script_path: "/sw.js".to_string(),
      scope: "/".to_string(),
      max_scope: Some("/".to_string()),
      retry: RetryPolicy::default(),
      cache_policy: CachePolicy::default(),
      request_timeout: Duration::from_secs(15),
      mailbox: 32,
    }
  }
}

impl WorkerOptions {
  pub fn from_config(config: &Config) -> Self {
    let max_scope = Some(config.offline.max_scope.clone()).filter(|s| !s.is_empty());
    Self {
      script_path: config.offline.script_path.clone(),
      scope: config.offline.scope.clone(),
      max_scope,
      retry: RetryPolicy::from_config(&config.retry),
      cache_policy: CachePolicy::from_config(&config.cache),
      request_timeout: config.request_timeout(),
      ..Self::default()
    }
  }

  fn validate(&self) -> Result<(), OfflineError> {
    if !self.script_path.starts_with('/') || !self.script_path.ends_with(".js") {
      return Err(OfflineError::WorkerRegistrationFailed(format!(
        "script path '{}' must be absolute and end in .js",
        self.script_path
      )));
    }
    if !self.scope.starts_with('/') {
      return Err(OfflineError::WorkerRegistrationFailed(format!(
        "scope '{}' must be absolute",
        self.scope
      )));
    }

    let script_dir = match self.script_path.rfind('/') {
      Some(i) => &self.script_path[..=i],
      None => "/",
    };
    let max_scope = self.max_scope.as_deref().unwrap_or(script_dir);
    if !self.scope.starts_with(max_scope) {
      return Err(OfflineError::WorkerRegistrationFailed(format!(
        "scope '{}' is outside the maximum scope '{}' allowed for {}",
        self.scope, max_scope, self.script_path
      )));
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkerState {
  Unregistered,
  Registering,
  Registered,
  Updating,
  Failed,
}

/// What the indicator layer shows about the worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerRegistrationState {
  pub is_supported: bool,
  pub is_registered: bool,
  pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Registration {
  pub id: Uuid,
  pub scope: String,
  pub script_path: String,
  pub controller: WorkerController,
}

struct Inner {
  state: WorkerState,
  registration: Option<Registration>,
  error: Option<String>,
  task: Option<JoinHandle<()>>,
  shutdown: Option<watch::Sender<bool>>,
  unsupported_reported: bool,
}

/// Owns the worker registration for one session.
pub struct WorkerContainer<T> {
  supported: bool,
  options: WorkerOptions,
  transport: Arc<T>,
  version: watch::Sender<Option<String>>,
  inner: Mutex<Inner>,
}

impl<T: Transport> WorkerContainer<T> {
  pub fn new(platform: &dyn Platform, options: WorkerOptions, transport: Arc<T>) -> Self {
    let (version, _) = watch::channel(None);
    Self {
      supported: platform.supports_workers(),
      options,
      transport,
      version,
      inner: Mutex::new(Inner {
        state: WorkerState::Unregistered,
        registration: None,
        error: None,
        task: None,
        shutdown: None,
        unsupported_reported: false,
      }),
    }
  }

  fn inner(&self) -> MutexGuard<'_, Inner> {
    // The guarded data stays consistent even if a holder panicked
    self.inner.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub fn is_supported(&self) -> bool {
    self.supported
  }

  /// Register the worker and start its task.
  ///
  /// A second call reuses the existing registration. Must run inside a tokio
  /// runtime.
  pub fn register(&self, store: Arc<dyn DurableStore>) -> WorkerRegistrationState {
    let mut inner = self.inner();

    if !self.supported {
      if !inner.unsupported_reported {
        tracing::info!("background worker not supported, offline mode unavailable");
        inner.unsupported_reported = true;
      }
      return Self::snapshot(self.supported, &inner);
    }

    if let Some(registration) = &inner.registration {
      tracing::debug!(id = %registration.id, "reusing existing worker registration");
      return Self::snapshot(self.supported, &inner);
    }

    inner.state = WorkerState::Registering;
    if let Err(e) = self.options.validate() {
      tracing::warn!(error = %e, "worker registration failed");
      inner.state = WorkerState::Failed;
      inner.error = Some(e.to_string());
      return Self::snapshot(self.supported, &inner);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (controller, task) = runtime::spawn(
      store,
      self.transport.clone(),
      &self.options,
      self.version.subscribe(),
      shutdown_rx,
    );

    let registration = Registration {
      id: Uuid::new_v4(),
      scope: self.options.scope.clone(),
      script_path: self.options.script_path.clone(),
      controller,
    };
    tracing::info!(
      id = %registration.id,
      scope = %registration.scope,
      script = %registration.script_path,
      "worker registered"
    );

    inner.registration = Some(registration);
    inner.task = Some(task);
    inner.shutdown = Some(shutdown_tx);
    inner.state = WorkerState::Registered;
    inner.error = None;
    Self::snapshot(self.supported, &inner)
  }

  fn snapshot(supported: bool, inner: &Inner) -> WorkerRegistrationState {
    WorkerRegistrationState {
      is_supported: supported,
      is_registered: inner.registration.is_some(),
      error: inner.error.clone(),
    }
  }

  pub fn registration_state(&self) -> WorkerRegistrationState {
    Self::snapshot(self.supported, &self.inner())
  }

  pub fn state(&self) -> WorkerState {
    self.inner().state
  }

  #[cfg(test)]
  pub fn registration(&self) -> Option<Registration> {
    self.inner().registration.clone()
  }

  /// Handle for posting messages, if a live worker exists.
  pub fn controller(&self) -> Option<WorkerController> {
    self
      .inner()
      .registration
      .as_ref()
      .map(|r| r.controller.clone())
      .filter(|c| !c.is_closed())
  }

  /// Digest of the active worker script, once an update check has succeeded.
  pub fn version(&self) -> Option<String> {
    self.version.borrow().clone()
  }

  /// Check for a new worker script.
  ///
  /// Returns `None` when there is no registration, otherwise whether a new
  /// version was found. Always ends back in `Registered`.
  pub async fn update(&self) -> Option<bool> {
    {
      let mut inner = self.inner();
      if inner.state != WorkerState::Registered {
        return None;
      }
      inner.state = WorkerState::Updating;
    }

    let fetched = match tokio::time::timeout(
      self.options.request_timeout,
      self.transport.fetch_bytes(&self.options.script_path),
    )
    .await
    {
      Ok(result) => result,
      Err(_) => Err(TransportError::Timeout),
    };

    let found = match fetched {
      Ok(script) => {
        let digest = hex::encode(Sha256::digest(&script));
        let changed = self.version.send_if_modified(|current| {
          if current.as_deref() == Some(digest.as_str()) {
            false
          } else {
            *current = Some(digest.clone());
            true
          }
        });
        if changed {
          tracing::info!(version = %digest, "new worker script installed");
        }
        changed
      }
      Err(e) => {
        tracing::debug!(error = %e, "worker update check failed");
        false
      }
    };

    let mut inner = self.inner();
    if inner.state == WorkerState::Updating {
      inner.state = WorkerState::Registered;
    }
    Some(found)
  }

  /// Stop the worker task and wait for it. The session is over afterwards.
  pub async fn terminate(&self) {
    let (shutdown, task) = {
      let mut inner = self.inner();
      inner.registration = None;
      inner.state = WorkerState::Unregistered;
      (inner.shutdown.take(), inner.task.take())
    };

    if let Some(shutdown) = shutdown {
      let _ = shutdown.send(true);
    }
    if let Some(task) = task {
      if let Err(e) = task.await {
        tracing::warn!(error = %e, "worker task ended abnormally");
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::testing::FakeTransport;
  use crate::store::MemoryStore;

  struct FixedPlatform(bool);

  impl Platform for FixedPlatform {
    fn supports_workers(&self) -> bool {
      self.0
    }
  }

  fn container(supported: bool, options: WorkerOptions) -> (Arc<FakeTransport>, WorkerContainer<FakeTransport>) {
    let transport = Arc::new(FakeTransport::new());
    let container = WorkerContainer::new(&FixedPlatform(supported), options, transport.clone());
    (transport, container)
  }

  fn store() -> Arc<dyn DurableStore> {
    Arc::new(MemoryStore::new())
  }

  #[tokio::test]
  async fn test_register_success_exposes_controller() {
    let (_transport, container) = container(true, WorkerOptions::default());
    let state = container.register(store());

    assert_eq!(
      state,
      WorkerRegistrationState {
        is_supported: true,
        is_registered: true,
        error: None,
      }
    );
    assert_eq!(container.state(), WorkerState::Registered);
    let registration = container.registration().unwrap();
    assert_eq!(registration.scope, "/");
    assert_eq!(registration.script_path, "/sw.js");
    assert!(container.controller().is_some());
  }

  #[tokio::test]
  async fn test_register_twice_reuses_registration() {
    let (_transport, container) = container(true, WorkerOptions::default());
    container.register(store());
    let first = container.registration().unwrap().id;
    container.register(store());
    let second = container.registration().unwrap().id;
    assert_eq!(first, second);
  }

  #[tokio::test]
  async fn test_unsupported_platform_never_leaves_unregistered() {
    let (_transport, container) = container(false, WorkerOptions::default());
    let state = container.register(store());

    assert!(!state.is_supported);
    assert!(!state.is_registered);
    assert_eq!(container.state(), WorkerState::Unregistered);
    assert!(container.controller().is_none());
    assert_eq!(container.update().await, None);
  }

  #[tokio::test]
  async fn test_scope_outside_max_scope_fails_registration() {
    let options = WorkerOptions {
      script_path: "/static/sw.js".to_string(),
      scope: "/".to_string(),
      max_scope: None,
      ..WorkerOptions::default()
    };
    let (_transport, container) = container(true, options);
    let state = container.register(store());

    assert!(state.is_supported);
    assert!(!state.is_registered);
    assert!(state.error.unwrap().contains("outside the maximum scope"));
    assert_eq!(container.state(), WorkerState::Failed);
    assert!(container.controller().is_none());
  }

  #[tokio::test]
  async fn test_allowed_header_widens_scope() {
    let options = WorkerOptions {
      script_path: "/static/sw.js".to_string(),
      scope: "/".to_string(),
      max_scope: Some("/".to_string()),
      ..WorkerOptions::default()
    };
    let (_transport, container) = container(true, options);
    assert!(container.register(store()).is_registered);
  }

  #[tokio::test]
  async fn test_relative_script_path_fails() {
    let options = WorkerOptions {
      script_path: "sw.js".to_string(),
      ..WorkerOptions::default()
    };
    let (_transport, container) = container(true, options);
    assert!(container.register(store()).error.is_some());
  }

  #[tokio::test]
  async fn test_update_returns_to_registered() {
    let (transport, container) = container(true, WorkerOptions::default());
    container.register(store());

    assert_eq!(container.update().await, Some(true));
    let first = container.version().unwrap();
    assert_eq!(container.state(), WorkerState::Registered);

    // Same script: no new version
    assert_eq!(container.update().await, Some(false));
    assert_eq!(container.version().unwrap(), first);

    transport.set_script(b"self.addEventListener('sync', () => {});");
    assert_eq!(container.update().await, Some(true));
    assert_ne!(container.version().unwrap(), first);

    // A failed check still lands in Registered
    transport.set_online(false);
    assert_eq!(container.update().await, Some(false));
    assert_eq!(container.state(), WorkerState::Registered);
  }

  #[tokio::test]
  async fn test_terminate_closes_controller() {
    let (_transport, container) = container(true, WorkerOptions::default());
    container.register(store());
    let controller = container.controller().unwrap();
    container.terminate().await;
    assert!(controller.is_closed());
    assert!(container.controller().is_none());
  }
}
