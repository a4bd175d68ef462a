//! Wires the store, the worker and the coordinator together for one session
//! and exposes their state to the front end.

use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

use crate::api::Transport;
use crate::config::Config;
use crate::error::OfflineError;
use crate::store::{CachePolicy, DurableStore, MemoryStore, SqliteStore};
use crate::sync::{
  ConnectivityMonitor, CoordinatorHandle, CoordinatorOptions, LifecycleSignal, MonitorHandle,
  SyncCoordinator, SyncStatus,
};
use crate::worker::{
  FetchInterceptor, MessageKind, Platform, ReplyOutcome, SyncReport, WorkerContainer,
  WorkerOptions, WorkerRegistrationState, WorkerState,
};

#[derive(Debug, Clone)]
pub struct ProviderSettings {
  pub worker: WorkerOptions,
  pub coordinator: CoordinatorOptions,
  /// `None` keeps the store in memory
  pub store_path: Option<PathBuf>,
  pub health_path: String,
  pub probe_interval: Duration,
  pub request_timeout: Duration,
  pub cache_policy: CachePolicy,
  /// Whether the front end starts out visible (CLI commands always are)
  pub visible: bool,
}

impl ProviderSettings {
  pub fn from_config(config: &Config, visible: bool) -> Result<Self> {
    Ok(Self {
      worker: WorkerOptions::from_config(config),
      coordinator: CoordinatorOptions::from_config(config),
      store_path: Some(config.store_path()?),
      health_path: config.api.health_path.clone(),
      probe_interval: Duration::from_secs(config.offline.probe_interval_secs),
      request_timeout: config.request_timeout(),
      cache_policy: CachePolicy::from_config(&config.cache),
      visible,
    })
  }
}

/// Advisory shown when offline mode is unavailable for this session.
///
/// Dismissal only hides it; nothing is re-enabled and nothing is persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompatibilityAdvisory {
  message: Option<String>,
  dismissed: bool,
}

impl CompatibilityAdvisory {
  fn unsupported() -> Self {
    Self {
      message: Some(
        "Background sync is not available here. Changes are only saved while online.".to_string(),
      ),
      dismissed: false,
    }
  }

  fn registration_failed(reason: &str) -> Self {
    Self {
      message: Some(format!(
        "Offline mode could not be started ({}). Changes are only saved while online.",
        reason
      )),
      dismissed: false,
    }
  }

  pub fn is_visible(&self) -> bool {
    self.message.is_some() && !self.dismissed
  }

  pub fn message(&self) -> Option<&str> {
    self.message.as_deref().filter(|_| !self.dismissed)
  }

  pub fn dismiss(&mut self) {
    self.dismissed = true;
  }
}

pub struct OfflineProvider<T> {
  registration: WorkerRegistrationState,
  advisory: CompatibilityAdvisory,
  container: Arc<WorkerContainer<T>>,
  store: Option<Arc<dyn DurableStore>>,
  client: FetchInterceptor<T>,
  coordinator: Option<CoordinatorHandle>,
  monitor: Option<MonitorHandle>,
  ack_timeout: Duration,
}

impl<T: Transport> OfflineProvider<T> {
  /// Bring the offline layer up. Never fails: every problem degrades to
  /// online-only and shows up in `registration_state` and `advisory`.
  pub fn start(settings: ProviderSettings, platform: &dyn Platform, transport: Arc<T>) -> Self {
    let container = Arc::new(WorkerContainer::new(
      platform,
      settings.worker.clone(),
      transport.clone(),
    ));
    let online_only = FetchInterceptor::new(
      transport.clone(),
      None,
      settings.cache_policy,
      settings.request_timeout,
    );

    if !container.is_supported() {
      tracing::info!("platform lacks worker support, running online-only");
      return Self {
        registration: container.registration_state(),
        advisory: CompatibilityAdvisory::unsupported(),
        container,
        store: None,
        client: online_only,
        coordinator: None,
        monitor: None,
        ack_timeout: settings.coordinator.ack_timeout,
      };
    }

    let store = open_store(settings.store_path.as_deref());
    let registration = container.register(store.clone());
    if !registration.is_registered {
      let reason = registration.error.clone().unwrap_or_default();
      return Self {
        registration,
        advisory: CompatibilityAdvisory::registration_failed(&reason),
        container,
        store: None,
        client: online_only,
        coordinator: None,
        monitor: None,
        ack_timeout: settings.coordinator.ack_timeout,
      };
    }

    let client = FetchInterceptor::new(
      transport.clone(),
      Some(store.clone()),
      settings.cache_policy,
      settings.request_timeout,
    );
    let ack_timeout = settings.coordinator.ack_timeout;

    // Offline until the first probe says otherwise
    let coordinator = SyncCoordinator::new(
      container.clone(),
      Some(store.clone()),
      settings.coordinator,
      false,
      settings.visible,
    )
    .spawn();
    let monitor = ConnectivityMonitor::new(
      transport,
      &settings.health_path,
      settings.probe_interval,
      settings.request_timeout,
    )
    .spawn(coordinator.signals());

    Self {
      registration,
      advisory: CompatibilityAdvisory::default(),
      container,
      store: Some(store),
      client,
      coordinator: Some(coordinator),
      monitor: Some(monitor),
      ack_timeout,
    }
  }

  pub fn registration_state(&self) -> &WorkerRegistrationState {
    &self.registration
  }

  pub fn worker_state(&self) -> WorkerState {
    self.container.state()
  }

  pub fn advisory(&self) -> &CompatibilityAdvisory {
    &self.advisory
  }

  pub fn dismiss_advisory(&mut self) {
    self.advisory.dismiss();
  }

  pub fn client(&self) -> &FetchInterceptor<T> {
    &self.client
  }

  pub fn store(&self) -> Option<&Arc<dyn DurableStore>> {
    self.store.as_ref()
  }

  /// Forward a lifecycle signal. Returns false when offline mode is off.
  pub fn signal(&self, signal: LifecycleSignal) -> bool {
    self
      .coordinator
      .as_ref()
      .map(|c| c.signal(signal))
      .unwrap_or(false)
  }

  pub fn status(&self) -> Option<watch::Receiver<SyncStatus>> {
    self.coordinator.as_ref().map(|c| c.status())
  }

  /// Drain the queue now and wait for the worker's report.
  pub async fn sync_now(&self) -> Result<SyncReport, OfflineError> {
    let controller = self
      .container
      .controller()
      .ok_or_else(|| OfflineError::SyncDeliveryFailed("no active worker".to_string()))?;
    let (correlation_id, reply) = controller.post(MessageKind::SyncQueue, None)?;

    let reply = tokio::time::timeout(self.ack_timeout, reply)
      .await
      .map_err(|_| OfflineError::SyncDeliveryFailed("no acknowledgment from worker".to_string()))?
      .map_err(|_| OfflineError::SyncDeliveryFailed("worker dropped the sync signal".to_string()))?;

    report_from_reply(correlation_id, reply.outcome)
  }

  /// Tear everything down; no timers or tasks survive this.
  pub async fn shutdown(self) {
    if let Some(monitor) = self.monitor {
      monitor.shutdown().await;
    }
    if let Some(coordinator) = self.coordinator {
      coordinator.shutdown().await;
    }
    self.container.terminate().await;
  }
}

/// A `Failed` reply means the signal arrived and the drain itself went wrong.
fn report_from_reply(correlation_id: Uuid, outcome: ReplyOutcome) -> Result<SyncReport, OfflineError> {
  match outcome {
    ReplyOutcome::Synced(report) => Ok(report),
    ReplyOutcome::Failed(reason) => Err(OfflineError::DrainFailed(reason)),
    other => Err(OfflineError::SyncDeliveryFailed(format!(
      "unexpected reply to {}: {:?}",
      correlation_id, other
    ))),
  }
}

/// SQLite when possible, memory otherwise.
fn open_store(path: Option<&std::path::Path>) -> Arc<dyn DurableStore> {
  let Some(path) = path else {
    return Arc::new(MemoryStore::new());
  };

  match SqliteStore::init(path) {
    Ok(store) => {
      tracing::debug!(path = %path.display(), "offline store opened");
      Arc::new(store)
    }
    Err(e) => {
      tracing::warn!(error = %e, "falling back to in-memory offline store");
      Arc::new(MemoryStore::new())
    }
  }
}
