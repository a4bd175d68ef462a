//! Sync coordination: decides when the worker should drain the queue.

mod connectivity;
mod coordinator;

pub use connectivity::{ConnectivityMonitor, MonitorHandle};
pub use coordinator::{CoordinatorHandle, CoordinatorOptions, SyncCoordinator, SyncStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
  Visible,
  Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
  Online,
  Offline,
}

/// Events the coordinator reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
  Visibility(Visibility),
  Connectivity(Connectivity),
  /// Explicit request from the user
  SyncRequested,
}
