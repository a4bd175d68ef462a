//! The background worker: a separate task the rest of the program talks to
//! only through messages. It drains the mutation queue, refreshes cached
//! reads and reports back on a reply channel.

mod fetch;
mod lifecycle;
mod message;
mod replay;
mod runtime;

pub use fetch::{FetchInterceptor, FetchSource, WriteOutcome};
pub use lifecycle::{
  NativePlatform, Platform, WorkerContainer, WorkerOptions, WorkerRegistrationState,
  WorkerState, SCRIPT_CONTENT_TYPE, SERVICE_WORKER_ALLOWED_HEADER,
};
pub use message::{MessageKind, ReplyOutcome, SyncReport, WorkerController, WorkerReply};
