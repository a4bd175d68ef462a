//! Thin REST client: bearer token, JSON in, JSON out.

mod client;
#[cfg(test)]
pub(crate) mod testing;
mod types;

pub use client::{ApiClient, Transport, TransportError};
pub use types::{ApiRequest, Method};
