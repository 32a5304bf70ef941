//! Cycle orchestrators.
//!
//! A sync cycle pairs two personalities: the [`LocalOrchestrator`] drives
//! the client side against its own store, and the [`RemoteOrchestrator`]
//! answers protocol envelopes against the hub's store. [`RemoteProxy`]
//! speaks to a remote orchestrator across a [`crate::SyncTransport`],
//! retrying transient failures with bounded backoff.

mod local;
mod proxy;
mod remote;

pub use local::LocalOrchestrator;
pub use proxy::{RemoteProxy, SendOutcome};
pub use remote::RemoteOrchestrator;
