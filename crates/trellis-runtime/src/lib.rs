//! # trellis-runtime: The node runtime
//!
//! Ties the protocol layers into a running node:
//!
//! - [`Environment`]: typed service locator with ref-counted shared
//!   services
//! - [`LifetimeOwner`] / [`AbortSignal`]: cancellation scopes threaded
//!   through every long-running primitive
//! - [`EndpointArena`]: the endpoint tree, arena-allocated and indexed
//!   by [`trellis_types::EndpointNumber`]
//! - [`ServerNode`]: sessions, exchanges and the interaction server
//!   behind one deterministic `datagram in → datagrams out` driver
//! - [`discovery`]: commissionable and operational advertisement data
//!
//! The engine is single-threaded cooperative: the driver is called with
//! explicit `now` timestamps, and platform I/O (UDP, BLE, mDNS) stays
//! behind the caller's transport.

pub mod discovery;

mod endpoint;
mod environment;
mod lifetime;
mod node;

pub use endpoint::{Backing, CommandHandler, Endpoint, EndpointArena, EndpointLifecycle};
pub use environment::{Environment, ServiceLease, SharedServices};
pub use lifetime::{AbortSignal, LifetimeOwner, WorkerGuard};
pub use node::{AccessPolicy, NodeError, ServerNode};

#[cfg(test)]
mod tests;
