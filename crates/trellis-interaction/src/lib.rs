//! # trellis-interaction: The interaction protocol
//!
//! Read, write, invoke and subscribe over exchanges on the interaction
//! protocol id. The server side expands wildcard paths against the
//! schema scope, filters through access control and fabric scoping,
//! chunks reports against the session payload budget and schedules
//! subscription reports between their floor and ceiling. The client side
//! assembles chunked responses, tracks subscription liveness and rations
//! concurrent interactions through [`InteractionQueue`].
//!
//! Engines are deterministic: payloads and `now` go in, messages to send
//! come out; the runtime owns exchanges and transmission.

mod client;
mod error;
mod messages;
mod path;
mod physical;
mod queue;
mod server;
mod subscriptions;

pub use client::{ClientEvent, ClientSubscription, InteractionClient, ReadOutcome};
pub use error::InteractionError;
pub use messages::{
    AttributeData, AttributeReport, CommandData, EventReport, InvokeRequest, InvokeResponse,
    InvokeResponseEntry, ReadRequest, ReportData, StatusResponse, SubscribeRequest,
    SubscribeResponse, TimedRequest, WriteRequest, WriteResponse, opcodes,
};
pub use path::{AttributePath, CommandPath, ConcretePath, DataVersionFilter, EventPath};
pub use physical::{NetworkTechnology, PhysicalDeviceProperties, SubscriptionIntervalBounds};
pub use queue::{InteractionQueue, QueueVerdict};
pub use server::{
    AccessDecision, InteractionServer, NodeView, OutMessage, ServerOutput, Subject,
};
pub use subscriptions::{ReportTrigger, ServerSubscription, SubscriptionReport};
