//! # Trellis
//!
//! A Matter node protocol engine: everything a commissioned smart-home
//! node needs to speak the protocol, independent of device type.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                             Trellis                              │
//! │  ┌────────┐  ┌─────────┐  ┌──────────┐  ┌─────────────┐         │
//! │  │  TLV   │→ │  Model  │→ │  Store   │→ │ Interaction │         │
//! │  │(codec) │  │(schema) │  │(attrs)   │  │(read/write) │         │
//! │  └────────┘  └─────────┘  └──────────┘  └─────────────┘         │
//! │  ┌──────────┐  ┌─────────┐  ┌──────────┐  ┌────────┐            │
//! │  │ Exchange │→ │ Session │→ │  Fabric  │  │  BDX   │            │
//! │  │  (MRP)   │  │(PASE/   │  │ (certs)  │  │ (bulk) │            │
//! │  │          │  │ CASE)   │  │          │  │        │            │
//! │  └──────────┘  └─────────┘  └──────────┘  └────────┘            │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine is deterministic and single-threaded cooperative:
//! datagrams and timestamps go in, datagrams come out. Platform I/O
//! (UDP, BLE, mDNS, filesystem, hardware crypto) stays behind traits.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::rc::Rc;
//! use trellis::prelude::*;
//!
//! let crypto = Rc::new(SoftwareCrypto::new());
//! let config = ConfigLoader::new().load_or_default();
//! let mut node = ServerNode::new(crypto, &config, None);
//!
//! let light = node.add_endpoint("light", DeviceTypeId::new(0x0100));
//! node.add_cluster(light, Scope::new(on_off_schema, 0, []), Some(handler));
//! node.mark_ready(light);
//!
//! // Transport loop: feed datagrams, transmit the replies.
//! let replies = node.on_datagram(datagram, now);
//! ```

pub use trellis_bdx as bdx;
pub use trellis_config as config;
pub use trellis_crypto as crypto;
pub use trellis_exchange as exchange;
pub use trellis_fabric as fabric;
pub use trellis_interaction as interaction;
pub use trellis_model as model;
pub use trellis_ota as ota;
pub use trellis_runtime as runtime;
pub use trellis_session as session;
pub use trellis_storage as storage;
pub use trellis_store as store;
pub use trellis_supervisor as supervisor;
pub use trellis_tlv as tlv;
pub use trellis_types as types;

/// The names most applications need.
pub mod prelude {
    pub use trellis_config::{ConfigLoader, TrellisConfig};
    pub use trellis_crypto::{CryptoProvider, SoftwareCrypto};
    pub use trellis_model::{ClusterBuilder, Scope};
    pub use trellis_runtime::{CommandHandler, ServerNode};
    pub use trellis_store::{Datasource, Transaction};
    pub use trellis_tlv::{TlvTag, TlvValue};
    pub use trellis_types::{
        AttributeId, ClusterId, CommandId, DeviceTypeId, EndpointNumber, EventId, FabricIndex,
        NodeId, StatusCode, Timestamp,
    };
}
