//! The endpoint tree.
//!
//! Endpoints are arena-allocated and referenced by [`EndpointNumber`]
//! indices; parent/parts relations are numbers, never owning references.
//! Each endpoint carries behavior backings: a datasource (state) plus an
//! optional command handler per cluster.

use std::collections::BTreeMap;

use tracing::{debug, warn};
use trellis_interaction::Subject;
use trellis_model::Scope;
use trellis_storage::StorageContext;
use trellis_store::{Datasource, EventLog};
use trellis_tlv::TlvValue;
use trellis_types::{ClusterId, CommandId, DeviceTypeId, EndpointNumber, StatusCode};

/// Events retained per endpoint.
const EVENT_LOG_CAPACITY: usize = 64;

/// Endpoint lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointLifecycle {
    Installing,
    Installed,
    Ready,
    Destroyed,
}

/// Dispatch target for a cluster's commands.
pub trait CommandHandler {
    /// Handles one invocation against the cluster's datasource.
    ///
    /// `Ok(Some(..))` is a response command, `Ok(None)` a bare success.
    fn invoke(
        &mut self,
        datasource: &mut Datasource,
        subject: &Subject,
        command: CommandId,
        fields: TlvValue,
    ) -> Result<Option<(CommandId, TlvValue)>, StatusCode>;
}

/// One cluster instance on an endpoint: state plus behavior.
pub struct Backing {
    pub datasource: Datasource,
    pub handler: Option<Box<dyn CommandHandler>>,
}

/// One endpoint in the arena.
pub struct Endpoint {
    pub number: EndpointNumber,
    /// Textual id the application assigned ("light", "sensor-1").
    pub id: String,
    pub device_type: DeviceTypeId,
    pub parent: Option<EndpointNumber>,
    pub parts: Vec<EndpointNumber>,
    pub lifecycle: EndpointLifecycle,
    backings: BTreeMap<ClusterId, Backing>,
    pub events: EventLog,
}

impl Endpoint {
    pub fn cluster_ids(&self) -> Vec<ClusterId> {
        self.backings.keys().copied().collect()
    }

    pub fn datasource(&self, cluster: ClusterId) -> Option<&Datasource> {
        self.backings.get(&cluster).map(|b| &b.datasource)
    }

    pub fn datasource_mut(&mut self, cluster: ClusterId) -> Option<&mut Datasource> {
        self.backings.get_mut(&cluster).map(|b| &mut b.datasource)
    }

    pub(crate) fn backing_mut(&mut self, cluster: ClusterId) -> Option<&mut Backing> {
        self.backings.get_mut(&cluster)
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("number", &self.number)
            .field("id", &self.id)
            .field("lifecycle", &self.lifecycle)
            .field("clusters", &self.backings.len())
            .finish()
    }
}

/// Key of the persisted endpoint-number map.
const NUMBERS_KEY: &str = "endpointNumbers";

/// The endpoint arena plus its persisted number allocator.
pub struct EndpointArena {
    endpoints: BTreeMap<EndpointNumber, Endpoint>,
    /// Assigned numbers by textual id; survives restarts so an endpoint
    /// keeps its number.
    assigned: BTreeMap<String, EndpointNumber>,
    next_number: u16,
    persistence: Option<StorageContext>,
}

impl EndpointArena {
    pub fn new(persistence: Option<StorageContext>) -> Self {
        let mut arena = Self {
            endpoints: BTreeMap::new(),
            assigned: BTreeMap::new(),
            next_number: 1,
            persistence,
        };
        arena.load_numbers();

        // The root endpoint always exists.
        arena.endpoints.insert(
            EndpointNumber::ROOT,
            Endpoint {
                number: EndpointNumber::ROOT,
                id: "root".to_string(),
                device_type: DeviceTypeId::new(0x0016),
                parent: None,
                parts: Vec::new(),
                lifecycle: EndpointLifecycle::Ready,
                backings: BTreeMap::new(),
                events: EventLog::new(EVENT_LOG_CAPACITY),
            },
        );
        arena
    }

    fn load_numbers(&mut self) {
        let Some(ctx) = &self.persistence else {
            return;
        };
        match ctx.get(NUMBERS_KEY) {
            Ok(Some(TlvValue::Array(entries))) => {
                for entry in &entries {
                    let number = entry.member(0).and_then(TlvValue::as_u64);
                    let id = entry.member(1).and_then(TlvValue::as_utf8);
                    if let (Some(number), Some(id)) = (number, id) {
                        let number = EndpointNumber::new(number as u16);
                        self.assigned.insert(id.to_string(), number);
                        self.next_number = self.next_number.max(number.as_u16() + 1);
                    }
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "endpoint number map unreadable"),
        }
    }

    fn persist_numbers(&self) {
        let Some(ctx) = &self.persistence else {
            return;
        };
        let entries = self
            .assigned
            .iter()
            .map(|(id, number)| {
                TlvValue::Struct(vec![
                    (
                        trellis_tlv::TlvTag::context(0),
                        TlvValue::UnsignedInt(u64::from(number.as_u16())),
                    ),
                    (trellis_tlv::TlvTag::context(1), TlvValue::utf8(id.clone())),
                ])
            })
            .collect();
        if let Err(e) = ctx.set(NUMBERS_KEY, &TlvValue::Array(entries)) {
            warn!(error = %e, "endpoint number map not persisted");
        }
    }

    /// Installs a new endpoint under a parent, assigning its number.
    ///
    /// An id seen before (persisted) keeps its previous number.
    pub fn install(
        &mut self,
        id: &str,
        device_type: DeviceTypeId,
        parent: EndpointNumber,
    ) -> EndpointNumber {
        let number = self.assigned.get(id).copied().unwrap_or_else(|| {
            let number = EndpointNumber::new(self.next_number);
            self.next_number += 1;
            self.assigned.insert(id.to_string(), number);
            self.persist_numbers();
            number
        });

        debug!(endpoint = %number, id, "endpoint installing");
        self.endpoints.insert(
            number,
            Endpoint {
                number,
                id: id.to_string(),
                device_type,
                parent: Some(parent),
                parts: Vec::new(),
                lifecycle: EndpointLifecycle::Installing,
                backings: BTreeMap::new(),
                events: EventLog::new(EVENT_LOG_CAPACITY),
            },
        );
        if let Some(parent) = self.endpoints.get_mut(&parent) {
            if !parent.parts.contains(&number) {
                parent.parts.push(number);
            }
        }
        number
    }

    /// Adds a cluster backing to an installing endpoint.
    pub fn add_backing(
        &mut self,
        number: EndpointNumber,
        scope: Scope,
        handler: Option<Box<dyn CommandHandler>>,
    ) {
        let cluster_id = scope.cluster().id;
        let persistence = self.persistence.as_ref().map(|ctx| {
            ctx.child("nodes")
                .child(&number.as_u16().to_string())
                .child(&cluster_id.as_u32().to_string())
        });
        let datasource = Datasource::new(number, scope, persistence);
        if let Some(endpoint) = self.endpoints.get_mut(&number) {
            endpoint.backings.insert(
                cluster_id,
                Backing {
                    datasource,
                    handler,
                },
            );
            endpoint.lifecycle = EndpointLifecycle::Installed;
        }
    }

    /// Marks an endpoint ready to serve.
    pub fn mark_ready(&mut self, number: EndpointNumber) {
        if let Some(endpoint) = self.endpoints.get_mut(&number) {
            endpoint.lifecycle = EndpointLifecycle::Ready;
            debug!(endpoint = %number, "endpoint ready");
        }
    }

    /// Destroys an endpoint, unlinking it from its parent.
    pub fn destroy(&mut self, number: EndpointNumber) {
        if number.is_root() {
            return;
        }
        if let Some(mut endpoint) = self.endpoints.remove(&number) {
            endpoint.lifecycle = EndpointLifecycle::Destroyed;
            if let Some(parent) = endpoint.parent.and_then(|p| self.endpoints.get_mut(&p)) {
                parent.parts.retain(|part| *part != number);
            }
        }
    }

    pub fn numbers(&self) -> Vec<EndpointNumber> {
        self.endpoints.keys().copied().collect()
    }

    pub fn get(&self, number: EndpointNumber) -> Option<&Endpoint> {
        self.endpoints.get(&number)
    }

    pub fn get_mut(&mut self, number: EndpointNumber) -> Option<&mut Endpoint> {
        self.endpoints.get_mut(&number)
    }

    /// Whether the id already holds a persisted number.
    pub fn has_number(&self, id: &str) -> bool {
        self.assigned.contains_key(id)
    }
}

impl std::fmt::Debug for EndpointArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointArena")
            .field("endpoints", &self.endpoints.len())
            .finish()
    }
}
