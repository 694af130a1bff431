//! The per-(endpoint, cluster) attribute store.

use std::collections::BTreeMap;

use tracing::{debug, warn};
use trellis_model::Scope;
use trellis_storage::StorageContext;
use trellis_supervisor::ValueSupervisor;
use trellis_tlv::TlvValue;
use trellis_types::{
    AttributeId, ClusterId, DataVersion, EndpointNumber, EventBus, EventHandle, FabricIndex,
};

/// Key of the persisted data version inside the cluster's context.
const DATA_VERSION_KEY: &str = "dataVersion";

/// A committed attribute mutation, delivered after the owning
/// transaction resolves.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeChange {
    pub endpoint: EndpointNumber,
    pub cluster: ClusterId,
    pub attribute: AttributeId,
    pub value: TlvValue,
    pub version: DataVersion,
}

/// Attribute store for one cluster instance.
pub struct Datasource {
    endpoint: EndpointNumber,
    scope: Scope,
    supervisor: ValueSupervisor,
    values: BTreeMap<AttributeId, TlvValue>,
    data_version: DataVersion,
    changes: EventBus<AttributeChange>,
    persistence: Option<StorageContext>,
}

impl Datasource {
    /// Creates the store and loads initial state.
    ///
    /// Every attribute present in the scope gets a value: the persisted
    /// one for nonvolatile attributes when available, otherwise the
    /// schema default.
    pub fn new(endpoint: EndpointNumber, scope: Scope, persistence: Option<StorageContext>) -> Self {
        let supervisor = ValueSupervisor::new(scope.cluster().clone());
        let mut values = BTreeMap::new();
        let mut data_version = DataVersion::default();

        if let Some(ctx) = &persistence {
            match ctx.get(DATA_VERSION_KEY) {
                Ok(Some(v)) => {
                    data_version = DataVersion::new(v.as_u64().unwrap_or(0) as u32);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "data version load failed; starting at zero"),
            }
        }

        let attrs: Vec<_> = scope.conformant_attributes().cloned().collect();
        for attribute in &attrs {
            let mut value = None;
            if attribute.quality.nonvolatile {
                if let Some(ctx) = &persistence {
                    match ctx.get(&attribute.id.as_u32().to_string()) {
                        Ok(stored) => value = stored,
                        Err(e) => {
                            warn!(
                                attribute = %attribute.id,
                                error = %e,
                                "persisted attribute unreadable; using default"
                            );
                        }
                    }
                }
            }
            let value = value.unwrap_or_else(|| supervisor.default_of(attribute));
            values.insert(attribute.id, value);
        }

        Self {
            endpoint,
            scope,
            supervisor,
            values,
            data_version,
            changes: EventBus::new(),
            persistence,
        }
    }

    pub fn endpoint(&self) -> EndpointNumber {
        self.endpoint
    }

    pub fn cluster_id(&self) -> ClusterId {
        self.scope.cluster().id
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn supervisor(&self) -> &ValueSupervisor {
        &self.supervisor
    }

    pub fn data_version(&self) -> DataVersion {
        self.data_version
    }

    /// The committed value of an attribute.
    pub fn get(&self, attribute: AttributeId) -> Option<&TlvValue> {
        self.values.get(&attribute)
    }

    /// The committed value filtered to one fabric's view.
    ///
    /// Fabric-scoped list attributes drop rows written by other fabrics;
    /// everything else reads unchanged.
    pub fn read_scoped(&self, attribute: AttributeId, fabric: FabricIndex) -> Option<TlvValue> {
        let value = self.values.get(&attribute)?;
        let schema = self.scope.cluster().attribute(attribute)?;
        Some(self.supervisor.scope_for(schema, value, fabric))
    }

    /// Registers a change handler for one attribute.
    pub fn on_change(
        &self,
        attribute: AttributeId,
        handler: impl Fn(&AttributeChange) + 'static,
    ) -> EventHandle {
        self.changes.register(move |change| {
            if change.attribute == attribute {
                handler(change);
            }
        })
    }

    /// Registers a change handler for every attribute of the cluster.
    pub fn on_any_change(&self, handler: impl Fn(&AttributeChange) + 'static) -> EventHandle {
        self.changes.register(handler)
    }

    pub fn detach(&self, handle: EventHandle) {
        self.changes.detach(handle);
    }

    /// All committed values, for snapshot isolation.
    pub(crate) fn committed(&self) -> &BTreeMap<AttributeId, TlvValue> {
        &self.values
    }

    /// Applies a commit batch. Called by [`crate::Transaction`] only.
    ///
    /// Bumps the data version once, persists nonvolatile members, and
    /// returns the change events to fire (declaration order). Storage
    /// errors do not block the in-memory commit; they are returned for
    /// operator-visible reporting.
    pub(crate) fn apply_commit(
        &mut self,
        batch: BTreeMap<AttributeId, TlvValue>,
    ) -> (Vec<AttributeChange>, Vec<trellis_storage::StorageError>) {
        let changed: BTreeMap<AttributeId, TlvValue> = batch
            .into_iter()
            .filter(|(id, value)| self.values.get(id) != Some(value))
            .collect();
        if changed.is_empty() {
            return (Vec::new(), Vec::new());
        }

        self.data_version = self.data_version.bumped();
        debug!(
            endpoint = %self.endpoint,
            cluster = %self.cluster_id(),
            version = %self.data_version,
            count = changed.len(),
            "attributes committed"
        );

        let mut storage_errors = Vec::new();
        if let Some(ctx) = &self.persistence {
            if let Err(e) = ctx.set(
                DATA_VERSION_KEY,
                &TlvValue::UnsignedInt(u64::from(self.data_version.as_u32())),
            ) {
                storage_errors.push(e);
            }
        }

        for (id, value) in &changed {
            if let Some(schema) = self.scope.cluster().attribute(*id) {
                if schema.quality.nonvolatile {
                    if let Some(ctx) = &self.persistence {
                        if let Err(e) = ctx.set(&id.as_u32().to_string(), value) {
                            storage_errors.push(e);
                        }
                    }
                }
            }
            self.values.insert(*id, value.clone());
        }

        // Events in attribute declaration order within the batch.
        let events = self
            .scope
            .cluster()
            .attributes
            .iter()
            .filter_map(|schema| {
                changed.get(&schema.id).map(|value| AttributeChange {
                    endpoint: self.endpoint,
                    cluster: self.cluster_id(),
                    attribute: schema.id,
                    value: value.clone(),
                    version: self.data_version,
                })
            })
            .collect();
        (events, storage_errors)
    }

    /// Fires previously collected change events.
    pub(crate) fn fire(&self, events: &[AttributeChange]) {
        for event in events {
            self.changes.emit(event);
        }
    }
}

impl std::fmt::Debug for Datasource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datasource")
            .field("endpoint", &self.endpoint)
            .field("cluster", &self.cluster_id())
            .field("data_version", &self.data_version)
            .field("attributes", &self.values.len())
            .finish()
    }
}
