//! Model lookup index.
//!
//! Flat entry arrays with on-demand constructed id and name maps. A key
//! may be claimed by several entries (an attribute and a command can share
//! an id); lookups disambiguate by [`ModelTag`].

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::schema::{ClusterSchema, canonical_camel};

/// What kind of schema node an index entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelTag {
    Cluster,
    Attribute,
    Command,
    Event,
    Datatype,
}

/// One entry of the index: where a node lives in the cluster set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub tag: ModelTag,
    /// Position of the owning cluster in the indexed slice.
    pub cluster: usize,
    /// Position within the cluster's per-kind array; 0 for clusters.
    pub position: usize,
}

/// Lookup index over a frozen set of clusters.
///
/// The maps are built lazily on first use and shared thereafter; the
/// entry arrays are built eagerly (they are cheap and keep iteration
/// deterministic).
#[derive(Debug)]
pub struct ModelIndex {
    clusters: Vec<Arc<ClusterSchema>>,
    entries: Vec<(u64, String, IndexEntry)>,
    by_id: OnceLock<HashMap<u64, Vec<IndexEntry>>>,
    by_name: OnceLock<HashMap<String, Vec<IndexEntry>>>,
}

impl ModelIndex {
    /// Indexes a set of built clusters.
    pub fn build(clusters: &[Arc<ClusterSchema>]) -> Self {
        let mut entries = Vec::new();
        for (ci, cluster) in clusters.iter().enumerate() {
            entries.push((
                u64::from(cluster.id.as_u32()),
                cluster.name.clone(),
                IndexEntry {
                    tag: ModelTag::Cluster,
                    cluster: ci,
                    position: 0,
                },
            ));
            for (pi, a) in cluster.attributes.iter().enumerate() {
                entries.push((
                    u64::from(a.id.as_u32()),
                    a.name.clone(),
                    IndexEntry {
                        tag: ModelTag::Attribute,
                        cluster: ci,
                        position: pi,
                    },
                ));
            }
            for (pi, c) in cluster.commands.iter().enumerate() {
                entries.push((
                    u64::from(c.id.as_u32()),
                    c.name.clone(),
                    IndexEntry {
                        tag: ModelTag::Command,
                        cluster: ci,
                        position: pi,
                    },
                ));
            }
            for (pi, e) in cluster.events.iter().enumerate() {
                entries.push((
                    u64::from(e.id.as_u32()),
                    e.name.clone(),
                    IndexEntry {
                        tag: ModelTag::Event,
                        cluster: ci,
                        position: pi,
                    },
                ));
            }
            for (pi, d) in cluster.datatypes.iter().enumerate() {
                entries.push((
                    0,
                    canonical_camel(d.name()),
                    IndexEntry {
                        tag: ModelTag::Datatype,
                        cluster: ci,
                        position: pi,
                    },
                ));
            }
        }
        Self {
            clusters: clusters.to_vec(),
            entries,
            by_id: OnceLock::new(),
            by_name: OnceLock::new(),
        }
    }

    /// The indexed clusters, in declaration order.
    pub fn clusters(&self) -> &[Arc<ClusterSchema>] {
        &self.clusters
    }

    /// Resolves a cluster schema by id.
    pub fn cluster_by_id(&self, id: trellis_types::ClusterId) -> Option<&Arc<ClusterSchema>> {
        self.find_by_id(u64::from(id.as_u32()), ModelTag::Cluster)
            .map(|entry| &self.clusters[entry.cluster])
    }

    /// Resolves a cluster schema by canonical camel-case name.
    pub fn cluster_by_name(&self, name: &str) -> Option<&Arc<ClusterSchema>> {
        self.find_by_name(&canonical_camel(name), ModelTag::Cluster)
            .map(|entry| &self.clusters[entry.cluster])
    }

    /// All entries under an id key, any tag.
    pub fn entries_by_id(&self, id: u64) -> &[IndexEntry] {
        self.id_map().get(&id).map_or(&[], Vec::as_slice)
    }

    /// Finds the entry with the given id and tag.
    pub fn find_by_id(&self, id: u64, tag: ModelTag) -> Option<IndexEntry> {
        self.id_map()
            .get(&id)?
            .iter()
            .copied()
            .find(|entry| entry.tag == tag)
    }

    /// Finds the entry with the given canonical name and tag.
    pub fn find_by_name(&self, name: &str, tag: ModelTag) -> Option<IndexEntry> {
        self.name_map()
            .get(name)?
            .iter()
            .copied()
            .find(|entry| entry.tag == tag)
    }

    fn id_map(&self) -> &HashMap<u64, Vec<IndexEntry>> {
        self.by_id.get_or_init(|| {
            let mut map: HashMap<u64, Vec<IndexEntry>> = HashMap::new();
            for (id, _, entry) in &self.entries {
                // Datatypes are name-keyed only.
                if entry.tag != ModelTag::Datatype {
                    map.entry(*id).or_default().push(*entry);
                }
            }
            map
        })
    }

    fn name_map(&self) -> &HashMap<String, Vec<IndexEntry>> {
        self.by_name.get_or_init(|| {
            let mut map: HashMap<String, Vec<IndexEntry>> = HashMap::new();
            for (_, name, entry) in &self.entries {
                map.entry(name.clone()).or_default().push(*entry);
            }
            map
        })
    }
}
