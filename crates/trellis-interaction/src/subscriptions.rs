//! Server-side subscription records.

use std::collections::BTreeSet;
use std::time::Duration;

use trellis_exchange::SessionHandle;
use trellis_types::{FabricIndex, NodeId, SubscriptionId, Timestamp};

use crate::path::{AttributePath, ConcretePath, EventPath};

/// One standing subscription this node publishes to.
#[derive(Debug, Clone)]
pub struct ServerSubscription {
    pub id: SubscriptionId,
    pub session: SessionHandle,
    /// The subscriber's node id at establishment. A session for the same
    /// fabric but a different node id never inherits this subscription.
    pub peer_node_id: NodeId,
    pub fabric_index: FabricIndex,
    pub attribute_paths: Vec<AttributePath>,
    pub event_paths: Vec<EventPath>,
    pub fabric_filtered: bool,
    pub min_floor: Duration,
    pub max_interval: Duration,
    pub last_report_at: Timestamp,
    /// Paths that changed since the last report.
    pub dirty: BTreeSet<ConcretePath>,
}

impl ServerSubscription {
    /// Whether any subscribed path covers the given concrete path.
    pub fn watches(&self, path: &ConcretePath) -> bool {
        self.attribute_paths.iter().any(|p| p.matches(path))
    }

    /// Whether a report is due at `now`.
    pub fn due(&self, now: Timestamp) -> Option<ReportTrigger> {
        let elapsed = now.since(self.last_report_at);
        if !self.dirty.is_empty() && elapsed >= self.min_floor {
            Some(ReportTrigger::Changed)
        } else if elapsed >= self.max_interval {
            Some(ReportTrigger::KeepAlive)
        } else {
            None
        }
    }

    /// The next instant this subscription needs attention.
    pub fn next_deadline(&self) -> Timestamp {
        if self.dirty.is_empty() {
            self.last_report_at + self.max_interval
        } else {
            self.last_report_at + self.min_floor
        }
    }
}

/// Why a subscription report fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportTrigger {
    /// Subscribed data changed and the floor has passed.
    Changed,
    /// Nothing changed; the ceiling forces an empty report.
    KeepAlive,
}

/// A report the runtime should deliver for a subscription.
#[derive(Debug)]
pub struct SubscriptionReport {
    pub session: SessionHandle,
    pub subscription_id: SubscriptionId,
    pub trigger: ReportTrigger,
    /// ReportData chunks, in order. All but the last carry
    /// `more_chunks = true` and require a StatusResponse between them.
    pub chunks: Vec<bytes::Bytes>,
}
