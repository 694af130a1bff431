//! Per-endpoint event storage.
//!
//! A bounded ring of emitted events, read back by event paths during
//! reads and priming reports. Event numbers are node-global and
//! monotonic; the allocator lives with the node, the ring here.

use std::collections::VecDeque;

use trellis_tlv::TlvValue;
use trellis_types::{ClusterId, EventId, EventNumber, EventPriority};

/// One emitted event occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub cluster: ClusterId,
    pub event: EventId,
    pub number: EventNumber,
    pub priority: EventPriority,
    pub payload: TlvValue,
}

/// Bounded event ring for one endpoint.
///
/// When full, the oldest entry of the *lowest* priority present is
/// evicted first, so critical events outlive debug chatter.
#[derive(Debug)]
pub struct EventLog {
    capacity: usize,
    entries: VecDeque<StoredEvent>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends an event, evicting if the ring is full.
    pub fn push(&mut self, event: StoredEvent) {
        if self.entries.len() == self.capacity {
            let lowest = self
                .entries
                .iter()
                .map(|e| e.priority)
                .min()
                .expect("ring is full, hence non-empty");
            if let Some(pos) = self.entries.iter().position(|e| e.priority == lowest) {
                self.entries.remove(pos);
            }
        }
        self.entries.push_back(event);
    }

    /// Events matching the filters, oldest first.
    ///
    /// `None` filters are wildcards; `min_number` skips entries a
    /// client already holds.
    pub fn read(
        &self,
        cluster: Option<ClusterId>,
        event: Option<EventId>,
        min_number: EventNumber,
    ) -> impl Iterator<Item = &StoredEvent> {
        self.entries.iter().filter(move |e| {
            cluster.is_none_or(|c| c == e.cluster)
                && event.is_none_or(|id| id == e.event)
                && e.number >= min_number
        })
    }
}
