//! Client-side interaction rationing.
//!
//! At most four interactions run against one peer at a time, and new
//! ones start no closer than 100 ms apart, so a burst of reads cannot
//! flood a constrained device. A slot is held for the whole
//! request/response round trip.

use std::collections::HashMap;
use std::time::Duration;

use trellis_types::{PeerAddress, Timestamp};

/// Concurrent interactions allowed per peer.
const PERMITS_PER_PEER: usize = 4;

/// Minimum spacing between interaction starts against one peer.
const STAGGER: Duration = Duration::from_millis(100);

/// Whether an interaction may start now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueVerdict {
    /// Slot acquired; release it when the round trip completes.
    Acquired,
    /// Try again at the given instant.
    Wait(Timestamp),
}

#[derive(Debug, Default, Clone, Copy)]
struct PeerState {
    in_flight: usize,
    last_start: Option<Timestamp>,
}

/// Per-peer interaction semaphore with start staggering.
#[derive(Debug, Default)]
pub struct InteractionQueue {
    peers: HashMap<PeerAddress, PeerState>,
}

impl InteractionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to start an interaction against a peer.
    pub fn try_acquire(&mut self, peer: PeerAddress, now: Timestamp) -> QueueVerdict {
        let state = self.peers.entry(peer).or_default();
        if state.in_flight >= PERMITS_PER_PEER {
            // No deadline to offer; a release will free a slot. Callers
            // re-poll on their next wakeup.
            return QueueVerdict::Wait(now + STAGGER);
        }
        if let Some(last) = state.last_start {
            let earliest = last + STAGGER;
            if now < earliest {
                return QueueVerdict::Wait(earliest);
            }
        }
        state.in_flight += 1;
        state.last_start = Some(now);
        QueueVerdict::Acquired
    }

    /// Releases a slot when the round trip completes or aborts.
    pub fn release(&mut self, peer: PeerAddress) {
        if let Some(state) = self.peers.get_mut(&peer) {
            state.in_flight = state.in_flight.saturating_sub(1);
        }
    }

    /// In-flight interactions against a peer.
    pub fn in_flight(&self, peer: PeerAddress) -> usize {
        self.peers.get(&peer).map_or(0, |s| s.in_flight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_types::{FabricIndex, NodeId};

    fn peer() -> PeerAddress {
        PeerAddress::new(FabricIndex::new(1), NodeId::new(0x42))
    }

    fn at(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn staggers_starts_by_100ms() {
        let mut queue = InteractionQueue::new();
        assert_eq!(queue.try_acquire(peer(), at(0)), QueueVerdict::Acquired);
        assert_eq!(
            queue.try_acquire(peer(), at(50)),
            QueueVerdict::Wait(at(100))
        );
        assert_eq!(queue.try_acquire(peer(), at(100)), QueueVerdict::Acquired);
    }

    #[test]
    fn caps_at_four_in_flight() {
        let mut queue = InteractionQueue::new();
        for i in 0..4u64 {
            assert_eq!(
                queue.try_acquire(peer(), at(i * 100)),
                QueueVerdict::Acquired
            );
        }
        assert!(matches!(
            queue.try_acquire(peer(), at(1000)),
            QueueVerdict::Wait(_)
        ));

        queue.release(peer());
        assert_eq!(queue.try_acquire(peer(), at(1100)), QueueVerdict::Acquired);
    }

    #[test]
    fn peers_are_independent() {
        let other = PeerAddress::new(FabricIndex::new(1), NodeId::new(0x43));
        let mut queue = InteractionQueue::new();
        assert_eq!(queue.try_acquire(peer(), at(0)), QueueVerdict::Acquired);
        assert_eq!(queue.try_acquire(other, at(0)), QueueVerdict::Acquired);
    }
}
