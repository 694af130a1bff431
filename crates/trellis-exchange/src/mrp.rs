//! Reliable message context (MRP).
//!
//! Every exchange carries one [`ReliableContext`]: at most one
//! retransmitting outbound message and at most one owed acknowledgement
//! at a time, per the message-reliability rules. Retransmit intervals
//! start at `base + random[0, jitter)` and double per attempt up to a
//! cap; the retry budget is [`MrpConfig::max_retries`].

use std::time::Duration;

use trellis_types::Timestamp;

/// MRP timing parameters, negotiated per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MrpConfig {
    /// First retransmit interval when the peer is idle.
    pub idle_interval: Duration,
    /// First retransmit interval when the peer is active.
    pub active_interval: Duration,
    /// Random jitter added to the first interval.
    pub jitter: Duration,
    /// Retransmissions before the exchange gives up.
    pub max_retries: u32,
    /// Interval cap for the exponential backoff.
    pub max_interval: Duration,
    /// How long an owed ack may wait for a piggyback ride.
    pub ack_timeout: Duration,
}

impl Default for MrpConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_millis(500),
            active_interval: Duration::from_millis(300),
            jitter: Duration::from_millis(100),
            max_retries: 4,
            max_interval: Duration::from_secs(8),
            ack_timeout: Duration::from_millis(200),
        }
    }
}

/// An outbound message awaiting its acknowledgement.
#[derive(Debug, Clone)]
pub struct PendingRetransmit {
    /// Counter of the unacknowledged message.
    pub counter: u32,
    /// Retransmissions already performed.
    pub send_count: u32,
    /// When the next retransmission fires.
    pub next_at: Timestamp,
    /// Interval that produced `next_at`; doubles each attempt.
    pub interval: Duration,
}

/// Per-exchange reliability state.
#[derive(Debug, Clone, Default)]
pub struct ReliableContext {
    pending: Option<PendingRetransmit>,
    /// Counter of a received reliable message still owing an ack.
    owed_ack: Option<u32>,
    /// Deadline for a standalone ack if nothing piggybacks first.
    owed_ack_deadline: Option<Timestamp>,
}

impl ReliableContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an outbound message is still awaiting its ack.
    pub fn awaiting_ack(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending(&self) -> Option<&PendingRetransmit> {
        self.pending.as_ref()
    }

    /// Records a freshly sent reliable message.
    pub fn track(&mut self, counter: u32, now: Timestamp, config: &MrpConfig, jitter: Duration) {
        let interval = config.active_interval + jitter;
        self.pending = Some(PendingRetransmit {
            counter,
            send_count: 1,
            next_at: now + interval,
            interval,
        });
    }

    /// Handles an inbound ack counter. Returns true if it cleared the
    /// pending message.
    pub fn on_ack(&mut self, ack_counter: u32) -> bool {
        match &self.pending {
            Some(p) if p.counter == ack_counter => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    /// Marks an inbound reliable message as owing an ack.
    pub fn owe_ack(&mut self, counter: u32, now: Timestamp, config: &MrpConfig) {
        self.owed_ack = Some(counter);
        self.owed_ack_deadline = Some(now + config.ack_timeout);
    }

    /// Takes the owed ack for piggybacking onto an outbound message.
    pub fn take_owed_ack(&mut self) -> Option<u32> {
        self.owed_ack_deadline = None;
        self.owed_ack.take()
    }

    /// The owed ack if its standalone deadline has passed.
    pub fn standalone_ack_due(&self, now: Timestamp) -> Option<u32> {
        match (self.owed_ack, self.owed_ack_deadline) {
            (Some(counter), Some(deadline)) if now >= deadline => Some(counter),
            _ => None,
        }
    }

    /// Advances the retransmit schedule.
    ///
    /// Returns `Some(counter)` when the message should be retransmitted
    /// now, `None` otherwise. When the retry budget is exhausted the
    /// pending entry is dropped and `exhausted` is set.
    pub fn poll_retransmit(
        &mut self,
        now: Timestamp,
        config: &MrpConfig,
    ) -> RetransmitPoll {
        let Some(pending) = &mut self.pending else {
            return RetransmitPoll::Idle;
        };
        if now < pending.next_at {
            return RetransmitPoll::Waiting(pending.next_at);
        }
        if pending.send_count > config.max_retries {
            let counter = pending.counter;
            self.pending = None;
            return RetransmitPoll::Exhausted(counter);
        }
        pending.send_count += 1;
        pending.interval = (pending.interval * 2).min(config.max_interval);
        pending.next_at = now + pending.interval;
        RetransmitPoll::Retransmit(pending.counter)
    }

    /// The earliest instant this context needs attention.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        let retrans = self.pending.as_ref().map(|p| p.next_at);
        match (retrans, self.owed_ack_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Result of a retransmit poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetransmitPoll {
    /// Nothing pending.
    Idle,
    /// Pending, next action at the given instant.
    Waiting(Timestamp),
    /// Retransmit the message with this counter now.
    Retransmit(u32),
    /// Retry budget exhausted for this counter; the exchange fails.
    Exhausted(u32),
}
