//! Transactions.
//!
//! Any mutation of endpoint state happens inside a [`Transaction`].
//! Writes stage into a participant-local overlay; `resolve()` commits
//! participants in join order and `reject()` (or drop) discards every
//! overlay. `on_close` hooks fire exactly once either way.

use std::collections::BTreeMap;

use tracing::error;
use trellis_tlv::TlvValue;
use trellis_types::AttributeId;

use crate::datasource::{AttributeChange, Datasource};
use crate::StoreError;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Reads see the local overlay over live committed state.
    #[default]
    ReadWrite,
    /// Writes are rejected.
    ReadOnly,
    /// Reads see the committed state captured at join time.
    Snapshot,
}

/// How a transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    Resolved,
    Rejected,
}

/// What a resolve committed.
#[derive(Debug, Default)]
pub struct CommitReport {
    /// Every change event fired, in firing order.
    pub changes: Vec<AttributeChange>,
    /// Nonvolatile write-through failures. The in-memory state is
    /// committed regardless; these are operator-visible only.
    pub storage_errors: Vec<trellis_storage::StorageError>,
}

/// Handle to a datasource that joined a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParticipantId(usize);

struct Participant<'a> {
    ds: &'a mut Datasource,
    overlay: BTreeMap<AttributeId, TlvValue>,
    snapshot: Option<BTreeMap<AttributeId, TlvValue>>,
}

/// A unit of atomic mutation across one or more datasources.
pub struct Transaction<'a> {
    isolation: IsolationLevel,
    participants: Vec<Participant<'a>>,
    on_close: Vec<Box<dyn FnOnce(TransactionOutcome) + 'a>>,
    finished: bool,
}

impl<'a> Transaction<'a> {
    pub fn new(isolation: IsolationLevel) -> Self {
        Self {
            isolation,
            participants: Vec::new(),
            on_close: Vec::new(),
            finished: false,
        }
    }

    /// Shorthand for the common read-write transaction.
    pub fn read_write() -> Self {
        Self::new(IsolationLevel::ReadWrite)
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Adds a datasource to the transaction.
    pub fn join(&mut self, ds: &'a mut Datasource) -> ParticipantId {
        let snapshot = (self.isolation == IsolationLevel::Snapshot).then(|| ds.committed().clone());
        self.participants.push(Participant {
            ds,
            overlay: BTreeMap::new(),
            snapshot,
        });
        ParticipantId(self.participants.len() - 1)
    }

    /// Registers a hook that fires exactly once when the transaction
    /// closes, with the outcome.
    pub fn on_close(&mut self, hook: impl FnOnce(TransactionOutcome) + 'a) {
        self.on_close.push(Box::new(hook));
    }

    /// Reads an attribute through the transaction.
    pub fn read(&self, participant: ParticipantId, attribute: AttributeId) -> Option<TlvValue> {
        let p = &self.participants[participant.0];
        if let Some(staged) = p.overlay.get(&attribute) {
            return Some(staged.clone());
        }
        match &p.snapshot {
            Some(snapshot) => snapshot.get(&attribute).cloned(),
            None => p.ds.get(attribute).cloned(),
        }
    }

    /// Stages a validated write into the participant's overlay.
    ///
    /// The value is normalized (nullable sentinel to null) and validated
    /// against the attribute schema; failures leave the overlay intact.
    pub fn write(
        &mut self,
        participant: ParticipantId,
        attribute: AttributeId,
        value: TlvValue,
    ) -> Result<(), StoreError> {
        if self.isolation == IsolationLevel::ReadOnly {
            return Err(StoreError::ReadOnly);
        }
        let p = &mut self.participants[participant.0];
        let cluster = p.ds.cluster_id();

        if !p.ds.scope().has_attribute(attribute) {
            return Err(StoreError::UnknownAttribute { cluster, attribute });
        }
        let schema = p
            .ds
            .scope()
            .cluster()
            .attribute(attribute)
            .expect("present in scope")
            .clone();
        if schema.access.write.is_none() {
            return Err(StoreError::NotWritable { cluster, attribute });
        }

        let value = p.ds.supervisor().normalized(&schema, value);
        p.ds.supervisor().validate_attribute(&schema, &value)?;
        p.overlay.insert(attribute, value);
        Ok(())
    }

    /// Stages a structural patch of the current value.
    pub fn patch(
        &mut self,
        participant: ParticipantId,
        attribute: AttributeId,
        patch: TlvValue,
    ) -> Result<(), StoreError> {
        if self.isolation == IsolationLevel::ReadOnly {
            return Err(StoreError::ReadOnly);
        }
        let target = self.read(participant, attribute);
        let p = &mut self.participants[participant.0];
        let cluster = p.ds.cluster_id();
        let schema = p
            .ds
            .scope()
            .cluster()
            .attribute(attribute)
            .ok_or(StoreError::UnknownAttribute { cluster, attribute })?
            .clone();

        let target = target.unwrap_or_else(|| p.ds.supervisor().default_of(&schema));
        let patched = p.ds.supervisor().patch(&schema, &target, patch)?;
        p.overlay.insert(attribute, patched);
        Ok(())
    }

    /// Commits every participant, in join order.
    pub fn resolve(mut self) -> CommitReport {
        let mut report = CommitReport::default();
        let mut fired: Vec<(usize, Vec<AttributeChange>)> = Vec::new();

        for (i, p) in self.participants.iter_mut().enumerate() {
            let overlay = std::mem::take(&mut p.overlay);
            if overlay.is_empty() {
                continue;
            }
            let (events, storage_errors) = p.ds.apply_commit(overlay);
            for e in &storage_errors {
                error!(error = %e, "nonvolatile write-through failed");
            }
            report.storage_errors.extend(storage_errors);
            fired.push((i, events));
        }

        // Change events fire after every participant committed.
        for (i, events) in fired {
            self.participants[i].ds.fire(&events);
            report.changes.extend(events);
        }

        self.finish(TransactionOutcome::Resolved);
        report
    }

    /// Discards every overlay with no externally observable effect.
    pub fn reject(mut self) {
        for p in &mut self.participants {
            p.overlay.clear();
        }
        self.finish(TransactionOutcome::Rejected);
    }

    fn finish(&mut self, outcome: TransactionOutcome) {
        if self.finished {
            return;
        }
        self.finished = true;
        for hook in self.on_close.drain(..) {
            hook(outcome);
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        // A dropped transaction is a rollback; hooks still fire once.
        self.finish(TransactionOutcome::Rejected);
    }
}
