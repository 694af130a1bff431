//! Integration tests for trellis-store.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use bytes::Bytes;
use trellis_model::{
    Access, AttributeSchema, ClusterBuilder, ClusterSchema, Conformance, Constraint, IntWidth,
    Quality, Scope, ValueType,
};
use trellis_storage::{MemoryStorage, StorageBackend, StorageContext, StorageError};
use trellis_tlv::TlvValue;
use trellis_types::{AttributeId, DataVersion, EndpointNumber};

use crate::{Datasource, IsolationLevel, StoreError, Transaction, TransactionOutcome};

const ON_OFF: AttributeId = AttributeId::new(0);
const LEVEL: AttributeId = AttributeId::new(1);
const FIXED_LABEL: AttributeId = AttributeId::new(2);

fn cluster() -> Arc<ClusterSchema> {
    ClusterBuilder::new("Lamp", 0x0006u32)
        .attribute(AttributeSchema {
            id: ON_OFF,
            name: "onOff".into(),
            ty: ValueType::Bool,
            default: Some(TlvValue::Bool(false)),
            quality: Quality::nonvolatile(),
            conformance: Conformance::Mandatory,
            access: Access::RW_VIEW_OPERATE,
            constraint: Constraint::default(),
        })
        .attribute(AttributeSchema {
            id: LEVEL,
            name: "level".into(),
            ty: ValueType::UInt(IntWidth::W8),
            default: Some(TlvValue::UnsignedInt(0)),
            quality: Quality::default(),
            conformance: Conformance::Mandatory,
            access: Access::RW_VIEW_OPERATE,
            constraint: Constraint::default(),
        })
        .attribute(AttributeSchema {
            id: FIXED_LABEL,
            name: "label".into(),
            ty: ValueType::Utf8,
            default: Some(TlvValue::utf8("lamp")),
            quality: Quality::default(),
            conformance: Conformance::Mandatory,
            access: Access::READ_VIEW,
            constraint: Constraint::default(),
        })
        .build()
        .unwrap()
}

fn datasource(persistence: Option<StorageContext>) -> Datasource {
    Datasource::new(
        EndpointNumber::new(1),
        Scope::new(cluster(), 0, []),
        persistence,
    )
}

// ============================================================================
// Commit semantics
// ============================================================================

#[test]
fn committed_write_bumps_version_once_and_fires_once() {
    let mut ds = datasource(None);
    let fired: Rc<RefCell<Vec<TlvValue>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&fired);
    ds.on_change(ON_OFF, move |change| {
        sink.borrow_mut().push(change.value.clone());
    });

    let v0 = ds.data_version();
    let mut tx = Transaction::read_write();
    let p = tx.join(&mut ds);
    tx.write(p, ON_OFF, TlvValue::Bool(true)).unwrap();
    let report = tx.resolve();

    assert_eq!(ds.data_version(), v0.bumped());
    assert_eq!(ds.get(ON_OFF), Some(&TlvValue::Bool(true)));
    assert_eq!(*fired.borrow(), vec![TlvValue::Bool(true)]);
    assert_eq!(report.changes.len(), 1);
    assert!(report.storage_errors.is_empty());
}

#[test]
fn multi_attribute_commit_bumps_version_once() {
    let mut ds = datasource(None);
    let v0 = ds.data_version();

    let mut tx = Transaction::read_write();
    let p = tx.join(&mut ds);
    tx.write(p, ON_OFF, TlvValue::Bool(true)).unwrap();
    tx.write(p, LEVEL, TlvValue::UnsignedInt(128)).unwrap();
    let report = tx.resolve();

    assert_eq!(ds.data_version(), v0.bumped());
    // Events in declaration order.
    let order: Vec<_> = report.changes.iter().map(|c| c.attribute).collect();
    assert_eq!(order, vec![ON_OFF, LEVEL]);
}

#[test]
fn unchanged_write_does_not_bump_version() {
    let mut ds = datasource(None);
    let v0 = ds.data_version();

    let mut tx = Transaction::read_write();
    let p = tx.join(&mut ds);
    tx.write(p, ON_OFF, TlvValue::Bool(false)).unwrap();
    let report = tx.resolve();

    assert_eq!(ds.data_version(), v0);
    assert!(report.changes.is_empty());
}

#[test]
fn version_is_strictly_monotonic_across_commits() {
    let mut ds = datasource(None);
    let mut last = ds.data_version();
    for i in 0..10u64 {
        let mut tx = Transaction::read_write();
        let p = tx.join(&mut ds);
        tx.write(p, LEVEL, TlvValue::UnsignedInt(i + 1)).unwrap();
        tx.resolve();
        let v = ds.data_version();
        assert_eq!(v, DataVersion::new(last.as_u32().wrapping_add(1)));
        last = v;
    }
}

// ============================================================================
// Atomicity and isolation
// ============================================================================

#[test]
fn failed_validation_leaves_overlay_and_store_untouched() {
    let mut ds = datasource(None);

    let mut tx = Transaction::read_write();
    let p = tx.join(&mut ds);
    tx.write(p, ON_OFF, TlvValue::Bool(true)).unwrap();
    let err = tx.write(p, LEVEL, TlvValue::UnsignedInt(256)).unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    // Reject the whole transaction: nothing is visible.
    tx.reject();
    assert_eq!(ds.get(ON_OFF), Some(&TlvValue::Bool(false)));
    assert_eq!(ds.data_version(), DataVersion::default());
}

#[test]
fn dropped_transaction_rolls_back() {
    let mut ds = datasource(None);
    {
        let mut tx = Transaction::read_write();
        let p = tx.join(&mut ds);
        tx.write(p, ON_OFF, TlvValue::Bool(true)).unwrap();
        // Dropped without resolve.
    }
    assert_eq!(ds.get(ON_OFF), Some(&TlvValue::Bool(false)));
}

#[test]
fn transaction_reads_see_own_overlay() {
    let mut ds = datasource(None);
    let mut tx = Transaction::read_write();
    let p = tx.join(&mut ds);
    tx.write(p, LEVEL, TlvValue::UnsignedInt(42)).unwrap();
    assert_eq!(tx.read(p, LEVEL), Some(TlvValue::UnsignedInt(42)));
}

#[test]
fn read_only_transaction_rejects_writes() {
    let mut ds = datasource(None);
    let mut tx = Transaction::new(IsolationLevel::ReadOnly);
    let p = tx.join(&mut ds);
    assert!(matches!(
        tx.write(p, ON_OFF, TlvValue::Bool(true)),
        Err(StoreError::ReadOnly)
    ));
}

#[test]
fn not_writable_attribute_is_rejected() {
    let mut ds = datasource(None);
    let mut tx = Transaction::read_write();
    let p = tx.join(&mut ds);
    assert!(matches!(
        tx.write(p, FIXED_LABEL, TlvValue::utf8("new")),
        Err(StoreError::NotWritable { .. })
    ));
}

#[test]
fn on_close_fires_exactly_once_per_outcome() {
    let mut ds = datasource(None);
    let outcomes: Rc<RefCell<Vec<TransactionOutcome>>> = Rc::new(RefCell::new(Vec::new()));

    {
        let sink = Rc::clone(&outcomes);
        let mut tx = Transaction::read_write();
        let p = tx.join(&mut ds);
        tx.on_close(move |o| sink.borrow_mut().push(o));
        tx.write(p, ON_OFF, TlvValue::Bool(true)).unwrap();
        tx.resolve();
    }
    {
        let sink = Rc::clone(&outcomes);
        let mut tx = Transaction::read_write();
        let _p = tx.join(&mut ds);
        tx.on_close(move |o| sink.borrow_mut().push(o));
        tx.reject();
    }

    assert_eq!(
        *outcomes.borrow(),
        vec![TransactionOutcome::Resolved, TransactionOutcome::Rejected]
    );
}

// ============================================================================
// Persistence
// ============================================================================

#[test]
fn nonvolatile_attributes_write_through_and_reload() {
    let backend = Rc::new(MemoryStorage::new());
    let ctx = StorageContext::root(backend.clone()).child("nodes").child("1");

    let mut ds = datasource(Some(ctx.clone()));
    let mut tx = Transaction::read_write();
    let p = tx.join(&mut ds);
    tx.write(p, ON_OFF, TlvValue::Bool(true)).unwrap();
    tx.write(p, LEVEL, TlvValue::UnsignedInt(7)).unwrap();
    tx.resolve();
    let version = ds.data_version();
    drop(ds);

    // A fresh datasource over the same context restores nonvolatile
    // state; volatile attributes fall back to the schema default.
    let restored = datasource(Some(ctx));
    assert_eq!(restored.get(ON_OFF), Some(&TlvValue::Bool(true)));
    assert_eq!(restored.get(LEVEL), Some(&TlvValue::UnsignedInt(0)));
    assert_eq!(restored.data_version(), version);
}

/// Backend that accepts reads but fails every write.
struct ReadOnlyBackend(MemoryStorage);

impl StorageBackend for ReadOnlyBackend {
    fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        self.0.get(key)
    }

    fn set(&self, key: &str, _value: Bytes) -> Result<(), StorageError> {
        Err(StorageError::Backend {
            key: key.to_string(),
            reason: "medium is write-protected".into(),
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.0.remove(key)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.0.keys_with_prefix(prefix)
    }
}

#[test]
fn storage_failure_still_commits_in_memory() {
    let ctx = StorageContext::root(Rc::new(ReadOnlyBackend(MemoryStorage::new())));
    let mut ds = datasource(Some(ctx));
    let v0 = ds.data_version();

    let mut tx = Transaction::read_write();
    let p = tx.join(&mut ds);
    tx.write(p, ON_OFF, TlvValue::Bool(true)).unwrap();
    let report = tx.resolve();

    // The in-memory version still advances; the failure is operator-visible.
    assert_eq!(ds.data_version(), v0.bumped());
    assert_eq!(ds.get(ON_OFF), Some(&TlvValue::Bool(true)));
    assert!(!report.storage_errors.is_empty());
}
