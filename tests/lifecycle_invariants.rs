//! Lifecycle Invariant Tests
//!
//! Core invariants of the association state machine:
//! - Owner exclusivity per device
//! - Terminal, monotonic disassociation
//! - Suspend/restore credential round-trip
//! - Fan-out compensation after local commit

use std::sync::Arc;

use uuid::Uuid;

use pairkit::identity::InMemoryIdentityRegistry;
use pairkit::lifecycle::{Actor, EnginePolicy, ErrorClass, LifecycleEngine, LifecycleError};
use pairkit::model::{
    Association, AssociationStatus, AssociationType, DeviceIdentity, DeviceLifecycleState,
    DeviceSelector,
};
use pairkit::notify::RecordingNotifier;
use pairkit::observability::{AuditAction, MemoryAuditLog};
use pairkit::registry::InMemoryDeviceRegistry;
use pairkit::store::{AssociationStore, DeviceUnitOfWork, InMemoryAssociationStore};
use pairkit::subscription::InMemorySubscriptionWorkflow;

type Engine = LifecycleEngine<
    InMemoryAssociationStore,
    InMemoryDeviceRegistry,
    InMemoryIdentityRegistry,
    RecordingNotifier,
    InMemorySubscriptionWorkflow,
>;

fn engine() -> Engine {
    LifecycleEngine::new(
        InMemoryAssociationStore::new(),
        InMemoryDeviceRegistry::new(),
        InMemoryIdentityRegistry::new(),
        RecordingNotifier::new(),
        InMemorySubscriptionWorkflow::new(),
        EnginePolicy::default(),
    )
}

fn seed(engine: &Engine, device: DeviceIdentity) {
    engine.registry().add_device(device);
}

// =============================================================================
// Owner Exclusivity (at most one live owner row per device)
// =============================================================================

/// A second user can never obtain an owner row while one is live.
#[test]
fn test_owner_exclusivity_across_full_lifecycle() {
    let engine = engine();
    seed(&engine, DeviceIdentity::provisioned("SN-1"));
    let owner = Uuid::new_v4();
    let intruder = Uuid::new_v4();
    let selector = DeviceSelector::by_serial("SN-1");

    engine.associate(&selector, owner).unwrap();
    engine.activate(&selector, owner).unwrap();
    assert!(engine.associate(&selector, intruder).is_err());

    engine.suspend(&selector, Actor::user(owner)).unwrap();
    assert!(engine.associate(&selector, intruder).is_err());

    let rows = engine.store().dump().unwrap();
    let live_owner_rows = rows
        .iter()
        .filter(|r| r.kind == AssociationType::Owner && r.is_live())
        .count();
    assert_eq!(live_owner_rows, 1);
}

// =============================================================================
// Device State Gates
// =============================================================================

/// associate() on a STOLEN or FAULTY device always fails precondition and
/// creates no row.
#[test]
fn test_associate_rejects_defective_devices() {
    let engine = engine();
    seed(
        &engine,
        DeviceIdentity::provisioned("SN-STOLEN").with_state(DeviceLifecycleState::Stolen),
    );
    seed(
        &engine,
        DeviceIdentity::provisioned("SN-FAULTY").with_state(DeviceLifecycleState::Faulty),
    );

    for serial in ["SN-STOLEN", "SN-FAULTY"] {
        let err = engine
            .associate(&DeviceSelector::by_serial(serial), Uuid::new_v4())
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Precondition);
        assert!(matches!(err, LifecycleError::DeviceStateInvalid { .. }));
    }
    assert!(engine.store().dump().unwrap().is_empty());
}

/// Scenario: user associates a device by IMEI while it is PROVISIONED.
#[test]
fn test_associate_by_imei_moves_device_to_ready() {
    let engine = engine();
    seed(
        &engine,
        DeviceIdentity::provisioned("SN-1").with_imei("123"),
    );
    let user = Uuid::new_v4();

    let outcome = engine
        .associate(&DeviceSelector::by_imei("123"), user)
        .unwrap();

    assert_eq!(outcome.status, AssociationStatus::Initiated);
    assert_eq!(
        engine.registry().state_of("SN-1"),
        Some(DeviceLifecycleState::ReadyToActivate)
    );
}

// =============================================================================
// Terminal Disassociation
// =============================================================================

/// terminate() then associate() yields a fresh row; the terminal row keeps
/// its audit trail and is never reused.
#[test]
fn test_terminated_row_is_never_reused() {
    let engine = engine();
    seed(&engine, DeviceIdentity::provisioned("SN-1"));
    let user = Uuid::new_v4();
    let selector = DeviceSelector::by_serial("SN-1");

    let first = engine.associate(&selector, user).unwrap();
    engine.activate(&selector, user).unwrap();
    engine.terminate(&selector, Actor::user(user)).unwrap();

    // Terminate released the device; the same user may re-associate.
    let second = engine.associate(&selector, user).unwrap();

    assert_ne!(first.association_id, second.association_id);
    assert_eq!(second.status, AssociationStatus::Initiated);

    let rows = engine.store().dump().unwrap();
    let old = rows
        .iter()
        .find(|r| r.id == first.association_id)
        .unwrap();
    assert_eq!(old.status, AssociationStatus::Disassociated);
    assert!(old.audit.disassociated_on.is_some());
    assert_eq!(old.audit.disassociated_by, Some(user));
}

/// Two live owner rows is a data-integrity fault: terminate refuses to
/// guess and mutates nothing.
#[test]
fn test_duplicate_owner_rows_are_fatal() {
    let engine = engine();
    seed(
        &engine,
        DeviceIdentity::provisioned("SN-1").with_state(DeviceLifecycleState::Active),
    );
    let user = Uuid::new_v4();

    // Seed the corrupted shape directly: two live owner rows.
    let mut uow = engine.store().begin("SN-1").unwrap();
    uow.insert(Association::new_owner("SN-1", user, user)).unwrap();
    uow.insert(Association::new_owner("SN-1", Uuid::new_v4(), user))
        .unwrap();
    uow.commit().unwrap();

    let err = engine
        .terminate(&DeviceSelector::by_serial("SN-1"), Actor::user(user))
        .unwrap_err();

    assert!(matches!(err, LifecycleError::IntegrityFault { found: 2, .. }));
    assert!(err.is_fatal());
    let rows = engine.store().dump().unwrap();
    assert!(rows.iter().all(|r| r.is_live()));
}

// =============================================================================
// Suspend / Restore Round-Trip
// =============================================================================

/// suspend() then restore() round-trips ASSOCIATED -> SUSPENDED ->
/// ASSOCIATED, deregistering then re-registering credentials exactly once
/// each.
#[test]
fn test_suspend_restore_round_trip() {
    let engine = engine();
    seed(&engine, DeviceIdentity::provisioned("SN-1"));
    let user = Uuid::new_v4();
    let selector = DeviceSelector::by_serial("SN-1");

    engine.associate(&selector, user).unwrap();
    engine.activate(&selector, user).unwrap();
    assert_eq!(engine.identity().register_count(), 1);

    let suspended = engine.suspend(&selector, Actor::user(user)).unwrap();
    assert_eq!(suspended.status, AssociationStatus::Suspended);
    assert_eq!(engine.identity().deregister_count(), 1);

    let restored = engine.restore(&selector, Actor::user(user)).unwrap();
    assert_eq!(restored.status, AssociationStatus::Associated);
    assert_eq!(engine.identity().register_count(), 2);
    assert_eq!(engine.identity().deregister_count(), 1);
}

/// Suspended rows cannot be terminated into SUSPENDED again or restored
/// twice.
#[test]
fn test_restore_requires_suspended() {
    let engine = engine();
    seed(&engine, DeviceIdentity::provisioned("SN-1"));
    let user = Uuid::new_v4();
    let selector = DeviceSelector::by_serial("SN-1");

    engine.associate(&selector, user).unwrap();
    engine.activate(&selector, user).unwrap();

    let err = engine.restore(&selector, Actor::user(user)).unwrap_err();
    assert!(matches!(err, LifecycleError::UnexpectedStatus { .. }));
}

/// SUSPENDED may be terminated (it is a live status), and the device is
/// released.
#[test]
fn test_terminate_from_suspended() {
    let engine = engine();
    seed(&engine, DeviceIdentity::provisioned("SN-1"));
    let user = Uuid::new_v4();
    let selector = DeviceSelector::by_serial("SN-1");

    engine.associate(&selector, user).unwrap();
    engine.activate(&selector, user).unwrap();
    engine.suspend(&selector, Actor::user(user)).unwrap();

    let outcome = engine.terminate(&selector, Actor::user(user)).unwrap();
    assert_eq!(outcome.status, AssociationStatus::Disassociated);
    assert_eq!(
        engine.registry().state_of("SN-1"),
        Some(DeviceLifecycleState::Provisioned)
    );
}

// =============================================================================
// Fan-Out Compensation
// =============================================================================

/// Notification failure during terminate triggers the credential
/// re-registration compensation; the row stays DISASSOCIATED.
#[test]
fn test_terminate_compensates_on_notify_failure() {
    let engine = engine();
    seed(&engine, DeviceIdentity::provisioned("SN-1"));
    let user = Uuid::new_v4();
    let selector = DeviceSelector::by_serial("SN-1");

    let outcome = engine.associate(&selector, user).unwrap();
    engine.activate(&selector, user).unwrap();
    assert_eq!(engine.identity().register_count(), 1);

    engine.notifier().fail_next();
    let err = engine.terminate(&selector, Actor::user(user)).unwrap_err();

    match err {
        LifecycleError::FanOutFailed {
            operation,
            compensated,
            ..
        } => {
            assert_eq!(operation, "terminate");
            assert!(compensated);
        }
        other => panic!("expected FanOutFailed, got {other:?}"),
    }

    // Credentials were deregistered then re-registered.
    assert_eq!(engine.identity().deregister_count(), 1);
    assert_eq!(engine.identity().register_count(), 2);

    // The deliberate inconsistency: the row is already terminal.
    let row = engine
        .store()
        .find_by_id(outcome.association_id)
        .unwrap()
        .unwrap();
    assert_eq!(row.status, AssociationStatus::Disassociated);
}

/// Deregistration failure during terminate surfaces uncompensated; there is
/// nothing to re-register.
#[test]
fn test_terminate_deregister_failure_is_uncompensated() {
    let engine = engine();
    seed(&engine, DeviceIdentity::provisioned("SN-1"));
    let user = Uuid::new_v4();
    let selector = DeviceSelector::by_serial("SN-1");

    engine.associate(&selector, user).unwrap();
    engine.activate(&selector, user).unwrap();

    engine.identity().fail_next_deregister();
    let err = engine.terminate(&selector, Actor::user(user)).unwrap_err();

    assert!(matches!(
        err,
        LifecycleError::FanOutFailed {
            compensated: false,
            ..
        }
    ));
    assert_eq!(engine.identity().register_count(), 1);
}

// =============================================================================
// Audit Trail
// =============================================================================

/// Every mutating operation leaves request and outcome audit records.
#[test]
fn test_operations_are_audited() {
    let audit = Arc::new(MemoryAuditLog::new());
    let engine = engine().with_audit_log(Box::new(audit.clone()));
    seed(&engine, DeviceIdentity::provisioned("SN-1"));
    let user = Uuid::new_v4();

    engine
        .associate(&DeviceSelector::by_serial("SN-1"), user)
        .unwrap();
    let _ = engine.associate(&DeviceSelector::by_serial("SN-X"), user);

    let records = audit.records();
    let executed = records
        .iter()
        .filter(|r| r.action == AuditAction::OperationExecuted)
        .count();
    let rejected = records
        .iter()
        .filter(|r| r.action == AuditAction::OperationRejected)
        .count();
    assert_eq!(executed, 1);
    assert_eq!(rejected, 1);
    let rejection = records
        .iter()
        .find(|r| r.action == AuditAction::OperationRejected)
        .unwrap();
    assert_eq!(rejection.error_code.as_deref(), Some("ASSOC_DEVICE_NOT_FOUND"));
}
