//! Wipe-Data Orchestrator Tests
//!
//! Exact-subset gating, per-device all-or-nothing semantics, owner
//! re-association, delegation recreation, and anonymization.

use uuid::Uuid;

use pairkit::identity::InMemoryIdentityRegistry;
use pairkit::lifecycle::{
    Actor, DelegationRequest, EnginePolicy, LifecycleEngine, LifecycleError,
};
use pairkit::model::{
    AssociationStatus, AssociationType, DeviceIdentity, DeviceLifecycleState, DeviceSelector,
};
use pairkit::notify::RecordingNotifier;
use pairkit::registry::InMemoryDeviceRegistry;
use pairkit::saga::WipeOrchestrator;
use pairkit::store::{AssociationStore, InMemoryAssociationStore};
use pairkit::subscription::{InMemorySubscriptionWorkflow, WorkflowState};

type Engine = LifecycleEngine<
    InMemoryAssociationStore,
    InMemoryDeviceRegistry,
    InMemoryIdentityRegistry,
    RecordingNotifier,
    InMemorySubscriptionWorkflow,
>;

fn engine_with_policy(policy: EnginePolicy) -> Engine {
    LifecycleEngine::new(
        InMemoryAssociationStore::new(),
        InMemoryDeviceRegistry::new(),
        InMemoryIdentityRegistry::new(),
        RecordingNotifier::new(),
        InMemorySubscriptionWorkflow::new(),
        policy,
    )
}

fn engine() -> Engine {
    engine_with_policy(EnginePolicy::default())
}

/// Associate and activate `serial` for `user`.
fn establish(engine: &Engine, serial: &str, user: Uuid) {
    engine
        .registry()
        .add_device(DeviceIdentity::provisioned(serial));
    let selector = DeviceSelector::by_serial(serial);
    engine.associate(&selector, user).unwrap();
    engine.activate(&selector, user).unwrap();
}

// =============================================================================
// Preconditions
// =============================================================================

/// A user with no associated devices has nothing to wipe.
#[test]
fn test_wipe_nothing_to_wipe() {
    let engine = engine();
    let err = WipeOrchestrator::new(&engine)
        .run(Uuid::new_v4(), None)
        .unwrap_err();
    assert!(matches!(err, LifecycleError::NothingToWipe(_)));
}

/// A serial subset not matching the user's live set fails the whole call
/// and mutates no row.
#[test]
fn test_wipe_subset_mismatch_mutates_nothing() {
    let engine = engine();
    let user = Uuid::new_v4();
    establish(&engine, "SN-1", user);
    establish(&engine, "SN-2", user);

    let subset = vec!["SN-1".to_string()];
    let err = WipeOrchestrator::new(&engine)
        .run(user, Some(&subset))
        .unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::WipeSubsetMismatch {
            expected: 2,
            supplied: 1
        }
    ));

    let rows = engine.store().dump().unwrap();
    assert!(rows.iter().all(|r| r.status == AssociationStatus::Associated));
}

/// Duplicates in the subset are collapsed before the exact-match check.
#[test]
fn test_wipe_subset_deduplicated() {
    let engine = engine();
    let user = Uuid::new_v4();
    establish(&engine, "SN-1", user);

    let subset = vec!["SN-1".to_string(), "SN-1".to_string()];
    WipeOrchestrator::new(&engine)
        .run(user, Some(&subset))
        .unwrap();
}

// =============================================================================
// Owner Wipe
// =============================================================================

/// An owner wipe terminates, re-associates, re-activates, and anonymizes
/// the terminal rows.
#[test]
fn test_owner_wipe_reassociates_device() {
    let engine = engine();
    let user = Uuid::new_v4();
    establish(&engine, "SN-1", user);
    let old_id = engine.store().dump().unwrap().pop().unwrap().id;

    let outcome = WipeOrchestrator::new(&engine).run(user, None).unwrap();
    assert_eq!(outcome.devices, 1);
    assert_eq!(outcome.reassociated, 1);
    assert_eq!(outcome.anonymized, 1);

    // Fresh association is live and activated.
    let live = engine.associations_for_user(user).unwrap();
    assert_eq!(live.len(), 1);
    assert_ne!(live[0].id, old_id);
    assert_eq!(live[0].status, AssociationStatus::Associated);
    assert_eq!(
        engine.registry().state_of("SN-1"),
        Some(DeviceLifecycleState::Active)
    );

    // Old row is terminal and unresolvable.
    let old = engine.store().find_by_id(old_id).unwrap().unwrap();
    assert!(old.is_anonymized());
    assert_eq!(old.status, AssociationStatus::Disassociated);
    assert_eq!(old.user_id, Uuid::nil());
}

/// Prior delegate rows are recreated against the new association.
#[test]
fn test_wipe_recreates_delegations() {
    let engine = engine();
    let owner = Uuid::new_v4();
    let driver = Uuid::new_v4();
    establish(&engine, "SN-1", owner);
    engine
        .delegate(
            &DeviceSelector::by_serial("SN-1"),
            &DelegationRequest::open_ended(driver, AssociationType::Driver),
            Actor::user(owner),
        )
        .unwrap();

    let outcome = WipeOrchestrator::new(&engine).run(owner, None).unwrap();
    // Owner row and delegate row both anonymized
    assert_eq!(outcome.anonymized, 2);

    let driver_rows = engine.associations_for_user(driver).unwrap();
    assert_eq!(driver_rows.len(), 1);
    assert_eq!(driver_rows[0].kind, AssociationType::Driver);
    assert_eq!(driver_rows[0].status, AssociationStatus::Associated);
}

/// Wiping several devices processes each of them.
#[test]
fn test_wipe_covers_all_devices() {
    let engine = engine();
    let user = Uuid::new_v4();
    establish(&engine, "SN-1", user);
    establish(&engine, "SN-2", user);
    establish(&engine, "SN-3", user);

    let outcome = WipeOrchestrator::new(&engine).run(user, None).unwrap();
    assert_eq!(outcome.devices, 3);
    assert_eq!(outcome.reassociated, 3);
    assert_eq!(engine.associations_for_user(user).unwrap().len(), 3);
}

// =============================================================================
// Delegate Wipe
// =============================================================================

/// A delegate's wipe ends only their own row and does not re-associate.
#[test]
fn test_delegate_wipe_is_scoped() {
    let engine = engine();
    let owner = Uuid::new_v4();
    let driver = Uuid::new_v4();
    establish(&engine, "SN-1", owner);
    engine
        .delegate(
            &DeviceSelector::by_serial("SN-1"),
            &DelegationRequest::open_ended(driver, AssociationType::Driver),
            Actor::user(owner),
        )
        .unwrap();

    let outcome = WipeOrchestrator::new(&engine).run(driver, None).unwrap();
    assert_eq!(outcome.devices, 1);
    assert_eq!(outcome.reassociated, 0);
    assert_eq!(outcome.anonymized, 1);

    // Owner association untouched
    let owner_rows = engine.associations_for_user(owner).unwrap();
    assert_eq!(owner_rows.len(), 1);
    assert_eq!(owner_rows[0].status, AssociationStatus::Associated);
    assert!(engine.associations_for_user(driver).unwrap().is_empty());
}

// =============================================================================
// All-or-Nothing
// =============================================================================

/// A failure on any device aborts the whole call before anonymization;
/// already-terminated devices stay terminated for the re-run.
#[test]
fn test_wipe_aborts_on_first_failure() {
    let policy = EnginePolicy {
        require_subscription_complete: true,
        ..EnginePolicy::default()
    };
    let engine = engine_with_policy(policy);
    let user = Uuid::new_v4();
    establish(&engine, "SN-1", user);
    establish(&engine, "SN-2", user);
    // Only the first device's workflow is completed; terminating SN-2
    // will be rejected.
    engine
        .subscriptions()
        .set_state("SN-1", WorkflowState::Completed);

    let err = WipeOrchestrator::new(&engine).run(user, None).unwrap_err();
    assert!(matches!(err, LifecycleError::SubscriptionIncomplete { .. }));

    // No row was anonymized.
    let rows = engine.store().dump().unwrap();
    assert!(rows.iter().all(|r| !r.is_anonymized()));
    // SN-2 is untouched.
    assert!(rows
        .iter()
        .any(|r| r.serial_number == "SN-2" && r.status == AssociationStatus::Associated));
}
