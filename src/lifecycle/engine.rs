//! # Lifecycle Engine
//!
//! One engine, parameterized by policy, replaces the original platform's
//! family of near-duplicate association services.
//!
//! ## Invariants
//! - ASSOC-1: At most one owner-type, non-disassociated association per device
//! - ASSOC-3: Disassociated rows are terminal and never reused
//! - ASSOC-4: Suspended is entered from and left to Associated only
//! - ASSOC-5: Multiple rows where exactly one is expected is a fatal
//!   data-integrity fault; the engine never guesses
//!
//! Every mutating operation runs its read-decide-write sequence inside a
//! per-device unit of work and commits before fanning out to the identity,
//! registry, and notification adapters. Fan-out failures after the local
//! commit surface as [`LifecycleError::FanOutFailed`]; the terminate path
//! additionally attempts the credential re-registration compensation.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::identity::{Credential, IdentityRegistrationAdapter};
use crate::model::{
    Association, AssociationStatus, AssociationType, DeviceIdentity, DeviceLifecycleState,
    DeviceSelector, LIVE_STATUSES,
};
use crate::notify::{LifecycleChange, NotificationAdapter};
use crate::observability::{
    log_event_with_fields, AuditAction, AuditLog, AuditOutcome, AuditRecord, Event, Logger,
    MemoryAuditLog, Severity,
};
use crate::ownership::{validate_window, OwnershipResolver};
use crate::registry::DeviceRegistryAdapter;
use crate::store::{AssociationStore, DeviceUnitOfWork};
use crate::subscription::{SubscriptionWorkflowAdapter, WorkflowState};

use super::actor::Actor;
use super::errors::{LifecycleError, LifecycleResult};
use super::policy::EnginePolicy;

/// Success payload of every mutating operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationOutcome {
    pub association_id: Uuid,
    pub status: AssociationStatus,
}

/// An association row enriched with its device identity.
///
/// The device attributes are read from the registry at query time and are
/// not authoritative here.
#[derive(Debug, Clone)]
pub struct AssociationDetails {
    pub association: Association,
    pub device: Option<DeviceIdentity>,
}

/// Parameters of a delegate() call.
#[derive(Debug, Clone)]
pub struct DelegationRequest {
    /// User receiving the delegation.
    pub user_id: Uuid,
    /// Requested delegate type.
    pub kind: AssociationType,
    /// Window start; defaults to now.
    pub valid_from: Option<DateTime<Utc>>,
    /// Window end; unset means open-ended.
    pub valid_until: Option<DateTime<Utc>>,
    /// Owner on whose behalf an administrator delegates. Ignored for
    /// non-admin callers.
    pub on_behalf_of: Option<Uuid>,
}

impl DelegationRequest {
    /// Open-ended delegation of the given type.
    pub fn open_ended(user_id: Uuid, kind: AssociationType) -> Self {
        Self {
            user_id,
            kind,
            valid_from: None,
            valid_until: None,
            on_behalf_of: None,
        }
    }
}

/// Partial update of a delegate row. Unset fields keep their value.
#[derive(Debug, Clone, Default)]
pub struct AssociationUpdate {
    pub kind: Option<AssociationType>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
}

/// The association lifecycle engine.
pub struct LifecycleEngine<S, R, I, N, W> {
    pub(crate) store: S,
    pub(crate) registry: R,
    pub(crate) identity: I,
    pub(crate) notifier: N,
    pub(crate) subscriptions: W,
    pub(crate) policy: EnginePolicy,
    pub(crate) resolver: OwnershipResolver,
    audit: Box<dyn AuditLog>,
}

impl<S, R, I, N, W> LifecycleEngine<S, R, I, N, W>
where
    S: AssociationStore,
    R: DeviceRegistryAdapter,
    I: IdentityRegistrationAdapter,
    N: NotificationAdapter,
    W: SubscriptionWorkflowAdapter,
{
    pub fn new(
        store: S,
        registry: R,
        identity: I,
        notifier: N,
        subscriptions: W,
        policy: EnginePolicy,
    ) -> Self {
        let resolver = OwnershipResolver::new(policy.many_to_many);
        Self {
            store,
            registry,
            identity,
            notifier,
            subscriptions,
            policy,
            resolver,
            audit: Box::new(MemoryAuditLog::new()),
        }
    }

    /// Replace the default in-memory audit log.
    pub fn with_audit_log(mut self, audit: Box<dyn AuditLog>) -> Self {
        self.audit = audit;
        self
    }

    pub fn policy(&self) -> &EnginePolicy {
        &self.policy
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn identity(&self) -> &I {
        &self.identity
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn subscriptions(&self) -> &W {
        &self.subscriptions
    }

    // =========================================================================
    // Mutating operations
    // =========================================================================

    /// Create an owner association for a device.
    ///
    /// The device must be PROVISIONED or PROVISIONED_ALIVE; on success a new
    /// INITIATED row exists and the device is requested READY_TO_ACTIVATE.
    pub fn associate(
        &self,
        selector: &DeviceSelector,
        user_id: Uuid,
    ) -> LifecycleResult<OperationOutcome> {
        self.audited("associate", Actor::user(user_id), |eng| {
            eng.do_associate(selector, user_id, false)
        })
    }

    /// Re-associate during a wipe. Exempt from the forbid-re-association
    /// guard: the wipe itself just terminated the rows it is re-creating.
    pub(crate) fn reassociate(
        &self,
        selector: &DeviceSelector,
        user_id: Uuid,
    ) -> LifecycleResult<OperationOutcome> {
        self.audited("reassociate", Actor::user(user_id), |eng| {
            eng.do_associate(selector, user_id, true)
        })
    }

    /// Complete an initiated association once the device reports alive.
    ///
    /// Registers fresh credentials, links the device id to the row, requests
    /// the device ACTIVE and moves the row to ASSOCIATED.
    pub fn activate(
        &self,
        selector: &DeviceSelector,
        user_id: Uuid,
    ) -> LifecycleResult<OperationOutcome> {
        self.audited("activate", Actor::user(user_id), |eng| {
            eng.do_activate(selector, user_id)
        })
    }

    /// Terminate an association.
    ///
    /// Owner rows get the full terminate: every live row of the device is
    /// disassociated, credentials are deregistered, the device is released
    /// back to PROVISIONED. Delegate rows are disassociated only.
    pub fn terminate(
        &self,
        selector: &DeviceSelector,
        actor: Actor,
    ) -> LifecycleResult<OperationOutcome> {
        self.audited("terminate", actor, |eng| eng.do_terminate(selector, actor))
    }

    /// Suspend the owner association: deregister credentials, keep the row.
    pub fn suspend(
        &self,
        selector: &DeviceSelector,
        actor: Actor,
    ) -> LifecycleResult<OperationOutcome> {
        self.audited("suspend", actor, |eng| eng.do_suspend(selector, actor))
    }

    /// Restore a suspended association: re-register credentials.
    pub fn restore(
        &self,
        selector: &DeviceSelector,
        actor: Actor,
    ) -> LifecycleResult<OperationOutcome> {
        self.audited("restore", actor, |eng| eng.do_restore(selector, actor))
    }

    /// Create a delegate association on a device whose owner the actor is
    /// (or, for administrators, the named owner).
    pub fn delegate(
        &self,
        selector: &DeviceSelector,
        request: &DelegationRequest,
        actor: Actor,
    ) -> LifecycleResult<OperationOutcome> {
        self.audited("delegate", actor, |eng| {
            eng.do_delegate(selector, request, actor)
        })
    }

    /// Update a delegate row's type or validity window. Owner only.
    pub fn update_association(
        &self,
        id: Uuid,
        update: &AssociationUpdate,
        actor: Actor,
    ) -> LifecycleResult<OperationOutcome> {
        self.audited("update_association", actor, |eng| {
            eng.do_update(id, update, actor)
        })
    }

    // =========================================================================
    // Read-only queries (no unit of work)
    // =========================================================================

    /// A row joined with its device identity.
    pub fn association_details(&self, id: Uuid) -> LifecycleResult<AssociationDetails> {
        let association = self
            .store
            .find_by_id(id)?
            .ok_or(LifecycleError::AssociationNotFound(id))?;
        let device = self
            .registry
            .lookup(&DeviceSelector::by_serial(&association.serial_number))
            .unwrap_or(None);
        Ok(AssociationDetails {
            association,
            device,
        })
    }

    /// A user's live associations.
    pub fn associations_for_user(&self, user_id: Uuid) -> LifecycleResult<Vec<Association>> {
        Ok(self.store.find_for_user(user_id, &LIVE_STATUSES)?)
    }

    /// Every row ever recorded for a device, terminal rows included.
    pub fn device_history(&self, selector: &DeviceSelector) -> LifecycleResult<Vec<Association>> {
        let device = self.resolve_device(selector)?;
        Ok(self.store.history_for_device(&device.serial_number)?)
    }

    // =========================================================================
    // Operation bodies
    // =========================================================================

    fn do_associate(
        &self,
        selector: &DeviceSelector,
        user_id: Uuid,
        exempt_reassociation_guard: bool,
    ) -> LifecycleResult<OperationOutcome> {
        let device = self.resolve_device(selector)?;
        let serial = device.serial_number.clone();

        if device.state.is_defective() || !device.state.is_associable() {
            return Err(LifecycleError::DeviceStateInvalid {
                serial_number: serial,
                state: device.state,
            });
        }

        let mut uow = self.store.begin(&serial)?;
        let live = uow.rows(&LIVE_STATUSES);

        if live.iter().any(|r| r.user_id == user_id) {
            uow.abort();
            return Err(LifecycleError::DuplicateAssociation {
                serial_number: serial,
            });
        }
        if live.iter().any(|r| r.kind.is_owner()) {
            uow.abort();
            return Err(LifecycleError::AlreadyAssociated {
                serial_number: serial,
            });
        }
        if !exempt_reassociation_guard && self.policy.forbid_reassociation {
            let has_prior = uow
                .all_rows()
                .iter()
                .any(|r| r.status == AssociationStatus::Disassociated);
            if has_prior {
                uow.abort();
                return Err(LifecycleError::ReassociationForbidden {
                    serial_number: serial,
                });
            }
        }

        let mut row = Association::new_owner(&serial, user_id, user_id);
        row.factory_data_ref = device.factory_data_ref.clone();
        let outcome = OperationOutcome {
            association_id: row.id,
            status: row.status,
        };
        if let Err(err) = uow.insert(row.clone()) {
            uow.abort();
            return Err(err.into());
        }
        uow.commit()?;

        // Fan-out: ready the device and its activation record.
        self.fan_out("associate", || {
            self.registry.set_state(
                &serial,
                DeviceLifecycleState::ReadyToActivate,
                "association initiated",
            )?;
            self.identity.create_activation(&serial)?;
            self.notifier
                .notify_lifecycle_change(&row, LifecycleChange::Initiated)?;
            Ok(())
        })?;

        log_event_with_fields(
            Event::AssociationInitiated,
            &[
                ("association_id", &row.id.to_string()),
                ("serial_number", &serial),
            ],
        );
        Ok(outcome)
    }

    fn do_activate(
        &self,
        selector: &DeviceSelector,
        user_id: Uuid,
    ) -> LifecycleResult<OperationOutcome> {
        let device = self.resolve_device(selector)?;
        let serial = device.serial_number.clone();

        if device.state != DeviceLifecycleState::ReadyToActivate {
            return Err(LifecycleError::DeviceStateInvalid {
                serial_number: serial,
                state: device.state,
            });
        }

        let mut uow = self.store.begin(&serial)?;
        let mut candidates: Vec<Association> = uow
            .rows(&[AssociationStatus::Initiated])
            .into_iter()
            .filter(|r| r.user_id == user_id)
            .collect();
        if candidates.len() > 1 {
            uow.abort();
            return Err(LifecycleError::IntegrityFault {
                serial_number: serial,
                found: candidates.len(),
            });
        }
        let Some(mut row) = candidates.pop() else {
            uow.abort();
            return Err(LifecycleError::NoLiveAssociation {
                serial_number: serial,
            });
        };

        // Register credentials before the local commit; a failure here
        // leaves no local change behind.
        let device_id = format!("dev-{}", Uuid::new_v4());
        let credential = Credential::generate();
        if let Err(err) = self.identity.register(&device_id, &credential) {
            uow.abort();
            return Err(err.into());
        }

        row.device_id = Some(device_id);
        row.status = AssociationStatus::Associated;
        row.mark_modified(user_id);
        let outcome = OperationOutcome {
            association_id: row.id,
            status: row.status,
        };
        if let Err(err) = uow.update(row.clone()) {
            uow.abort();
            return Err(err.into());
        }
        uow.commit()?;

        self.fan_out("activate", || {
            self.identity.complete_activation(&serial)?;
            self.registry
                .set_state(&serial, DeviceLifecycleState::Active, "association activated")?;
            self.notifier
                .notify_lifecycle_change(&row, LifecycleChange::Activated)?;
            Ok(())
        })?;

        log_event_with_fields(
            Event::AssociationActivated,
            &[
                ("association_id", &row.id.to_string()),
                ("serial_number", &serial),
            ],
        );
        Ok(outcome)
    }

    fn do_terminate(
        &self,
        selector: &DeviceSelector,
        actor: Actor,
    ) -> LifecycleResult<OperationOutcome> {
        let device = self.resolve_device(selector)?;
        let serial = device.serial_number.clone();

        if self.policy.require_subscription_complete {
            let state = self.subscriptions.workflow_state(&serial)?;
            if state != WorkflowState::Completed {
                return Err(LifecycleError::SubscriptionIncomplete {
                    serial_number: serial,
                });
            }
        }

        let mut uow = self.store.begin(&serial)?;
        let live = uow.rows(&LIVE_STATUSES);

        let owner_rows = live.iter().filter(|r| r.kind.is_owner()).count();
        if owner_rows > 1 {
            uow.abort();
            return Err(LifecycleError::IntegrityFault {
                serial_number: serial,
                found: owner_rows,
            });
        }

        let own: Vec<&Association> =
            live.iter().filter(|r| r.user_id == actor.user_id).collect();
        if own.len() > 1 {
            let found = own.len();
            uow.abort();
            return Err(LifecycleError::IntegrityFault {
                serial_number: serial,
                found,
            });
        }
        let target = match own.first() {
            Some(row) => (*row).clone(),
            // Administrators may terminate a device they hold no row for;
            // the owner row is the target then.
            None if actor.is_admin => match live.iter().find(|r| r.kind.is_owner()) {
                Some(row) => (*row).clone(),
                None => {
                    uow.abort();
                    return Err(LifecycleError::NoLiveAssociation {
                        serial_number: serial,
                    });
                }
            },
            None => {
                uow.abort();
                return Err(LifecycleError::NoLiveAssociation {
                    serial_number: serial,
                });
            }
        };

        let cascades = self.resolver.cascades_credentials(&target);

        let mut primary = target.clone();
        primary.mark_disassociated(actor.user_id);
        if let Err(err) = uow.update(primary.clone()) {
            uow.abort();
            return Err(err.into());
        }
        if cascades {
            // Full terminate ends every live row of the device.
            for other in live.iter().filter(|r| r.id != target.id) {
                let mut row = (*other).clone();
                row.mark_disassociated(actor.user_id);
                if let Err(err) = uow.update(row) {
                    uow.abort();
                    return Err(err.into());
                }
            }
        }
        uow.commit()?;

        let outcome = OperationOutcome {
            association_id: primary.id,
            status: primary.status,
        };

        // Fan-out after local commit. The row stays DISASSOCIATED whatever
        // happens below.
        let device_id = primary.device_id.clone();
        let mut deregistered = false;
        if cascades {
            if let Some(ref dev_id) = device_id {
                if let Err(err) = self.identity.deregister(dev_id) {
                    return Err(LifecycleError::FanOutFailed {
                        operation: "terminate",
                        compensated: false,
                        source: Box::new(err),
                    });
                }
                deregistered = true;
            }
            if let Err(err) = self.registry.set_state(
                &serial,
                DeviceLifecycleState::Provisioned,
                "association terminated",
            ) {
                return Err(self.compensate_terminate(
                    &serial,
                    device_id.as_deref(),
                    deregistered,
                    Box::new(err),
                ));
            }
        }
        if let Err(err) = self
            .notifier
            .notify_lifecycle_change(&primary, LifecycleChange::Terminated)
        {
            return Err(self.compensate_terminate(
                &serial,
                device_id.as_deref(),
                deregistered,
                Box::new(err),
            ));
        }

        log_event_with_fields(
            Event::AssociationTerminated,
            &[
                ("association_id", &primary.id.to_string()),
                ("serial_number", &serial),
            ],
        );
        Ok(outcome)
    }

    /// Best-effort compensation for a terminate fan-out failure: re-register
    /// the just-deregistered credentials, then surface the original failure.
    /// The association row is deliberately left DISASSOCIATED.
    fn compensate_terminate(
        &self,
        serial_number: &str,
        device_id: Option<&str>,
        deregistered: bool,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> LifecycleError {
        let mut compensated = false;
        if deregistered {
            if let Some(dev_id) = device_id {
                log_event_with_fields(
                    Event::CompensationAttempted,
                    &[("serial_number", serial_number), ("device_id", dev_id)],
                );
                compensated = self
                    .identity
                    .register(dev_id, &Credential::generate())
                    .is_ok();
                // Row is terminal but credentials are live again: record the
                // inconsistency so operators can reconcile.
                log_event_with_fields(
                    Event::InconsistencyRecorded,
                    &[
                        ("serial_number", serial_number),
                        ("credentials_restored", if compensated { "true" } else { "false" }),
                    ],
                );
                self.append_audit(
                    AuditRecord::new(AuditAction::CompensationAttempted, if compensated {
                        AuditOutcome::Success
                    } else {
                        AuditOutcome::Failed
                    })
                    .with_operation("terminate")
                    .with_serial(serial_number),
                );
            }
        }
        LifecycleError::FanOutFailed {
            operation: "terminate",
            compensated,
            source,
        }
    }

    fn do_suspend(
        &self,
        selector: &DeviceSelector,
        actor: Actor,
    ) -> LifecycleResult<OperationOutcome> {
        let device = self.resolve_device(selector)?;
        let serial = device.serial_number.clone();

        let mut uow = self.store.begin(&serial)?;
        let live = uow.rows(&LIVE_STATUSES);
        let owners: Vec<&Association> = live.iter().filter(|r| r.kind.is_owner()).collect();
        if owners.len() > 1 {
            let found = owners.len();
            uow.abort();
            return Err(LifecycleError::IntegrityFault {
                serial_number: serial,
                found,
            });
        }
        let Some(owner) = owners.first().map(|r| (*r).clone()) else {
            uow.abort();
            return Err(LifecycleError::NoLiveAssociation {
                serial_number: serial,
            });
        };
        if owner.status != AssociationStatus::Associated {
            uow.abort();
            return Err(LifecycleError::UnexpectedStatus {
                serial_number: serial,
                status: owner.status,
                expected: AssociationStatus::Associated,
            });
        }
        if owner.user_id != actor.user_id && !actor.is_admin {
            uow.abort();
            return Err(LifecycleError::NotOwner);
        }
        let Some(device_id) = owner.device_id.clone() else {
            uow.abort();
            return Err(LifecycleError::NoActiveRegistration {
                serial_number: serial,
            });
        };

        // Credentials go first; the row only flips once the device can no
        // longer authenticate.
        if let Err(err) = self.identity.deregister(&device_id) {
            uow.abort();
            return Err(err.into());
        }

        let mut row = owner;
        row.status = AssociationStatus::Suspended;
        row.mark_modified(actor.user_id);
        let outcome = OperationOutcome {
            association_id: row.id,
            status: row.status,
        };
        if let Err(err) = uow.update(row.clone()) {
            uow.abort();
            return Err(err.into());
        }
        uow.commit()?;

        if let Err(err) = self
            .notifier
            .notify_lifecycle_change(&row, LifecycleChange::Suspended)
        {
            return Err(LifecycleError::FanOutFailed {
                operation: "suspend",
                compensated: false,
                source: Box::new(err),
            });
        }

        log_event_with_fields(
            Event::AssociationSuspended,
            &[
                ("association_id", &row.id.to_string()),
                ("serial_number", &serial),
            ],
        );
        Ok(outcome)
    }

    fn do_restore(
        &self,
        selector: &DeviceSelector,
        actor: Actor,
    ) -> LifecycleResult<OperationOutcome> {
        let device = self.resolve_device(selector)?;
        let serial = device.serial_number.clone();

        let mut uow = self.store.begin(&serial)?;
        let suspended: Vec<Association> = uow.rows(&[AssociationStatus::Suspended]);
        if suspended.len() > 1 {
            let found = suspended.len();
            uow.abort();
            return Err(LifecycleError::IntegrityFault {
                serial_number: serial,
                found,
            });
        }
        let Some(row) = suspended.into_iter().next() else {
            uow.abort();
            return Err(LifecycleError::UnexpectedStatus {
                serial_number: serial,
                status: AssociationStatus::Associated,
                expected: AssociationStatus::Suspended,
            });
        };
        if row.user_id != actor.user_id && !actor.is_admin {
            uow.abort();
            return Err(LifecycleError::NotOwner);
        }
        let Some(device_id) = row.device_id.clone() else {
            uow.abort();
            return Err(LifecycleError::NoActiveRegistration {
                serial_number: serial,
            });
        };

        // Fresh material; the suspended credentials were deregistered.
        if let Err(err) = self.identity.register(&device_id, &Credential::generate()) {
            uow.abort();
            return Err(err.into());
        }

        let mut row = row;
        row.status = AssociationStatus::Associated;
        row.mark_modified(actor.user_id);
        let outcome = OperationOutcome {
            association_id: row.id,
            status: row.status,
        };
        if let Err(err) = uow.update(row.clone()) {
            uow.abort();
            return Err(err.into());
        }
        uow.commit()?;

        if let Err(err) = self
            .notifier
            .notify_lifecycle_change(&row, LifecycleChange::Restored)
        {
            return Err(LifecycleError::FanOutFailed {
                operation: "restore",
                compensated: false,
                source: Box::new(err),
            });
        }

        log_event_with_fields(
            Event::AssociationRestored,
            &[
                ("association_id", &row.id.to_string()),
                ("serial_number", &serial),
            ],
        );
        Ok(outcome)
    }

    fn do_delegate(
        &self,
        selector: &DeviceSelector,
        request: &DelegationRequest,
        actor: Actor,
    ) -> LifecycleResult<OperationOutcome> {
        if request.kind.is_owner() {
            return Err(LifecycleError::OwnerTypeNotDelegable);
        }
        if !self.policy.many_to_many || !self.policy.is_delegable(request.kind) {
            return Err(LifecycleError::DisallowedType(request.kind));
        }
        let valid_from = request.valid_from.unwrap_or_else(Utc::now);
        validate_window(valid_from, request.valid_until)
            .map_err(|v| LifecycleError::InvalidWindow(v.reason().to_string()))?;

        let device = self.resolve_device(selector)?;
        let serial = device.serial_number.clone();

        let mut uow = self.store.begin(&serial)?;
        let live = uow.rows(&LIVE_STATUSES);

        let owner_user = if actor.is_admin {
            request.on_behalf_of.unwrap_or(actor.user_id)
        } else {
            actor.user_id
        };
        let holds_ownership = live
            .iter()
            .any(|r| r.kind.is_owner() && r.user_id == owner_user);
        if !holds_ownership {
            uow.abort();
            return Err(LifecycleError::NotOwner);
        }
        if live.iter().any(|r| r.user_id == request.user_id) {
            uow.abort();
            return Err(LifecycleError::DuplicateAssociation {
                serial_number: serial,
            });
        }

        let row = Association::new_delegate(
            &serial,
            request.user_id,
            request.kind,
            valid_from,
            request.valid_until,
            actor.user_id,
        );
        let outcome = OperationOutcome {
            association_id: row.id,
            status: row.status,
        };
        if let Err(err) = uow.insert(row.clone()) {
            uow.abort();
            return Err(err.into());
        }
        uow.commit()?;

        if let Err(err) = self
            .notifier
            .notify_lifecycle_change(&row, LifecycleChange::DelegateCreated)
        {
            return Err(LifecycleError::FanOutFailed {
                operation: "delegate",
                compensated: false,
                source: Box::new(err),
            });
        }

        log_event_with_fields(
            Event::DelegateCreated,
            &[
                ("association_id", &row.id.to_string()),
                ("serial_number", &serial),
                ("type", request.kind.as_str()),
            ],
        );
        Ok(outcome)
    }

    fn do_update(
        &self,
        id: Uuid,
        update: &AssociationUpdate,
        actor: Actor,
    ) -> LifecycleResult<OperationOutcome> {
        if let Some(kind) = update.kind {
            if kind.is_owner() {
                return Err(LifecycleError::OwnerTypeNotDelegable);
            }
            if !self.policy.is_delegable(kind) {
                return Err(LifecycleError::DisallowedType(kind));
            }
        }

        let current = self
            .store
            .find_by_id(id)?
            .ok_or(LifecycleError::AssociationNotFound(id))?;
        if current.kind.is_owner() {
            return Err(LifecycleError::NotDelegateRow(id));
        }

        let serial = current.serial_number.clone();
        let mut uow = self.store.begin(&serial)?;
        let live = uow.rows(&LIVE_STATUSES);
        if !self.resolver.may_edit_delegate(&live, actor.user_id) {
            uow.abort();
            return Err(LifecycleError::NotOwner);
        }
        // Re-read inside the unit of work.
        let Some(mut row) = uow.all_rows().into_iter().find(|r| r.id == id) else {
            uow.abort();
            return Err(LifecycleError::AssociationNotFound(id));
        };
        if row.status == AssociationStatus::Disassociated {
            uow.abort();
            return Err(LifecycleError::AssociationClosed(id));
        }

        // Partial window updates validate against the existing opposite bound.
        let new_from = update.valid_from.unwrap_or(row.valid_from);
        let new_until = update.valid_until.or(row.valid_until);
        if let Err(v) = validate_window(new_from, new_until) {
            uow.abort();
            return Err(LifecycleError::InvalidWindow(v.reason().to_string()));
        }

        if let Some(kind) = update.kind {
            row.kind = kind;
        }
        row.valid_from = new_from;
        row.valid_until = new_until;
        row.mark_modified(actor.user_id);
        let outcome = OperationOutcome {
            association_id: row.id,
            status: row.status,
        };
        if let Err(err) = uow.update(row.clone()) {
            uow.abort();
            return Err(err.into());
        }
        uow.commit()?;

        if let Err(err) = self
            .notifier
            .notify_lifecycle_change(&row, LifecycleChange::DelegateUpdated)
        {
            return Err(LifecycleError::FanOutFailed {
                operation: "update_association",
                compensated: false,
                source: Box::new(err),
            });
        }

        log_event_with_fields(
            Event::DelegateUpdated,
            &[("association_id", &row.id.to_string())],
        );
        Ok(outcome)
    }

    // =========================================================================
    // Shared plumbing
    // =========================================================================

    /// Wrap a post-commit fan-out failure. The local state is already
    /// committed and stays as-is.
    fn fan_out(
        &self,
        operation: &'static str,
        body: impl FnOnce() -> LifecycleResult<()>,
    ) -> LifecycleResult<()> {
        body().map_err(|err| LifecycleError::FanOutFailed {
            operation,
            compensated: false,
            source: Box::new(err),
        })
    }

    /// Resolve a selector to exactly one device identity.
    pub(crate) fn resolve_device(
        &self,
        selector: &DeviceSelector,
    ) -> LifecycleResult<DeviceIdentity> {
        if selector.is_empty() {
            return Err(LifecycleError::EmptySelector);
        }
        let device = self.registry.lookup(selector)?;
        device.ok_or_else(|| LifecycleError::DeviceNotFound(selector.to_string()))
    }

    /// Run an operation body between audit records.
    pub(crate) fn audited<T>(
        &self,
        operation: &'static str,
        actor: Actor,
        body: impl FnOnce(&Self) -> LifecycleResult<T>,
    ) -> LifecycleResult<T> {
        self.append_audit(
            AuditRecord::new(AuditAction::OperationRequested, AuditOutcome::Pending)
                .with_operation(operation)
                .with_actor(actor.user_id),
        );
        let result = body(self);
        match &result {
            Ok(_) => self.append_audit(
                AuditRecord::new(AuditAction::OperationExecuted, AuditOutcome::Success)
                    .with_operation(operation)
                    .with_actor(actor.user_id),
            ),
            Err(err) if err.is_pre_mutation() => self.append_audit(
                AuditRecord::new(AuditAction::OperationRejected, AuditOutcome::Rejected)
                    .with_operation(operation)
                    .with_actor(actor.user_id)
                    .with_error(err.code()),
            ),
            Err(err) => self.append_audit(
                AuditRecord::new(AuditAction::OperationFailed, AuditOutcome::Failed)
                    .with_operation(operation)
                    .with_actor(actor.user_id)
                    .with_error(err.code()),
            ),
        }
        result
    }

    /// Audit failures must never fail the operation.
    pub(crate) fn append_audit(&self, record: AuditRecord) {
        if self.audit.append(&record).is_err() {
            Logger::log_stderr(Severity::Warn, "AUDIT_APPEND_FAILED", &[]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::InMemoryIdentityRegistry;
    use crate::notify::RecordingNotifier;
    use crate::registry::InMemoryDeviceRegistry;
    use crate::store::InMemoryAssociationStore;
    use crate::subscription::InMemorySubscriptionWorkflow;

    type TestEngine = LifecycleEngine<
        InMemoryAssociationStore,
        InMemoryDeviceRegistry,
        InMemoryIdentityRegistry,
        RecordingNotifier,
        InMemorySubscriptionWorkflow,
    >;

    fn engine_with_policy(policy: EnginePolicy) -> TestEngine {
        LifecycleEngine::new(
            InMemoryAssociationStore::new(),
            InMemoryDeviceRegistry::new(),
            InMemoryIdentityRegistry::new(),
            RecordingNotifier::new(),
            InMemorySubscriptionWorkflow::new(),
            policy,
        )
    }

    fn engine() -> TestEngine {
        engine_with_policy(EnginePolicy::default())
    }

    fn seed_device(engine: &TestEngine, serial: &str) {
        engine
            .registry
            .add_device(DeviceIdentity::provisioned(serial));
    }

    #[test]
    fn test_associate_creates_initiated_row() {
        let engine = engine();
        seed_device(&engine, "SN-1");
        let user = Uuid::new_v4();

        let outcome = engine
            .associate(&DeviceSelector::by_serial("SN-1"), user)
            .unwrap();

        assert_eq!(outcome.status, AssociationStatus::Initiated);
        assert_eq!(
            engine.registry.state_of("SN-1"),
            Some(DeviceLifecycleState::ReadyToActivate)
        );
    }

    #[test]
    fn test_associate_empty_selector_rejected() {
        let engine = engine();
        let err = engine
            .associate(&DeviceSelector::default(), Uuid::new_v4())
            .unwrap_err();
        assert!(matches!(err, LifecycleError::EmptySelector));
    }

    #[test]
    fn test_associate_unknown_device_rejected() {
        let engine = engine();
        let err = engine
            .associate(&DeviceSelector::by_serial("SN-X"), Uuid::new_v4())
            .unwrap_err();
        assert!(matches!(err, LifecycleError::DeviceNotFound(_)));
    }

    #[test]
    fn test_second_associate_rejected_by_device_state() {
        let engine = engine();
        seed_device(&engine, "SN-1");
        let user = Uuid::new_v4();
        let selector = DeviceSelector::by_serial("SN-1");

        engine.associate(&selector, user).unwrap();
        let err = engine.associate(&selector, user).unwrap_err();
        assert!(matches!(err, LifecycleError::DeviceStateInvalid { .. }));
    }

    #[test]
    fn test_duplicate_guard_fires_on_existing_live_row() {
        let engine = engine();
        seed_device(&engine, "SN-1");
        let user = Uuid::new_v4();
        let owner = Uuid::new_v4();

        // A live delegate row for the user; the device itself is still
        // PROVISIONED, so the state gate passes and the duplicate guard
        // must fire.
        let mut uow = engine.store.begin("SN-1").unwrap();
        uow.insert(Association::new_delegate(
            "SN-1",
            user,
            AssociationType::Driver,
            Utc::now(),
            None,
            owner,
        ))
        .unwrap();
        uow.commit().unwrap();

        let err = engine
            .associate(&DeviceSelector::by_serial("SN-1"), user)
            .unwrap_err();
        assert!(matches!(err, LifecycleError::DuplicateAssociation { .. }));
    }

    #[test]
    fn test_forbid_reassociation_policy() {
        let policy = EnginePolicy {
            forbid_reassociation: true,
            ..EnginePolicy::default()
        };
        let engine = engine_with_policy(policy);
        seed_device(&engine, "SN-1");
        let user = Uuid::new_v4();
        let selector = DeviceSelector::by_serial("SN-1");

        engine.associate(&selector, user).unwrap();
        engine.activate(&selector, user).unwrap();
        engine.terminate(&selector, Actor::user(user)).unwrap();

        let err = engine.associate(&selector, Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, LifecycleError::ReassociationForbidden { .. }));
    }

    #[test]
    fn test_activate_moves_row_to_associated() {
        let engine = engine();
        seed_device(&engine, "SN-1");
        let user = Uuid::new_v4();
        let selector = DeviceSelector::by_serial("SN-1");

        engine.associate(&selector, user).unwrap();
        let outcome = engine.activate(&selector, user).unwrap();

        assert_eq!(outcome.status, AssociationStatus::Associated);
        assert_eq!(
            engine.registry.state_of("SN-1"),
            Some(DeviceLifecycleState::Active)
        );
        assert_eq!(engine.identity.register_count(), 1);
    }

    #[test]
    fn test_suspend_requires_associated() {
        let engine = engine();
        seed_device(&engine, "SN-1");
        let user = Uuid::new_v4();
        let selector = DeviceSelector::by_serial("SN-1");
        engine.associate(&selector, user).unwrap();

        // Still INITIATED
        let err = engine.suspend(&selector, Actor::user(user)).unwrap_err();
        assert!(matches!(err, LifecycleError::UnexpectedStatus { .. }));
    }

    #[test]
    fn test_delegate_rejects_owner_type() {
        let engine = engine();
        seed_device(&engine, "SN-1");
        let owner = Uuid::new_v4();
        let selector = DeviceSelector::by_serial("SN-1");
        engine.associate(&selector, owner).unwrap();
        engine.activate(&selector, owner).unwrap();

        let request = DelegationRequest::open_ended(Uuid::new_v4(), AssociationType::Owner);
        let err = engine
            .delegate(&selector, &request, Actor::user(owner))
            .unwrap_err();
        assert!(matches!(err, LifecycleError::OwnerTypeNotDelegable));
    }

    #[test]
    fn test_delegate_requires_ownership() {
        let engine = engine();
        seed_device(&engine, "SN-1");
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let selector = DeviceSelector::by_serial("SN-1");
        engine.associate(&selector, owner).unwrap();
        engine.activate(&selector, owner).unwrap();

        let request = DelegationRequest::open_ended(Uuid::new_v4(), AssociationType::Driver);
        let err = engine
            .delegate(&selector, &request, Actor::user(stranger))
            .unwrap_err();
        assert!(matches!(err, LifecycleError::NotOwner));
    }

    #[test]
    fn test_admin_delegates_on_behalf_of_owner() {
        let engine = engine();
        seed_device(&engine, "SN-1");
        let owner = Uuid::new_v4();
        let admin = Uuid::new_v4();
        let selector = DeviceSelector::by_serial("SN-1");
        engine.associate(&selector, owner).unwrap();
        engine.activate(&selector, owner).unwrap();

        let request = DelegationRequest {
            on_behalf_of: Some(owner),
            ..DelegationRequest::open_ended(Uuid::new_v4(), AssociationType::Driver)
        };
        let outcome = engine
            .delegate(&selector, &request, Actor::admin(admin))
            .unwrap();
        assert_eq!(outcome.status, AssociationStatus::Associated);
    }

    #[test]
    fn test_update_window_against_existing_bound() {
        let engine = engine();
        seed_device(&engine, "SN-1");
        let owner = Uuid::new_v4();
        let selector = DeviceSelector::by_serial("SN-1");
        engine.associate(&selector, owner).unwrap();
        engine.activate(&selector, owner).unwrap();

        let until = Utc::now() + chrono::Duration::days(7);
        let request = DelegationRequest {
            valid_until: Some(until),
            ..DelegationRequest::open_ended(Uuid::new_v4(), AssociationType::Driver)
        };
        let delegate = engine
            .delegate(&selector, &request, Actor::user(owner))
            .unwrap();

        // New start after the existing end bound must be rejected.
        let bad_update = AssociationUpdate {
            valid_from: Some(until + chrono::Duration::days(1)),
            ..AssociationUpdate::default()
        };
        let err = engine
            .update_association(delegate.association_id, &bad_update, Actor::user(owner))
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidWindow(_)));
    }

    #[test]
    fn test_subscription_gate_blocks_terminate() {
        let policy = EnginePolicy {
            require_subscription_complete: true,
            ..EnginePolicy::default()
        };
        let engine = engine_with_policy(policy);
        seed_device(&engine, "SN-1");
        let user = Uuid::new_v4();
        let selector = DeviceSelector::by_serial("SN-1");
        engine.associate(&selector, user).unwrap();
        engine.activate(&selector, user).unwrap();

        let err = engine.terminate(&selector, Actor::user(user)).unwrap_err();
        assert!(matches!(err, LifecycleError::SubscriptionIncomplete { .. }));

        engine
            .subscriptions
            .set_state("SN-1", WorkflowState::Completed);
        engine.terminate(&selector, Actor::user(user)).unwrap();
    }

    #[test]
    fn test_association_details_joins_device() {
        let engine = engine();
        seed_device(&engine, "SN-1");
        let user = Uuid::new_v4();
        let selector = DeviceSelector::by_serial("SN-1");
        let outcome = engine.associate(&selector, user).unwrap();

        let details = engine.association_details(outcome.association_id).unwrap();
        assert_eq!(details.association.id, outcome.association_id);
        assert_eq!(
            details.device.map(|d| d.state),
            Some(DeviceLifecycleState::ReadyToActivate)
        );
    }
}
