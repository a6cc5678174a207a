//! # Device Replacement Saga
//!
//! Swaps a defective device for a freshly provisioned one while keeping the
//! association and its logical identity.
//!
//! Step order is fixed:
//! 1. Validate the current device (ownership, defect state)
//! 2. Validate the replacement device (PROVISIONED, unambiguous)
//! 3. Locate the active credential registration (absence is fatal)
//! 4. Disable the current activation record, ready one for the replacement
//! 5. Re-point the association's device linkage
//! 6. Activate the replacement, optionally release the current device
//! 7. Swap credentials, optionally sync the vehicle registry and push a
//!    reset to the old device
//!
//! Steps 1-3 mutate nothing. From step 4 onward there is no rollback: a
//! failure surfaces with the state as it stands, and the order guarantees
//! the replacement is at least activation-ready.

use uuid::Uuid;

use crate::identity::{Credential, IdentityRegistrationAdapter};
use crate::lifecycle::{Actor, LifecycleEngine, LifecycleError, LifecycleResult};
use crate::model::{
    Association, AssociationStatus, DeviceLifecycleState, DeviceSelector, ReplacementOperation,
};
use crate::notify::NotificationAdapter;
use crate::observability::{log_event_with_fields, Event};
use crate::registry::DeviceRegistryAdapter;
use crate::store::{AssociationStore, DeviceUnitOfWork};
use crate::subscription::SubscriptionWorkflowAdapter;

/// Success payload of a replacement.
#[derive(Debug, Clone)]
pub struct ReplacementOutcome {
    pub association_id: Uuid,
    pub replaced_serial: String,
    pub replacement_serial: String,
    /// Device id the fresh credentials were registered under.
    pub device_id: String,
}

/// Replacement saga over a lifecycle engine.
pub struct ReplacementSaga<'e, S, R, I, N, W> {
    engine: &'e LifecycleEngine<S, R, I, N, W>,
}

impl<'e, S, R, I, N, W> ReplacementSaga<'e, S, R, I, N, W>
where
    S: AssociationStore,
    R: DeviceRegistryAdapter,
    I: IdentityRegistrationAdapter,
    N: NotificationAdapter,
    W: SubscriptionWorkflowAdapter,
{
    pub fn new(engine: &'e LifecycleEngine<S, R, I, N, W>) -> Self {
        Self { engine }
    }

    /// Replace `current` with `replacement` for the acting user.
    pub fn run(
        &self,
        current: &DeviceSelector,
        replacement: &DeviceSelector,
        actor: Actor,
    ) -> LifecycleResult<ReplacementOutcome> {
        self.engine
            .audited("replace", actor, |_| self.execute(current, replacement, actor))
    }

    fn execute(
        &self,
        current_selector: &DeviceSelector,
        replacement_selector: &DeviceSelector,
        actor: Actor,
    ) -> LifecycleResult<ReplacementOutcome> {
        let engine = self.engine;

        // Step 1: current device and its owner association.
        let current = engine.resolve_device(current_selector)?;
        if engine.policy.replacement_requires_defect && !current.state.is_defective() {
            return Err(LifecycleError::ReplacementNotDefective {
                serial_number: current.serial_number.clone(),
                state: current.state,
            });
        }
        let association = self.owned_association(&current.serial_number, actor)?;

        // Step 2: replacement device.
        let replacement = engine.resolve_device(replacement_selector)?;
        if replacement.state != DeviceLifecycleState::Provisioned {
            return Err(LifecycleError::ReplacementNotProvisioned {
                serial_number: replacement.serial_number.clone(),
                state: replacement.state,
            });
        }

        // Step 3: the current device's active credential registration.
        let old_device_id = association.device_id.clone().ok_or_else(|| {
            LifecycleError::NoActiveRegistration {
                serial_number: current.serial_number.clone(),
            }
        })?;
        if engine.identity.active_registration(&old_device_id)?.is_none() {
            return Err(LifecycleError::NoActiveRegistration {
                serial_number: current.serial_number.clone(),
            });
        }

        let op = ReplacementOperation::new(current, replacement, actor.user_id);
        log_event_with_fields(
            Event::ReplacementStarted,
            &[
                ("operation_id", &op.id.to_string()),
                ("current", &op.current.serial_number),
                ("replacement", &op.replacement.serial_number),
            ],
        );

        // Steps 4-7 mutate; a failure surfaces with no rollback.
        let result = self.mutate(&op, association, &old_device_id, actor);
        if let Err(ref err) = result {
            log_event_with_fields(
                Event::ReplacementFailed,
                &[
                    ("operation_id", &op.id.to_string()),
                    ("error", err.code()),
                ],
            );
        }
        result
    }

    /// Steps 4-7.
    fn mutate(
        &self,
        op: &ReplacementOperation,
        association: Association,
        old_device_id: &str,
        actor: Actor,
    ) -> LifecycleResult<ReplacementOutcome> {
        let engine = self.engine;
        let current_serial = op.current.serial_number.as_str();
        let replacement_serial = op.replacement.serial_number.as_str();

        // Step 4: activation records change hands.
        engine.identity.disable_activation(current_serial)?;
        engine.identity.create_activation(replacement_serial)?;

        // Step 5: re-point the association's device linkage.
        let new_device_id = format!("dev-{}", Uuid::new_v4());
        let mut row = association;
        let mut uow = engine.store.begin(current_serial)?;
        row.serial_number = replacement_serial.to_string();
        row.factory_data_ref = op.replacement.factory_data_ref.clone();
        row.device_id = Some(new_device_id.clone());
        row.mark_modified(actor.user_id);
        if let Err(err) = uow.update(row.clone()) {
            uow.abort();
            return Err(err.into());
        }
        uow.commit()?;
        log_event_with_fields(
            Event::ReplacementLinkageRepointed,
            &[
                ("association_id", &row.id.to_string()),
                ("replacement", replacement_serial),
            ],
        );

        // Step 6: device states.
        engine.registry.set_state(
            replacement_serial,
            DeviceLifecycleState::Active,
            "replacement activated",
        )?;
        if engine.policy.release_replaced_device {
            engine.registry.set_state(
                current_serial,
                DeviceLifecycleState::Provisioned,
                "device replaced",
            )?;
        }

        // Step 7: credential swap and optional downstream updates.
        engine.identity.deregister(old_device_id)?;
        engine
            .identity
            .register(&new_device_id, &Credential::generate())?;
        if engine.policy.sync_vehicle_registry {
            if let Some(ref vin) = row.vin {
                engine
                    .registry
                    .update_vehicle_linkage(replacement_serial, vin)?;
            }
        }
        if engine.policy.reset_replaced_device {
            engine.notifier.notify_device_reset(current_serial)?;
        }

        log_event_with_fields(
            Event::ReplacementCompleted,
            &[
                ("operation_id", &op.id.to_string()),
                ("association_id", &row.id.to_string()),
            ],
        );
        Ok(ReplacementOutcome {
            association_id: row.id,
            replaced_serial: current_serial.to_string(),
            replacement_serial: replacement_serial.to_string(),
            device_id: new_device_id,
        })
    }

    /// The acting user's owner association on the device, in ASSOCIATED
    /// state. Administrators fall back to the owner row.
    fn owned_association(
        &self,
        serial_number: &str,
        actor: Actor,
    ) -> LifecycleResult<Association> {
        let engine = self.engine;
        let live: Vec<Association> = engine
            .store
            .history_for_device(serial_number)?
            .into_iter()
            .filter(|r| r.is_live())
            .collect();

        let own: Vec<&Association> = live
            .iter()
            .filter(|r| r.user_id == actor.user_id)
            .collect();
        if own.len() > 1 {
            return Err(LifecycleError::IntegrityFault {
                serial_number: serial_number.to_string(),
                found: own.len(),
            });
        }
        let row = match own.first() {
            Some(row) => (*row).clone(),
            None if actor.is_admin => live
                .iter()
                .find(|r| r.kind.is_owner())
                .cloned()
                .ok_or_else(|| LifecycleError::NoLiveAssociation {
                    serial_number: serial_number.to_string(),
                })?,
            None => {
                return Err(LifecycleError::NoLiveAssociation {
                    serial_number: serial_number.to_string(),
                })
            }
        };

        if engine.resolver.cascades_credentials(&row) {
            if row.status != AssociationStatus::Associated {
                return Err(LifecycleError::UnexpectedStatus {
                    serial_number: serial_number.to_string(),
                    status: row.status,
                    expected: AssociationStatus::Associated,
                });
            }
            Ok(row)
        } else {
            Err(LifecycleError::NotOwner)
        }
    }
}
