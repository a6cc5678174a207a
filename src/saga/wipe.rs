//! # Wipe-Data Bulk Orchestrator
//!
//! Re-applies the lifecycle engine across every device a user is associated
//! with: terminate, re-associate and re-activate (owners), recreate
//! delegations, then anonymize the terminal rows.
//!
//! All-or-nothing: any per-device failure aborts the whole call. Devices
//! already processed stay terminated; the call is designed to be re-run
//! from scratch once the cause is fixed.

use std::collections::{BTreeMap, BTreeSet};

use uuid::Uuid;

use crate::identity::IdentityRegistrationAdapter;
use crate::lifecycle::{
    Actor, DelegationRequest, LifecycleEngine, LifecycleError, LifecycleResult,
};
use crate::model::{Association, AssociationStatus, DeviceSelector};
use crate::notify::NotificationAdapter;
use crate::observability::{log_event_with_fields, Event};
use crate::registry::DeviceRegistryAdapter;
use crate::store::{AssociationStore, DeviceUnitOfWork};
use crate::subscription::SubscriptionWorkflowAdapter;

/// Success payload of a wipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WipeOutcome {
    /// Unique devices processed.
    pub devices: usize,
    /// Devices re-associated and re-activated for the user.
    pub reassociated: usize,
    /// Terminal rows anonymized.
    pub anonymized: usize,
}

/// Wipe orchestrator over a lifecycle engine.
pub struct WipeOrchestrator<'e, S, R, I, N, W> {
    engine: &'e LifecycleEngine<S, R, I, N, W>,
}

impl<'e, S, R, I, N, W> WipeOrchestrator<'e, S, R, I, N, W>
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

    /// Wipe all of `user_id`'s associated devices, optionally restricted to
    /// a serial-number subset that must match the live set exactly.
    pub fn run(
        &self,
        user_id: Uuid,
        subset: Option<&[String]>,
    ) -> LifecycleResult<WipeOutcome> {
        self.engine.audited("wipe_data", Actor::user(user_id), |_| {
            self.execute(user_id, subset)
        })
    }

    fn execute(
        &self,
        user_id: Uuid,
        subset: Option<&[String]>,
    ) -> LifecycleResult<WipeOutcome> {
        let engine = self.engine;

        // Step 1: the user's associated rows.
        let rows = engine
            .store
            .find_for_user(user_id, &[AssociationStatus::Associated])?;
        if rows.is_empty() {
            return Err(LifecycleError::NothingToWipe(user_id));
        }

        // Step 2: a supplied subset must match the held set exactly.
        if let Some(subset) = subset {
            let supplied: BTreeSet<&str> = subset.iter().map(|s| s.as_str()).collect();
            let held: BTreeSet<&str> = rows.iter().map(|r| r.serial_number.as_str()).collect();
            if supplied != held {
                return Err(LifecycleError::WipeSubsetMismatch {
                    expected: held.len(),
                    supplied: supplied.len(),
                });
            }
        }

        // Step 3: one row per device, preferring the owner row.
        let mut by_serial: BTreeMap<String, Association> = BTreeMap::new();
        for row in rows {
            match by_serial.get(&row.serial_number) {
                Some(existing) if existing.kind.is_owner() => {}
                _ => {
                    by_serial.insert(row.serial_number.clone(), row);
                }
            }
        }

        log_event_with_fields(
            Event::WipeStarted,
            &[
                ("user_id", &user_id.to_string()),
                ("devices", &by_serial.len().to_string()),
            ],
        );

        // Step 4: per device, all-or-nothing.
        let mut wiped: Vec<(String, Uuid)> = Vec::new();
        let mut reassociated = 0usize;
        let result = (|| -> LifecycleResult<()> {
            for (serial, row) in &by_serial {
                let selector = DeviceSelector::by_serial(serial);
                let owner_like = engine.resolver.cascades_credentials(row);

                // Capture the device's live rows before terminating; owner
                // terminates cascade over all of them.
                let live_before: Vec<Association> = engine
                    .store
                    .history_for_device(serial)?
                    .into_iter()
                    .filter(|r| r.is_live())
                    .collect();

                engine.terminate(&selector, Actor::user(user_id))?;

                if owner_like {
                    for prior in &live_before {
                        wiped.push((serial.clone(), prior.id));
                    }
                    engine.reassociate(&selector, user_id)?;
                    engine.activate(&selector, user_id)?;
                    reassociated += 1;

                    // Recreate the prior delegations against the new
                    // association.
                    for delegate in live_before
                        .iter()
                        .filter(|r| !r.kind.is_owner() && r.user_id != user_id)
                    {
                        let request = DelegationRequest {
                            user_id: delegate.user_id,
                            kind: delegate.kind,
                            valid_from: Some(delegate.valid_from),
                            valid_until: delegate.valid_until,
                            on_behalf_of: None,
                        };
                        engine.delegate(&selector, &request, Actor::user(user_id))?;
                    }
                } else {
                    wiped.push((serial.clone(), row.id));
                }

                log_event_with_fields(Event::WipeDeviceCompleted, &[("serial_number", serial)]);
            }
            Ok(())
        })();
        if let Err(err) = result {
            log_event_with_fields(
                Event::WipeFailed,
                &[("user_id", &user_id.to_string()), ("error", err.code())],
            );
            return Err(err);
        }

        // Step 5: anonymize the terminal rows.
        let mut anonymized = 0usize;
        for (serial, id) in wiped {
            let mut uow = engine.store.begin(&serial)?;
            let Some(mut row) = uow.all_rows().into_iter().find(|r| r.id == id) else {
                uow.abort();
                return Err(LifecycleError::IntegrityFault {
                    serial_number: serial,
                    found: 0,
                });
            };
            if row.status != AssociationStatus::Disassociated {
                // A recreated row took the place of a prior one; only
                // terminal rows are anonymized.
                uow.abort();
                continue;
            }
            row.anonymize();
            if let Err(err) = uow.update(row) {
                uow.abort();
                return Err(err.into());
            }
            uow.commit()?;
            anonymized += 1;
        }

        log_event_with_fields(
            Event::WipeCompleted,
            &[
                ("user_id", &user_id.to_string()),
                ("anonymized", &anonymized.to_string()),
            ],
        );
        Ok(WipeOutcome {
            devices: by_serial.len(),
            reassociated,
            anonymized,
        })
    }
}
