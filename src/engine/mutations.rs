use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::Notice;
use crate::observability;

use super::validate::{self, now_ms};
use super::{Engine, EngineError, availability, throttle, transition};

/// Everything a booking request carries. The slot's location must be
/// registered; date and time follow `SlotKey` conventions.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub location: Ulid,
    pub date: Ms,
    pub time: Ms,
    pub citizen: Citizen,
    pub priority: bool,
    pub notes: Option<String>,
}

fn record_op(op: &'static str, outcome: &'static str) {
    metrics::counter!(observability::OPS_TOTAL, "op" => op, "outcome" => outcome).increment(1);
}

fn reject(op: &'static str, err: EngineError) -> EngineError {
    record_op(op, observability::error_label(&err));
    err
}

impl Engine {
    /// Create an appointment. The cpf-block, calendar-block and capacity
    /// gates are all evaluated under the bucket's write lock, so two
    /// concurrent creates against the same slot serialize and the loser
    /// sees the winner's insert.
    pub async fn book(&self, req: BookingRequest) -> Result<Appointment, EngineError> {
        let key = SlotKey { location: req.location, date: req.date, time: req.time };
        validate::validate_slot(&key)?;
        validate::validate_citizen(&req.citizen)?;
        let cpf = validate::normalize_cpf(&req.citizen.cpf)?;
        if let Some(ref n) = req.notes
            && n.len() > MAX_NOTES_LEN {
                return Err(EngineError::InvalidField("notes too long"));
            }
        let location = self
            .store
            .location(&req.location)
            .ok_or(EngineError::NotFound(req.location))?;

        let slot = self.store.slot_entry(key);
        let mut guard = slot.write().await;
        let now = now_ms();

        if let Some(block) = self.store.active_cpf_block(&cpf, now) {
            return Err(reject(
                "book",
                EngineError::CpfBlocked {
                    blocked_until: block.blocked_until,
                    reason: block.reason,
                },
            ));
        }
        if self.store.is_date_blocked(key.date, key.time) {
            return Err(reject("book", EngineError::DateBlocked));
        }
        if !availability::has_capacity(&guard, location.max_per_slot) {
            return Err(reject("book", EngineError::SlotUnavailable));
        }

        let mut citizen = req.citizen;
        citizen.cpf = cpf;
        let appt = Appointment::new(
            Ulid::new(),
            self.tenant.clone(),
            key,
            citizen,
            req.priority,
            req.notes,
            now,
        );
        let event = Event::Booked { appointment: appt.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        drop(guard);

        record_op("book", "ok");
        self.audit
            .record(&appt.citizen.cpf, "book", None, Some(serde_json::json!(appt)))
            .await;
        Ok(appt)
    }

    /// Move an appointment through the issuance workflow. `Cancelled`
    /// targets are routed through `cancel` so the throttle always fires;
    /// a `Completed` target is atomically rewritten to
    /// `AwaitingIssuance`. Anything outside the transition table fails
    /// with no mutation.
    pub async fn change_status(
        &self,
        id: Ulid,
        target: AppointmentStatus,
        actor: &str,
        reason: Option<String>,
        metadata: Option<String>,
    ) -> Result<Appointment, EngineError> {
        if let Some(ref r) = reason {
            validate::validate_reason(r)?;
        }
        if target == AppointmentStatus::Cancelled {
            return self.cancel(id, actor, reason).await;
        }

        let (_key, mut guard) = self.resolve_slot_write(&id).await?;
        let appt = guard.find(&id).ok_or(EngineError::NotFound(id))?;
        self.check_tenant(appt)?;
        let before = appt.clone();
        let from = before.status;
        let now = now_ms();

        transition::check(from, target)?;

        let event = if target == AppointmentStatus::Completed {
            Event::Completed { id, by: actor.to_string(), at: now }
        } else {
            Event::StatusChanged {
                id,
                change: StatusChange {
                    from,
                    to: target,
                    changed_by: actor.to_string(),
                    changed_at: before.next_change_at(now),
                    reason,
                    metadata,
                },
            }
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let updated = guard.find(&id).cloned().expect("appointment present under bucket lock");
        drop(guard);

        let kind = match target {
            AppointmentStatus::Completed => Some(TransitionKind::Completed),
            AppointmentStatus::CinReady => Some(TransitionKind::CinReady),
            AppointmentStatus::CinDelivered => Some(TransitionKind::CinDelivered),
            _ => None,
        };
        if let Some(kind) = kind {
            self.notify.send(id, Notice { kind, appointment: updated.clone() });
        }

        record_op("change_status", "ok");
        self.audit
            .record(
                actor,
                "change-status",
                Some(serde_json::json!(before)),
                Some(serde_json::json!(updated)),
            )
            .await;
        Ok(updated)
    }

    /// Cancel an appointment. Succeeds from any non-terminal status and
    /// is idempotent on an already-cancelled one. The ledger row and any
    /// cpf block ride inside the same WAL event as the status change.
    pub async fn cancel(
        &self,
        id: Ulid,
        actor: &str,
        reason: Option<String>,
    ) -> Result<Appointment, EngineError> {
        if let Some(ref r) = reason {
            validate::validate_reason(r)?;
        }
        let (_key, mut guard) = self.resolve_slot_write(&id).await?;
        let appt = guard.find(&id).ok_or(EngineError::NotFound(id))?;
        self.check_tenant(appt)?;
        let before = appt.clone();
        match before.status {
            AppointmentStatus::Cancelled => return Ok(before),
            AppointmentStatus::CinDelivered => {
                return Err(EngineError::InvalidTransition {
                    from: AppointmentStatus::CinDelivered,
                    to: AppointmentStatus::Cancelled,
                });
            }
            _ => {}
        }

        let now = now_ms();
        let cpf = before.citizen.cpf.clone();
        let record = CancellationRecord {
            cpf: cpf.clone(),
            tenant: self.tenant.clone(),
            appointment_id: id,
            cancelled_at: now,
        };
        let count = self.store.cancellations_in_window(&cpf, now, self.config.cancel_window) + 1;
        let block = (count >= self.config.cancel_threshold)
            .then(|| throttle::issue_block(&cpf, &self.tenant, count, now, self.config.cancel_window));
        if block.is_some() {
            metrics::counter!(observability::CPF_BLOCKS_ISSUED_TOTAL).increment(1);
            tracing::info!(tenant = %self.tenant, count, "cancellation throttle issued a cpf block");
        }

        let event = Event::Cancelled { id, by: actor.to_string(), reason, at: now, record, block };
        self.persist_and_apply(&mut guard, &event).await?;
        let updated = guard.find(&id).cloned().expect("appointment present under bucket lock");
        drop(guard);

        self.notify
            .send(id, Notice { kind: TransitionKind::Cancelled, appointment: updated.clone() });
        record_op("cancel", "ok");
        self.audit
            .record(
                actor,
                "cancel",
                Some(serde_json::json!(before)),
                Some(serde_json::json!(updated)),
            )
            .await;
        Ok(updated)
    }

    /// Move an appointment to a new date/time at its current location.
    /// The limiter is consulted before anything is touched; on any
    /// rejection the appointment is left exactly as it was. Source and
    /// destination buckets are locked in sorted-key order.
    pub async fn reschedule(
        &self,
        id: Ulid,
        new_date: Ms,
        new_time: Ms,
        actor: &str,
    ) -> Result<Appointment, EngineError> {
        loop {
            let old_key = self.store.slot_of(&id).ok_or(EngineError::NotFound(id))?;
            let new_key = SlotKey { location: old_key.location, date: new_date, time: new_time };
            validate::validate_slot(&new_key)?;
            if new_key == old_key {
                return Err(EngineError::InvalidField("reschedule must change date or time"));
            }
            let location = self
                .store
                .location(&old_key.location)
                .ok_or(EngineError::NotFound(old_key.location))?;

            let old_arc = self.store.slot(&old_key).ok_or(EngineError::NotFound(id))?;
            let new_arc = self.store.slot_entry(new_key);
            let (mut old_guard, mut new_guard) = if old_key < new_key {
                let o = old_arc.write_owned().await;
                let n = new_arc.write_owned().await;
                (o, n)
            } else {
                let n = new_arc.write_owned().await;
                let o = old_arc.write_owned().await;
                (o, n)
            };
            // A concurrent reschedule may have moved it while we waited.
            if self.store.slot_of(&id) != Some(old_key) {
                continue;
            }

            let appt = old_guard.find(&id).ok_or(EngineError::NotFound(id))?;
            self.check_tenant(appt)?;
            let before = appt.clone();
            if before.status.is_terminal() {
                return Err(EngineError::InvalidTransition {
                    from: before.status,
                    to: AppointmentStatus::Pending,
                });
            }

            let now = now_ms();
            let cpf = before.citizen.cpf.clone();
            let used = self
                .store
                .reschedules_in_window(&cpf, now, self.config.reschedule_window);
            if used >= self.config.max_reschedules {
                return Err(reject("reschedule", EngineError::RescheduleLimitExceeded));
            }
            if self.store.is_date_blocked(new_key.date, new_key.time) {
                return Err(reject("reschedule", EngineError::DateBlocked));
            }
            if !availability::has_capacity(&new_guard, location.max_per_slot) {
                return Err(reject("reschedule", EngineError::SlotUnavailable));
            }

            let event = Event::Rescheduled { id, to: new_key, by: actor.to_string(), at: now };
            self.log_event(&event).await?;
            self.store
                .apply_reschedule(&mut old_guard, &mut new_guard, &id, new_key, actor, now);
            let updated =
                new_guard.find(&id).cloned().expect("appointment present under bucket lock");
            drop(old_guard);
            drop(new_guard);

            self.notify
                .send(id, Notice { kind: TransitionKind::Rescheduled, appointment: updated.clone() });
            record_op("reschedule", "ok");
            self.audit
                .record(
                    actor,
                    "reschedule",
                    Some(serde_json::json!(before)),
                    Some(serde_json::json!(updated)),
                )
                .await;
            return Ok(updated);
        }
    }

    /// Administrative hard delete. No tombstone; the bucket's capacity
    /// frees immediately.
    pub async fn delete(&self, id: Ulid, actor: &str) -> Result<(), EngineError> {
        let (_key, mut guard) = self.resolve_slot_write(&id).await?;
        let appt = guard.find(&id).ok_or(EngineError::NotFound(id))?;
        self.check_tenant(appt)?;
        let before = appt.clone();

        let event = Event::Deleted { id };
        self.persist_and_apply(&mut guard, &event).await?;
        drop(guard);
        self.notify.remove(&id);

        record_op("delete", "ok");
        self.audit
            .record(actor, "delete", Some(serde_json::json!(before)), None)
            .await;
        Ok(())
    }

    // ── Calendar blocks ──────────────────────────────────────

    pub async fn add_blocked_date(
        &self,
        date: Ms,
        kind: BlockKind,
        reason: String,
        created_by: &str,
    ) -> Result<BlockedDate, EngineError> {
        if date % DAY_MS != 0 {
            return Err(EngineError::InvalidField("date must be UTC midnight"));
        }
        if !(MIN_VALID_DATE_MS..=MAX_VALID_DATE_MS).contains(&date) {
            return Err(EngineError::InvalidField("date out of range"));
        }
        if let BlockKind::Times(ref times) = kind {
            if times.is_empty() {
                return Err(EngineError::InvalidField("specific-times block needs times"));
            }
            if times.len() > MAX_BLOCKED_TIMES_PER_DATE {
                return Err(EngineError::InvalidField("too many blocked times"));
            }
            if times.iter().any(|t| !(0..DAY_MS).contains(t)) {
                return Err(EngineError::InvalidField("blocked time outside the day"));
            }
        }
        validate::validate_reason(&reason)?;

        let block = BlockedDate {
            id: Ulid::new(),
            tenant: self.tenant.clone(),
            date,
            kind,
            reason,
            created_by: created_by.to_string(),
            created_at: now_ms(),
        };
        self.persist_and_apply_global(&Event::DateBlocked { block: block.clone() }).await?;

        record_op("block_date", "ok");
        self.audit
            .record(created_by, "block-date", None, Some(serde_json::json!(block)))
            .await;
        Ok(block)
    }

    pub async fn remove_blocked_date(&self, id: Ulid, actor: &str) -> Result<(), EngineError> {
        let block = self.store.block_by_id(&id).ok_or(EngineError::NotFound(id))?;
        if block.tenant != self.tenant {
            return Err(EngineError::TenantMismatch {
                expected: self.tenant.clone(),
                found: block.tenant.clone(),
            });
        }
        self.persist_and_apply_global(&Event::DateUnblocked { id, date: block.date }).await?;

        record_op("unblock_date", "ok");
        self.audit
            .record(actor, "unblock-date", Some(serde_json::json!(block)), None)
            .await;
        Ok(())
    }

    // ── Locations ────────────────────────────────────────────

    /// Register a service location. Without an explicit capacity the
    /// tenant default applies.
    pub async fn register_location(
        &self,
        id: Ulid,
        name: Option<String>,
        max_per_slot: Option<u32>,
    ) -> Result<LocationState, EngineError> {
        if self.store.location_count() >= MAX_LOCATIONS_PER_TENANT {
            return Err(EngineError::InvalidField("too many locations"));
        }
        if self.store.location(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }
        let capacity = max_per_slot.unwrap_or(self.config.default_slot_capacity);
        validate_capacity(capacity)?;
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN {
                return Err(EngineError::InvalidField("location name too long"));
            }

        let event = Event::LocationRegistered { id, name: name.clone(), max_per_slot: capacity };
        self.persist_and_apply_global(&event).await?;

        let location = LocationState { id, name, max_per_slot: capacity };
        record_op("register_location", "ok");
        self.audit
            .record("staff", "register-location", None, Some(serde_json::json!(location)))
            .await;
        Ok(location)
    }

    /// Capacity changes apply to new bookings only; an already overfull
    /// bucket keeps its appointments.
    pub async fn update_location(
        &self,
        id: Ulid,
        name: Option<String>,
        max_per_slot: u32,
    ) -> Result<LocationState, EngineError> {
        if self.store.location(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        validate_capacity(max_per_slot)?;
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN {
                return Err(EngineError::InvalidField("location name too long"));
            }

        let event = Event::LocationUpdated { id, name: name.clone(), max_per_slot };
        self.persist_and_apply_global(&event).await?;

        let location = LocationState { id, name, max_per_slot };
        record_op("update_location", "ok");
        self.audit
            .record("staff", "update-location", None, Some(serde_json::json!(location)))
            .await;
        Ok(location)
    }
}

fn validate_capacity(capacity: u32) -> Result<(), EngineError> {
    if capacity == 0 || capacity > MAX_SLOT_CAPACITY {
        return Err(EngineError::InvalidField("slot capacity out of range"));
    }
    Ok(())
}
