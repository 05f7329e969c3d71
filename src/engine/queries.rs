use ulid::Ulid;

use crate::model::*;

use super::validate::now_ms;
use super::{Engine, EngineError, availability};

impl Engine {
    pub async fn get_appointment(&self, id: &Ulid) -> Result<Appointment, EngineError> {
        let key = self.store.slot_of(id).ok_or(EngineError::NotFound(*id))?;
        let slot = self.store.slot(&key).ok_or(EngineError::NotFound(*id))?;
        let guard = slot.read().await;
        let appt = guard.find(id).cloned().ok_or(EngineError::NotFound(*id))?;
        self.check_tenant(&appt)?;
        Ok(appt)
    }

    /// Remaining capacity for one exact slot.
    pub async fn slot_remaining(&self, key: &SlotKey) -> Result<u32, EngineError> {
        let location = self
            .store
            .location(&key.location)
            .ok_or(EngineError::NotFound(key.location))?;
        let Some(slot) = self.store.slot(key) else {
            return Ok(location.max_per_slot);
        };
        let guard = slot.read().await;
        Ok(availability::remaining(&guard, location.max_per_slot))
    }

    /// The full day grid for a location: per-time booked/remaining plus
    /// the calendar-block flag. Times come from the tenant's slot grid.
    pub async fn day_availability(
        &self,
        location_id: &Ulid,
        date: Ms,
    ) -> Result<Vec<SlotAvailability>, EngineError> {
        let location = self
            .store
            .location(location_id)
            .ok_or(EngineError::NotFound(*location_id))?;

        let mut out = Vec::new();
        for time in self.config.slot_times() {
            let key = SlotKey { location: *location_id, date, time };
            let booked = match self.store.slot(&key) {
                Some(slot) => {
                    let guard = slot.read().await;
                    availability::active_count(&guard)
                }
                None => 0,
            };
            out.push(SlotAvailability {
                slot: key,
                capacity: location.max_per_slot,
                booked,
                remaining: location.max_per_slot.saturating_sub(booked),
                blocked: self.store.is_date_blocked(date, time),
            });
        }
        Ok(out)
    }

    /// All appointments for a location on a date, ordered by time.
    pub async fn list_day(&self, location_id: &Ulid, date: Ms) -> Vec<Appointment> {
        let mut out = Vec::new();
        for key in self.store.slot_keys() {
            if key.location != *location_id || key.date != date {
                continue;
            }
            if let Some(slot) = self.store.slot(&key) {
                let guard = slot.read().await;
                out.extend(guard.appointments.iter().cloned());
            }
        }
        out.sort_by_key(|a| (a.slot.time, a.created_at));
        out
    }

    /// Every appointment belonging to one cpf, newest first.
    pub async fn list_by_cpf(&self, cpf: &str) -> Vec<Appointment> {
        let mut out = Vec::new();
        for key in self.store.slot_keys() {
            if let Some(slot) = self.store.slot(&key) {
                let guard = slot.read().await;
                out.extend(guard.appointments.iter().filter(|a| a.citizen.cpf == cpf).cloned());
            }
        }
        out.sort_by_key(|a| std::cmp::Reverse(a.created_at));
        out
    }

    /// Whether the citizen is currently blocked from booking.
    pub fn cpf_block_status(&self, cpf: &str) -> CpfBlockStatus {
        match self.store.active_cpf_block(cpf, now_ms()) {
            Some(block) => CpfBlockStatus {
                blocked: true,
                blocked_until: Some(block.blocked_until),
                reason: Some(block.reason),
            },
            None => CpfBlockStatus::clear(),
        }
    }

    pub fn list_blocked_dates(&self) -> Vec<BlockedDate> {
        self.store.list_blocks()
    }

    pub fn blocked_dates_for(&self, date: Ms) -> Vec<BlockedDate> {
        self.store.blocks_for(date)
    }

    pub fn get_location(&self, id: &Ulid) -> Option<LocationState> {
        self.store.location(id)
    }

    pub fn list_locations(&self) -> Vec<LocationState> {
        let mut locations = self.store.list_locations();
        locations.sort_by_key(|l| l.id);
        locations
    }

    pub fn appointment_count(&self) -> usize {
        self.store.appointment_count()
    }
}
