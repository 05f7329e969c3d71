use std::sync::Arc;

use dashmap::DashMap;
use serde_json::json;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::{blocking, throttle};

pub type SharedSlot = Arc<RwLock<SlotState>>;

/// One slot bucket. Appointments live inside their bucket so that the
/// bucket's write lock covers both the capacity check and the insert.
#[derive(Debug)]
pub struct SlotState {
    pub key: SlotKey,
    pub appointments: Vec<Appointment>,
}

impl SlotState {
    pub fn new(key: SlotKey) -> Self {
        Self { key, appointments: Vec::new() }
    }

    pub fn find(&self, id: &Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == *id)
    }

    pub fn find_mut(&mut self, id: &Ulid) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == *id)
    }

    pub fn remove(&mut self, id: &Ulid) -> Option<Appointment> {
        let pos = self.appointments.iter().position(|a| a.id == *id)?;
        Some(self.appointments.remove(pos))
    }
}

/// All per-tenant state: slot buckets plus the side tables the throttles
/// and the blocking registry read. Rebuilt from the WAL at startup.
pub struct InMemoryStore {
    slots: DashMap<SlotKey, SharedSlot>,
    /// Appointment id → its current bucket.
    index: DashMap<Ulid, SlotKey>,
    locations: DashMap<Ulid, LocationState>,
    /// Calendar blocks keyed by date (UTC midnight).
    blocks: DashMap<Ms, Vec<BlockedDate>>,
    block_index: DashMap<Ulid, Ms>,
    /// Append-only cancellation ledger per cpf.
    cancellations: DashMap<String, Vec<CancellationRecord>>,
    cpf_blocks: DashMap<String, Vec<CpfBlock>>,
    /// Reschedule timestamps per cpf.
    reschedules: DashMap<String, Vec<Ms>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            index: DashMap::new(),
            locations: DashMap::new(),
            blocks: DashMap::new(),
            block_index: DashMap::new(),
            cancellations: DashMap::new(),
            cpf_blocks: DashMap::new(),
            reschedules: DashMap::new(),
        }
    }

    // ── Slot buckets ─────────────────────────────────────────

    pub fn slot(&self, key: &SlotKey) -> Option<SharedSlot> {
        self.slots.get(key).map(|e| e.value().clone())
    }

    /// Get the bucket, creating an empty one on first touch.
    pub fn slot_entry(&self, key: SlotKey) -> SharedSlot {
        self.slots
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(SlotState::new(key))))
            .value()
            .clone()
    }

    pub fn slot_of(&self, id: &Ulid) -> Option<SlotKey> {
        self.index.get(id).map(|e| *e.value())
    }

    pub fn slot_keys(&self) -> Vec<SlotKey> {
        self.slots.iter().map(|e| *e.key()).collect()
    }

    pub fn appointment_count(&self) -> usize {
        self.index.len()
    }

    // ── Locations ────────────────────────────────────────────

    pub fn location(&self, id: &Ulid) -> Option<LocationState> {
        self.locations.get(id).map(|e| e.value().clone())
    }

    pub fn location_count(&self) -> usize {
        self.locations.len()
    }

    pub fn list_locations(&self) -> Vec<LocationState> {
        self.locations.iter().map(|e| e.value().clone()).collect()
    }

    // ── Calendar blocks ──────────────────────────────────────

    pub fn blocks_for(&self, date: Ms) -> Vec<BlockedDate> {
        self.blocks.get(&date).map(|e| e.value().clone()).unwrap_or_default()
    }

    pub fn is_date_blocked(&self, date: Ms, time: Ms) -> bool {
        self.blocks
            .get(&date)
            .is_some_and(|e| blocking::is_blocked(e.value(), time))
    }

    pub fn block_by_id(&self, id: &Ulid) -> Option<BlockedDate> {
        let date = *self.block_index.get(id)?.value();
        self.blocks
            .get(&date)
            .and_then(|e| e.value().iter().find(|b| b.id == *id).cloned())
    }

    pub fn list_blocks(&self) -> Vec<BlockedDate> {
        let mut all: Vec<BlockedDate> =
            self.blocks.iter().flat_map(|e| e.value().clone()).collect();
        all.sort_by_key(|b| (b.date, b.created_at));
        all
    }

    // ── Throttle ledgers ─────────────────────────────────────

    pub fn cancellations_in_window(&self, cpf: &str, now: Ms, window: Ms) -> u32 {
        self.cancellations
            .get(cpf)
            .map_or(0, |e| throttle::cancellations_in_window(e.value(), now, window))
    }

    pub fn active_cpf_block(&self, cpf: &str, now: Ms) -> Option<CpfBlock> {
        self.cpf_blocks
            .get(cpf)
            .and_then(|e| throttle::active_block(e.value(), now).cloned())
    }

    pub fn reschedules_in_window(&self, cpf: &str, now: Ms, window: Ms) -> u32 {
        self.reschedules
            .get(cpf)
            .map_or(0, |e| throttle::count_in_window(e.value(), now, window))
    }

    /// Drop ledger rows too old to ever count again and expire stale
    /// blocks. Derived cleanup only; never WAL-logged.
    pub fn prune_ledgers(&self, now: Ms, cancel_window: Ms, reschedule_window: Ms) {
        for mut entry in self.cancellations.iter_mut() {
            entry.value_mut().retain(|r| r.cancelled_at > now - cancel_window);
        }
        for mut entry in self.reschedules.iter_mut() {
            entry.value_mut().retain(|&t| t > now - reschedule_window);
        }
        for mut entry in self.cpf_blocks.iter_mut() {
            entry.value_mut().retain(|b| b.active && b.blocked_until > now);
        }
    }

    pub(super) fn all_cancellations(&self) -> Vec<CancellationRecord> {
        self.cancellations.iter().flat_map(|e| e.value().clone()).collect()
    }

    pub(super) fn all_cpf_blocks(&self) -> Vec<CpfBlock> {
        self.cpf_blocks.iter().flat_map(|e| e.value().clone()).collect()
    }

    pub(super) fn all_reschedules(&self) -> Vec<(String, Ms)> {
        self.reschedules
            .iter()
            .flat_map(|e| {
                let cpf = e.key().clone();
                e.value().iter().map(move |&at| (cpf.clone(), at)).collect::<Vec<_>>()
            })
            .collect()
    }

    fn note_cancellation(&self, record: CancellationRecord) {
        self.cancellations.entry(record.cpf.clone()).or_default().push(record);
    }

    fn set_cpf_block(&self, block: CpfBlock) {
        let mut entry = self.cpf_blocks.entry(block.cpf.clone()).or_default();
        throttle::supersede(entry.value_mut(), block);
    }

    fn note_reschedule(&self, cpf: String, at: Ms) {
        self.reschedules.entry(cpf).or_default().push(at);
    }

    // ── Event application ────────────────────────────────────

    /// Apply an event that touches no slot bucket. Returns false if the
    /// event needs a bucket and must go through `apply_to_slot`.
    pub fn apply_global(&self, event: &Event) -> bool {
        match event {
            Event::LocationRegistered { id, name, max_per_slot }
            | Event::LocationUpdated { id, name, max_per_slot } => {
                self.locations.insert(
                    *id,
                    LocationState { id: *id, name: name.clone(), max_per_slot: *max_per_slot },
                );
            }
            Event::DateBlocked { block } => {
                self.block_index.insert(block.id, block.date);
                self.blocks.entry(block.date).or_default().push(block.clone());
            }
            Event::DateUnblocked { id, date } => {
                self.block_index.remove(id);
                if let Some(mut entry) = self.blocks.get_mut(date) {
                    entry.value_mut().retain(|b| b.id != *id);
                }
            }
            Event::CancellationNoted { record } => {
                self.note_cancellation(record.clone());
            }
            Event::CpfBlockSet { block } => {
                self.cpf_blocks.entry(block.cpf.clone()).or_default().push(block.clone());
            }
            Event::RescheduleNoted { cpf, at } => {
                self.note_reschedule(cpf.clone(), *at);
            }
            _ => return false,
        }
        true
    }

    /// Apply a bucket event. Caller holds the bucket's write lock.
    pub fn apply_to_slot(&self, slot: &mut SlotState, event: &Event) {
        match event {
            Event::Booked { appointment } => {
                self.index.insert(appointment.id, appointment.slot);
                slot.appointments.push(appointment.clone());
            }
            Event::StatusChanged { id, change } => {
                if let Some(appt) = slot.find_mut(id) {
                    appt.status = change.to;
                    appt.last_modified = change.changed_at;
                    appt.history.push(change.clone());
                }
            }
            Event::Completed { id, by, at } => {
                if let Some(appt) = slot.find_mut(id) {
                    let t1 = appt.next_change_at(*at);
                    let t2 = t1 + 1;
                    let prev = appt.status;
                    appt.history.push(StatusChange {
                        from: prev,
                        to: AppointmentStatus::Completed,
                        changed_by: by.clone(),
                        changed_at: t1,
                        reason: None,
                        metadata: None,
                    });
                    appt.history.push(StatusChange {
                        from: AppointmentStatus::Completed,
                        to: AppointmentStatus::AwaitingIssuance,
                        changed_by: by.clone(),
                        changed_at: t2,
                        reason: None,
                        metadata: None,
                    });
                    appt.status = AppointmentStatus::AwaitingIssuance;
                    appt.completed_at = Some(t1);
                    appt.completed_by = Some(by.clone());
                    appt.last_modified = t2;
                }
            }
            Event::Cancelled { id, by, reason, at, record, block } => {
                if let Some(appt) = slot.find_mut(id) {
                    let t = appt.next_change_at(*at);
                    let from = appt.status;
                    appt.history.push(StatusChange {
                        from,
                        to: AppointmentStatus::Cancelled,
                        changed_by: by.clone(),
                        changed_at: t,
                        reason: reason.clone(),
                        metadata: None,
                    });
                    appt.status = AppointmentStatus::Cancelled;
                    appt.cancelled_by = Some(by.clone());
                    appt.cancellation_reason = reason.clone();
                    appt.last_modified = t;
                }
                self.note_cancellation(record.clone());
                if let Some(b) = block {
                    self.set_cpf_block(b.clone());
                }
            }
            Event::Deleted { id } => {
                slot.remove(id);
                self.index.remove(id);
            }
            // Global events and reschedules don't come through here.
            _ => {}
        }
    }

    /// Apply a reschedule across two buckets. Caller holds both write
    /// locks, acquired in sorted-key order.
    pub fn apply_reschedule(
        &self,
        old: &mut SlotState,
        new: &mut SlotState,
        id: &Ulid,
        to: SlotKey,
        by: &str,
        at: Ms,
    ) {
        let Some(mut appt) = old.remove(id) else { return };
        let t = appt.next_change_at(at);
        let from_slot = appt.slot;
        let metadata = json!({
            "from": { "date": from_slot.date, "time": from_slot.time },
            "to": { "date": to.date, "time": to.time },
        })
        .to_string();
        appt.history.push(StatusChange {
            from: appt.status,
            to: AppointmentStatus::Pending,
            changed_by: by.to_string(),
            changed_at: t,
            reason: None,
            metadata: Some(metadata),
        });
        appt.status = AppointmentStatus::Pending;
        appt.slot = to;
        appt.last_modified = t;
        let cpf = appt.citizen.cpf.clone();
        self.index.insert(*id, to);
        new.appointments.push(appt);
        self.note_reschedule(cpf, at);
    }
}
