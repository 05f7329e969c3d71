mod availability;
mod blocking;
mod error;
mod mutations;
mod queries;
mod store;
mod throttle;
mod transition;
mod validate;

pub use availability::{active_count, has_capacity, remaining};
pub use error::EngineError;
pub use mutations::BookingRequest;
pub use store::{InMemoryStore, SharedSlot, SlotState};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use ulid::Ulid;

use crate::audit::AuditRecorder;
use crate::limits::ScheduleConfig;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

// ── WAL writer task ──────────────────────────────────────

pub(super) type Ack = oneshot::Sender<io::Result<()>>;

pub(super) enum LogOp {
    Write { event: Event, ack: Ack },
    Snapshot { events: Vec<Event>, ack: Ack },
    Backlog { ack: oneshot::Sender<u64> },
}

/// Owns the tenant's WAL. Writes are group-committed: the first one in
/// the queue pays for the fsync, everything queued behind it rides the
/// same sync. Snapshot installs run on this task so they can never race
/// an append.
async fn log_writer(mut wal: Wal, mut ops: mpsc::Receiver<LogOp>) {
    while let Some(op) = ops.recv().await {
        let LogOp::Write { event, ack } = op else {
            control(&mut wal, op);
            continue;
        };
        let mut batch = vec![(event, ack)];
        let mut deferred = None;
        while let Ok(op) = ops.try_recv() {
            match op {
                LogOp::Write { event, ack } => batch.push((event, ack)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit(&mut wal, batch);
        if let Some(op) = deferred {
            control(&mut wal, op);
        }
    }
}

fn commit(wal: &mut Wal, batch: Vec<(Event, Ack)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut framed = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.buffer(event) {
            framed = Err(e);
            break;
        }
    }
    // Sync even after a framing error: the batch is reported failed, so
    // its half-written bytes must not linger in the buffer and ride out
    // with a later batch that gets reported as successful.
    let outcome = framed.and(wal.sync());

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    for (_, ack) in batch {
        let _ = ack.send(match &outcome {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        });
    }
}

fn control(wal: &mut Wal, op: LogOp) {
    match op {
        LogOp::Snapshot { events, ack } => {
            let result =
                Wal::write_snapshot(wal.path(), &events).and_then(|()| wal.install_snapshot());
            let _ = ack.send(result);
        }
        LogOp::Backlog { ack } => {
            let _ = ack.send(wal.records_since_snapshot());
        }
        LogOp::Write { .. } => unreachable!(),
    }
}

/// One tenant's scheduling core: slot buckets, calendar blocks, throttle
/// ledgers, its WAL, and the collaborator seams.
pub struct Engine {
    pub tenant: String,
    pub config: ScheduleConfig,
    pub(super) store: InMemoryStore,
    pub(super) log_tx: mpsc::Sender<LogOp>,
    pub notify: Arc<NotifyHub>,
    pub audit: Arc<dyn AuditRecorder>,
}

impl Engine {
    pub fn new(
        tenant: impl Into<String>,
        wal_path: PathBuf,
        config: ScheduleConfig,
        notify: Arc<NotifyHub>,
        audit: Arc<dyn AuditRecorder>,
    ) -> io::Result<Self> {
        let events = Wal::load(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (log_tx, log_rx) = mpsc::channel(4096);
        tokio::spawn(log_writer(wal, log_rx));

        let engine = Self {
            tenant: tenant.into(),
            config,
            store: InMemoryStore::new(),
            log_tx,
            notify,
            audit,
        };

        // Replay — we're the sole owner of every bucket Arc here, so
        // try_write always succeeds instantly. Never use blocking_write:
        // this may run inside an async context (lazy tenant creation).
        for event in &events {
            if engine.store.apply_global(event) {
                continue;
            }
            match event {
                Event::Booked { appointment } => {
                    let slot = engine.store.slot_entry(appointment.slot);
                    let mut guard = slot.try_write().expect("replay: uncontended write");
                    engine.store.apply_to_slot(&mut guard, event);
                }
                Event::Rescheduled { id, to, by, at } => {
                    let Some(from_key) = engine.store.slot_of(id) else { continue };
                    if from_key == *to {
                        continue;
                    }
                    let old = engine.store.slot_entry(from_key);
                    let new = engine.store.slot_entry(*to);
                    let mut old_guard = old.try_write().expect("replay: uncontended write");
                    let mut new_guard = new.try_write().expect("replay: uncontended write");
                    engine
                        .store
                        .apply_reschedule(&mut old_guard, &mut new_guard, id, *to, by, *at);
                }
                other => {
                    let Some(id) = event_appointment_id(other) else { continue };
                    let Some(key) = engine.store.slot_of(&id) else { continue };
                    if let Some(slot) = engine.store.slot(&key) {
                        let mut guard = slot.try_write().expect("replay: uncontended write");
                        engine.store.apply_to_slot(&mut guard, other);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Make an event durable through the group-commit writer.
    pub(super) async fn log_event(&self, event: &Event) -> Result<(), EngineError> {
        let (ack, done) = oneshot::channel();
        self.log_tx
            .send(LogOp::Write { event: event.clone(), ack })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        done.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| {
                tracing::error!(tenant = %self.tenant, "WAL append failed: {e}");
                EngineError::Storage(e.to_string())
            })
    }

    /// Durable write, then in-memory apply under the caller's bucket lock.
    pub(super) async fn persist_and_apply(
        &self,
        slot: &mut SlotState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.log_event(event).await?;
        self.store.apply_to_slot(slot, event);
        Ok(())
    }

    /// Durable write + apply for events outside any bucket.
    pub(super) async fn persist_and_apply_global(&self, event: &Event) -> Result<(), EngineError> {
        self.log_event(event).await?;
        self.store.apply_global(event);
        Ok(())
    }

    pub(super) fn check_tenant(&self, appt: &Appointment) -> Result<(), EngineError> {
        if appt.tenant != self.tenant {
            return Err(EngineError::TenantMismatch {
                expected: self.tenant.clone(),
                found: appt.tenant.clone(),
            });
        }
        Ok(())
    }

    /// Lock the bucket an appointment currently lives in. The bucket can
    /// change under us between the index read and the lock (a concurrent
    /// reschedule), so re-check and retry until the two agree.
    pub(super) async fn resolve_slot_write(
        &self,
        id: &Ulid,
    ) -> Result<(SlotKey, tokio::sync::OwnedRwLockWriteGuard<SlotState>), EngineError> {
        loop {
            let key = self.store.slot_of(id).ok_or(EngineError::NotFound(*id))?;
            let slot = self.store.slot(&key).ok_or(EngineError::NotFound(*id))?;
            let guard = slot.write_owned().await;
            if self.store.slot_of(id) == Some(key) {
                return Ok((key, guard));
            }
        }
    }

    /// Rewrite the WAL with only the events needed to recreate state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for loc in self.store.list_locations() {
            events.push(Event::LocationRegistered {
                id: loc.id,
                name: loc.name,
                max_per_slot: loc.max_per_slot,
            });
        }
        for block in self.store.list_blocks() {
            events.push(Event::DateBlocked { block });
        }
        for key in self.store.slot_keys() {
            let Some(slot) = self.store.slot(&key) else { continue };
            let guard = slot.read().await;
            for appt in &guard.appointments {
                events.push(Event::Booked { appointment: appt.clone() });
            }
        }
        for record in self.store.all_cancellations() {
            events.push(Event::CancellationNoted { record });
        }
        for block in self.store.all_cpf_blocks() {
            events.push(Event::CpfBlockSet { block });
        }
        for (cpf, at) in self.store.all_reschedules() {
            events.push(Event::RescheduleNoted { cpf, at });
        }

        let (ack, done) = oneshot::channel();
        self.log_tx
            .send(LogOp::Snapshot { events, ack })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        done.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    /// Events appended since the last compaction.
    pub async fn wal_backlog(&self) -> u64 {
        let (ack, done) = oneshot::channel();
        if self.log_tx.send(LogOp::Backlog { ack }).await.is_err() {
            return 0;
        }
        done.await.unwrap_or(0)
    }

    /// Ledger hygiene pass, run periodically by the reaper.
    pub fn prune_expired(&self, now: Ms) {
        self.store
            .prune_ledgers(now, self.config.cancel_window, self.config.reschedule_window);
    }
}

/// Extract the appointment id from a bucket-scoped event.
fn event_appointment_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::StatusChanged { id, .. }
        | Event::Completed { id, .. }
        | Event::Cancelled { id, .. }
        | Event::Rescheduled { id, .. }
        | Event::Deleted { id } => Some(*id),
        Event::Booked { appointment } => Some(appointment.id),
        _ => None,
    }
}
