use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

pub const DAY_MS: Ms = 86_400_000;

/// A bookable bucket: one location, one calendar day, one start time.
///
/// `date` is the UTC midnight of the day; `time` is the offset from that
/// midnight in `[0, DAY_MS)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    pub location: Ulid,
    pub date: Ms,
    pub time: Ms,
}

impl SlotKey {
    pub fn new(location: Ulid, date: Ms, time: Ms) -> Self {
        debug_assert!(date % DAY_MS == 0, "SlotKey date must be day-aligned");
        debug_assert!((0..DAY_MS).contains(&time), "SlotKey time must be within the day");
        Self { location, date, time }
    }

    /// Absolute start instant of the slot.
    pub fn starts_at(&self) -> Ms {
        self.date + self.time
    }
}

/// Appointment lifecycle states.
///
/// `Completed` never rests: submitting it immediately rewrites the
/// appointment to `AwaitingIssuance`. It exists as a variant so status
/// history can record the intermediate hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    AwaitingIssuance,
    CinReady,
    CinDelivered,
    Cancelled,
}

impl AppointmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::CinDelivered | AppointmentStatus::Cancelled)
    }

    /// True for every status an appointment can actually persist in.
    pub fn is_resting(&self) -> bool {
        !matches!(self, AppointmentStatus::Completed)
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::AwaitingIssuance => "awaiting-issuance",
            AppointmentStatus::CinReady => "cin-ready",
            AppointmentStatus::CinDelivered => "cin-delivered",
            AppointmentStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One entry in an appointment's append-only status history.
///
/// `metadata` is JSON text (built with `serde_json`) so the entry stays
/// representable in the bincode WAL format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: AppointmentStatus,
    pub to: AppointmentStatus,
    pub changed_by: String,
    pub changed_at: Ms,
    pub reason: Option<String>,
    pub metadata: Option<String>,
}

/// Citizen identification as captured at booking time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citizen {
    pub name: String,
    /// Normalized to 11 digits, no punctuation.
    pub cpf: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub street: Option<String>,
    pub number: Option<String>,
    pub district: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub tenant: String,
    pub slot: SlotKey,
    pub citizen: Citizen,
    pub status: AppointmentStatus,
    pub priority: bool,
    pub notes: Option<String>,
    /// Append-only, strictly ordered by `changed_at`.
    pub history: Vec<StatusChange>,
    pub created_at: Ms,
    pub last_modified: Ms,
    pub completed_at: Option<Ms>,
    pub completed_by: Option<String>,
    pub cancelled_by: Option<String>,
    pub cancellation_reason: Option<String>,
}

impl Appointment {
    pub fn new(
        id: Ulid,
        tenant: String,
        slot: SlotKey,
        citizen: Citizen,
        priority: bool,
        notes: Option<String>,
        created_at: Ms,
    ) -> Self {
        Self {
            id,
            tenant,
            slot,
            citizen,
            status: AppointmentStatus::Pending,
            priority,
            notes,
            history: Vec::new(),
            created_at,
            last_modified: created_at,
            completed_at: None,
            completed_by: None,
            cancelled_by: None,
            cancellation_reason: None,
        }
    }

    /// Counts toward its bucket's capacity.
    pub fn occupies_slot(&self) -> bool {
        self.status != AppointmentStatus::Cancelled
    }

    pub fn last_changed_at(&self) -> Ms {
        self.history.last().map_or(self.created_at, |c| c.changed_at)
    }

    /// Next timestamp that keeps history strictly ordered even when the
    /// wall clock hasn't advanced between two transitions.
    pub fn next_change_at(&self, now: Ms) -> Ms {
        now.max(self.last_changed_at() + 1)
    }
}

/// How a calendar block closes a date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    /// Every time on the date, every location in the tenant.
    FullDay,
    /// Only the listed start times; other times stay bookable.
    Times(Vec<Ms>),
}

/// A staff-created calendar block. Tenant-wide, not per-location.
/// Immutable once created; edits are delete-and-recreate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedDate {
    pub id: Ulid,
    pub tenant: String,
    pub date: Ms,
    pub kind: BlockKind,
    pub reason: String,
    pub created_by: String,
    pub created_at: Ms,
}

impl BlockedDate {
    pub fn blocks_time(&self, time: Ms) -> bool {
        match &self.kind {
            BlockKind::FullDay => true,
            BlockKind::Times(times) => times.contains(&time),
        }
    }
}

/// One row per cancellation event. Never updated, never rewritten;
/// only read back as rolling-window counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationRecord {
    pub cpf: String,
    pub tenant: String,
    pub appointment_id: Ulid,
    pub cancelled_at: Ms,
}

/// Temporary booking block issued by the cancellation throttle.
/// At most one active block per (tenant, cpf); a new qualifying
/// cancellation supersedes the old block instead of editing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpfBlock {
    pub cpf: String,
    pub tenant: String,
    pub blocked_until: Ms,
    pub reason: String,
    pub cancellation_count: u32,
    pub active: bool,
}

/// A service location and its per-slot booking capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationState {
    pub id: Ulid,
    pub name: Option<String>,
    pub max_per_slot: u32,
}

/// The event types — flat, no nesting. This is the WAL record format.
///
/// Cancellation and reschedule side effects ride inside their triggering
/// event, so one WAL append is the whole atomic unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    LocationRegistered {
        id: Ulid,
        name: Option<String>,
        max_per_slot: u32,
    },
    LocationUpdated {
        id: Ulid,
        name: Option<String>,
        max_per_slot: u32,
    },
    Booked {
        appointment: Appointment,
    },
    StatusChanged {
        id: Ulid,
        change: StatusChange,
    },
    /// The `completed` input: rewritten on application to two chained
    /// history entries ending in `awaiting-issuance`.
    Completed {
        id: Ulid,
        by: String,
        at: Ms,
    },
    Cancelled {
        id: Ulid,
        by: String,
        reason: Option<String>,
        at: Ms,
        record: CancellationRecord,
        block: Option<CpfBlock>,
    },
    Rescheduled {
        id: Ulid,
        to: SlotKey,
        by: String,
        at: Ms,
    },
    Deleted {
        id: Ulid,
    },
    DateBlocked {
        block: BlockedDate,
    },
    DateUnblocked {
        id: Ulid,
        date: Ms,
    },
    /// Compaction-only: restores a cancellation ledger row whose
    /// originating `Cancelled` event was compacted away.
    CancellationNoted {
        record: CancellationRecord,
    },
    /// Compaction-only: restores a cpf block.
    CpfBlockSet {
        block: CpfBlock,
    },
    /// Compaction-only: restores a reschedule ledger row.
    RescheduleNoted {
        cpf: String,
        at: Ms,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotAvailability {
    pub slot: SlotKey,
    pub capacity: u32,
    pub booked: u32,
    pub remaining: u32,
    pub blocked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpfBlockStatus {
    pub blocked: bool,
    pub blocked_until: Option<Ms>,
    pub reason: Option<String>,
}

impl CpfBlockStatus {
    pub fn clear() -> Self {
        Self { blocked: false, blocked_until: None, reason: None }
    }
}

/// Transitions the external notification dispatcher is told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Completed,
    CinReady,
    CinDelivered,
    Cancelled,
    Rescheduled,
}

impl std::fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransitionKind::Completed => "completed",
            TransitionKind::CinReady => "cin-ready",
            TransitionKind::CinDelivered => "cin-delivered",
            TransitionKind::Cancelled => "cancelled",
            TransitionKind::Rescheduled => "rescheduled",
        };
        f.write_str(s)
    }
}
