use crate::model::{DAY_MS, Ms};

// ── Hard limits (abuse backstops, not tunables) ──────────────────

pub const MAX_TENANTS: usize = 512;
pub const MAX_TENANT_NAME_LEN: usize = 64;
pub const MAX_LOCATIONS_PER_TENANT: usize = 1024;
pub const MAX_SLOT_CAPACITY: u32 = 64;
pub const MAX_NAME_LEN: usize = 120;
pub const MAX_CONTACT_LEN: usize = 120;
pub const MAX_REASON_LEN: usize = 500;
pub const MAX_NOTES_LEN: usize = 2000;
pub const MAX_BLOCKED_TIMES_PER_DATE: usize = 96;

/// 2000-01-01T00:00:00Z.
pub const MIN_VALID_DATE_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z.
pub const MAX_VALID_DATE_MS: Ms = 4_102_444_800_000;

// ── Tunables ─────────────────────────────────────────────────────

/// Per-tenant scheduling knobs. The two throttle windows default to the
/// same length but are configured independently.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Capacity used when a location is registered without its own.
    pub default_slot_capacity: u32,
    /// Rolling window for the cancellation throttle.
    pub cancel_window: Ms,
    /// Cancellations within `cancel_window` that trigger a cpf block.
    pub cancel_threshold: u32,
    /// Rolling window for the reschedule limiter.
    pub reschedule_window: Ms,
    /// Reschedules allowed per citizen within `reschedule_window`.
    pub max_reschedules: u32,
    /// First bookable time of the day (offset from midnight).
    pub day_start: Ms,
    /// End of the bookable day (exclusive).
    pub day_end: Ms,
    /// Spacing of the slot grid.
    pub slot_interval: Ms,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            default_slot_capacity: 2,
            cancel_window: 7 * DAY_MS,
            cancel_threshold: 3,
            reschedule_window: 7 * DAY_MS,
            max_reschedules: 3,
            day_start: 8 * 3_600_000,
            day_end: 17 * 3_600_000,
            slot_interval: 30 * 60_000,
        }
    }
}

impl ScheduleConfig {
    /// The bookable time grid for one day.
    pub fn slot_times(&self) -> impl Iterator<Item = Ms> + '_ {
        let mut t = self.day_start;
        std::iter::from_fn(move || {
            if t >= self.day_end {
                return None;
            }
            let cur = t;
            t += self.slot_interval;
            Some(cur)
        })
    }
}
