use crate::model::{BlockedDate, Ms};

// ── Calendar Blocking Registry ───────────────────────────────────
//
// Blocks are tenant-wide, not per-location. A `FullDay` block rejects
// every time on the date; a `Times` block rejects only the listed times.

/// True if any block on the date covers the given time.
pub fn is_blocked(blocks: &[BlockedDate], time: Ms) -> bool {
    blocks.iter().any(|b| b.blocks_time(time))
}
