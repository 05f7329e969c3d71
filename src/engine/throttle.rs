use crate::model::{CancellationRecord, CpfBlock, Ms};

// ── Rolling-window throttles ─────────────────────────────────────
//
// The cancellation throttle and the reschedule limiter share the same
// counting shape but are independent: each has its own ledger, window
// and threshold. Windows are trailing and half-open, `(now - window,
// now]`, so an event exactly `window` old no longer counts.

/// Count ledger timestamps inside the trailing window.
pub fn count_in_window(times: &[Ms], now: Ms, window: Ms) -> u32 {
    times.iter().filter(|&&t| t > now - window && t <= now).count() as u32
}

/// Cancellations for one (tenant, cpf) inside the trailing window.
pub fn cancellations_in_window(records: &[CancellationRecord], now: Ms, window: Ms) -> u32 {
    records
        .iter()
        .filter(|r| r.cancelled_at > now - window && r.cancelled_at <= now)
        .count() as u32
}

/// The block a qualifying cancellation issues. `count` includes the
/// cancellation that just happened.
pub fn issue_block(cpf: &str, tenant: &str, count: u32, now: Ms, window: Ms) -> CpfBlock {
    CpfBlock {
        cpf: cpf.to_string(),
        tenant: tenant.to_string(),
        blocked_until: now + window,
        reason: format!("{count} cancellations within the booking window"),
        cancellation_count: count,
        active: true,
    }
}

/// The currently enforced block, if any: active and not yet expired.
pub fn active_block(blocks: &[CpfBlock], now: Ms) -> Option<&CpfBlock> {
    blocks.iter().find(|b| b.active && b.blocked_until > now)
}

/// Deactivate every active block and append the fresh one. Keeps the
/// at-most-one-active invariant without rewriting history rows.
pub fn supersede(blocks: &mut Vec<CpfBlock>, fresh: CpfBlock) {
    for b in blocks.iter_mut() {
        b.active = false;
    }
    blocks.push(fresh);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DAY_MS;
    use ulid::Ulid;

    const WINDOW: Ms = 7 * DAY_MS;

    // 2025-03-01T00:00:00Z, with the other dates derived from it.
    const MAR_01: Ms = 1_740_787_200_000;
    const MAR_03: Ms = MAR_01 + 2 * DAY_MS;
    const MAR_05: Ms = MAR_01 + 4 * DAY_MS;
    const MAR_06: Ms = MAR_01 + 5 * DAY_MS;
    const MAR_12: Ms = MAR_01 + 11 * DAY_MS;

    fn record(cpf: &str, at: Ms) -> CancellationRecord {
        CancellationRecord {
            cpf: cpf.into(),
            tenant: "t1".into(),
            appointment_id: Ulid::new(),
            cancelled_at: at,
        }
    }

    #[test]
    fn three_cancellations_in_seven_days_reach_the_threshold() {
        let ledger = vec![
            record("11122233344", MAR_01),
            record("11122233344", MAR_03),
            record("11122233344", MAR_05),
        ];
        assert_eq!(cancellations_in_window(&ledger, MAR_05, WINDOW), 3);
    }

    #[test]
    fn block_expiry_is_window_after_the_third_cancellation() {
        // Block issued at the MAR_05 cancellation: expires MAR_12.
        let block = issue_block("11122233344", "t1", 3, MAR_05, WINDOW);
        assert_eq!(block.blocked_until, MAR_12);
        assert_eq!(block.cancellation_count, 3);
        assert!(block.active);

        // A booking attempt on MAR_06 still sees the block.
        let blocks = vec![block];
        let hit = active_block(&blocks, MAR_06).expect("should be blocked");
        assert_eq!(hit.blocked_until, MAR_12);
    }

    #[test]
    fn window_boundary_is_half_open() {
        // A cancellation exactly 8 days before the newest three is out.
        let now = MAR_01 + 8 * DAY_MS;
        let ledger = vec![
            record("x", MAR_01),           // 8 days old: out
            record("x", now - 2 * DAY_MS),
            record("x", now - DAY_MS),
            record("x", now),
        ];
        assert_eq!(cancellations_in_window(&ledger, now, WINDOW), 3);

        // Exactly `window` old is out too.
        let ledger = vec![record("x", now - WINDOW), record("x", now)];
        assert_eq!(cancellations_in_window(&ledger, now, WINDOW), 1);
    }

    #[test]
    fn expired_block_no_longer_enforced() {
        let block = issue_block("x", "t1", 3, MAR_05, WINDOW);
        let blocks = vec![block];
        assert!(active_block(&blocks, MAR_12).is_none()); // expires at its own instant
        assert!(active_block(&blocks, MAR_12 - 1).is_some());
    }

    #[test]
    fn inactive_block_ignored_even_if_unexpired() {
        let mut block = issue_block("x", "t1", 3, MAR_05, WINDOW);
        block.active = false;
        assert!(active_block(&[block], MAR_06).is_none());
    }

    #[test]
    fn supersede_keeps_one_active_block() {
        let mut blocks = vec![issue_block("x", "t1", 3, MAR_05, WINDOW)];
        // A 4th cancellation two days later resets the expiry.
        let fresh = issue_block("x", "t1", 4, MAR_05 + 2 * DAY_MS, WINDOW);
        supersede(&mut blocks, fresh);

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks.iter().filter(|b| b.active).count(), 1);
        let enforced = active_block(&blocks, MAR_06).unwrap();
        assert_eq!(enforced.blocked_until, MAR_05 + 9 * DAY_MS);
        assert_eq!(enforced.cancellation_count, 4);
    }

    #[test]
    fn reschedule_counting_uses_the_same_window_shape() {
        let now = 100 * DAY_MS;
        let times = vec![now - 8 * DAY_MS, now - 3 * DAY_MS, now - DAY_MS, now];
        assert_eq!(count_in_window(&times, now, WINDOW), 3);
        // Future-dated entries (clock skew in a ledger restore) don't count.
        let times = vec![now + DAY_MS];
        assert_eq!(count_in_window(&times, now, WINDOW), 0);
    }
}
