use crate::model::*;

use super::store::SlotState;

// ── Slot capacity math ───────────────────────────────────────────
//
// Pure functions over one slot bucket. Enforcing atomicity against
// concurrent bookings is the mutation layer's job: it calls these while
// holding the bucket's write lock.

/// Appointments in the bucket that still count toward capacity.
pub fn active_count(slot: &SlotState) -> u32 {
    slot.appointments.iter().filter(|a| a.occupies_slot()).count() as u32
}

/// Remaining booking capacity. A create/reschedule into the bucket is
/// allowed only while this is > 0.
pub fn remaining(slot: &SlotState, capacity: u32) -> u32 {
    capacity.saturating_sub(active_count(slot))
}

pub fn has_capacity(slot: &SlotState, capacity: u32) -> bool {
    remaining(slot, capacity) > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn citizen(n: u32) -> Citizen {
        Citizen {
            name: format!("Citizen {n}"),
            cpf: format!("{:011}", n),
            phone: None,
            email: None,
            street: None,
            number: None,
            district: None,
            city: None,
        }
    }

    fn bucket(statuses: &[AppointmentStatus]) -> SlotState {
        let key = SlotKey::new(Ulid::new(), DAY_MS, 9 * 3_600_000);
        let mut slot = SlotState::new(key);
        for (i, &status) in statuses.iter().enumerate() {
            let mut appt =
                Appointment::new(Ulid::new(), "t".into(), key, citizen(i as u32), false, None, 0);
            appt.status = status;
            slot.appointments.push(appt);
        }
        slot
    }

    #[test]
    fn empty_bucket_has_full_capacity() {
        let slot = bucket(&[]);
        assert_eq!(active_count(&slot), 0);
        assert_eq!(remaining(&slot, 2), 2);
        assert!(has_capacity(&slot, 2));
    }

    #[test]
    fn cancelled_appointments_do_not_count() {
        use AppointmentStatus::*;
        let slot = bucket(&[Pending, Cancelled, Confirmed, Cancelled]);
        assert_eq!(active_count(&slot), 2);
        assert_eq!(remaining(&slot, 2), 0);
        assert!(!has_capacity(&slot, 2));
    }

    #[test]
    fn every_non_cancelled_status_counts() {
        use AppointmentStatus::*;
        let slot = bucket(&[Pending, Confirmed, AwaitingIssuance, CinReady, CinDelivered]);
        assert_eq!(active_count(&slot), 5);
    }

    #[test]
    fn remaining_saturates_when_overfull() {
        // Capacity lowered after bookings were made: never underflows.
        use AppointmentStatus::*;
        let slot = bucket(&[Pending, Pending, Pending]);
        assert_eq!(remaining(&slot, 2), 0);
        assert!(!has_capacity(&slot, 2));
    }
}
