use crate::model::AppointmentStatus;

use super::EngineError;

/// The single transition table. Every status mutation in the engine goes
/// through here; nothing else decides legality.
///
/// `Completed` is an input, not a resting state: it is accepted from
/// `Pending` or `Confirmed` and the mutation layer immediately chains it
/// into `AwaitingIssuance`. Reschedules (any non-terminal back to
/// `Pending` with a new slot) are a separate operation and do not pass
/// through this table.
pub(crate) fn is_allowed(from: AppointmentStatus, to: AppointmentStatus) -> bool {
    use AppointmentStatus::*;
    matches!(
        (from, to),
        (Pending, Confirmed)
            | (Pending, Completed)
            | (Pending, Cancelled)
            | (Confirmed, Completed)
            | (Confirmed, Cancelled)
            | (Completed, AwaitingIssuance)
            | (AwaitingIssuance, CinReady)
            | (AwaitingIssuance, Cancelled)
            | (CinReady, CinDelivered)
            | (CinReady, Cancelled)
    )
}

pub(crate) fn check(from: AppointmentStatus, to: AppointmentStatus) -> Result<(), EngineError> {
    if is_allowed(from, to) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AppointmentStatus::*;

    const ALL: [AppointmentStatus; 7] =
        [Pending, Confirmed, Completed, AwaitingIssuance, CinReady, CinDelivered, Cancelled];

    #[test]
    fn every_edge_in_the_table_is_allowed() {
        let edges = [
            (Pending, Confirmed),
            (Pending, Completed),
            (Pending, Cancelled),
            (Confirmed, Completed),
            (Confirmed, Cancelled),
            (Completed, AwaitingIssuance),
            (AwaitingIssuance, CinReady),
            (AwaitingIssuance, Cancelled),
            (CinReady, CinDelivered),
            (CinReady, Cancelled),
        ];
        for (from, to) in edges {
            assert!(is_allowed(from, to), "{from} -> {to} should be allowed");
        }
    }

    #[test]
    fn every_non_edge_is_rejected() {
        let edges: std::collections::HashSet<_> = [
            (Pending, Confirmed),
            (Pending, Completed),
            (Pending, Cancelled),
            (Confirmed, Completed),
            (Confirmed, Cancelled),
            (Completed, AwaitingIssuance),
            (AwaitingIssuance, CinReady),
            (AwaitingIssuance, Cancelled),
            (CinReady, CinDelivered),
            (CinReady, Cancelled),
        ]
        .into_iter()
        .collect();

        for from in ALL {
            for to in ALL {
                if !edges.contains(&(from, to)) {
                    assert!(!is_allowed(from, to), "{from} -> {to} should be rejected");
                }
            }
        }
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for to in ALL {
            assert!(!is_allowed(Cancelled, to));
            assert!(!is_allowed(CinDelivered, to));
        }
    }

    #[test]
    fn awaiting_issuance_cannot_be_set_directly() {
        // Only the `Completed` input chains into it.
        assert!(!is_allowed(Pending, AwaitingIssuance));
        assert!(!is_allowed(Confirmed, AwaitingIssuance));
    }

    #[test]
    fn check_reports_the_offending_pair() {
        let err = check(CinDelivered, Pending).unwrap_err();
        match err {
            EngineError::InvalidTransition { from, to } => {
                assert_eq!(from, CinDelivered);
                assert_eq!(to, Pending);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
