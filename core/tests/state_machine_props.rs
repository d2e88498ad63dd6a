//! Property tests: state-machine closure and amount computation.

#![allow(clippy::unwrap_used)]

use dispatch_core::lifecycle::Transition;
use dispatch_core::{BookingStatus, Minutes, Money};
use proptest::prelude::*;

fn any_transition() -> impl Strategy<Value = Transition> {
    prop_oneof![
        Just(Transition::Accept),
        Just(Transition::Start),
        Just(Transition::Complete),
        Just(Transition::Cancel),
        Just(Transition::Dispute),
    ]
}

/// The only legal forward edges of the lifecycle graph.
fn is_legal_edge(from: BookingStatus, to: BookingStatus) -> bool {
    use BookingStatus as S;
    matches!(
        (from, to),
        (S::Pending, S::Accepted)
            | (S::Accepted, S::Started)
            | (S::Started, S::Completed)
            | (S::Pending | S::Accepted, S::Cancelled)
            | (S::Pending | S::Accepted | S::Started, S::Disputed)
    )
}

proptest! {
    /// Whatever sequence of transitions is attempted, the observed status
    /// path only ever walks legal edges, and terminal states absorb.
    #[test]
    fn status_paths_are_closed_under_arbitrary_attempts(
        attempts in prop::collection::vec(any_transition(), 0..32)
    ) {
        let mut status = BookingStatus::Pending;
        for attempt in attempts {
            let before = status;
            if attempt.guard(before).is_ok() {
                status = attempt.target();
                prop_assert!(
                    is_legal_edge(before, status),
                    "illegal edge {before} -> {status}"
                );
            } else {
                // A rejected attempt never changes the status.
                prop_assert_eq!(before, status);
            }
            if before.is_terminal() {
                prop_assert_eq!(before, status, "terminal states absorb");
            }
        }
    }

    /// `total_amount = rate × minutes / 60`, rounded half-up to the cent.
    #[test]
    fn amount_matches_rational_arithmetic(
        rate_cents in 0_u64..10_000_000,
        minutes in 0_u32..100_000,
    ) {
        let amount = Money::from_cents(rate_cents)
            .checked_for_minutes(Minutes::new(minutes))
            .unwrap();
        let exact = u128::from(rate_cents) * u128::from(minutes);
        let expected = (exact + 30) / 60;
        prop_assert_eq!(u128::from(amount.cents()), expected);
    }

    /// Estimated and actual duration bill identically when they agree.
    #[test]
    fn same_duration_same_amount(
        rate in 0_u64..1_000_000,
        minutes in 15_u32..24 * 60,
    ) {
        let rate = Money::from_cents(rate);
        let at_creation = rate.checked_for_minutes(Minutes::new(minutes)).unwrap();
        let at_completion = rate.checked_for_minutes(Minutes::new(minutes)).unwrap();
        prop_assert_eq!(at_creation, at_completion);
    }
}
