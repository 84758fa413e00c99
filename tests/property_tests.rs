//! Property-based tests for the debounce filter.
//!
//! Runs on host (x86_64) only — proptest is not available for ESP32 targets.
//! On ESP32, these tests are compiled out.

#![cfg(not(target_os = "espidf"))]

use edgebus::DebounceFilter;
use proptest::prelude::*;

proptest! {
    /// For any monotonic edge sequence, an edge is accepted iff it is the
    /// first edge or at least `interval` elapsed since the previously
    /// accepted edge — including sequences that cross the u32 wrap.
    #[test]
    fn acceptance_matches_reference_model(
        start in any::<u32>(),
        interval in 1u32..5_000,
        deltas in proptest::collection::vec(0u32..10_000, 1..64),
    ) {
        let mut filter = DebounceFilter::new(interval);
        let mut last_accepted: Option<u32> = None;
        let mut ts = start;

        for d in deltas {
            ts = ts.wrapping_add(d);
            let accepted = filter.accept(ts);
            match last_accepted {
                None => prop_assert!(accepted, "first edge must be accepted"),
                Some(prev) => {
                    let elapsed = ts.wrapping_sub(prev);
                    prop_assert_eq!(
                        accepted,
                        elapsed >= interval,
                        "elapsed {} vs interval {}", elapsed, interval
                    );
                }
            }
            if accepted {
                last_accepted = Some(ts);
            }
        }
    }

    /// Edges spaced exactly one interval apart are all accepted, wherever
    /// the sequence starts on the clock.
    #[test]
    fn interval_spaced_edges_all_accepted(
        start in any::<u32>(),
        interval in 1u32..1_000,
        count in 1usize..32,
    ) {
        let mut filter = DebounceFilter::new(interval);
        let mut ts = start;
        for _ in 0..count {
            prop_assert!(filter.accept(ts));
            ts = ts.wrapping_add(interval);
        }
    }

    /// Any burst of chatter inside a single interval collapses to exactly
    /// one acceptance.
    #[test]
    fn chatter_within_one_interval_collapses(
        start in any::<u32>(),
        interval in 2u32..5_000,
        raw in proptest::collection::vec(any::<u32>(), 1..16),
    ) {
        let mut offsets: Vec<u32> = raw.into_iter().map(|r| r % interval).collect();
        offsets.sort_unstable();

        let mut filter = DebounceFilter::new(interval);
        let mut accepted = 0u32;
        for off in offsets {
            if filter.accept(start.wrapping_add(off)) {
                accepted += 1;
            }
        }
        prop_assert_eq!(accepted, 1);
    }
}
