//! Property-based tests for quota tracking.
//!
//! Random interleavings of call attempts, clock steps and exhaustion marks
//! must never let usage exceed a configured limit at dispatch time.

use std::sync::Arc;
use std::time::Duration;

use alfalyzer_market_data::{
    DataType, ManualClock, MemoryStore, ProviderDescriptor, QuotaErrorKind, QuotaTracker,
};
use proptest::prelude::*;

// =============================================================================
// Generators
// =============================================================================

#[derive(Clone, Debug)]
enum Op {
    /// Claim one call slot.
    Call,
    /// Move the clock forward by this many seconds.
    Advance(u64),
    MarkExhausted(QuotaErrorKind),
}

fn arb_kind() -> impl Strategy<Value = QuotaErrorKind> {
    prop_oneof![
        Just(QuotaErrorKind::RateLimit),
        Just(QuotaErrorKind::DailyLimit),
        Just(QuotaErrorKind::MonthlyLimit),
    ]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => Just(Op::Call),
        3 => (1u64..120).prop_map(Op::Advance),
        1 => (3_600u64..100_000).prop_map(Op::Advance),
        1 => arb_kind().prop_map(Op::MarkExhausted),
    ]
}

fn tracker(daily: u32, minute: Option<u32>) -> (QuotaTracker, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let mut descriptor = ProviderDescriptor::new("p", &[DataType::Quote], daily);
    if let Some(limit) = minute {
        descriptor = descriptor.minute_limit(limit);
    }
    let tracker = QuotaTracker::new(
        vec![descriptor],
        Arc::new(MemoryStore::new()),
        clock.clone(),
    );
    (tracker, clock)
}

// =============================================================================
// Property Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Usage never exceeds the daily or minute limit, whatever the sequence.
    #[test]
    fn prop_usage_never_exceeds_limits(
        daily in 1u32..50,
        minute in proptest::option::of(1u32..10),
        ops in proptest::collection::vec(arb_op(), 1..200),
    ) {
        let (quota, clock) = tracker(daily, minute);

        for op in ops {
            match op {
                Op::Call => {
                    let before = quota.remaining("p");
                    let granted = quota.try_consume("p");
                    prop_assert_eq!(granted, before > 0);
                }
                Op::Advance(secs) => clock.advance(Duration::from_secs(secs)),
                Op::MarkExhausted(kind) => quota.mark_exhausted("p", kind),
            }

            let status = quota.status("p").unwrap();
            prop_assert!(status.used <= status.limit);
            if let Some(limit) = status.minute_limit {
                prop_assert!(status.minute_used <= limit);
            }
        }
    }

    /// A granted call is always followed by one less remaining slot.
    #[test]
    fn prop_consume_decrements_remaining(daily in 2u32..100, calls in 1usize..20) {
        let (quota, _clock) = tracker(daily, None);
        for _ in 0..calls {
            let before = quota.remaining("p");
            if quota.try_consume("p") {
                prop_assert_eq!(quota.remaining("p"), before - 1);
            } else {
                prop_assert_eq!(before, 0);
            }
        }
    }

    /// A day after the last call the daily window is empty again.
    #[test]
    fn prop_daily_window_resets(daily in 1u32..30, calls in 0usize..40) {
        let (quota, clock) = tracker(daily, None);
        for _ in 0..calls {
            quota.try_consume("p");
        }
        clock.advance(Duration::from_secs(24 * 60 * 60 + 1));
        prop_assert_eq!(quota.status("p").unwrap().used, 0);
        prop_assert!(quota.can_consume("p"));
    }
}
