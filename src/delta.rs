//! Pure counter-delta calculator. See `spec.md` §4.C / §8 for the laws.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anomaly {
    None,
    Reset,
    Jump,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterDelta {
    pub delta: i64,
    pub anomaly: Anomaly,
}

/// `delta(prev, cur, jump_threshold) -> (delta, anomaly)`.
///
/// - equal readings: no delta, no anomaly.
/// - `cur < prev`: the PLC counter reset; treat `cur` itself as the delta.
/// - `cur - prev > jump_threshold`: anomalous jump, flagged for operator
///   confirmation before it's applied to any payload.
/// - otherwise: the plain difference.
pub fn delta(prev: i64, cur: i64, jump_threshold: i64) -> CounterDelta {
    if cur == prev {
        return CounterDelta { delta: 0, anomaly: Anomaly::None };
    }
    if cur < prev {
        return CounterDelta { delta: cur, anomaly: Anomaly::Reset };
    }
    let diff = cur - prev;
    if diff > jump_threshold {
        CounterDelta { delta: diff, anomaly: Anomaly::Jump }
    } else {
        CounterDelta { delta: diff, anomaly: Anomaly::None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn equal_readings_produce_no_delta() {
        assert_eq!(delta(42, 42, 1000), CounterDelta { delta: 0, anomaly: Anomaly::None });
    }

    #[test]
    fn decreasing_reading_is_a_reset() {
        assert_eq!(delta(500, 3, 1000), CounterDelta { delta: 3, anomaly: Anomaly::Reset });
    }

    #[test]
    fn large_jump_is_flagged() {
        assert_eq!(delta(100, 2000, 1000), CounterDelta { delta: 1900, anomaly: Anomaly::Jump });
    }

    #[test]
    fn ordinary_increment_has_no_anomaly() {
        assert_eq!(delta(100, 106, 1000), CounterDelta { delta: 6, anomaly: Anomaly::None });
    }

    #[test]
    fn jump_threshold_boundary_is_exclusive() {
        assert_eq!(delta(0, 1000, 1000).anomaly, Anomaly::None);
        assert_eq!(delta(0, 1001, 1000).anomaly, Anomaly::Jump);
    }

    proptest! {
        #[test]
        fn equal_law(x in any::<i64>(), t in 0i64..i64::MAX) {
            prop_assert_eq!(delta(x, x, t), CounterDelta { delta: 0, anomaly: Anomaly::None });
        }

        #[test]
        fn reset_law(x in 0i64..1_000_000, y in 0i64..1_000_000, t in 0i64..i64::MAX) {
            prop_assume!(y < x);
            let result = delta(x, y, t);
            prop_assert_eq!(result.delta, y);
            prop_assert_eq!(result.anomaly, Anomaly::Reset);
        }

        #[test]
        fn jump_or_plain_law(x in 0i64..1_000_000, y in 0i64..2_000_000, t in 0i64..1_000_000) {
            prop_assume!(y >= x);
            let result = delta(x, y, t);
            prop_assert_eq!(result.delta, y - x);
            if y - x > t {
                prop_assert_eq!(result.anomaly, Anomaly::Jump);
            } else {
                prop_assert_eq!(result.anomaly, Anomaly::None);
            }
        }
    }
}
