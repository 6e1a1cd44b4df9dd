//! Jittered exponential backoff for the reconnect policy.
//!
//! `delay_ms(attempt) = min(CAP, 100 * 2^attempt + U[0, 1000])`, `attempt`
//! starting at 1, `CAP = 7000`. `delay_ms(0) == 0`.

use rand::Rng;

pub const CAP_MS: u64 = 7000;
const BASE_MS: u64 = 100;
const JITTER_MAX_MS: u64 = 1000;

/// Compute the backoff delay for the given retry attempt.
///
/// `rng` is taken as a parameter (rather than reached for globally) so the
/// function stays purely deterministic given the caller's RNG — the same
/// shape `beam-agent`'s `signaling.rs` backoff loop keeps implicit, made
/// explicit here so the delay's monotonic growth is unit-testable.
pub fn delay_ms(attempt: u32, rng: &mut impl Rng) -> u64 {
    let jitter = rng.gen_range(0..=JITTER_MAX_MS);
    delay_ms_with_jitter(attempt, jitter)
}

/// Deterministic variant used by tests and by callers that supply their own
/// fixed jitter value instead of drawing from an RNG.
pub fn delay_ms_with_jitter(attempt: u32, jitter: u64) -> u64 {
    if attempt == 0 {
        return 0;
    }
    // 100 * 2^attempt, saturating rather than panicking for large attempts.
    let exp = BASE_MS.saturating_mul(1u64 << attempt.min(32));
    exp.saturating_add(jitter.min(JITTER_MAX_MS)).min(CAP_MS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    #[test]
    fn zero_attempt_is_zero_delay() {
        let mut rng = StepRng::new(0, 0);
        assert_eq!(delay_ms(0, &mut rng), 0);
    }

    #[test]
    fn attempt_16_saturates_at_cap() {
        assert_eq!(delay_ms_with_jitter(16, 0), CAP_MS);
        assert_eq!(delay_ms_with_jitter(16, 1000), CAP_MS);
    }

    #[test]
    fn never_exceeds_cap() {
        for attempt in 0..40 {
            assert!(delay_ms_with_jitter(attempt, 1000) <= CAP_MS);
        }
    }

    #[test]
    fn monotonic_within_1000ms_tolerance() {
        for a in 0..16 {
            for b in a..16 {
                let da = delay_ms_with_jitter(a, 0);
                let db = delay_ms_with_jitter(b, 1000);
                assert!(da <= db + 1000, "delay_ms({a}) > delay_ms({b}) + 1000");
            }
        }
    }

    #[test]
    fn jitter_is_bounded_to_1000ms() {
        let base = delay_ms_with_jitter(1, 0);
        let jittered = delay_ms_with_jitter(1, 1000);
        assert_eq!(jittered - base, 1000);
    }
}
