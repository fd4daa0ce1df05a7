//! Reconnect backoff.

use std::time::Duration;

/// Delay ceiling; reached at seven consecutive errors.
pub const MAX_DELAY_SECS: u64 = 300;

/// Pre-connect delay derived from the user's consecutive error count:
/// `min(errors³ − 1, 300)` seconds. Zero and one errors start immediately,
/// so a single transient fault costs nothing; persistent failures hit the
/// five-minute ceiling quickly.
pub fn reconnect_delay(errors: u32) -> Duration {
    let cubed = u64::from(errors).saturating_pow(3);
    Duration::from_secs(cubed.saturating_sub(1).min(MAX_DELAY_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_values() {
        assert_eq!(reconnect_delay(0), Duration::from_secs(0));
        assert_eq!(reconnect_delay(1), Duration::from_secs(0));
        assert_eq!(reconnect_delay(2), Duration::from_secs(7));
        assert_eq!(reconnect_delay(3), Duration::from_secs(26));
        assert_eq!(reconnect_delay(6), Duration::from_secs(215));
        assert_eq!(reconnect_delay(7), Duration::from_secs(300));
    }

    #[test]
    fn test_saturates_at_ceiling() {
        assert_eq!(reconnect_delay(8), Duration::from_secs(300));
        assert_eq!(reconnect_delay(100), Duration::from_secs(300));
        assert_eq!(reconnect_delay(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn test_monotonic_non_decreasing() {
        let mut previous = Duration::from_secs(0);
        for errors in 0..20 {
            let delay = reconnect_delay(errors);
            assert!(delay >= previous, "delay decreased at {} errors", errors);
            previous = delay;
        }
    }
}
