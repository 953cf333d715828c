//! Warm-up ramp: progressive daily limits for new and returning accounts.
//! Abrupt full-volume activity on a fresh account is the strongest
//! abuse-detection trigger on every surface, so limits climb day by day.

use outpost_core::types::AccountStatus;

/// Length of the ramp in days. An account auto-promotes to `Active` once
/// `warmup_day` reaches this value.
pub const RAMP_DAYS: u32 = 7;

/// Per-day cap during the ramp. Monotone non-decreasing by construction;
/// day 6 onward the nominal limit applies.
fn ramp_cap(day: u32) -> u32 {
    match day {
        0 => 2,
        1 => 4,
        2 => 6,
        3 => 9,
        4 => 12,
        5 => 16,
        _ => u32::MAX,
    }
}

/// Effective daily limit for one action kind given account state.
/// Every status other than `Warming`/`Active` is ineligible (limit 0).
pub fn effective_limit(status: AccountStatus, warmup_day: u32, nominal: u32) -> u32 {
    match status {
        AccountStatus::Active => nominal,
        AccountStatus::Warming => ramp_cap(warmup_day).min(nominal),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ramp_monotone() {
        let nominal = 20;
        for day in 0..RAMP_DAYS {
            let here = effective_limit(AccountStatus::Warming, day, nominal);
            let next = effective_limit(AccountStatus::Warming, day + 1, nominal);
            assert!(here <= next, "ramp decreased at day {day}");
            assert!(here <= effective_limit(AccountStatus::Active, 0, nominal));
        }
    }

    #[test]
    fn test_ramp_reaches_nominal() {
        assert_eq!(effective_limit(AccountStatus::Warming, 6, 20), 20);
        assert_eq!(effective_limit(AccountStatus::Warming, 6, 10), 10);
        assert_eq!(effective_limit(AccountStatus::Active, 0, 20), 20);
    }

    #[test]
    fn test_ramp_clamped_to_small_nominal() {
        // A tiny nominal limit never climbs above itself mid-ramp.
        for day in 0..RAMP_DAYS {
            assert!(effective_limit(AccountStatus::Warming, day, 3) <= 3);
        }
    }

    #[test]
    fn test_ineligible_statuses_are_zero() {
        for status in [
            AccountStatus::New,
            AccountStatus::Resting,
            AccountStatus::Blocked,
            AccountStatus::Disabled,
            AccountStatus::Error,
        ] {
            assert_eq!(effective_limit(status, 3, 20), 0);
        }
    }
}
