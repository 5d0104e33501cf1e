// Fee and limit arithmetic. All money math here is integer in msats;
// the percent leg rounds half-up so the fee never silently vanishes on
// small conversions.

use v4vapp_common::config::MSATS_PER_SAT;

use super::policy::{Policy, RateLimit};

// percent × gross + fixed
pub fn conversion_fee_msats(gross_msats: u64, policy: &Policy) -> u64 {
    let percent_leg = ((gross_msats as f64) * policy.conv_fee_percent / 100.0).round() as u64;
    percent_leg + policy.conv_fee_sats * MSATS_PER_SAT
}

// Invoice amount bounds; both ends inclusive on the minimum side
pub fn check_invoice_bounds(amount_msats: u64, policy: &Policy) -> Result<(), String> {
    let min_msats = policy.min_invoice_sats * MSATS_PER_SAT;
    let max_msats = policy.max_invoice_sats * MSATS_PER_SAT;
    if amount_msats < min_msats {
        return Err(format!(
            "Amount {} sats below minimum {} sats",
            amount_msats / MSATS_PER_SAT,
            policy.min_invoice_sats
        ));
    }
    if amount_msats > max_msats {
        return Err(format!(
            "Amount {} sats above maximum {} sats",
            amount_msats / MSATS_PER_SAT,
            policy.max_invoice_sats
        ));
    }
    Ok(())
}

// A routing fee budget above the policy cap aborts before payment
pub fn routing_fee_budget_msats(policy: &Policy) -> u64 {
    policy.max_ln_routing_fee_msats
}

// Check one user's conversion volume against the dynamic rate-limit
// list. `window_msats` maps each limit's hour window to the msats the
// user already converted inside it.
pub fn check_rate_limits<F>(
    limits: &[RateLimit],
    new_msats: u64,
    window_msats: F,
) -> Result<(), String>
where
    F: Fn(u32) -> u64,
{
    for limit in limits {
        let used = window_msats(limit.hours);
        let cap = limit.sats * MSATS_PER_SAT;
        if used.saturating_add(new_msats) > cap {
            return Err(format!(
                "Rate limit exceeded: {} sats per {}h (already used {} sats)",
                limit.sats,
                limit.hours,
                used / MSATS_PER_SAT
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> Policy {
        Policy {
            conv_fee_percent: 0.5,
            conv_fee_sats: 100,
            min_invoice_sats: 1_000,
            max_invoice_sats: 100_000,
            ..Policy::default()
        }
    }

    #[test]
    fn fee_is_percent_plus_fixed() {
        // 0.5% of 5000 sats = 25 sats, plus 100 fixed = 125 sats
        assert_eq!(conversion_fee_msats(5_000_000, &policy()), 125_000);
        // tiny conversion still pays the fixed leg
        assert_eq!(conversion_fee_msats(0, &policy()), 100_000);
    }

    #[test]
    fn invoice_bounds_are_inclusive_at_the_minimum() {
        let policy = policy();
        // exactly at the minimum is accepted
        assert!(check_invoice_bounds(1_000_000, &policy).is_ok());
        // one sat below is rejected
        assert!(check_invoice_bounds(999_000, &policy).is_err());
        assert!(check_invoice_bounds(100_000_000, &policy).is_ok());
        assert!(check_invoice_bounds(100_001_000, &policy).is_err());
    }

    #[test]
    fn rate_limits_apply_per_window() {
        let limits = vec![
            RateLimit {
                hours: 1,
                sats: 10_000,
            },
            RateLimit {
                hours: 24,
                sats: 50_000,
            },
        ];
        // under both windows
        assert!(check_rate_limits(&limits, 5_000_000, |_| 0).is_ok());
        // the hourly window blocks even when the daily one would allow
        let usage = |hours: u32| if hours == 1 { 8_000_000 } else { 10_000_000 };
        assert!(check_rate_limits(&limits, 5_000_000, usage).is_err());
        // exactly filling a window is allowed
        assert!(check_rate_limits(&limits, 2_000_000, usage).is_ok());
    }
}
