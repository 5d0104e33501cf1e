use crate::config::{MILLI_PER_COIN, MSATS_PER_SAT};
use crate::currency::Unit;

// Format an amount held in its smallest unit for display.
// Internal arithmetic never uses these strings.
pub fn format_amount(amount: u64, unit: Unit) -> String {
    match unit {
        Unit::Hive | Unit::Hbd => format!(
            "{}.{:03} {}",
            amount / MILLI_PER_COIN,
            amount % MILLI_PER_COIN,
            unit.symbol()
        ),
        Unit::Msats => format!("{} sats", amount / MSATS_PER_SAT),
    }
}

pub fn format_msats_precise(msats: u64) -> String {
    format!("{}.{:03} sats", msats / MSATS_PER_SAT, msats % MSATS_PER_SAT)
}

// Parse a chain asset string like "25.000 HIVE" into (milli units, unit)
pub fn parse_asset_amount(value: &str) -> Option<(u64, Unit)> {
    let mut parts = value.split_whitespace();
    let amount = parts.next()?;
    let symbol = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let unit = match symbol {
        "HIVE" => Unit::Hive,
        "HBD" => Unit::Hbd,
        _ => return None,
    };

    let (whole, frac) = match amount.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (amount, ""),
    };
    if frac.len() > 3 {
        return None;
    }

    let whole: u64 = whole.parse().ok()?;
    let frac_milli: u64 = if frac.is_empty() {
        0
    } else {
        let parsed: u64 = frac.parse().ok()?;
        parsed * 10u64.pow(3 - frac.len() as u32)
    };

    whole
        .checked_mul(MILLI_PER_COIN)?
        .checked_add(frac_milli)
        .map(|milli| (milli, unit))
}

// Render milli units back into the chain's "25.000 HIVE" form
pub fn to_asset_string(amount_milli: u64, unit: Unit) -> String {
    let symbol = match unit {
        Unit::Hive => "HIVE",
        Unit::Hbd => "HBD",
        Unit::Msats => "SATS",
    };
    format!(
        "{}.{:03} {}",
        amount_milli / MILLI_PER_COIN,
        amount_milli % MILLI_PER_COIN,
        symbol
    )
}

// Stable per-host identifier appended to error codes so identical
// errors on different hosts do not suppress each other
pub fn machine_id() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.is_empty() {
            return name;
        }
    }
    std::fs::read_to_string("/etc/hostname")
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| String::from("unknown-host"))
}

// Truncate to `max` characters, appending an ellipsis when cut
pub fn truncate_with_ellipsis(message: &str, max: usize) -> String {
    if message.chars().count() <= max {
        return message.to_string();
    }
    let truncated: String = message.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", truncated)
}

// Remove terminal colour escape sequences before handing a message
// to an outbound transport
pub fn strip_ansi_codes(message: &str) -> String {
    let mut output = String::with_capacity(message.len());
    let mut chars = message.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            if chars.peek() == Some(&'[') {
                chars.next();
                for follow in chars.by_ref() {
                    if follow.is_ascii_alphabetic() {
                        break;
                    }
                }
                continue;
            }
            continue;
        }
        output.push(c);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_amount_round_trip() {
        assert_eq!(
            parse_asset_amount("25.000 HIVE"),
            Some((25_000, Unit::Hive))
        );
        assert_eq!(parse_asset_amount("0.001 HBD"), Some((1, Unit::Hbd)));
        assert_eq!(parse_asset_amount("3 HIVE"), Some((3_000, Unit::Hive)));
        assert_eq!(to_asset_string(25_000, Unit::Hive), "25.000 HIVE");
    }

    #[test]
    fn asset_amount_rejects_garbage() {
        assert!(parse_asset_amount("25.0000 HIVE").is_none());
        assert!(parse_asset_amount("25.000 DOGE").is_none());
        assert!(parse_asset_amount("HIVE").is_none());
        assert!(parse_asset_amount("1 2 HIVE").is_none());
    }

    #[test]
    fn truncation_appends_ellipsis() {
        let long = "x".repeat(400);
        let cut = truncate_with_ellipsis(&long, 300);
        assert_eq!(cut.chars().count(), 300);
        assert!(cut.ends_with('…'));
        assert_eq!(truncate_with_ellipsis("short", 300), "short");
    }

    #[test]
    fn ansi_codes_are_stripped() {
        let colored = "\x1b[31mpayment failed\x1b[0m for alice";
        assert_eq!(strip_ansi_codes(colored), "payment failed for alice");
    }
}
