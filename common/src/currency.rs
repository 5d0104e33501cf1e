use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::config::{MILLI_PER_COIN, MSATS_PER_SAT};

#[derive(Debug, Error)]
pub enum CurrencyError {
    #[error("Amount overflow")]
    Overflow,
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Rate for {0} is not available")]
    RateUnavailable(&'static str),
}

// Ledger unit of an entry. Every amount is an integer in the smallest
// unit of its currency: milli-HIVE, milli-HBD or millisatoshis.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum Unit {
    #[serde(rename = "HIVE")]
    #[strum(serialize = "HIVE")]
    Hive,
    #[serde(rename = "HBD")]
    #[strum(serialize = "HBD")]
    Hbd,
    #[serde(rename = "MSATS")]
    #[strum(serialize = "MSATS")]
    Msats,
}

impl Unit {
    // Units per display coin (1 HIVE, 1 HBD, 1 sat)
    pub fn scale(&self) -> u64 {
        match self {
            Unit::Hive | Unit::Hbd => MILLI_PER_COIN,
            Unit::Msats => MSATS_PER_SAT,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Hive => "HIVE",
            Unit::Hbd => "HBD",
            Unit::Msats => "sats",
        }
    }
}

// Cross rates against which conversions are valued.
// sats per HIVE / HBD are market medians, usd legs come from the
// exchange ticker. All rates are display-unit rates (per whole coin).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CrossRates {
    pub sats_per_hive: f64,
    pub sats_per_hbd: f64,
    pub usd_per_hive: f64,
    pub usd_per_hbd: f64,
}

impl CrossRates {
    // Gross msats equivalent of an on-chain amount in its smallest unit.
    // milli-coin * sats-per-coin = msats, so no division is needed and
    // the floor keeps the credit conservative.
    pub fn milli_to_msats(&self, amount_milli: u64, unit: Unit) -> Result<u64, CurrencyError> {
        let rate = self.sats_rate(unit)?;
        let msats = (amount_milli as f64) * rate;
        if !msats.is_finite() || msats < 0.0 {
            return Err(CurrencyError::Overflow);
        }
        Ok(msats.floor() as u64)
    }

    // Inverse direction, also floored
    pub fn msats_to_milli(&self, msats: u64, unit: Unit) -> Result<u64, CurrencyError> {
        let rate = self.sats_rate(unit)?;
        if rate <= 0.0 {
            return Err(CurrencyError::RateUnavailable(unit.symbol()));
        }
        Ok(((msats as f64) / rate).floor() as u64)
    }

    fn sats_rate(&self, unit: Unit) -> Result<f64, CurrencyError> {
        let rate = match unit {
            Unit::Hive => self.sats_per_hive,
            Unit::Hbd => self.sats_per_hbd,
            Unit::Msats => return Err(CurrencyError::InvalidAmount("MSATS is not an on-chain unit".into())),
        };
        if rate <= 0.0 || !rate.is_finite() {
            return Err(CurrencyError::RateUnavailable(unit.symbol()));
        }
        Ok(rate)
    }

    // Value an amount in every currency for the `conv` snapshot of a ledger entry
    pub fn snapshot(&self, amount: u64, unit: Unit) -> ConvSnapshot {
        let (hive, hbd, msats, usd) = match unit {
            Unit::Hive => {
                let coins = amount as f64 / MILLI_PER_COIN as f64;
                (
                    coins,
                    coins * self.usd_per_hive / self.usd_per_hbd.max(f64::MIN_POSITIVE),
                    (amount as f64 * self.sats_per_hive) as u64,
                    coins * self.usd_per_hive,
                )
            }
            Unit::Hbd => {
                let coins = amount as f64 / MILLI_PER_COIN as f64;
                (
                    coins * self.usd_per_hbd / self.usd_per_hive.max(f64::MIN_POSITIVE),
                    coins,
                    (amount as f64 * self.sats_per_hbd) as u64,
                    coins * self.usd_per_hbd,
                )
            }
            Unit::Msats => {
                let sats = amount as f64 / MSATS_PER_SAT as f64;
                let hive = if self.sats_per_hive > 0.0 {
                    sats / self.sats_per_hive
                } else {
                    0.0
                };
                let usd = hive * self.usd_per_hive;
                let hbd = if self.usd_per_hbd > 0.0 {
                    usd / self.usd_per_hbd
                } else {
                    0.0
                };
                (hive, hbd, amount, usd)
            }
        };

        ConvSnapshot {
            hive,
            hbd,
            msats,
            usd,
        }
    }
}

// Snapshot of an entry's value in every currency at the moment of posting.
// Frozen at post time, never re-marked on report generation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvSnapshot {
    pub hive: f64,
    pub hbd: f64,
    pub msats: u64,
    pub usd: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rates() -> CrossRates {
        CrossRates {
            sats_per_hive: 200.0,
            sats_per_hbd: 800.0,
            usd_per_hive: 0.2,
            usd_per_hbd: 1.0,
        }
    }

    #[test]
    fn hive_to_msats_uses_smallest_units() {
        // 25.000 HIVE at 200 sats/HIVE = 5000 sats = 5_000_000 msats
        let msats = rates().milli_to_msats(25_000, Unit::Hive).unwrap();
        assert_eq!(msats, 5_000_000);
    }

    #[test]
    fn msats_round_trip_floors() {
        let rates = rates();
        let milli = rates.msats_to_milli(4_500_000, Unit::Hive).unwrap();
        // 4500 sats / 200 sats-per-HIVE = 22.5 HIVE
        assert_eq!(milli, 22_500);
        // one msat below floors down
        assert_eq!(rates.msats_to_milli(4_499_999, Unit::Hive).unwrap(), 22_499);
    }

    #[test]
    fn snapshot_values_every_leg() {
        let snap = rates().snapshot(25_000, Unit::Hive);
        assert_eq!(snap.msats, 5_000_000);
        assert!((snap.hive - 25.0).abs() < 1e-9);
        assert!((snap.usd - 5.0).abs() < 1e-9);
        assert!((snap.hbd - 5.0).abs() < 1e-9);
    }

    #[test]
    fn msats_is_not_an_on_chain_unit() {
        assert!(rates().milli_to_msats(1, Unit::Msats).is_err());
    }
}
