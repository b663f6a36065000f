//! # Money Types
//!
//! Fees are whole currency units held in a `u64`; herb-category
//! multipliers are basis points (10 000 bp = 1.0×). Scaling uses
//! integer arithmetic with half-up rounding, so 5 000 × 1.5 is exactly
//! 7 500 on every platform.

use serde::{Deserialize, Serialize};

use crate::error::GacpError;

/// Basis points representing a multiplier of exactly 1.0.
pub const BASIS_POINTS_ONE: u32 = 10_000;

/// An amount of money in whole currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(pub u64);

impl Amount {
    /// The zero amount.
    pub const ZERO: Amount = Amount(0);

    /// Whole currency units.
    pub fn units(&self) -> u64 {
        self.0
    }

    /// Scale by a multiplier, rounding half up to the nearest unit.
    pub fn scaled(&self, multiplier: FeeMultiplier) -> Result<Amount, GacpError> {
        let product = u128::from(self.0) * u128::from(multiplier.basis_points());
        let rounded = (product + u128::from(BASIS_POINTS_ONE / 2)) / u128::from(BASIS_POINTS_ONE);
        u64::try_from(rounded)
            .map(Amount)
            .map_err(|_| GacpError::AmountOverflow(format!("{} x {}", self.0, multiplier)))
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A herb-category fee multiplier in the closed range 1.0–2.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct FeeMultiplier(u32);

impl FeeMultiplier {
    /// Smallest permitted multiplier (1.0×).
    pub const MIN_BP: u32 = BASIS_POINTS_ONE;
    /// Largest permitted multiplier (2.0×).
    pub const MAX_BP: u32 = 2 * BASIS_POINTS_ONE;

    /// The neutral multiplier.
    pub const ONE: FeeMultiplier = FeeMultiplier(BASIS_POINTS_ONE);

    /// Build from basis points, rejecting values outside 1.0–2.0.
    pub fn from_basis_points(bp: u32) -> Result<Self, GacpError> {
        if !(Self::MIN_BP..=Self::MAX_BP).contains(&bp) {
            return Err(GacpError::MultiplierOutOfRange {
                basis_points: bp,
                min: Self::MIN_BP,
                max: Self::MAX_BP,
            });
        }
        Ok(Self(bp))
    }

    /// Parse a decimal string such as `"1.25"` without going through floats.
    pub fn parse_decimal(s: &str) -> Result<Self, GacpError> {
        let invalid = || GacpError::MultiplierOutOfRange {
            basis_points: 0,
            min: Self::MIN_BP,
            max: Self::MAX_BP,
        };
        let (whole, frac) = match s.trim().split_once('.') {
            Some((w, f)) => (w, f),
            None => (s.trim(), ""),
        };
        if frac.len() > 4 || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let whole: u32 = whole.parse().map_err(|_| invalid())?;
        let frac_bp: u32 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{frac:0<4}");
            padded.parse().map_err(|_| invalid())?
        };
        let bp = whole
            .checked_mul(BASIS_POINTS_ONE)
            .and_then(|w| w.checked_add(frac_bp))
            .ok_or_else(invalid)?;
        Self::from_basis_points(bp)
    }

    /// The multiplier in basis points.
    pub fn basis_points(&self) -> u32 {
        self.0
    }
}

impl Default for FeeMultiplier {
    fn default() -> Self {
        Self::ONE
    }
}

impl TryFrom<u32> for FeeMultiplier {
    type Error = GacpError;

    fn try_from(bp: u32) -> Result<Self, Self::Error> {
        Self::from_basis_points(bp)
    }
}

impl From<FeeMultiplier> for u32 {
    fn from(m: FeeMultiplier) -> Self {
        m.0
    }
}

impl std::fmt::Display for FeeMultiplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{:04}x",
            self.0 / BASIS_POINTS_ONE,
            self.0 % BASIS_POINTS_ONE
        )
    }
}
