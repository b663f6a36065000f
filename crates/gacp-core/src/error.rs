//! # Error Types
//!
//! Validation failures for the core primitives. Domain crates define their
//! own error enums and wrap `GacpError` where a primitive fails to parse.

use thiserror::Error;

/// Top-level error type for the core primitives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GacpError {
    /// A timestamp string could not be parsed or was not UTC.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// An identifier string was empty or malformed.
    #[error("invalid identifier for {kind}: {value:?}")]
    InvalidIdentifier {
        /// The identifier namespace (e.g. "application").
        kind: &'static str,
        /// The rejected input.
        value: String,
    },

    /// A fee multiplier fell outside the permitted 1.0–2.0 band.
    #[error("fee multiplier {basis_points} bp outside permitted range {min}..={max} bp")]
    MultiplierOutOfRange {
        /// The rejected value in basis points.
        basis_points: u32,
        /// Lower bound in basis points.
        min: u32,
        /// Upper bound in basis points.
        max: u32,
    },

    /// An amount computation overflowed `u64`.
    #[error("amount overflow computing {0}")]
    AmountOverflow(String),
}
