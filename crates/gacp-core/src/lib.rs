//! # gacp-core — Foundational Types for the GACP Certification Stack
//!
//! Leaf crate of the workspace. Defines the primitives every other crate
//! builds on; it depends on nothing internal.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** `ApplicationId`, `ActorId`,
//!    `StaffId`, `PaymentHandle`, `CertificateId` are distinct types.
//!    An actor id cannot be passed where an application id is expected.
//!
//! 2. **Integer money.** Fees are `Amount` (whole currency units, `u64`)
//!    and herb multipliers are `FeeMultiplier` in basis points. No floats
//!    ever touch a fee computation.
//!
//! 3. **UTC-only timestamps.** `Timestamp` is UTC with seconds precision,
//!    so history entries compare and serialize deterministically.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `gacp-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod error;
pub mod identity;
pub mod money;
pub mod temporal;

pub use error::GacpError;
pub use identity::{ActorId, ApplicationId, CertificateId, PaymentHandle, StaffId};
pub use money::{Amount, FeeMultiplier};
pub use temporal::Timestamp;
