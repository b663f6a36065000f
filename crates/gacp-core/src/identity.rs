//! # Identifier Newtypes
//!
//! Newtype wrappers for every identifier the workflow touches. These keep
//! the namespaces apart: a reviewer's `StaffId` is not an `ActorId` until
//! it is explicitly converted, and neither is an `ApplicationId`.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GacpError;

/// Unique identifier for a certification application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicationId(pub Uuid);

/// Identifier of a person or service acting on an application.
///
/// Free-form because actors come from the external identity provider
/// (farmer accounts, staff accounts, the `system` service principal).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(String);

/// Identifier of a staff member returned by the assignment service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StaffId(String);

/// Opaque handle returned by the payment gateway for a payment request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentHandle(String);

/// Identifier of an issued certificate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CertificateId(String);

impl ApplicationId {
    /// Generate a new random application identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ApplicationId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for ApplicationId {
    type Err = GacpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("application:").unwrap_or(s);
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|_| GacpError::InvalidIdentifier {
                kind: "application",
                value: s.to_string(),
            })
    }
}

/// Implements the string-backed identifier boilerplate: a validating
/// constructor that rejects blank input, `as_str`, and `Display`.
macro_rules! string_identifier {
    ($ty:ident, $kind:literal) => {
        impl $ty {
            #[doc = concat!("Create a ", $kind, " identifier, rejecting blank input.")]
            pub fn new(value: impl Into<String>) -> Result<Self, GacpError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(GacpError::InvalidIdentifier {
                        kind: $kind,
                        value,
                    });
                }
                Ok(Self(value))
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $ty {
            type Err = GacpError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }
    };
}

string_identifier!(ActorId, "actor");
string_identifier!(StaffId, "staff");
string_identifier!(PaymentHandle, "payment handle");
string_identifier!(CertificateId, "certificate");

impl ActorId {
    /// The service principal used for automated transitions.
    pub fn system() -> Self {
        Self("system".to_string())
    }
}

impl From<StaffId> for ActorId {
    fn from(staff: StaffId) -> Self {
        Self(staff.0)
    }
}

impl std::fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "application:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_id_display_roundtrips_through_from_str() {
        let id = ApplicationId::new();
        let parsed: ApplicationId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn application_id_accepts_bare_uuid() {
        let id = ApplicationId::new();
        let parsed: ApplicationId = id.as_uuid().to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn application_id_rejects_garbage() {
        let err = "application:not-a-uuid".parse::<ApplicationId>().unwrap_err();
        assert!(matches!(err, GacpError::InvalidIdentifier { kind: "application", .. }));
    }

    #[test]
    fn blank_actor_rejected() {
        assert!(ActorId::new("").is_err());
        assert!(ActorId::new("   ").is_err());
        assert_eq!(ActorId::new("farmer-7").unwrap().as_str(), "farmer-7");
    }

    #[test]
    fn staff_converts_to_actor() {
        let staff = StaffId::new("reviewer-1").unwrap();
        let actor: ActorId = staff.clone().into();
        assert_eq!(actor.as_str(), staff.as_str());
    }
}
