//! # Actors and Roles
//!
//! Who may trigger a transition. `Role::System` is the sentinel role: an
//! edge requiring `System` may be triggered by anyone, and an actor holding
//! `System` is authorized for every edge.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use gacp_core::ActorId;

/// Roles known to the certification workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Applicant who owns the cultivation site.
    Farmer,
    /// Document reviewer.
    Reviewer,
    /// Online or field auditor.
    Auditor,
    /// Final approver.
    Approver,
    /// Administrator with override powers (cancellation, manual closure).
    Admin,
    /// Automated service principal; also the "anyone" sentinel on edges.
    System,
}

impl Role {
    /// The snake_case name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Farmer => "farmer",
            Self::Reviewer => "reviewer",
            Self::Auditor => "auditor",
            Self::Approver => "approver",
            Self::Admin => "admin",
            Self::System => "system",
        }
    }

    /// Whether an actor holding `self` may trigger an edge requiring `required`.
    pub fn authorizes(&self, required: Role) -> bool {
        required == Role::System || *self == Role::System || *self == required
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown role name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role {0:?}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "farmer" => Ok(Self::Farmer),
            "reviewer" => Ok(Self::Reviewer),
            "auditor" => Ok(Self::Auditor),
            "approver" => Ok(Self::Approver),
            "admin" => Ok(Self::Admin),
            "system" => Ok(Self::System),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// The party attempting a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub role: Role,
}

impl Actor {
    pub fn new(id: ActorId, role: Role) -> Self {
        Self { id, role }
    }

    /// The automated service principal.
    pub fn system() -> Self {
        Self {
            id: ActorId::system(),
            role: Role::System,
        }
    }
}
