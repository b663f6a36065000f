//! # Workflow Errors
//!
//! One enum for every way a workflow operation can fail. Most variants are
//! *expected* outcomes (an edge that does not exist, an actor without the
//! right role, a guard that does not hold) and are meant to be rendered
//! to the caller as-is. Only [`WorkflowError::System`] represents a fault.
//!
//! | Kind | Variants |
//! |------|----------|
//! | Expected | `InvalidTransition`, `UnauthorizedRole`, `ConditionNotMet`, `BusinessRuleViolation`, `MaxRejectionsReached`, `DuplicatePayment`, `ApplicationNotFound` |
//! | Retryable | `ConcurrentModification` |
//! | System | `System` |

use thiserror::Error;

use gacp_core::{ActorId, Amount, ApplicationId, GacpError};

use crate::actor::Role;
use crate::application::StaffRole;
use crate::guard::{GuardError, GuardId};
use crate::payment::PaymentReason;
use crate::ports::{CollaboratorError, RepositoryError};
use crate::state::WorkflowState;

/// How a caller should treat a [`WorkflowError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A structured refusal; render it, do not retry blindly.
    Expected,
    /// Re-invoke the operation against fresh state.
    Retryable,
    /// A collaborator or invariant fault; logged and escalated.
    System,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expected => "expected",
            Self::Retryable => "retryable",
            Self::System => "system",
        }
    }
}

/// The condition that was not met on a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// A named guard evaluated to false.
    Guard(GuardId),
    /// The payment milestone attached to the edge is unsatisfied.
    Payment {
        milestone: PaymentReason,
        cycle: u32,
    },
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Guard(guard) => write!(f, "guard {guard}"),
            Self::Payment { milestone, cycle } => {
                write!(f, "payment {milestone} (cycle {cycle}) not completed")
            }
        }
    }
}

/// Cross-cutting rules checked after guards and payment gates.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusinessRule {
    #[error("an approved review must be on record before {target}")]
    ReviewNotApproved { target: WorkflowState },

    #[error("the latest audit round must have passed before approval")]
    AuditNotPassed,

    #[error("a granted approval must be on record before the certificate is issued")]
    ApprovalMissing,

    #[error("approval has already been recorded")]
    ApprovalAlreadyRecorded,

    #[error("only the assigned {role} {assigned} may act")]
    NotAssignedStaff {
        /// Staff role the edge requires.
        role: StaffRole,
        /// Staff member currently assigned.
        assigned: String,
    },

    #[error("actor {actor} does not own this application")]
    NotOwner { actor: ActorId },

    #[error("invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("a {kind} submission is required for {from} -> {to}")]
    MissingSubmission {
        kind: &'static str,
        from: WorkflowState,
        to: WorkflowState,
    },

    #[error("a {milestone} payment (cycle {cycle}) is already pending")]
    PaymentAlreadyPending { milestone: PaymentReason, cycle: u32 },

    #[error("state {state} is not awaiting a {milestone} payment")]
    PaymentNotAwaited {
        state: WorkflowState,
        milestone: PaymentReason,
    },

    #[error("no payment request with this handle exists")]
    UnknownPaymentHandle,

    #[error("{milestone} payment of {received} is below the {expected} due")]
    PaymentBelowFee {
        milestone: PaymentReason,
        expected: Amount,
        received: Amount,
    },

    #[error("{milestone} payment is for cycle {received}, but cycle {expected} is due")]
    PaymentCycleMismatch {
        milestone: PaymentReason,
        expected: u32,
        received: u32,
    },

    #[error("documents can only be replaced in draft or revision states, not {state}")]
    DocumentsLocked { state: WorkflowState },

    #[error("no staff role is filled in state {state}")]
    NoAssignmentForState { state: WorkflowState },
}

/// Errors returned by [`crate::engine::WorkflowEngine`] operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    /// No edge exists between the two states.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: WorkflowState,
        to: WorkflowState,
    },

    /// The actor's role does not match the edge's required role.
    #[error("role {actual} may not perform {action}; requires {required}")]
    UnauthorizedRole {
        required: Role,
        actual: Role,
        action: String,
    },

    /// A guard or payment milestone does not hold.
    #[error("condition not met for {from} -> {to}: {condition}")]
    ConditionNotMet {
        from: WorkflowState,
        to: WorkflowState,
        condition: Condition,
    },

    /// A cross-cutting business rule was violated.
    #[error("business rule violation: {0}")]
    BusinessRuleViolation(BusinessRule),

    /// The rejection counter is already past the terminal threshold.
    #[error("maximum rejections reached: count {count}, limit {max}")]
    MaxRejectionsReached { count: u32, max: u32 },

    /// A completed payment already exists for this milestone and cycle.
    #[error("duplicate payment for {milestone} (cycle {cycle})")]
    DuplicatePayment { milestone: PaymentReason, cycle: u32 },

    #[error("application not found: {0}")]
    ApplicationNotFound(ApplicationId),

    /// The persisted application changed between load and commit.
    #[error("concurrent modification of {id}: expected {expected_state} at version {expected_version}")]
    ConcurrentModification {
        id: ApplicationId,
        expected_state: WorkflowState,
        expected_version: u64,
    },

    /// Collaborator fault or broken invariant.
    #[error("system error: {0}")]
    System(String),
}

impl WorkflowError {
    /// Classify for retry and escalation decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConcurrentModification { .. } => ErrorKind::Retryable,
            Self::System(_) => ErrorKind::System,
            _ => ErrorKind::Expected,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }

    /// Short machine-readable label, used as a metrics label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::UnauthorizedRole { .. } => "unauthorized_role",
            Self::ConditionNotMet { .. } => "condition_not_met",
            Self::BusinessRuleViolation(_) => "business_rule_violation",
            Self::MaxRejectionsReached { .. } => "max_rejections_reached",
            Self::DuplicatePayment { .. } => "duplicate_payment",
            Self::ApplicationNotFound(_) => "application_not_found",
            Self::ConcurrentModification { .. } => "concurrent_modification",
            Self::System(_) => "system",
        }
    }
}

impl From<BusinessRule> for WorkflowError {
    fn from(rule: BusinessRule) -> Self {
        Self::BusinessRuleViolation(rule)
    }
}

impl From<GuardError> for WorkflowError {
    fn from(err: GuardError) -> Self {
        Self::System(err.to_string())
    }
}

impl From<GacpError> for WorkflowError {
    fn from(err: GacpError) -> Self {
        Self::System(err.to_string())
    }
}

impl From<RepositoryError> for WorkflowError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(id) => Self::ApplicationNotFound(id),
            other => Self::System(other.to_string()),
        }
    }
}

impl From<CollaboratorError> for WorkflowError {
    fn from(err: CollaboratorError) -> Self {
        Self::System(err.to_string())
    }
}
