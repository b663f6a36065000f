//! # State Catalogue
//!
//! The closed set of workflow states and the stages they group into.
//! Stage is always derived from state; nothing stores it independently.
//!
//! ## States
//!
//! ```text
//! draft ─▶ submitted ─▶ payment_pending_initial ─▶ reviewing ─┬─▶ audit_payment_pending ─▶ audit_scheduled ─▶ auditing
//!                                                    ▲   ▲      │                                                  │
//!                           revision_required ───────┘   │      ├─▶ revision_required                              │
//!                           payment_pending_resubmission ┘      ├─▶ payment_pending_resubmission                   │
//!                                                               └─▶ rejected_final                                 │
//!
//! auditing / re_auditing / field_auditing ─┬─▶ approval_pending ─▶ approved ─▶ certificate_issued
//!                                          ├─▶ audit_failed ─▶ re_auditing
//!                                          └─▶ audit_doubt  ─▶ field_auditing
//!
//! every non-terminal state ─▶ cancelled
//! ```

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::payment::PaymentReason;

/// Every state an application can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    /// Application created, documents being gathered.
    Draft,
    /// Farmer has submitted the document set.
    Submitted,
    /// Awaiting the document-review fee.
    PaymentPendingInitial,
    /// Reviewer is examining the documents.
    Reviewing,
    /// Reviewer rejected; free resubmission allowed.
    RevisionRequired,
    /// Reviewer rejected for the third time; resubmission requires a fresh fee.
    PaymentPendingResubmission,
    /// Review approved; awaiting the audit fee.
    AuditPaymentPending,
    /// Audit fee paid; audit being scheduled.
    AuditScheduled,
    /// First online/field audit round in progress.
    Auditing,
    /// Audit failed; awaiting the re-audit fee.
    AuditFailed,
    /// Re-audit round in progress.
    ReAuditing,
    /// Audit inconclusive; awaiting the field-audit fee.
    AuditDoubt,
    /// On-site field audit round in progress.
    FieldAuditing,
    /// Audit passed; awaiting the approver's decision.
    ApprovalPending,
    /// Approved; certificate being generated.
    Approved,
    /// Certificate issued (terminal).
    CertificateIssued,
    /// Rejected with no further resubmission (terminal).
    RejectedFinal,
    /// Withdrawn or expired (terminal).
    Cancelled,
}

/// Number of states in the catalogue.
pub const STATE_COUNT: usize = 18;

impl WorkflowState {
    /// All states in catalogue order.
    pub const ALL: [WorkflowState; STATE_COUNT] = [
        Self::Draft,
        Self::Submitted,
        Self::PaymentPendingInitial,
        Self::Reviewing,
        Self::RevisionRequired,
        Self::PaymentPendingResubmission,
        Self::AuditPaymentPending,
        Self::AuditScheduled,
        Self::Auditing,
        Self::AuditFailed,
        Self::ReAuditing,
        Self::AuditDoubt,
        Self::FieldAuditing,
        Self::ApprovalPending,
        Self::Approved,
        Self::CertificateIssued,
        Self::RejectedFinal,
        Self::Cancelled,
    ];

    /// The snake_case name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::PaymentPendingInitial => "payment_pending_initial",
            Self::Reviewing => "reviewing",
            Self::RevisionRequired => "revision_required",
            Self::PaymentPendingResubmission => "payment_pending_resubmission",
            Self::AuditPaymentPending => "audit_payment_pending",
            Self::AuditScheduled => "audit_scheduled",
            Self::Auditing => "auditing",
            Self::AuditFailed => "audit_failed",
            Self::ReAuditing => "re_auditing",
            Self::AuditDoubt => "audit_doubt",
            Self::FieldAuditing => "field_auditing",
            Self::ApprovalPending => "approval_pending",
            Self::Approved => "approved",
            Self::CertificateIssued => "certificate_issued",
            Self::RejectedFinal => "rejected_final",
            Self::Cancelled => "cancelled",
        }
    }

    /// The stage this state belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Draft | Self::Submitted | Self::RevisionRequired => Stage::DocumentSubmission,
            Self::PaymentPendingInitial
            | Self::PaymentPendingResubmission
            | Self::AuditPaymentPending => Stage::PaymentProcessing,
            Self::Reviewing => Stage::DocumentReview,
            Self::AuditScheduled => Stage::AuditScheduling,
            Self::Auditing
            | Self::AuditFailed
            | Self::ReAuditing
            | Self::AuditDoubt
            | Self::FieldAuditing => Stage::AuditExecution,
            Self::ApprovalPending => Stage::FinalApproval,
            Self::Approved => Stage::CertificateGeneration,
            Self::CertificateIssued => Stage::Completed,
            Self::RejectedFinal | Self::Cancelled => Stage::Cancelled,
        }
    }

    /// Terminal states have no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::CertificateIssued | Self::RejectedFinal | Self::Cancelled
        )
    }

    /// The payment milestone this state is waiting on, if any.
    pub fn awaited_milestone(&self) -> Option<PaymentReason> {
        match self {
            Self::PaymentPendingInitial => Some(PaymentReason::Initial),
            Self::PaymentPendingResubmission => Some(PaymentReason::ThirdReview),
            Self::AuditPaymentPending => Some(PaymentReason::Audit),
            Self::AuditFailed => Some(PaymentReason::AuditFail),
            Self::AuditDoubt => Some(PaymentReason::FieldAudit),
            _ => None,
        }
    }

    /// Whether an auditor is actively recording an audit round here.
    pub fn is_audit_round(&self) -> bool {
        matches!(self, Self::Auditing | Self::ReAuditing | Self::FieldAuditing)
    }

    /// Rough completion percentage for status displays.
    pub fn progress_percentage(&self) -> u8 {
        match self {
            Self::Draft => 0,
            Self::Submitted => 10,
            Self::PaymentPendingInitial => 15,
            Self::Reviewing | Self::RevisionRequired | Self::PaymentPendingResubmission => 25,
            Self::AuditPaymentPending => 40,
            Self::AuditScheduled => 50,
            Self::Auditing | Self::AuditFailed | Self::AuditDoubt => 60,
            Self::ReAuditing | Self::FieldAuditing => 65,
            Self::ApprovalPending => 80,
            Self::Approved => 90,
            Self::CertificateIssued => 100,
            Self::RejectedFinal | Self::Cancelled => 0,
        }
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown state name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown workflow state {0:?}")]
pub struct UnknownState(pub String);

impl FromStr for WorkflowState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| UnknownState(s.to_string()))
    }
}

/// Coarse grouping of states used for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    DocumentSubmission,
    PaymentProcessing,
    DocumentReview,
    AuditScheduling,
    AuditExecution,
    FinalApproval,
    CertificateGeneration,
    Completed,
    Cancelled,
}

impl Stage {
    /// The snake_case name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentSubmission => "document_submission",
            Self::PaymentProcessing => "payment_processing",
            Self::DocumentReview => "document_review",
            Self::AuditScheduling => "audit_scheduling",
            Self::AuditExecution => "audit_execution",
            Self::FinalApproval => "final_approval",
            Self::CertificateGeneration => "certificate_generation",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
