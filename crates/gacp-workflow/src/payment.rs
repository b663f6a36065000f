//! # Payment Gate
//!
//! Fee computation and milestone satisfaction. Both are pure reads over an
//! application snapshot; creating payment requests is the gateway's job
//! (see [`crate::ports::PaymentGateway`]).
//!
//! ## Fee Schedule
//!
//! | Milestone | Base fee |
//! |-----------|---------:|
//! | `initial` (document review) | 5 000 |
//! | `3rd_review` (paid resubmission) | 5 000 |
//! | `audit` (first online/field audit) | 25 000 |
//! | `audit_fail` (re-audit) | 25 000 |
//! | `field_audit` (escalated field audit) | 25 000 |
//!
//! The base fee is scaled by the **maximum** herb multiplier on the
//! application (never the sum). An application with no herbs pays the
//! base fee.
//!
//! ## Cycles
//!
//! Re-audit and field-audit fees recur once per audit round, so every
//! record carries a `cycle`. The one-completed-record rule applies per
//! `(reason, cycle)`: cycle 1 for the once-only milestones, the audit
//! round that triggered the fee for `audit_fail` and `field_audit`.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use gacp_core::{Amount, FeeMultiplier, GacpError, PaymentHandle, Timestamp};

use crate::application::Application;

// ─── Milestones ──────────────────────────────────────────────────────

/// Named payment checkpoints that gate transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PaymentReason {
    /// Document-review fee paid after submission.
    #[serde(rename = "initial")]
    Initial,
    /// Fee for resubmitting after the third rejection.
    #[serde(rename = "3rd_review")]
    ThirdReview,
    /// Fee for the first audit.
    #[serde(rename = "audit")]
    Audit,
    /// Re-audit fee after a failed audit round.
    #[serde(rename = "audit_fail")]
    AuditFail,
    /// Field-audit fee after an inconclusive audit round.
    #[serde(rename = "field_audit")]
    FieldAudit,
}

impl PaymentReason {
    /// All milestones in workflow order.
    pub const ALL: [PaymentReason; 5] = [
        Self::Initial,
        Self::ThirdReview,
        Self::Audit,
        Self::AuditFail,
        Self::FieldAudit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::ThirdReview => "3rd_review",
            Self::Audit => "audit",
            Self::AuditFail => "audit_fail",
            Self::FieldAudit => "field_audit",
        }
    }

    /// Whether this milestone may be paid more than once (once per audit round).
    pub fn is_recurring(&self) -> bool {
        matches!(self, Self::AuditFail | Self::FieldAudit)
    }
}

impl std::fmt::Display for PaymentReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown milestone name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown payment milestone {0:?}")]
pub struct UnknownMilestone(pub String);

impl FromStr for PaymentReason {
    type Err = UnknownMilestone;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| UnknownMilestone(s.to_string()))
    }
}

// ─── Records ─────────────────────────────────────────────────────────

/// Lifecycle status of a payment as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Expired,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observation of a payment. Records are appended, never edited;
/// a status change is a new record with the same handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub milestone_reason: PaymentReason,
    pub cycle: u32,
    pub amount: Amount,
    pub status: PaymentStatus,
    pub handle: Option<PaymentHandle>,
    pub created_at: Timestamp,
}

// ─── Fee Schedule ────────────────────────────────────────────────────

/// Fixed base fees per milestone, in whole currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeSchedule {
    pub document_review: Amount,
    pub third_review: Amount,
    pub audit: Amount,
    pub re_audit: Amount,
    pub field_audit: Amount,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            document_review: Amount(5_000),
            third_review: Amount(5_000),
            audit: Amount(25_000),
            re_audit: Amount(25_000),
            field_audit: Amount(25_000),
        }
    }
}

impl FeeSchedule {
    /// Base fee for a milestone, before the herb multiplier.
    pub fn base_fee(&self, reason: PaymentReason) -> Amount {
        match reason {
            PaymentReason::Initial => self.document_review,
            PaymentReason::ThirdReview => self.third_review,
            PaymentReason::Audit => self.audit,
            PaymentReason::AuditFail => self.re_audit,
            PaymentReason::FieldAudit => self.field_audit,
        }
    }
}

// ─── Gate ────────────────────────────────────────────────────────────

/// Pure fee and satisfaction checks for payment milestones.
#[derive(Debug, Clone)]
pub struct PaymentGate {
    schedule: FeeSchedule,
}

impl PaymentGate {
    pub fn new(schedule: FeeSchedule) -> Self {
        Self { schedule }
    }

    pub fn schedule(&self) -> &FeeSchedule {
        &self.schedule
    }

    /// The largest multiplier across all herbs on the application.
    pub fn effective_multiplier(&self, application: &Application) -> FeeMultiplier {
        application
            .herbs()
            .iter()
            .map(|h| h.multiplier)
            .max()
            .unwrap_or(FeeMultiplier::ONE)
    }

    /// Fee due for `reason`: base fee scaled by the effective multiplier.
    pub fn fee_for(&self, reason: PaymentReason, application: &Application) -> Result<Amount, GacpError> {
        self.schedule
            .base_fee(reason)
            .scaled(self.effective_multiplier(application))
    }

    /// The cycle a new payment for `reason` belongs to.
    pub fn cycle_for(&self, reason: PaymentReason, application: &Application) -> u32 {
        if reason.is_recurring() {
            application.audits().last().map(|a| a.round).unwrap_or(1)
        } else {
            1
        }
    }

    /// True only if a `completed` record exists for the current cycle.
    pub fn is_satisfied(&self, reason: PaymentReason, application: &Application) -> bool {
        let cycle = self.cycle_for(reason, application);
        application
            .payments_for(reason)
            .iter()
            .any(|p| p.cycle == cycle && p.status == PaymentStatus::Completed)
    }

    /// Most recent record for the current cycle, if any.
    pub fn latest_record<'a>(
        &self,
        reason: PaymentReason,
        application: &'a Application,
    ) -> Option<&'a PaymentRecord> {
        let cycle = self.cycle_for(reason, application);
        application
            .payments_for(reason)
            .iter()
            .rev()
            .find(|p| p.cycle == cycle)
    }

    /// Whether any herb forces the special-license flag.
    pub fn requires_special_license(&self, application: &Application) -> bool {
        application.herbs().iter().any(|h| h.special_license_required)
    }
}
