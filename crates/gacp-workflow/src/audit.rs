//! # Audit Escalation
//!
//! Maps an audit round's stated result and overall score to the next
//! state. Failure is checked first, then doubt; a round passes only when
//! the auditor says `pass` *and* the score clears the pass cutoff.
//!
//! - `fail`, or score below `fail_below` → `audit_failed` (re-audit fee)
//! - `doubt`, or score below `pass_score` → `audit_doubt` (field-audit fee)
//! - otherwise → `approval_pending`
//!
//! Re-audit and field-audit rounds are evaluated the same way.

use serde::{Deserialize, Serialize};

use crate::application::AuditResult;
use crate::payment::PaymentReason;
use crate::state::WorkflowState;

/// Effective outcome of an audit round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Passed,
    Failed,
    Doubtful,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Doubtful => "doubtful",
        }
    }
}

impl std::fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score cutoffs for audit escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditEscalationPolicy {
    /// Minimum score for a pass.
    pub pass_score: u8,
    /// Scores below this fail regardless of the stated result.
    pub fail_below: u8,
}

impl Default for AuditEscalationPolicy {
    fn default() -> Self {
        Self {
            pass_score: 80,
            fail_below: 60,
        }
    }
}

impl AuditEscalationPolicy {
    pub fn evaluate(&self, result: AuditResult, score: u8) -> AuditOutcome {
        if result == AuditResult::Fail || score < self.fail_below {
            AuditOutcome::Failed
        } else if result == AuditResult::Doubt || score < self.pass_score {
            AuditOutcome::Doubtful
        } else {
            AuditOutcome::Passed
        }
    }

    pub fn target_state(outcome: AuditOutcome) -> WorkflowState {
        match outcome {
            AuditOutcome::Passed => WorkflowState::ApprovalPending,
            AuditOutcome::Failed => WorkflowState::AuditFailed,
            AuditOutcome::Doubtful => WorkflowState::AuditDoubt,
        }
    }

    /// The fee that must be paid before the next audit round, if any.
    pub fn follow_up_milestone(outcome: AuditOutcome) -> Option<PaymentReason> {
        match outcome {
            AuditOutcome::Passed => None,
            AuditOutcome::Failed => Some(PaymentReason::AuditFail),
            AuditOutcome::Doubtful => Some(PaymentReason::FieldAudit),
        }
    }
}
