//! # Guard Evaluator
//!
//! Guards are named, pure predicates over an application snapshot, the
//! transition context and the acting party. The catalogue is a closed
//! enum, so the transition table can only reference guards that exist;
//! string names are accepted only at the edges (configuration, CLI) via
//! [`GuardEvaluator::evaluate_named`].
//!
//! The only ambient input a guard reads is the evaluation time carried in
//! [`GuardInput::now`], used by the payment-expiry check.
//!
//! ## Basis
//!
//! Each guard depends on one of three things:
//!
//! - **Snapshot**: the stored application only (documents, payments,
//!   counters). Can be answered ahead of time.
//! - **Submission**: the review, audit or approval payload carried in the
//!   transition context. Unknown until the decision is made.
//! - **Actor**: who is asking. Unknown until someone asks.

use std::collections::BTreeSet;
use std::str::FromStr;

use thiserror::Error;

use gacp_core::Timestamp;

use crate::actor::{Actor, Role};
use crate::application::{mean_score, Application, ApprovalDecision, ReviewDecision};
use crate::audit::{AuditEscalationPolicy, AuditOutcome};
use crate::config::WorkflowConfig;
use crate::context::TransitionContext;
use crate::payment::{PaymentGate, PaymentReason, PaymentStatus};
use crate::rejection::{RejectionPolicy, RejectionRoute};
use crate::state::WorkflowState;

// ─── Catalogue ───────────────────────────────────────────────────────

/// Every guard the transition table may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GuardId {
    /// Required document types are a subset of the active uploads.
    HasRequiredDocuments,
    /// A completed payment exists for the milestone's current cycle.
    PaymentCompleted(PaymentReason),
    /// The payment awaited by the current state has lapsed.
    PaymentExpired,
    ReviewApproved,
    ReviewRejectedFreeRetry,
    ReviewRejectedPaidRetry,
    ReviewRejectedFinal,
    AuditPassed,
    AuditFailed,
    AuditDoubtful,
    /// A configured cap on audit rounds has been reached.
    AuditRoundLimitReached,
    ApprovalGranted,
    ApprovalDenied,
    /// Owner before final approval, an administrator, or the system once
    /// the awaited payment has expired.
    MayCancel,
    ActorIsOwner,
}

/// What a guard's answer depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardBasis {
    Snapshot,
    Submission,
    Actor,
}

impl GuardId {
    /// Every guard, with `PaymentCompleted` expanded per milestone.
    pub fn all() -> Vec<GuardId> {
        let mut all = vec![Self::HasRequiredDocuments];
        all.extend(PaymentReason::ALL.iter().map(|r| Self::PaymentCompleted(*r)));
        all.extend([
            Self::PaymentExpired,
            Self::ReviewApproved,
            Self::ReviewRejectedFreeRetry,
            Self::ReviewRejectedPaidRetry,
            Self::ReviewRejectedFinal,
            Self::AuditPassed,
            Self::AuditFailed,
            Self::AuditDoubtful,
            Self::AuditRoundLimitReached,
            Self::ApprovalGranted,
            Self::ApprovalDenied,
            Self::MayCancel,
            Self::ActorIsOwner,
        ]);
        all
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HasRequiredDocuments => "has_required_documents",
            Self::PaymentCompleted(reason) => match reason {
                PaymentReason::Initial => "payment_completed:initial",
                PaymentReason::ThirdReview => "payment_completed:3rd_review",
                PaymentReason::Audit => "payment_completed:audit",
                PaymentReason::AuditFail => "payment_completed:audit_fail",
                PaymentReason::FieldAudit => "payment_completed:field_audit",
            },
            Self::PaymentExpired => "payment_expired",
            Self::ReviewApproved => "review_approved",
            Self::ReviewRejectedFreeRetry => "review_rejected_free_retry",
            Self::ReviewRejectedPaidRetry => "review_rejected_paid_retry",
            Self::ReviewRejectedFinal => "review_rejected_final",
            Self::AuditPassed => "audit_passed",
            Self::AuditFailed => "audit_failed",
            Self::AuditDoubtful => "audit_doubtful",
            Self::AuditRoundLimitReached => "audit_round_limit_reached",
            Self::ApprovalGranted => "approval_granted",
            Self::ApprovalDenied => "approval_denied",
            Self::MayCancel => "may_cancel",
            Self::ActorIsOwner => "actor_is_owner",
        }
    }

    pub fn basis(&self) -> GuardBasis {
        match self {
            Self::HasRequiredDocuments
            | Self::PaymentCompleted(_)
            | Self::PaymentExpired
            | Self::AuditRoundLimitReached => GuardBasis::Snapshot,
            Self::ReviewApproved
            | Self::ReviewRejectedFreeRetry
            | Self::ReviewRejectedPaidRetry
            | Self::ReviewRejectedFinal
            | Self::AuditPassed
            | Self::AuditFailed
            | Self::AuditDoubtful
            | Self::ApprovalGranted
            | Self::ApprovalDenied => GuardBasis::Submission,
            Self::MayCancel | Self::ActorIsOwner => GuardBasis::Actor,
        }
    }
}

impl std::fmt::Display for GuardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GuardId {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|g| g.as_str() == s)
            .ok_or_else(|| GuardError::Unknown(s.to_string()))
    }
}

// ─── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("unknown guard {0:?}")]
    Unknown(String),

    /// The snapshot is inconsistent with what the guard expects.
    #[error("guard {guard} could not be evaluated: {reason}")]
    Evaluation { guard: GuardId, reason: String },
}

// ─── Evaluation ──────────────────────────────────────────────────────

/// Everything a guard may look at.
#[derive(Debug, Clone, Copy)]
pub struct GuardInput<'a> {
    pub application: &'a Application,
    pub context: &'a TransitionContext,
    pub actor: &'a Actor,
    pub now: Timestamp,
}

/// Evaluates catalogue guards against configured thresholds.
#[derive(Debug, Clone)]
pub struct GuardEvaluator {
    gate: PaymentGate,
    required_documents: BTreeSet<String>,
    review_pass_score: u8,
    rejection: RejectionPolicy,
    audit: AuditEscalationPolicy,
    payment_expiry_days: u32,
    max_audit_rounds: Option<u32>,
}

impl GuardEvaluator {
    pub fn new(config: &WorkflowConfig) -> Self {
        Self {
            gate: PaymentGate::new(config.fees.clone()),
            required_documents: config.required_documents.iter().cloned().collect(),
            review_pass_score: config.review_pass_score,
            rejection: config.rejections,
            audit: config.audit,
            payment_expiry_days: config.payment_expiry_days,
            max_audit_rounds: config.max_audit_rounds,
        }
    }

    pub fn required_documents(&self) -> &BTreeSet<String> {
        &self.required_documents
    }

    /// Evaluate a guard by its string name.
    pub fn evaluate_named(&self, name: &str, input: &GuardInput<'_>) -> Result<bool, GuardError> {
        self.evaluate(name.parse()?, input)
    }

    pub fn evaluate(&self, guard: GuardId, input: &GuardInput<'_>) -> Result<bool, GuardError> {
        let app = input.application;
        match guard {
            GuardId::HasRequiredDocuments => Ok(self.missing_documents(app).is_empty()),
            GuardId::PaymentCompleted(reason) => Ok(self.gate.is_satisfied(reason, app)),
            GuardId::PaymentExpired => Ok(self.payment_expired(app, input.now)),
            GuardId::ReviewApproved => Ok(self.review_approved(guard, input)? == Some(true)),
            GuardId::ReviewRejectedFreeRetry => {
                self.review_rejected_via(guard, input, RejectionRoute::FreeResubmission)
            }
            GuardId::ReviewRejectedPaidRetry => {
                self.review_rejected_via(guard, input, RejectionRoute::PaidResubmission)
            }
            GuardId::ReviewRejectedFinal => {
                self.review_rejected_via(guard, input, RejectionRoute::Final)
            }
            GuardId::AuditPassed => self.audit_outcome_is(guard, input, AuditOutcome::Passed),
            GuardId::AuditFailed => self.audit_outcome_is(guard, input, AuditOutcome::Failed),
            GuardId::AuditDoubtful => self.audit_outcome_is(guard, input, AuditOutcome::Doubtful),
            GuardId::AuditRoundLimitReached => self.audit_round_limit_reached(app),
            GuardId::ApprovalGranted => Ok(self.approval_is(input, ApprovalDecision::Granted)),
            GuardId::ApprovalDenied => Ok(self.approval_is(input, ApprovalDecision::Denied)),
            GuardId::MayCancel => Ok(self.may_cancel(input)),
            GuardId::ActorIsOwner => Ok(&input.actor.id == app.farmer_id()),
        }
    }

    /// Whether the guard could hold for some submission or actor, given
    /// only the snapshot. Snapshot guards are evaluated outright.
    pub fn is_potentially_satisfiable(
        &self,
        guard: GuardId,
        input: &GuardInput<'_>,
    ) -> Result<bool, GuardError> {
        let count = input.application.rejection_count();
        match guard {
            GuardId::ReviewRejectedFreeRetry => {
                Ok(self.rejection.route(count).ok() == Some(RejectionRoute::FreeResubmission))
            }
            GuardId::ReviewRejectedPaidRetry => {
                Ok(self.rejection.route(count).ok() == Some(RejectionRoute::PaidResubmission))
            }
            GuardId::ReviewRejectedFinal => {
                Ok(self.rejection.route(count).ok() == Some(RejectionRoute::Final))
            }
            g if g.basis() == GuardBasis::Snapshot => self.evaluate(g, input),
            _ => Ok(true),
        }
    }

    /// Required document types not present among the active uploads.
    pub fn missing_documents(&self, app: &Application) -> Vec<String> {
        let active = app.active_document_types();
        self.required_documents
            .iter()
            .filter(|d| !active.contains(d.as_str()))
            .cloned()
            .collect()
    }

    /// Whether the payment awaited by the current state has lapsed.
    ///
    /// The clock starts at the latest pending request for the current
    /// cycle, or at entry into the state if nothing was requested.
    pub fn payment_expired(&self, app: &Application, now: Timestamp) -> bool {
        let Some(milestone) = app.state().awaited_milestone() else {
            return false;
        };
        let since = match self.gate.latest_record(milestone, app) {
            Some(record) => match record.status {
                PaymentStatus::Completed => return false,
                PaymentStatus::Expired => return true,
                PaymentStatus::Pending => record.created_at,
                PaymentStatus::Failed => app.entered_current_state_at(),
            },
            None => app.entered_current_state_at(),
        };
        since.is_older_than_days(i64::from(self.payment_expiry_days), &now)
    }

    fn review_approved(&self, guard: GuardId, input: &GuardInput<'_>) -> Result<Option<bool>, GuardError> {
        let Some(review) = input.context.review.as_ref() else {
            return Ok(None);
        };
        let score = mean_score(&review.checklist).ok_or_else(|| GuardError::Evaluation {
            guard,
            reason: "review checklist is empty".to_string(),
        })?;
        Ok(Some(
            review.decision == ReviewDecision::Approve && score >= self.review_pass_score,
        ))
    }

    fn review_rejected_via(
        &self,
        guard: GuardId,
        input: &GuardInput<'_>,
        route: RejectionRoute,
    ) -> Result<bool, GuardError> {
        if self.review_approved(guard, input)? != Some(false) {
            return Ok(false);
        }
        let count = input.application.rejection_count();
        Ok(self.rejection.route(count).ok() == Some(route))
    }

    fn audit_outcome_is(
        &self,
        guard: GuardId,
        input: &GuardInput<'_>,
        expected: AuditOutcome,
    ) -> Result<bool, GuardError> {
        let Some(audit) = input.context.audit.as_ref() else {
            return Ok(false);
        };
        let score = mean_score(&audit.checklist).ok_or_else(|| GuardError::Evaluation {
            guard,
            reason: "audit checklist is empty".to_string(),
        })?;
        Ok(self.audit.evaluate(audit.result, score) == expected)
    }

    fn audit_round_limit_reached(&self, app: &Application) -> Result<bool, GuardError> {
        let Some(max) = self.max_audit_rounds else {
            return Ok(false);
        };
        if app.state() == WorkflowState::AuditFailed && app.audits().is_empty() {
            return Err(GuardError::Evaluation {
                guard: GuardId::AuditRoundLimitReached,
                reason: "audit_failed with no audit round on record".to_string(),
            });
        }
        Ok(app.audits().len() as u32 >= max)
    }

    fn approval_is(&self, input: &GuardInput<'_>, decision: ApprovalDecision) -> bool {
        input
            .context
            .approval
            .as_ref()
            .is_some_and(|a| a.decision == decision)
    }

    fn may_cancel(&self, input: &GuardInput<'_>) -> bool {
        let app = input.application;
        match input.actor.role {
            Role::Admin => true,
            Role::Farmer => {
                &input.actor.id == app.farmer_id() && app.state() < WorkflowState::ApprovalPending
            }
            Role::System => self.payment_expired(app, input.now),
            Role::Reviewer | Role::Auditor | Role::Approver => false,
        }
    }
}
