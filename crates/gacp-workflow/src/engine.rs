//! # Workflow Engine
//!
//! The only entry point that mutates an application. Every operation
//! follows the same shape:
//!
//! 1. Load the application from the repository.
//! 2. Resolve the edge in the [`TransitionTable`]; authorize the actor.
//! 3. Evaluate the guard, the payment milestone, and the business rules.
//! 4. Build the next snapshot (records, counter, history entry, version)
//!    and commit it with compare-and-set on `(state, version)`.
//! 5. Dispatch side effects. They run after the commit and cannot undo it.
//!
//! A refused transition gets one recovery attempt through the
//! [`AlternativeFlowResolver`] before the error is returned.
//!
//! ## Concurrency
//!
//! The engine holds no per-application state. Two calls racing on the
//! same application both read the same version; the repository accepts
//! the first commit and the second fails with
//! [`WorkflowError::ConcurrentModification`], which the caller may retry.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use gacp_core::{ActorId, Amount, ApplicationId, PaymentHandle, StaffId, Timestamp};

use crate::actor::{Actor, Role};
use crate::alternative::{AlternativeFlowResolver, FailureTrigger, RecoveryAction};
use crate::application::{
    mean_score, Application, Approval, ApprovalDecision, AuditMode, AuditRecord, AuditResult,
    ChecklistItem, DocumentRef, IssuedCertificate, ReviewDecision, ReviewRecord, ReviewResult,
    StaffRole, TransitionType, WorkflowHistoryEntry,
};
use crate::audit::{AuditEscalationPolicy, AuditOutcome};
use crate::config::WorkflowConfig;
use crate::context::{ApprovalSubmission, AuditSubmission, ReviewSubmission, TransitionContext};
use crate::effects::{self, SideEffect};
use crate::error::{BusinessRule, Condition, ErrorKind, WorkflowError};
use crate::guard::{GuardBasis, GuardEvaluator, GuardId, GuardInput};
use crate::payment::{PaymentGate, PaymentReason, PaymentRecord, PaymentStatus};
use crate::ports::{
    ApplicationRepository, Collaborators, CollaboratorError, CommitOutcome, CommitPrecondition,
    NotificationEvent, Recipient,
};
use crate::rejection::RejectionPolicy;
use crate::state::{Stage, WorkflowState};
use crate::table::{CounterEffect, TransitionSpec, TransitionTable};

/// Committed transitions, labelled by action and transition type.
pub const TRANSITIONS_TOTAL: &str = "gacp_workflow_transitions_total";
/// Refused transitions, labelled by error kind.
pub const REJECTIONS_TOTAL: &str = "gacp_workflow_rejections_total";

/// Compare-and-set attempts for writes made by side effects.
const SIDE_EFFECT_UPDATE_ATTEMPTS: usize = 3;

// ─── Results ─────────────────────────────────────────────────────────

/// A committed transition.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    /// The application as committed.
    pub application: Application,
    /// The history entry appended by this call.
    pub record: WorkflowHistoryEntry,
    /// Set when the requested transition was refused and a recovery
    /// transition was committed instead.
    pub recovered_from: Option<WorkflowError>,
}

/// Snapshot of where an application stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationStatus {
    pub application_id: ApplicationId,
    pub state: WorkflowState,
    pub stage: Stage,
    pub payment_required: Option<PaymentRequirement>,
    pub next_steps: Vec<String>,
    pub progress_percentage: u8,
    pub rejection_count: u32,
    pub version: u64,
}

/// A transition currently open to someone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NextAction {
    pub to: WorkflowState,
    pub action: &'static str,
    pub required_role: Role,
    pub guard: Option<&'static str>,
    pub milestone: Option<PaymentReason>,
    /// The edge's payment milestone is not yet satisfied.
    pub blocked_by_payment: bool,
    /// What the guard still depends on, for decision and actor guards.
    pub note: Option<String>,
}

/// A fee the application owes or has paid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentRequirement {
    pub milestone: PaymentReason,
    pub cycle: u32,
    pub amount: Amount,
    pub satisfied_already: bool,
    pub blocking_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubmissionKind {
    Review,
    Audit,
    Approval,
}

impl SubmissionKind {
    fn for_guard(guard: Option<GuardId>) -> Option<Self> {
        match guard? {
            GuardId::ReviewApproved
            | GuardId::ReviewRejectedFreeRetry
            | GuardId::ReviewRejectedPaidRetry
            | GuardId::ReviewRejectedFinal => Some(Self::Review),
            GuardId::AuditPassed | GuardId::AuditFailed | GuardId::AuditDoubtful => Some(Self::Audit),
            GuardId::ApprovalGranted | GuardId::ApprovalDenied => Some(Self::Approval),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Review => "review",
            Self::Audit => "audit",
            Self::Approval => "approval",
        }
    }
}

// ─── Engine ──────────────────────────────────────────────────────────

/// Orchestrates transitions for certification applications.
///
/// Cheap to clone; clones share configuration and collaborators.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<Inner>,
}

struct Inner {
    config: WorkflowConfig,
    table: &'static TransitionTable,
    guards: GuardEvaluator,
    gate: PaymentGate,
    resolver: AlternativeFlowResolver,
    collaborators: Collaborators,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("config", &self.inner.config)
            .field("edges", &self.inner.table.len())
            .finish_non_exhaustive()
    }
}

impl WorkflowEngine {
    /// Build an engine. Fails if the configuration or the canonical
    /// transition table does not validate.
    pub fn new(config: WorkflowConfig, collaborators: Collaborators) -> Result<Self, WorkflowError> {
        config
            .validate()
            .map_err(|e| WorkflowError::System(e.to_string()))?;
        let table = TransitionTable::canonical().map_err(|e| WorkflowError::System(e.to_string()))?;
        let gate = PaymentGate::new(config.fees.clone());
        Ok(Self {
            inner: Arc::new(Inner {
                guards: GuardEvaluator::new(&config),
                resolver: AlternativeFlowResolver::new(gate.clone()),
                gate,
                table,
                config,
                collaborators,
            }),
        })
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.inner.config
    }

    pub fn table(&self) -> &'static TransitionTable {
        self.inner.table
    }

    pub fn payment_gate(&self) -> &PaymentGate {
        &self.inner.gate
    }

    fn repo(&self) -> &dyn ApplicationRepository {
        self.inner.collaborators.repository.as_ref()
    }

    fn now(&self) -> Timestamp {
        self.inner.collaborators.clock.now()
    }

    /// Store a new application created by intake. It must be a fresh draft.
    pub fn register(&self, application: Application) -> Result<ApplicationId, WorkflowError> {
        if application.state() != WorkflowState::Draft || !application.history().is_empty() {
            return Err(BusinessRule::InvalidSubmission(
                "new applications start in draft with no history".to_string(),
            )
            .into());
        }
        let id = application.id();
        self.repo().insert(application)?;
        tracing::info!(application_id = %id, "application registered");
        Ok(id)
    }

    // ── Transitions ─────────────────────────────────────────────────

    /// Move an application to `to` on behalf of `actor`.
    pub fn transition(
        &self,
        id: ApplicationId,
        to: WorkflowState,
        actor: &Actor,
        context: TransitionContext,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let application = self.repo().load(id)?;
        match self.attempt(&application, to, actor, &context) {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                observe_refusal(&application, to, &error);
                match error {
                    WorkflowError::ConcurrentModification { .. }
                    | WorkflowError::ApplicationNotFound(_)
                    | WorkflowError::UnauthorizedRole { .. }
                    | WorkflowError::BusinessRuleViolation(
                        BusinessRule::NotOwner { .. } | BusinessRule::NotAssignedStaff { .. },
                    ) => Err(error),
                    _ => self.recover(&application, to, actor, &context, error),
                }
            }
        }
    }

    /// Record a review decision; the target state follows from the score
    /// and the rejection counter.
    pub fn submit_review(
        &self,
        id: ApplicationId,
        actor: &Actor,
        review: ReviewSubmission,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let application = self.repo().load(id)?;
        let score = checklist_score(&review.checklist)?;
        let target = if review.decision == ReviewDecision::Approve
            && score >= self.inner.config.review_pass_score
        {
            WorkflowState::AuditPaymentPending
        } else {
            let route = self.inner.config.rejections.route(application.rejection_count())?;
            RejectionPolicy::target_state(route)
        };
        let comments = review.comments.clone();
        let mut context = TransitionContext::new().with_review(review);
        context.comments = comments;
        self.transition(id, target, actor, context)
    }

    /// Record an audit round; the target state follows from the result and score.
    pub fn submit_audit(
        &self,
        id: ApplicationId,
        actor: &Actor,
        audit: AuditSubmission,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let score = checklist_score(&audit.checklist)?;
        let outcome = self.inner.config.audit.evaluate(audit.result, score);
        let comments = audit.comments.clone();
        let mut context = TransitionContext::new().with_audit(audit);
        context.comments = comments;
        self.transition(id, AuditEscalationPolicy::target_state(outcome), actor, context)
    }

    /// Record the final approval decision.
    pub fn submit_approval(
        &self,
        id: ApplicationId,
        actor: &Actor,
        approval: ApprovalSubmission,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let target = match approval.decision {
            ApprovalDecision::Granted => WorkflowState::Approved,
            ApprovalDecision::Denied => WorkflowState::RejectedFinal,
        };
        let comments = approval.comments.clone();
        let mut context = TransitionContext::new().with_approval(approval);
        context.comments = comments;
        self.transition(id, target, actor, context)
    }

    /// Report an operational failure outside any transition attempt.
    pub fn report_failure(
        &self,
        id: ApplicationId,
        actor: &Actor,
        trigger: FailureTrigger,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let application = self.repo().load(id)?;
        authorize_trigger(&application, actor, &trigger)?;
        self.recover_with(&application, None, actor, &trigger, None, None)
    }

    fn attempt(
        &self,
        application: &Application,
        to: WorkflowState,
        actor: &Actor,
        context: &TransitionContext,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let from = application.state();
        let spec = *self
            .inner
            .table
            .lookup(from, to)
            .ok_or(WorkflowError::InvalidTransition { from, to })?;

        if !actor.role.authorizes(spec.required_role) {
            return Err(WorkflowError::UnauthorizedRole {
                required: spec.required_role,
                actual: actor.role,
                action: spec.action.to_string(),
            });
        }
        let route = match spec.counter {
            CounterEffect::Increment => Some(
                self.inner
                    .config
                    .rejections
                    .route(application.rejection_count())?,
            ),
            CounterEffect::Unchanged | CounterEffect::Reset => None,
        };
        let submission = SubmissionKind::for_guard(spec.guard);
        if let Some(kind) = submission {
            validate_submission(kind, &spec, context)?;
        }

        let now = self.now();
        let input = GuardInput {
            application,
            context,
            actor,
            now,
        };
        if let Some(guard) = spec.guard {
            if !self.inner.guards.evaluate(guard, &input)? {
                return Err(WorkflowError::ConditionNotMet {
                    from,
                    to,
                    condition: Condition::Guard(guard),
                });
            }
        }
        if let Some(milestone) = spec.milestone {
            if !self.inner.gate.is_satisfied(milestone, application) {
                return Err(WorkflowError::ConditionNotMet {
                    from,
                    to,
                    condition: Condition::Payment {
                        milestone,
                        cycle: self.inner.gate.cycle_for(milestone, application),
                    },
                });
            }
        }
        self.check_business_rules(&spec, &input)?;

        let mut next = application.clone();
        let mut metadata = context.metadata.clone();
        if let Some(kind) = submission {
            self.record_submission(kind, &spec, &mut next, actor, context, now, &mut metadata)?;
        }
        match spec.counter {
            CounterEffect::Unchanged => {}
            CounterEffect::Increment => next.set_rejection_count(next.rejection_count() + 1),
            CounterEffect::Reset => next.set_rejection_count(0),
        }
        if let Some(milestone) = spec.milestone {
            metadata.insert("milestone".to_string(), json!(milestone.as_str()));
        }
        if let Some(route) = route {
            metadata.insert("rejection_route".to_string(), json!(route.as_str()));
            if let Some(fee) = RejectionPolicy::resubmission_milestone(route) {
                metadata.insert("resubmission_milestone".to_string(), json!(fee.as_str()));
            }
        }
        let entry = WorkflowHistoryEntry {
            from_state: from,
            to_state: to,
            actor_id: actor.id.clone(),
            actor_role: actor.role,
            action: spec.action.to_string(),
            comments: context.comments.clone(),
            metadata,
            transition_type: TransitionType::Primary,
            timestamp: now,
        };
        let outcome = self.commit_entry(application, next, entry)?;
        let due = self.payment_due(&outcome.application);
        self.dispatch_effects(outcome.application.clone(), effects::plan(from, to, due));
        Ok(outcome)
    }

    fn check_business_rules(&self, spec: &TransitionSpec, input: &GuardInput<'_>) -> Result<(), WorkflowError> {
        let application = input.application;
        let actor = input.actor;

        if matches!(spec.to, WorkflowState::AuditScheduled | WorkflowState::Auditing)
            && !application.has_approved_review()
        {
            return Err(BusinessRule::ReviewNotApproved { target: spec.to }.into());
        }
        if spec.to == WorkflowState::Approved
            && application.audits().last().map(|a| a.outcome) != Some(AuditOutcome::Passed)
        {
            return Err(BusinessRule::AuditNotPassed.into());
        }
        if spec.from == WorkflowState::ApprovalPending
            && spec.to != WorkflowState::Cancelled
            && application.approval().is_some()
        {
            return Err(BusinessRule::ApprovalAlreadyRecorded.into());
        }
        if spec.to == WorkflowState::CertificateIssued
            && application.approval().map(|a| a.decision) != Some(ApprovalDecision::Granted)
        {
            return Err(BusinessRule::ApprovalMissing.into());
        }
        if let Some(staff_role) = StaffRole::for_role(spec.required_role) {
            if actor.role != Role::System {
                if let Some(assigned) = application.assignments().get(staff_role) {
                    if assigned.as_str() != actor.id.as_str() {
                        return Err(BusinessRule::NotAssignedStaff {
                            role: staff_role,
                            assigned: assigned.to_string(),
                        }
                        .into());
                    }
                }
            }
        }
        if spec.required_role == Role::Farmer
            && actor.role == Role::Farmer
            && !self.inner.guards.evaluate(GuardId::ActorIsOwner, input)?
        {
            return Err(BusinessRule::NotOwner {
                actor: actor.id.clone(),
            }
            .into());
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn record_submission(
        &self,
        kind: SubmissionKind,
        spec: &TransitionSpec,
        next: &mut Application,
        actor: &Actor,
        context: &TransitionContext,
        now: Timestamp,
        metadata: &mut serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), WorkflowError> {
        let missing = || BusinessRule::MissingSubmission {
            kind: kind.as_str(),
            from: spec.from,
            to: spec.to,
        };
        match kind {
            SubmissionKind::Review => {
                let review = context.review.as_ref().ok_or_else(missing)?;
                let score = checklist_score(&review.checklist)?;
                let round = next.next_review_round();
                let result = if spec.to == WorkflowState::AuditPaymentPending {
                    ReviewResult::Approved
                } else {
                    ReviewResult::Rejected
                };
                metadata.insert("review_round".to_string(), json!(round));
                metadata.insert("overall_score".to_string(), json!(score));
                next.push_review(ReviewRecord {
                    round,
                    reviewer: actor.id.clone(),
                    checklist: review.checklist.clone(),
                    overall_score: score,
                    decision: review.decision,
                    result,
                    comments: review.comments.clone(),
                    completed_at: now,
                });
            }
            SubmissionKind::Audit => {
                let audit = context.audit.as_ref().ok_or_else(missing)?;
                let score = checklist_score(&audit.checklist)?;
                let round = next.next_audit_round();
                let outcome = self.inner.config.audit.evaluate(audit.result, score);
                metadata.insert("audit_round".to_string(), json!(round));
                metadata.insert("overall_score".to_string(), json!(score));
                metadata.insert("outcome".to_string(), json!(outcome.as_str()));
                next.push_audit(AuditRecord {
                    round,
                    auditor: actor.id.clone(),
                    mode: audit.mode,
                    checklist: audit.checklist.clone(),
                    overall_score: score,
                    result: audit.result,
                    outcome,
                    comments: audit.comments.clone(),
                    completed_at: now,
                });
            }
            SubmissionKind::Approval => {
                let approval = context.approval.as_ref().ok_or_else(missing)?;
                next.set_approval(Approval {
                    approver: actor.id.clone(),
                    decision: approval.decision,
                    comments: approval.comments.clone(),
                    decided_at: now,
                });
            }
        }
        Ok(())
    }

    // ── Recovery ────────────────────────────────────────────────────

    fn recover(
        &self,
        application: &Application,
        requested: WorkflowState,
        actor: &Actor,
        context: &TransitionContext,
        error: WorkflowError,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let trigger = context
            .failure_trigger
            .clone()
            .or_else(|| self.inner.resolver.derive_trigger(application, &error));
        if let Some(trigger) = &trigger {
            if let Err(refusal) = authorize_trigger(application, actor, trigger) {
                tracing::warn!(
                    application_id = %application.id(),
                    trigger = %trigger,
                    actor = %actor.id,
                    reason = %refusal,
                    "recovery not permitted for actor"
                );
                return Err(error);
            }
        }
        match trigger {
            Some(trigger) => self.recover_with(
                application,
                Some(requested),
                actor,
                &trigger,
                Some(error),
                context.comments.clone(),
            ),
            None => {
                if error.kind() == ErrorKind::System {
                    tracing::error!(application_id = %application.id(), error = %error, "system error during transition");
                    self.alert_administrators(application, error.to_string());
                }
                Err(error)
            }
        }
    }

    /// Commit the recovery for `trigger`, or escalate when no rule matches.
    fn recover_with(
        &self,
        application: &Application,
        requested: Option<WorkflowState>,
        actor: &Actor,
        trigger: &FailureTrigger,
        cause: Option<WorkflowError>,
        comments: Option<String>,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let from = application.state();
        let Some(action) = self.inner.resolver.resolve(application, from, trigger) else {
            let detail = match &cause {
                Some(cause) => format!("no recovery for {trigger} in {from}: {cause}"),
                None => format!("no recovery for {trigger} in {from}"),
            };
            tracing::error!(application_id = %application.id(), trigger = %trigger, state = %from, "unmatched failure trigger");
            self.alert_administrators(application, detail.clone());
            return Err(WorkflowError::System(detail));
        };

        let to = match action {
            RecoveryAction::RetrySameState => from,
            RecoveryAction::ForceState(state) => state,
        };
        let now = self.now();
        let mut next = application.clone();
        let mut metadata = serde_json::Map::new();
        metadata.insert("trigger".to_string(), json!(trigger.as_str()));
        if let Some(requested) = requested {
            metadata.insert("requested_state".to_string(), json!(requested.as_str()));
        }
        if let Some(cause) = &cause {
            metadata.insert("error".to_string(), json!(cause.to_string()));
        }
        // An audit round that could not be completed remotely still counts
        // as an inconclusive round, so the field-audit fee gets a fresh cycle.
        if to == WorkflowState::AuditDoubt && from.is_audit_round() {
            let round = next.next_audit_round();
            metadata.insert("audit_round".to_string(), json!(round));
            next.push_audit(AuditRecord {
                round,
                auditor: actor.id.clone(),
                mode: AuditMode::Online,
                checklist: Vec::new(),
                overall_score: 0,
                result: AuditResult::Doubt,
                outcome: AuditOutcome::Doubtful,
                comments: Some(trigger.to_string()),
                completed_at: now,
            });
        }
        let entry = WorkflowHistoryEntry {
            from_state: from,
            to_state: to,
            actor_id: actor.id.clone(),
            actor_role: actor.role,
            action: format!("recover:{trigger}"),
            comments,
            metadata,
            transition_type: TransitionType::Alternative,
            timestamp: now,
        };
        let outcome = self.commit_entry(application, next, entry)?;
        tracing::warn!(
            application_id = %application.id(),
            trigger = %trigger,
            from = %from,
            to = %to,
            "alternative flow committed"
        );

        let mut planned = effects::plan(from, to, self.payment_due(&outcome.application));
        if *trigger != FailureTrigger::PaymentGatewayError {
            planned.push(SideEffect::AlertAdministrators {
                reason: format!("recovered from {trigger} in {from}"),
            });
        }
        self.dispatch_effects(outcome.application.clone(), planned);
        Ok(TransitionOutcome {
            recovered_from: cause,
            ..outcome
        })
    }

    fn alert_administrators(&self, application: &Application, reason: String) {
        self.dispatch_effects(
            application.clone(),
            vec![SideEffect::AlertAdministrators { reason }],
        );
    }

    // ── Payments ────────────────────────────────────────────────────

    /// Ask the gateway for a payment for the milestone the current state awaits.
    pub fn request_payment(
        &self,
        id: ApplicationId,
        milestone: PaymentReason,
        actor: &Actor,
    ) -> Result<PaymentRecord, WorkflowError> {
        let application = self.repo().load(id)?;
        authorize_owner_or_staff(&application, actor, "request_payment")?;

        let state = application.state();
        if state.awaited_milestone() != Some(milestone) {
            return Err(BusinessRule::PaymentNotAwaited { state, milestone }.into());
        }
        let gate = &self.inner.gate;
        let cycle = gate.cycle_for(milestone, &application);
        if gate.is_satisfied(milestone, &application) {
            return Err(WorkflowError::DuplicatePayment { milestone, cycle });
        }
        let now = self.now();
        if let Some(record) = gate.latest_record(milestone, &application) {
            let expiry = i64::from(self.inner.config.payment_expiry_days);
            if record.status == PaymentStatus::Pending && !record.created_at.is_older_than_days(expiry, &now) {
                return Err(BusinessRule::PaymentAlreadyPending { milestone, cycle }.into());
            }
        }

        let amount = gate.fee_for(milestone, &application)?;
        let handle = self
            .inner
            .collaborators
            .payments
            .create_request(milestone, amount, id)
            .map_err(|err| self.gateway_failure(&application, actor, err))?;
        let record = PaymentRecord {
            milestone_reason: milestone,
            cycle,
            amount,
            status: PaymentStatus::Pending,
            handle: Some(handle),
            created_at: now,
        };
        self.append_payment(&application, record)
    }

    /// Poll the gateway for a handle's status and record any change.
    pub fn confirm_payment(
        &self,
        id: ApplicationId,
        handle: &PaymentHandle,
    ) -> Result<PaymentRecord, WorkflowError> {
        let application = self.repo().load(id)?;
        let latest = application
            .payments()
            .values()
            .flatten()
            .rev()
            .find(|p| p.handle.as_ref() == Some(handle))
            .cloned()
            .ok_or(BusinessRule::UnknownPaymentHandle)?;
        let status = self
            .inner
            .collaborators
            .payments
            .check_status(handle)
            .map_err(|err| self.gateway_failure(&application, &Actor::system(), err))?;
        if status == latest.status {
            return Ok(latest);
        }
        let record = PaymentRecord {
            status,
            created_at: self.now(),
            ..latest
        };
        self.append_payment(&application, record)
    }

    /// Append a record delivered by a gateway callback.
    ///
    /// The record must answer a request made through [`Self::request_payment`]:
    /// its handle, milestone and cycle must match a record already on file,
    /// the current state must await the milestone, and a completed record
    /// must cover the fee due.
    pub fn record_payment(
        &self,
        id: ApplicationId,
        record: PaymentRecord,
    ) -> Result<PaymentRecord, WorkflowError> {
        if record.cycle == 0 {
            return Err(
                BusinessRule::InvalidSubmission("payment cycle starts at 1".to_string()).into(),
            );
        }
        let application = self.repo().load(id)?;
        refuse_duplicate(&application, &record)?;

        let milestone = record.milestone_reason;
        let state = application.state();
        if state.awaited_milestone() != Some(milestone) {
            return Err(BusinessRule::PaymentNotAwaited { state, milestone }.into());
        }
        let gate = &self.inner.gate;
        let expected = gate.cycle_for(milestone, &application);
        if record.cycle != expected {
            return Err(BusinessRule::PaymentCycleMismatch {
                milestone,
                expected,
                received: record.cycle,
            }
            .into());
        }
        let requested = record.handle.as_ref().is_some_and(|handle| {
            application
                .payments_for(milestone)
                .iter()
                .any(|p| p.cycle == record.cycle && p.handle.as_ref() == Some(handle))
        });
        if !requested {
            return Err(BusinessRule::UnknownPaymentHandle.into());
        }
        if record.status == PaymentStatus::Completed {
            let fee = gate.fee_for(milestone, &application)?;
            if record.amount < fee {
                tracing::warn!(
                    application_id = %application.id(),
                    milestone = %milestone,
                    amount = %record.amount,
                    fee = %fee,
                    "underpaid callback refused"
                );
                return Err(BusinessRule::PaymentBelowFee {
                    milestone,
                    expected: fee,
                    received: record.amount,
                }
                .into());
            }
        }
        self.append_payment(&application, record)
    }

    fn append_payment(
        &self,
        application: &Application,
        record: PaymentRecord,
    ) -> Result<PaymentRecord, WorkflowError> {
        refuse_duplicate(application, &record)?;
        let milestone = record.milestone_reason;
        let mut next = application.clone();
        next.push_payment(record.clone());
        next.bump_version();
        self.commit(CommitPrecondition::of(application), next)?;
        tracing::info!(
            application_id = %application.id(),
            milestone = %milestone,
            cycle = record.cycle,
            status = %record.status,
            amount = %record.amount,
            "payment recorded"
        );
        Ok(record)
    }

    fn gateway_failure(&self, application: &Application, actor: &Actor, err: CollaboratorError) -> WorkflowError {
        tracing::warn!(application_id = %application.id(), error = %err, "payment gateway call failed");
        let error = WorkflowError::from(err.clone());
        if matches!(err, CollaboratorError::Unavailable { .. }) {
            if let Err(recovery) = self.recover_with(
                application,
                None,
                actor,
                &FailureTrigger::PaymentGatewayError,
                Some(error.clone()),
                None,
            ) {
                tracing::warn!(application_id = %application.id(), error = %recovery, "gateway recovery not recorded");
            }
        }
        error
    }

    // ── Staff and documents ─────────────────────────────────────────

    /// Re-run staff assignment for the role the current state needs.
    /// Returns `None` when nobody is available; that outcome is recorded
    /// as a same-state retry.
    pub fn retry_assignment(&self, id: ApplicationId) -> Result<Option<StaffId>, WorkflowError> {
        let application = self.repo().load(id)?;
        let state = application.state();
        let role = effects::staff_role_for(state).ok_or(BusinessRule::NoAssignmentForState { state })?;
        self.assign_staff(&application, role)
    }

    fn assign_staff(&self, application: &Application, role: StaffRole) -> Result<Option<StaffId>, WorkflowError> {
        let id = application.id();
        match self.inner.collaborators.assignments.assign(id, role) {
            Ok(staff) => {
                self.update(id, |app| {
                    app.assign(role, staff.clone());
                    Ok(())
                })?;
                tracing::info!(application_id = %id, role = role.as_str(), staff = %staff, "staff assigned");
                self.inner.collaborators.notifications.notify(
                    &Recipient::Actor(ActorId::from(staff.clone())),
                    NotificationEvent::StaffAssigned,
                    &json!({ "application_id": id.to_string(), "role": role.as_str() }),
                )?;
                Ok(Some(staff))
            }
            Err(CollaboratorError::NoneAvailable(_)) => {
                let current = self.repo().load(id)?;
                self.recover_with(
                    &current,
                    None,
                    &Actor::system(),
                    &FailureTrigger::NoStaffAvailable,
                    None,
                    Some(format!("no {role} available")),
                )?;
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Replace the uploaded document set while the farmer can still edit it.
    pub fn replace_documents(
        &self,
        id: ApplicationId,
        actor: &Actor,
        documents: Vec<DocumentRef>,
    ) -> Result<Application, WorkflowError> {
        let application = self.repo().load(id)?;
        authorize_owner_or_staff(&application, actor, "replace_documents")?;
        let state = application.state();
        if !matches!(
            state,
            WorkflowState::Draft | WorkflowState::RevisionRequired | WorkflowState::PaymentPendingResubmission
        ) {
            return Err(BusinessRule::DocumentsLocked { state }.into());
        }
        let mut next = application.clone();
        next.set_documents(documents);
        next.bump_version();
        self.commit(CommitPrecondition::of(&application), next.clone())?;
        Ok(next)
    }

    // ── Reads ───────────────────────────────────────────────────────

    pub fn get_application(&self, id: ApplicationId) -> Result<Application, WorkflowError> {
        Ok(self.repo().load(id)?)
    }

    pub fn get_status(&self, id: ApplicationId) -> Result<ApplicationStatus, WorkflowError> {
        let application = self.repo().load(id)?;
        let state = application.state();
        let payment_required = state
            .awaited_milestone()
            .map(|m| self.requirement(&application, m))
            .transpose()?;
        let next_steps = self
            .next_actions_for(&application)
            .iter()
            .map(|a| {
                let mut step = format!("{} {} -> {}", a.required_role, a.action, a.to);
                if a.blocked_by_payment {
                    if let Some(m) = a.milestone {
                        step.push_str(&format!(" (awaiting {m} payment)"));
                    }
                }
                step
            })
            .collect();
        Ok(ApplicationStatus {
            application_id: id,
            state,
            stage: state.stage(),
            payment_required,
            next_steps,
            progress_percentage: state.progress_percentage(),
            rejection_count: application.rejection_count(),
            version: application.version(),
        })
    }

    /// Transitions open from the current state. Snapshot guards are
    /// evaluated now; decision and actor guards are listed with a note.
    pub fn get_next_actions(&self, id: ApplicationId) -> Result<Vec<NextAction>, WorkflowError> {
        let application = self.repo().load(id)?;
        Ok(self.next_actions_for(&application))
    }

    fn next_actions_for(&self, application: &Application) -> Vec<NextAction> {
        let context = TransitionContext::new();
        let actor = Actor::system();
        let input = GuardInput {
            application,
            context: &context,
            actor: &actor,
            now: self.now(),
        };
        let mut actions = Vec::new();
        for spec in self.inner.table.outgoing(application.state()) {
            let open = match spec.guard {
                None => true,
                Some(guard) => match self.inner.guards.is_potentially_satisfiable(guard, &input) {
                    Ok(open) => open,
                    Err(err) => {
                        tracing::warn!(application_id = %application.id(), guard = %guard, error = %err, "guard not evaluable");
                        false
                    }
                },
            };
            if !open {
                continue;
            }
            let note = spec.guard.and_then(|g| match g.basis() {
                GuardBasis::Snapshot => None,
                GuardBasis::Submission => Some(format!("requires a decision satisfying {g}")),
                GuardBasis::Actor => Some(format!("depends on the acting party ({g})")),
            });
            actions.push(NextAction {
                to: spec.to,
                action: spec.action,
                required_role: spec.required_role,
                guard: spec.guard.map(|g| g.as_str()),
                milestone: spec.milestone,
                blocked_by_payment: spec
                    .milestone
                    .is_some_and(|m| !self.inner.gate.is_satisfied(m, application)),
                note,
            });
        }
        actions
    }

    /// Fees relevant to the application: the standard path, anything the
    /// current state awaits, and anything already attempted.
    pub fn get_payment_requirements(&self, id: ApplicationId) -> Result<Vec<PaymentRequirement>, WorkflowError> {
        let application = self.repo().load(id)?;
        let awaited = application.state().awaited_milestone();
        PaymentReason::ALL
            .iter()
            .copied()
            .filter(|m| {
                Some(*m) == awaited
                    || matches!(m, PaymentReason::Initial | PaymentReason::Audit)
                    || !application.payments_for(*m).is_empty()
            })
            .map(|m| self.requirement(&application, m))
            .collect()
    }

    fn requirement(&self, application: &Application, milestone: PaymentReason) -> Result<PaymentRequirement, WorkflowError> {
        let gate = &self.inner.gate;
        let satisfied = gate.is_satisfied(milestone, application);
        let blocking_reason = if satisfied {
            None
        } else {
            match gate.latest_record(milestone, application) {
                Some(record) if record.status == PaymentStatus::Pending => Some(format!(
                    "payment requested {} is still pending",
                    record.created_at
                )),
                Some(record) if application.state().awaited_milestone() == Some(milestone) => Some(format!(
                    "last payment attempt {}; {} awaits the {milestone} payment",
                    record.status,
                    application.state()
                )),
                None if application.state().awaited_milestone() == Some(milestone) => {
                    Some(format!("{} awaits the {milestone} payment", application.state()))
                }
                _ => None,
            }
        };
        Ok(PaymentRequirement {
            milestone,
            cycle: gate.cycle_for(milestone, application),
            amount: gate.fee_for(milestone, application)?,
            satisfied_already: satisfied,
            blocking_reason,
        })
    }

    // ── Commit plumbing ─────────────────────────────────────────────

    fn commit_entry(
        &self,
        original: &Application,
        mut next: Application,
        entry: WorkflowHistoryEntry,
    ) -> Result<TransitionOutcome, WorkflowError> {
        next.apply_entry(entry.clone());
        next.bump_version();
        self.commit(CommitPrecondition::of(original), next.clone())?;
        metrics::counter!(
            TRANSITIONS_TOTAL,
            "action" => entry.action.clone(),
            "transition_type" => entry.transition_type.as_str()
        )
        .increment(1);
        tracing::info!(
            application_id = %next.id(),
            from = %entry.from_state,
            to = %entry.to_state,
            action = %entry.action,
            transition_type = entry.transition_type.as_str(),
            version = next.version(),
            "transition committed"
        );
        Ok(TransitionOutcome {
            application: next,
            record: entry,
            recovered_from: None,
        })
    }

    fn commit(&self, expected: CommitPrecondition, next: Application) -> Result<(), WorkflowError> {
        let id = next.id();
        match self.repo().commit(expected, next)? {
            CommitOutcome::Committed => Ok(()),
            CommitOutcome::Conflict {
                actual_state,
                actual_version,
            } => {
                tracing::warn!(
                    application_id = %id,
                    expected_state = %expected.state,
                    expected_version = expected.version,
                    actual_state = %actual_state,
                    actual_version,
                    "commit conflict"
                );
                Err(WorkflowError::ConcurrentModification {
                    id,
                    expected_state: expected.state,
                    expected_version: expected.version,
                })
            }
        }
    }

    /// Reload-modify-commit for writes that carry no history entry.
    fn update<F>(&self, id: ApplicationId, mutate: F) -> Result<Application, WorkflowError>
    where
        F: Fn(&mut Application) -> Result<(), WorkflowError>,
    {
        let mut last_conflict = None;
        for _ in 0..SIDE_EFFECT_UPDATE_ATTEMPTS {
            let current = self.repo().load(id)?;
            let mut next = current.clone();
            mutate(&mut next)?;
            next.bump_version();
            match self.commit(CommitPrecondition::of(&current), next.clone()) {
                Ok(()) => return Ok(next),
                Err(err @ WorkflowError::ConcurrentModification { .. }) => last_conflict = Some(err),
                Err(err) => return Err(err),
            }
        }
        Err(last_conflict.unwrap_or_else(|| WorkflowError::System(format!("update of {id} not attempted"))))
    }

    // ── Side effects ────────────────────────────────────────────────

    fn payment_due(&self, application: &Application) -> Option<(PaymentReason, Amount)> {
        let milestone = application.state().awaited_milestone()?;
        match self.inner.gate.fee_for(milestone, application) {
            Ok(amount) => Some((milestone, amount)),
            Err(err) => {
                tracing::warn!(application_id = %application.id(), milestone = %milestone, error = %err, "fee computation failed");
                None
            }
        }
    }

    fn dispatch_effects(&self, snapshot: Application, planned: Vec<SideEffect>) {
        if planned.is_empty() {
            return;
        }
        let engine = self.clone();
        effects::dispatch(self.inner.config.side_effects, move || {
            for effect in &planned {
                if let Err(err) = engine.run_effect(&snapshot, effect) {
                    effects::record_failure(effect, &snapshot.id().to_string(), &err);
                }
            }
        });
    }

    fn run_effect(&self, snapshot: &Application, effect: &SideEffect) -> Result<(), WorkflowError> {
        let notifications = &self.inner.collaborators.notifications;
        let id = snapshot.id().to_string();
        let farmer = Recipient::Actor(snapshot.farmer_id().clone());
        match effect {
            SideEffect::NotifyFarmer { from, to } => notifications.notify(
                &farmer,
                NotificationEvent::StateChanged,
                &json!({ "application_id": id, "from": from.as_str(), "to": to.as_str() }),
            )?,
            SideEffect::AnnouncePayment { milestone, amount } => notifications.notify(
                &farmer,
                NotificationEvent::PaymentRequired,
                &json!({ "application_id": id, "milestone": milestone.as_str(), "amount": amount.units() }),
            )?,
            SideEffect::AssignStaff(role) => {
                self.assign_staff(snapshot, *role)?;
            }
            SideEffect::IssueCertificate => self.issue_certificate(snapshot)?,
            SideEffect::AlertAdministrators { reason } => notifications.notify(
                &Recipient::Role(Role::Admin),
                NotificationEvent::AdministratorAlert,
                &json!({ "application_id": id, "state": snapshot.state().as_str(), "reason": reason }),
            )?,
        }
        Ok(())
    }

    fn issue_certificate(&self, snapshot: &Application) -> Result<(), WorkflowError> {
        let artifact = self.inner.collaborators.certificates.generate(snapshot)?;
        let issued = IssuedCertificate {
            certificate_id: artifact.certificate_id,
            path: artifact.path,
            issued_at: self.now(),
        };
        self.update(snapshot.id(), |app| {
            app.set_certificate(issued.clone());
            Ok(())
        })?;
        tracing::info!(application_id = %snapshot.id(), certificate_id = %issued.certificate_id, "certificate issued");
        self.inner.collaborators.notifications.notify(
            &Recipient::Actor(snapshot.farmer_id().clone()),
            NotificationEvent::CertificateIssued,
            &json!({
                "application_id": snapshot.id().to_string(),
                "certificate_id": issued.certificate_id.as_str(),
                "path": issued.path,
            }),
        )?;
        Ok(())
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────

fn observe_refusal(application: &Application, to: WorkflowState, error: &WorkflowError) {
    metrics::counter!(REJECTIONS_TOTAL, "kind" => error.label()).increment(1);
    match error.kind() {
        ErrorKind::System => tracing::error!(
            application_id = %application.id(),
            from = %application.state(),
            to = %to,
            error = %error,
            "transition failed"
        ),
        ErrorKind::Expected | ErrorKind::Retryable => tracing::warn!(
            application_id = %application.id(),
            from = %application.state(),
            to = %to,
            kind = error.label(),
            error = %error,
            "transition refused"
        ),
    }
}

/// Mean score of a checklist after range checks.
fn checklist_score(items: &[ChecklistItem]) -> Result<u8, WorkflowError> {
    if let Some(item) = items.iter().find(|i| i.score > 100) {
        return Err(BusinessRule::InvalidSubmission(format!(
            "score {} for {:?} is outside 0-100",
            item.score, item.criterion
        ))
        .into());
    }
    mean_score(items).ok_or_else(|| {
        BusinessRule::InvalidSubmission("checklist must contain at least one item".to_string()).into()
    })
}

fn validate_submission(
    kind: SubmissionKind,
    spec: &TransitionSpec,
    context: &TransitionContext,
) -> Result<(), WorkflowError> {
    let checklist = match kind {
        SubmissionKind::Review => context.review.as_ref().map(|r| r.checklist.as_slice()),
        SubmissionKind::Audit => context.audit.as_ref().map(|a| a.checklist.as_slice()),
        SubmissionKind::Approval => context.approval.as_ref().map(|_| &[][..]),
    };
    match (kind, checklist) {
        (_, None) => Err(BusinessRule::MissingSubmission {
            kind: kind.as_str(),
            from: spec.from,
            to: spec.to,
        }
        .into()),
        (SubmissionKind::Approval, Some(_)) => Ok(()),
        (_, Some(items)) => checklist_score(items).map(|_| ()),
    }
}

/// The owning farmer, an administrator, or the system may act.
/// Who may report each failure: administrators and the system actor may
/// report anything, the owning farmer only gateway errors, and the
/// assigned auditor only a remote audit that could not take place.
fn authorize_trigger(
    application: &Application,
    actor: &Actor,
    trigger: &FailureTrigger,
) -> Result<(), WorkflowError> {
    let refuse = |required: Role| {
        Err(WorkflowError::UnauthorizedRole {
            required,
            actual: actor.role,
            action: format!("report {trigger}"),
        })
    };
    match (trigger, actor.role) {
        (_, Role::Admin | Role::System) => Ok(()),
        (FailureTrigger::PaymentGatewayError, Role::Farmer) => {
            if actor.id == *application.farmer_id() {
                Ok(())
            } else {
                Err(BusinessRule::NotOwner {
                    actor: actor.id.clone(),
                }
                .into())
            }
        }
        (FailureTrigger::RemoteAuditImpossible, Role::Auditor) => {
            match application.assignments().get(StaffRole::Auditor) {
                Some(assigned) if assigned.as_str() != actor.id.as_str() => {
                    Err(BusinessRule::NotAssignedStaff {
                        role: StaffRole::Auditor,
                        assigned: assigned.to_string(),
                    }
                    .into())
                }
                _ => Ok(()),
            }
        }
        (FailureTrigger::RemoteAuditImpossible, _) => refuse(Role::Auditor),
        _ => refuse(Role::Admin),
    }
}

/// At most one completed record per milestone and cycle.
fn refuse_duplicate(
    application: &Application,
    record: &PaymentRecord,
) -> Result<(), WorkflowError> {
    let milestone = record.milestone_reason;
    if record.status == PaymentStatus::Completed
        && application
            .payments_for(milestone)
            .iter()
            .any(|p| p.cycle == record.cycle && p.status == PaymentStatus::Completed)
    {
        metrics::counter!(REJECTIONS_TOTAL, "kind" => "duplicate_payment").increment(1);
        tracing::warn!(application_id = %application.id(), milestone = %milestone, cycle = record.cycle, "duplicate completed payment refused");
        return Err(WorkflowError::DuplicatePayment {
            milestone,
            cycle: record.cycle,
        });
    }
    Ok(())
}

fn authorize_owner_or_staff(application: &Application, actor: &Actor, action: &str) -> Result<(), WorkflowError> {
    match actor.role {
        Role::Admin | Role::System => Ok(()),
        Role::Farmer if actor.id == *application.farmer_id() => Ok(()),
        Role::Farmer => Err(BusinessRule::NotOwner {
            actor: actor.id.clone(),
        }
        .into()),
        Role::Reviewer | Role::Auditor | Role::Approver => Err(WorkflowError::UnauthorizedRole {
            required: Role::Farmer,
            actual: actor.role,
            action: action.to_string(),
        }),
    }
}
