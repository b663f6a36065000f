//! # Simulate Subcommand
//!
//! Replays a reference certification scenario end to end against the
//! in-memory repository, gateway, notifier, roster and certificate issuer.
//! Each committed step is printed as it happens; the exit code reports
//! whether the scenario ended where it should.

use clap::{Args, ValueEnum};

use gacp_core::{ActorId, ApplicationId, FeeMultiplier, Timestamp};
use gacp_workflow::memory::InMemoryHarness;
use gacp_workflow::{
    Actor, Application, ApprovalDecision, ApprovalSubmission, AuditMode, AuditResult,
    AuditSubmission, ChecklistItem, Clock, DispatchMode, DocumentRef, Herb,
    PaymentReason, ReviewDecision, ReviewSubmission, Role, TransitionContext, TransitionOutcome,
    WorkflowConfig, WorkflowError, WorkflowState,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Submit, pay, pass review and audit, approve, issue the certificate.
    HappyPath,
    /// Three review rejections, then the paid fourth review.
    TripleRejection,
    /// An audit with a doubtful result followed by a paid field audit.
    AuditDoubt,
    /// The same completed payment recorded twice.
    DuplicatePayment,
    /// A reviewer trying to submit on the farmer's behalf.
    Unauthorized,
}

/// Arguments for the `gacp simulate` subcommand.
#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[arg(value_enum)]
    pub scenario: Scenario,

    /// Print the final application as JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn run_simulate(args: &SimulateArgs, config: &WorkflowConfig) -> anyhow::Result<u8> {
    let config = WorkflowConfig {
        side_effects: DispatchMode::Inline,
        ..config.clone()
    };
    let sim = Simulation::new(config)?;
    let report = match args.scenario {
        Scenario::HappyPath => sim.happy_path()?,
        Scenario::TripleRejection => sim.triple_rejection()?,
        Scenario::AuditDoubt => sim.audit_doubt()?,
        Scenario::DuplicatePayment => sim.duplicate_payment()?,
        Scenario::Unauthorized => sim.unauthorized()?,
    };

    let application = sim.h.engine.get_application(report.id)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&application)?);
    }
    let verdict = if report.passed { "PASS" } else { "FAIL" };
    println!(
        "{:?}: {verdict} (state {}, {} history entries)",
        args.scenario,
        application.state(),
        application.history().len()
    );
    Ok(if report.passed { 0 } else { 1 })
}

struct Report {
    id: ApplicationId,
    passed: bool,
}

struct Simulation {
    h: InMemoryHarness,
    farmer: Actor,
    reviewer: Actor,
    auditor: Actor,
    approver: Actor,
    system: Actor,
}

impl Simulation {
    fn new(config: WorkflowConfig) -> anyhow::Result<Self> {
        let h = InMemoryHarness::new(config, Timestamp::now())?;
        Ok(Self {
            h,
            farmer: Actor::new(ActorId::new("farmer-1")?, Role::Farmer),
            reviewer: Actor::new(ActorId::new("reviewer-1")?, Role::Reviewer),
            auditor: Actor::new(ActorId::new("auditor-1")?, Role::Auditor),
            approver: Actor::new(ActorId::new("approver-1")?, Role::Approver),
            system: Actor::system(),
        })
    }

    fn register(&self) -> anyhow::Result<ApplicationId> {
        let now = self.h.clock.now();
        let mut application = Application::new(self.farmer.id.clone(), "Simulated Farm", now)
            .with_herb(Herb {
                name: "turmeric".to_string(),
                multiplier: FeeMultiplier::parse_decimal("1.2")?,
                special_license_required: false,
            });
        for document in &self.h.engine.config().required_documents {
            application = application.with_document(DocumentRef::active(document.clone(), now));
        }
        let id = self.h.engine.register(application)?;
        println!("registered {id}");
        Ok(id)
    }

    fn show(&self, outcome: &TransitionOutcome) {
        let record = &outcome.record;
        println!(
            "  {:<24} {} -> {}",
            record.action, record.from_state, record.to_state
        );
    }

    fn go(&self, id: ApplicationId, to: WorkflowState, actor: &Actor) -> anyhow::Result<()> {
        let outcome = self.h.engine.transition(id, to, actor, TransitionContext::new())?;
        self.show(&outcome);
        Ok(())
    }

    fn pay(&self, id: ApplicationId, milestone: PaymentReason) -> anyhow::Result<()> {
        let record = self.h.pay(id, milestone, &self.farmer)?;
        println!(
            "  {:<24} {} {} (cycle {})",
            "pay", milestone, record.amount, record.cycle
        );
        Ok(())
    }

    fn review(&self, id: ApplicationId, decision: ReviewDecision, score: u8) -> anyhow::Result<()> {
        let review = ReviewSubmission {
            checklist: vec![
                ChecklistItem::new("document_completeness", score),
                ChecklistItem::new("site_description", score),
            ],
            decision,
            comments: None,
        };
        let outcome = self.h.engine.submit_review(id, &self.reviewer, review)?;
        self.show(&outcome);
        Ok(())
    }

    fn audit(&self, id: ApplicationId, result: AuditResult, score: u8) -> anyhow::Result<()> {
        let audit = AuditSubmission {
            mode: AuditMode::Online,
            checklist: vec![ChecklistItem::new("cultivation_practice", score)],
            result,
            comments: None,
        };
        let outcome = self.h.engine.submit_audit(id, &self.auditor, audit)?;
        self.show(&outcome);
        Ok(())
    }

    fn to_reviewing(&self, id: ApplicationId) -> anyhow::Result<()> {
        self.go(id, WorkflowState::Submitted, &self.farmer)?;
        self.go(id, WorkflowState::PaymentPendingInitial, &self.system)?;
        self.pay(id, PaymentReason::Initial)?;
        self.go(id, WorkflowState::Reviewing, &self.system)
    }

    fn to_auditing(&self, id: ApplicationId) -> anyhow::Result<()> {
        self.to_reviewing(id)?;
        self.review(id, ReviewDecision::Approve, 85)?;
        self.pay(id, PaymentReason::Audit)?;
        self.go(id, WorkflowState::AuditScheduled, &self.system)?;
        self.go(id, WorkflowState::Auditing, &self.auditor)
    }

    fn state(&self, id: ApplicationId) -> anyhow::Result<WorkflowState> {
        Ok(self.h.engine.get_application(id)?.state())
    }

    // ─── Scenarios ───────────────────────────────────────────────────

    fn happy_path(&self) -> anyhow::Result<Report> {
        let id = self.register()?;
        self.to_auditing(id)?;
        self.audit(id, AuditResult::Pass, 92)?;
        let approval = ApprovalSubmission {
            decision: ApprovalDecision::Granted,
            comments: None,
        };
        let outcome = self.h.engine.submit_approval(id, &self.approver, approval)?;
        self.show(&outcome);
        self.go(id, WorkflowState::CertificateIssued, &self.system)?;

        let application = self.h.engine.get_application(id)?;
        if let Some(certificate) = application.certificate() {
            println!("  certificate {}", certificate.certificate_id);
        }
        Ok(Report {
            id,
            passed: application.state() == WorkflowState::CertificateIssued
                && application.certificate().is_some(),
        })
    }

    fn triple_rejection(&self) -> anyhow::Result<Report> {
        let id = self.register()?;
        self.to_reviewing(id)?;
        for _ in 0..2 {
            self.review(id, ReviewDecision::Reject, 40)?;
            self.go(id, WorkflowState::Reviewing, &self.farmer)?;
        }
        self.review(id, ReviewDecision::Reject, 40)?;

        let unpaid = self.h.engine.transition(
            id,
            WorkflowState::Reviewing,
            &self.farmer,
            TransitionContext::new(),
        );
        let blocked = matches!(unpaid, Err(WorkflowError::ConditionNotMet { .. }));
        if let Err(e) = &unpaid {
            println!("  resubmit refused: {e}");
        }

        self.pay(id, PaymentReason::ThirdReview)?;
        self.go(id, WorkflowState::Reviewing, &self.farmer)?;
        let count = self.h.engine.get_application(id)?.rejection_count();
        Ok(Report {
            id,
            passed: blocked && count == 3 && self.state(id)? == WorkflowState::Reviewing,
        })
    }

    fn audit_doubt(&self) -> anyhow::Result<Report> {
        let id = self.register()?;
        self.to_auditing(id)?;
        self.audit(id, AuditResult::Doubt, 75)?;
        self.pay(id, PaymentReason::FieldAudit)?;
        self.go(id, WorkflowState::FieldAuditing, &self.system)?;
        self.audit(id, AuditResult::Pass, 88)?;
        Ok(Report {
            id,
            passed: self.state(id)? == WorkflowState::ApprovalPending,
        })
    }

    fn duplicate_payment(&self) -> anyhow::Result<Report> {
        let id = self.register()?;
        self.go(id, WorkflowState::Submitted, &self.farmer)?;
        self.go(id, WorkflowState::PaymentPendingInitial, &self.system)?;
        self.pay(id, PaymentReason::Initial)?;

        let application = self.h.engine.get_application(id)?;
        let Some(paid) = application.payments_for(PaymentReason::Initial).last().cloned() else {
            anyhow::bail!("initial payment missing after settlement");
        };
        let replay = self.h.engine.record_payment(id, paid);
        if let Err(e) = &replay {
            println!("  replayed payment refused: {e}");
        }
        let refused = matches!(replay, Err(WorkflowError::DuplicatePayment { .. }));
        let records = self.h.engine.get_application(id)?.payments_for(PaymentReason::Initial).len();
        Ok(Report {
            id,
            passed: refused && records == 1,
        })
    }

    fn unauthorized(&self) -> anyhow::Result<Report> {
        let id = self.register()?;
        let attempt = self.h.engine.transition(
            id,
            WorkflowState::Submitted,
            &self.reviewer,
            TransitionContext::new(),
        );
        if let Err(e) = &attempt {
            println!("  submit by reviewer refused: {e}");
        }
        let refused = matches!(attempt, Err(WorkflowError::UnauthorizedRole { .. }));
        let application = self.h.engine.get_application(id)?;
        Ok(Report {
            id,
            passed: refused
                && application.state() == WorkflowState::Draft
                && application.history().is_empty(),
        })
    }
}
