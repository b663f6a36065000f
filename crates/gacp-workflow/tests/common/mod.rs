//! Shared fixtures for the workflow integration tests.

#![allow(dead_code)]

use gacp_core::{ActorId, ApplicationId, FeeMultiplier, Timestamp};
use gacp_workflow::memory::InMemoryHarness;
use gacp_workflow::{
    Actor, Application, ApprovalDecision, ApprovalSubmission, AuditMode, AuditResult,
    AuditSubmission, ChecklistItem, DispatchMode, DocumentRef, Herb, ReviewDecision,
    ReviewSubmission, Role, TransitionContext, WorkflowConfig, WorkflowState,
};

pub const START: &str = "2026-03-02T08:00:00Z";

pub struct Fixture {
    pub h: InMemoryHarness,
    pub farmer: Actor,
    pub reviewer: Actor,
    pub auditor: Actor,
    pub approver: Actor,
    pub admin: Actor,
    pub system: Actor,
}

pub fn actor(id: &str, role: Role) -> Actor {
    Actor::new(ActorId::new(id).unwrap(), role)
}

pub fn inline_config() -> WorkflowConfig {
    WorkflowConfig {
        side_effects: DispatchMode::Inline,
        ..WorkflowConfig::default()
    }
}

pub fn fixture() -> Fixture {
    fixture_with(inline_config())
}

pub fn fixture_with(config: WorkflowConfig) -> Fixture {
    let h = InMemoryHarness::new(config, Timestamp::parse(START).unwrap()).unwrap();
    Fixture {
        h,
        farmer: actor("farmer-1", Role::Farmer),
        reviewer: actor("reviewer-1", Role::Reviewer),
        auditor: actor("auditor-1", Role::Auditor),
        approver: actor("approver-1", Role::Approver),
        admin: actor("admin-1", Role::Admin),
        system: Actor::system(),
    }
}

pub fn herb(name: &str, multiplier: &str) -> Herb {
    Herb {
        name: name.to_string(),
        multiplier: FeeMultiplier::parse_decimal(multiplier).unwrap(),
        special_license_required: false,
    }
}

pub fn review(decision: ReviewDecision, score: u8) -> ReviewSubmission {
    ReviewSubmission {
        checklist: vec![
            ChecklistItem::new("document_completeness", score),
            ChecklistItem::new("site_description", score),
        ],
        decision,
        comments: None,
    }
}

pub fn audit(result: AuditResult, score: u8) -> AuditSubmission {
    AuditSubmission {
        mode: AuditMode::Online,
        checklist: vec![ChecklistItem::new("cultivation_practice", score)],
        result,
        comments: None,
    }
}

pub fn approval(decision: ApprovalDecision) -> ApprovalSubmission {
    ApprovalSubmission {
        decision,
        comments: None,
    }
}

impl Fixture {
    pub fn now(&self) -> Timestamp {
        use gacp_workflow::Clock;
        self.h.clock.now()
    }

    /// Register a draft with every required document uploaded.
    pub fn new_application(&self, herbs: Vec<Herb>) -> ApplicationId {
        let now = self.now();
        let mut app = Application::new(self.farmer.id.clone(), "Doi Saket Farm", now);
        for herb in herbs {
            app = app.with_herb(herb);
        }
        for doc in &self.h.engine.config().required_documents {
            app = app.with_document(DocumentRef::active(doc.clone(), now));
        }
        self.h.engine.register(app).unwrap()
    }

    pub fn state(&self, id: ApplicationId) -> WorkflowState {
        self.h.engine.get_application(id).unwrap().state()
    }

    pub fn step(&self, id: ApplicationId, to: WorkflowState, actor: &Actor) {
        self.h
            .engine
            .transition(id, to, actor, TransitionContext::new())
            .unwrap_or_else(|e| panic!("{to}: {e}"));
    }

    /// draft → reviewing, paying the document-review fee.
    pub fn to_reviewing(&self, id: ApplicationId) {
        self.step(id, WorkflowState::Submitted, &self.farmer);
        self.step(id, WorkflowState::PaymentPendingInitial, &self.system);
        self.h
            .pay(id, gacp_workflow::PaymentReason::Initial, &self.farmer)
            .unwrap();
        self.step(id, WorkflowState::Reviewing, &self.system);
    }

    /// draft → auditing with an approved review and a paid audit fee.
    pub fn to_auditing(&self, id: ApplicationId) {
        self.to_reviewing(id);
        self.h
            .engine
            .submit_review(id, &self.reviewer, review(ReviewDecision::Approve, 85))
            .unwrap();
        self.h
            .pay(id, gacp_workflow::PaymentReason::Audit, &self.farmer)
            .unwrap();
        self.step(id, WorkflowState::AuditScheduled, &self.system);
        self.step(id, WorkflowState::Auditing, &self.auditor);
    }
}
