//! History chain invariants: one entry per committed transition, adjacent
//! entries chain state to state, versions only move forward, and refused
//! transitions leave no trace.

mod common;

use common::{audit, fixture, review};
use gacp_workflow::{
    Application, AuditResult, PaymentReason, ReviewDecision, TransitionContext, TransitionType,
    WorkflowState,
};

fn assert_chained(app: &Application) {
    let history = app.history();
    for pair in history.windows(2) {
        assert_eq!(
            pair[0].to_state, pair[1].from_state,
            "{} -> {} followed by {} -> {}",
            pair[0].from_state, pair[0].to_state, pair[1].from_state, pair[1].to_state
        );
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
    if let Some(first) = history.first() {
        assert_eq!(first.from_state, WorkflowState::Draft);
    }
    if let Some(last) = history.last() {
        assert_eq!(last.to_state, app.state());
    }
}

#[test]
fn each_transition_appends_exactly_one_entry() {
    let fx = fixture();
    let id = fx.new_application(vec![]);
    let steps = [
        (WorkflowState::Submitted, &fx.farmer),
        (WorkflowState::PaymentPendingInitial, &fx.system),
    ];
    let mut previous = fx.h.engine.get_application(id).unwrap();
    for (to, actor) in steps {
        let outcome = fx
            .h
            .engine
            .transition(id, to, actor, TransitionContext::new())
            .unwrap();
        assert_eq!(outcome.application.history().len(), previous.history().len() + 1);
        assert!(outcome.application.version() > previous.version());
        assert_eq!(outcome.record.transition_type, TransitionType::Primary);
        assert_chained(&outcome.application);
        previous = outcome.application;
    }
}

#[test]
fn full_path_history_is_chained() {
    let fx = fixture();
    let id = fx.new_application(vec![]);
    fx.to_auditing(id);
    fx.h.engine
        .submit_audit(id, &fx.auditor, audit(AuditResult::Fail, 20))
        .unwrap();
    fx.h.pay(id, PaymentReason::AuditFail, &fx.farmer).unwrap();
    fx.step(id, WorkflowState::ReAuditing, &fx.system);
    fx.h.engine
        .submit_audit(id, &fx.auditor, audit(AuditResult::Pass, 95))
        .unwrap();

    let app = fx.h.engine.get_application(id).unwrap();
    assert_chained(&app);
    let actions: Vec<&str> = app.history().iter().map(|e| e.action.as_str()).collect();
    assert_eq!(
        actions,
        vec![
            "submit",
            "request_review_payment",
            "confirm_review_payment",
            "approve_review",
            "schedule_audit",
            "start_audit",
            "fail_audit",
            "start_re_audit",
            "pass_audit",
        ]
    );
    assert_eq!(app.submitted_at(), Some(app.history()[0].timestamp));
}

#[test]
fn refused_transition_leaves_application_untouched() {
    let fx = fixture();
    let id = fx.new_application(vec![]);
    fx.to_reviewing(id);
    let before = fx.h.engine.get_application(id).unwrap();

    let err = fx
        .h
        .engine
        .transition(id, WorkflowState::Approved, &fx.reviewer, TransitionContext::new());
    assert!(err.is_err());
    let err = fx.h.engine.submit_review(id, &fx.auditor, review(ReviewDecision::Approve, 90));
    assert!(err.is_err());

    assert_eq!(fx.h.engine.get_application(id).unwrap(), before);
}

#[test]
fn rejection_counter_never_decreases_before_approval() {
    let fx = fixture();
    let id = fx.new_application(vec![]);
    fx.to_reviewing(id);
    let mut last = 0;
    for _ in 0..2 {
        fx.h.engine
            .submit_review(id, &fx.reviewer, review(ReviewDecision::Reject, 10))
            .unwrap();
        let count = fx.h.engine.get_application(id).unwrap().rejection_count();
        assert!(count > last);
        last = count;
        fx.step(id, WorkflowState::Reviewing, &fx.farmer);
        assert_eq!(fx.h.engine.get_application(id).unwrap().rejection_count(), last);
    }
}

#[test]
fn history_metadata_records_decision_details() {
    let fx = fixture();
    let id = fx.new_application(vec![]);
    fx.to_reviewing(id);
    let outcome = fx
        .h
        .engine
        .submit_review(id, &fx.reviewer, review(ReviewDecision::Approve, 77))
        .unwrap();
    let metadata = &outcome.record.metadata;
    assert_eq!(metadata["review_round"], 1);
    assert_eq!(metadata["overall_score"], 77);
    assert_eq!(outcome.record.actor_id, fx.reviewer.id);

    let app = fx.h.engine.get_application(id).unwrap();
    let confirm = &app.history()[2];
    assert_eq!(confirm.action, "confirm_review_payment");
    assert_eq!(confirm.metadata["milestone"], "initial");
}

#[test]
fn rejections_record_route_and_resubmission_fee() {
    let fx = fixture();
    let id = fx.new_application(vec![]);
    fx.to_reviewing(id);
    let mut routes = Vec::new();
    for round in 0..3 {
        let outcome = fx
            .h
            .engine
            .submit_review(id, &fx.reviewer, review(ReviewDecision::Reject, 30))
            .unwrap();
        let metadata = outcome.record.metadata;
        routes.push(metadata["rejection_route"].as_str().unwrap().to_string());
        if round < 2 {
            assert!(metadata.get("resubmission_milestone").is_none());
            fx.step(id, WorkflowState::Reviewing, &fx.farmer);
        } else {
            assert_eq!(metadata["resubmission_milestone"], "3rd_review");
        }
    }
    assert_eq!(routes, ["free_resubmission", "free_resubmission", "paid_resubmission"]);

    let application = fx.h.engine.get_application(id).unwrap();
    let tagged = application
        .history()
        .iter()
        .filter(|e| e.metadata.contains_key("rejection_route"))
        .count();
    assert_eq!(tagged, 3);
}
