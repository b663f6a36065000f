//! Payment requests and expiry, cancellation rules, the optional re-audit
//! cap, document replacement, and the read-only status queries.

mod common;

use common::{audit, fixture, fixture_with, herb, inline_config};
use gacp_core::Amount;
use gacp_workflow::{
    AuditResult, BusinessRule, Condition, DocumentRef, GuardId, PaymentReason, PaymentRecord,
    PaymentStatus, TransitionContext, WorkflowConfig, WorkflowError, WorkflowState,
};

#[test]
fn pending_request_blocks_a_second_until_it_expires() {
    let fx = fixture();
    let id = fx.new_application(vec![]);
    fx.step(id, WorkflowState::Submitted, &fx.farmer);
    fx.step(id, WorkflowState::PaymentPendingInitial, &fx.system);

    fx.h.engine
        .request_payment(id, PaymentReason::Initial, &fx.farmer)
        .unwrap();
    fx.h.clock.advance_days(3);
    let err = fx
        .h
        .engine
        .request_payment(id, PaymentReason::Initial, &fx.farmer)
        .unwrap_err();
    assert_eq!(
        err,
        WorkflowError::BusinessRuleViolation(BusinessRule::PaymentAlreadyPending {
            milestone: PaymentReason::Initial,
            cycle: 1
        })
    );

    fx.h.clock.advance_days(5);
    let fresh = fx
        .h
        .engine
        .request_payment(id, PaymentReason::Initial, &fx.farmer)
        .unwrap();
    assert_eq!(fresh.status, PaymentStatus::Pending);
    assert_eq!(fx.h.payments.requests().len(), 2);
}

#[test]
fn payment_only_for_the_awaited_milestone() {
    let fx = fixture();
    let id = fx.new_application(vec![]);
    fx.step(id, WorkflowState::Submitted, &fx.farmer);
    let err = fx
        .h
        .engine
        .request_payment(id, PaymentReason::Initial, &fx.farmer)
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::BusinessRuleViolation(BusinessRule::PaymentNotAwaited { .. })
    ));
    fx.step(id, WorkflowState::PaymentPendingInitial, &fx.system);
    let err = fx
        .h
        .engine
        .request_payment(id, PaymentReason::Audit, &fx.farmer)
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::BusinessRuleViolation(BusinessRule::PaymentNotAwaited { .. })
    ));
}

#[test]
fn pending_payment_does_not_satisfy_gate() {
    let fx = fixture();
    let id = fx.new_application(vec![]);
    fx.step(id, WorkflowState::Submitted, &fx.farmer);
    fx.step(id, WorkflowState::PaymentPendingInitial, &fx.system);
    let pending = fx
        .h
        .engine
        .request_payment(id, PaymentReason::Initial, &fx.farmer)
        .unwrap();
    let unchanged = fx
        .h
        .engine
        .confirm_payment(id, pending.handle.as_ref().unwrap())
        .unwrap();
    assert_eq!(unchanged.status, PaymentStatus::Pending);

    let err = fx
        .h
        .engine
        .transition(id, WorkflowState::Reviewing, &fx.system, TransitionContext::new())
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::ConditionNotMet {
            condition: Condition::Payment { .. },
            ..
        }
    ));
}

#[test]
fn unknown_handle_is_refused() {
    let fx = fixture();
    let id = fx.new_application(vec![]);
    let handle = gacp_core::PaymentHandle::new("pay-unknown").unwrap();
    let err = fx.h.engine.confirm_payment(id, &handle).unwrap_err();
    assert_eq!(
        err,
        WorkflowError::BusinessRuleViolation(BusinessRule::UnknownPaymentHandle)
    );
}

#[test]
fn system_cancels_only_after_payment_expiry() {
    let fx = fixture();
    let id = fx.new_application(vec![]);
    fx.step(id, WorkflowState::Submitted, &fx.farmer);
    fx.step(id, WorkflowState::PaymentPendingInitial, &fx.system);

    fx.h.clock.advance_days(6);
    let err = fx
        .h
        .engine
        .transition(id, WorkflowState::Cancelled, &fx.system, TransitionContext::new())
        .unwrap_err();
    assert_eq!(
        err,
        WorkflowError::ConditionNotMet {
            from: WorkflowState::PaymentPendingInitial,
            to: WorkflowState::Cancelled,
            condition: Condition::Guard(GuardId::MayCancel),
        }
    );

    fx.h.clock.advance_days(2);
    let outcome = fx
        .h
        .engine
        .transition(id, WorkflowState::Cancelled, &fx.system, TransitionContext::new())
        .unwrap();
    assert_eq!(outcome.application.state(), WorkflowState::Cancelled);
    assert_eq!(outcome.record.action, "cancel");
}

#[test]
fn farmer_cancels_before_approval_admin_any_time() {
    let fx = fixture();
    let id = fx.new_application(vec![]);
    fx.to_auditing(id);
    fx.h.engine
        .submit_audit(id, &fx.auditor, audit(AuditResult::Pass, 90))
        .unwrap();
    assert_eq!(fx.state(id), WorkflowState::ApprovalPending);

    let err = fx
        .h
        .engine
        .transition(id, WorkflowState::Cancelled, &fx.farmer, TransitionContext::new())
        .unwrap_err();
    assert!(matches!(err, WorkflowError::ConditionNotMet { .. }));

    let outcome = fx
        .h
        .engine
        .transition(
            id,
            WorkflowState::Cancelled,
            &fx.admin,
            TransitionContext::new().with_comments("withdrawn by request"),
        )
        .unwrap();
    assert_eq!(outcome.record.comments.as_deref(), Some("withdrawn by request"));
    assert_eq!(outcome.application.rejection_count(), 0);

    let err = fx
        .h
        .engine
        .transition(id, WorkflowState::Draft, &fx.admin, TransitionContext::new())
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
}

#[test]
fn reviewer_may_not_cancel() {
    let fx = fixture();
    let id = fx.new_application(vec![]);
    fx.to_reviewing(id);
    let err = fx
        .h
        .engine
        .transition(id, WorkflowState::Cancelled, &fx.reviewer, TransitionContext::new())
        .unwrap_err();
    assert!(matches!(err, WorkflowError::ConditionNotMet { .. }));
}

#[test]
fn audit_round_cap_lets_admin_close() {
    let fx = fixture_with(WorkflowConfig {
        max_audit_rounds: Some(2),
        ..inline_config()
    });
    let id = fx.new_application(vec![]);
    fx.to_auditing(id);
    fx.h.engine
        .submit_audit(id, &fx.auditor, audit(AuditResult::Fail, 10))
        .unwrap();

    let err = fx
        .h
        .engine
        .transition(id, WorkflowState::RejectedFinal, &fx.admin, TransitionContext::new())
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::ConditionNotMet {
            condition: Condition::Guard(GuardId::AuditRoundLimitReached),
            ..
        }
    ));

    fx.h.pay(id, PaymentReason::AuditFail, &fx.farmer).unwrap();
    fx.step(id, WorkflowState::ReAuditing, &fx.system);
    fx.h.engine
        .submit_audit(id, &fx.auditor, audit(AuditResult::Fail, 10))
        .unwrap();

    let actions = fx.h.engine.get_next_actions(id).unwrap();
    assert!(actions.iter().any(|a| a.to == WorkflowState::RejectedFinal));
    fx.step(id, WorkflowState::RejectedFinal, &fx.admin);
}

#[test]
fn uncapped_re_audits_never_offer_closure() {
    let fx = fixture();
    let id = fx.new_application(vec![]);
    fx.to_auditing(id);
    fx.h.engine
        .submit_audit(id, &fx.auditor, audit(AuditResult::Fail, 10))
        .unwrap();
    let actions = fx.h.engine.get_next_actions(id).unwrap();
    let targets: Vec<_> = actions.iter().map(|a| a.to).collect();
    assert_eq!(targets, vec![WorkflowState::ReAuditing, WorkflowState::Cancelled]);
    assert!(actions[0].blocked_by_payment);
}

#[test]
fn documents_editable_only_before_review() {
    let fx = fixture();
    let id = fx.new_application(vec![]);
    let docs = vec![DocumentRef::active("id_card", fx.now())];
    let app = fx.h.engine.replace_documents(id, &fx.farmer, docs.clone()).unwrap();
    assert_eq!(app.documents(), docs.as_slice());

    let err = fx
        .h
        .engine
        .transition(id, WorkflowState::Submitted, &fx.farmer, TransitionContext::new())
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::ConditionNotMet {
            condition: Condition::Guard(GuardId::HasRequiredDocuments),
            ..
        }
    ));

    let stranger = common::actor("farmer-2", gacp_workflow::Role::Farmer);
    assert!(matches!(
        fx.h.engine.replace_documents(id, &stranger, vec![]),
        Err(WorkflowError::BusinessRuleViolation(BusinessRule::NotOwner { .. }))
    ));
    assert!(matches!(
        fx.h.engine.replace_documents(id, &fx.reviewer, vec![]),
        Err(WorkflowError::UnauthorizedRole { .. })
    ));

    let full: Vec<_> = fx
        .h
        .engine
        .config()
        .required_documents
        .iter()
        .map(|d| DocumentRef::active(d.clone(), fx.now()))
        .collect();
    fx.h.engine.replace_documents(id, &fx.farmer, full.clone()).unwrap();
    fx.to_reviewing(id);
    let err = fx.h.engine.replace_documents(id, &fx.farmer, full).unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::BusinessRuleViolation(BusinessRule::DocumentsLocked {
            state: WorkflowState::Reviewing
        })
    ));
}

#[test]
fn status_reports_payment_due_and_next_steps() {
    let fx = fixture();
    let id = fx.new_application(vec![herb("kratom", "2.0")]);
    fx.step(id, WorkflowState::Submitted, &fx.farmer);
    fx.step(id, WorkflowState::PaymentPendingInitial, &fx.system);

    let status = fx.h.engine.get_status(id).unwrap();
    assert_eq!(status.state, WorkflowState::PaymentPendingInitial);
    assert_eq!(status.progress_percentage, 15);
    let due = status.payment_required.expect("payment due");
    assert_eq!(due.milestone, PaymentReason::Initial);
    assert_eq!(due.amount, Amount(10_000));
    assert!(!due.satisfied_already);
    assert!(due.blocking_reason.is_some());
    assert!(status
        .next_steps
        .iter()
        .any(|s| s.contains("confirm_review_payment") && s.contains("awaiting initial payment")));

    fx.h.pay(id, PaymentReason::Initial, &fx.farmer).unwrap();
    fx.step(id, WorkflowState::Reviewing, &fx.system);
    let requirements = fx.h.engine.get_payment_requirements(id).unwrap();
    let milestones: Vec<_> = requirements.iter().map(|r| r.milestone).collect();
    assert_eq!(milestones, vec![PaymentReason::Initial, PaymentReason::Audit]);
    assert!(requirements[0].satisfied_already);
    assert_eq!(requirements[1].amount, Amount(50_000));
    assert!(!requirements[1].satisfied_already);
    assert_eq!(requirements[1].blocking_reason, None);
    assert_eq!(fx.h.engine.get_status(id).unwrap().payment_required, None);
}

#[test]
fn next_actions_in_review_follow_rejection_count() {
    let fx = fixture();
    let id = fx.new_application(vec![]);
    fx.to_reviewing(id);
    let before = fx.h.engine.get_application(id).unwrap();
    let targets: Vec<_> = fx
        .h
        .engine
        .get_next_actions(id)
        .unwrap()
        .into_iter()
        .map(|a| a.to)
        .collect();
    assert_eq!(
        targets,
        vec![
            WorkflowState::RevisionRequired,
            WorkflowState::AuditPaymentPending,
            WorkflowState::Cancelled,
        ]
    );
    assert_eq!(fx.h.engine.get_application(id).unwrap(), before);
}

#[test]
fn callback_must_answer_a_request_and_cover_the_fee() {
    let fx = fixture();
    let id = fx.new_application(vec![herb("cannabis", "1.5")]);
    fx.step(id, WorkflowState::Submitted, &fx.farmer);
    fx.step(id, WorkflowState::PaymentPendingInitial, &fx.system);
    let pending = fx
        .h
        .engine
        .request_payment(id, PaymentReason::Initial, &fx.farmer)
        .unwrap();
    let completed = PaymentRecord {
        status: PaymentStatus::Completed,
        created_at: fx.now(),
        ..pending.clone()
    };

    let err = fx
        .h
        .engine
        .record_payment(
            id,
            PaymentRecord {
                amount: Amount(1),
                ..completed.clone()
            },
        )
        .unwrap_err();
    assert_eq!(
        err,
        WorkflowError::BusinessRuleViolation(BusinessRule::PaymentBelowFee {
            milestone: PaymentReason::Initial,
            expected: Amount(7_500),
            received: Amount(1),
        })
    );

    let err = fx
        .h
        .engine
        .record_payment(
            id,
            PaymentRecord {
                handle: None,
                ..completed.clone()
            },
        )
        .unwrap_err();
    assert_eq!(
        err,
        WorkflowError::BusinessRuleViolation(BusinessRule::UnknownPaymentHandle)
    );

    let err = fx
        .h
        .engine
        .record_payment(
            id,
            PaymentRecord {
                cycle: 2,
                ..completed.clone()
            },
        )
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::BusinessRuleViolation(BusinessRule::PaymentCycleMismatch {
            expected: 1,
            received: 2,
            ..
        })
    ));

    let err = fx
        .h
        .engine
        .record_payment(
            id,
            PaymentRecord {
                milestone_reason: PaymentReason::Audit,
                ..completed.clone()
            },
        )
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::BusinessRuleViolation(BusinessRule::PaymentNotAwaited { .. })
    ));

    // None of the refused callbacks opened the gate.
    let refused = fx
        .h
        .engine
        .transition(id, WorkflowState::Reviewing, &fx.system, TransitionContext::new())
        .unwrap_err();
    assert!(matches!(refused, WorkflowError::ConditionNotMet { .. }));

    let recorded = fx.h.engine.record_payment(id, completed).unwrap();
    assert_eq!(recorded.amount, Amount(7_500));
    fx.step(id, WorkflowState::Reviewing, &fx.system);
}
