//! Side effects dispatched to the tokio blocking pool run after the
//! commit, and their failures never undo it.

mod common;

use std::time::Duration;

use common::{fixture_with, inline_config};
use gacp_workflow::ports::NotificationEvent;
use gacp_workflow::{DispatchMode, PaymentReason, TransitionContext, WorkflowConfig, WorkflowState};

async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn assignment_lands_after_commit() {
    let fx = fixture_with(WorkflowConfig {
        side_effects: DispatchMode::Background,
        ..WorkflowConfig::default()
    });
    let id = fx.new_application(vec![]);
    fx.to_reviewing(id);

    let engine = fx.h.engine.clone();
    let assigned = eventually(|| {
        engine
            .get_application(id)
            .map(|app| app.assignments().reviewer.is_some())
            .unwrap_or(false)
    })
    .await;
    assert!(assigned);
    let notifier = fx.h.notifications.clone();
    assert!(eventually(|| notifier.count(NotificationEvent::StaffAssigned) == 1).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_notifications_do_not_roll_back() {
    let fx = fixture_with(WorkflowConfig {
        side_effects: DispatchMode::Background,
        ..WorkflowConfig::default()
    });
    fx.h.notifications.set_failing(true);
    let id = fx.new_application(vec![]);
    let outcome = fx
        .h
        .engine
        .transition(id, WorkflowState::Submitted, &fx.farmer, TransitionContext::new())
        .unwrap();
    assert_eq!(outcome.application.state(), WorkflowState::Submitted);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let app = fx.h.engine.get_application(id).unwrap();
    assert_eq!(app.state(), WorkflowState::Submitted);
    assert_eq!(app.history().len(), 1);
    assert!(fx.h.notifications.sent().is_empty());
}

#[test]
fn inline_effects_finish_before_return() {
    let fx = fixture_with(inline_config());
    let id = fx.new_application(vec![]);
    fx.step(id, WorkflowState::Submitted, &fx.farmer);
    fx.step(id, WorkflowState::PaymentPendingInitial, &fx.system);
    assert_eq!(fx.h.notifications.count(NotificationEvent::PaymentRequired), 1);
    let sent = fx.h.notifications.sent();
    let payment = sent
        .iter()
        .find(|n| n.event == NotificationEvent::PaymentRequired)
        .unwrap();
    assert_eq!(payment.payload["milestone"], "initial");
    assert_eq!(payment.payload["amount"], 5_000);
}

#[test]
fn background_mode_outside_runtime_runs_inline() {
    let fx = fixture_with(WorkflowConfig {
        side_effects: DispatchMode::Background,
        ..WorkflowConfig::default()
    });
    let id = fx.new_application(vec![]);
    fx.to_reviewing(id);
    let app = fx.h.engine.get_application(id).unwrap();
    assert!(app.assignments().reviewer.is_some());
    assert!(fx
        .h
        .payments
        .requests()
        .iter()
        .all(|r| r.milestone == PaymentReason::Initial));
}
