//! Two threads racing on one application: exactly one commit wins, the
//! loser sees `ConcurrentModification` and can retry against fresh state.

mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::fixture;
use gacp_workflow::{TransitionContext, WorkflowError, WorkflowState};

#[test]
fn racing_transitions_commit_once() {
    let fx = fixture();
    let engine = fx.h.engine.clone();

    for _ in 0..20 {
        let id = fx.new_application(vec![]);
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let engine = engine.clone();
                let barrier = Arc::clone(&barrier);
                let farmer = fx.farmer.clone();
                thread::spawn(move || {
                    barrier.wait();
                    engine.transition(id, WorkflowState::Submitted, &farmer, TransitionContext::new())
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let committed = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(committed, 1, "{results:?}");
        for result in &results {
            if let Err(err) = result {
                // The loser either lost the compare-and-set or loaded after
                // the winner committed and found no submit edge.
                assert!(
                    err.is_retryable() || matches!(err, WorkflowError::InvalidTransition { .. }),
                    "{err}"
                );
            }
        }
        let app = engine.get_application(id).unwrap();
        assert_eq!(app.state(), WorkflowState::Submitted);
        assert_eq!(app.history().len(), 1);
    }
}

#[test]
fn conflicting_payment_and_cancel_keep_history_consistent() {
    let fx = fixture();
    let id = fx.new_application(vec![]);
    fx.step(id, WorkflowState::Submitted, &fx.farmer);
    fx.step(id, WorkflowState::PaymentPendingInitial, &fx.system);

    let barrier = Arc::new(Barrier::new(2));
    let cancel = {
        let engine = fx.h.engine.clone();
        let farmer = fx.farmer.clone();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            engine.transition(id, WorkflowState::Cancelled, &farmer, TransitionContext::new())
        })
    };
    let request = {
        let engine = fx.h.engine.clone();
        let farmer = fx.farmer.clone();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            engine.request_payment(id, gacp_workflow::PaymentReason::Initial, &farmer)
        })
    };
    let cancel = cancel.join().unwrap();
    let request = request.join().unwrap();

    let app = fx.h.engine.get_application(id).unwrap();
    if let Err(err) = &cancel {
        assert!(err.is_retryable(), "{err}");
        assert_eq!(app.state(), WorkflowState::PaymentPendingInitial);
    } else {
        assert_eq!(app.state(), WorkflowState::Cancelled);
    }
    if request.is_ok() {
        assert_eq!(app.payments_for(gacp_workflow::PaymentReason::Initial).len(), 1);
    }
    let last = app.history().last().unwrap();
    assert_eq!(last.to_state, app.state());
}

#[test]
fn retry_after_conflict_succeeds() {
    let fx = fixture();
    let id = fx.new_application(vec![]);
    fx.step(id, WorkflowState::Submitted, &fx.farmer);

    let mut attempts = 0;
    let outcome = loop {
        attempts += 1;
        match fx.h.engine.transition(
            id,
            WorkflowState::PaymentPendingInitial,
            &fx.system,
            TransitionContext::new(),
        ) {
            Err(err) if err.is_retryable() && attempts < 3 => continue,
            other => break other,
        }
    };
    assert_eq!(outcome.unwrap().application.state(), WorkflowState::PaymentPendingInitial);
}
