//! # Alternative Flows
//!
//! Recovery for operational failures that are not business decisions.
//! A trigger either comes from the caller ([`TransitionContext::failure_trigger`])
//! or is derived from the error a primary transition produced. The
//! resolver maps `(state, trigger)` to a recovery action using a small
//! declarative rule list.
//!
//! | States | Trigger | Recovery |
//! |--------|---------|----------|
//! | payment-awaiting | `payment_gateway_error` | retry in the same state |
//! | non-terminal | `no_staff_available` | retry in the same state |
//! | non-terminal | `system_downtime` | retry in the same state |
//! | `auditing`, `re_auditing` | `remote_audit_impossible` | force `audit_doubt` |
//!
//! Recovery actions are committed like ordinary transitions, tagged
//! `alternative` in history.
//!
//! [`TransitionContext::failure_trigger`]: crate::context::TransitionContext::failure_trigger

use crate::application::Application;
use crate::error::{Condition, WorkflowError};
use crate::payment::{PaymentGate, PaymentStatus};
use crate::state::WorkflowState;

/// An operational failure that may have a predefined recovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailureTrigger {
    PaymentGatewayError,
    NoStaffAvailable,
    SystemDowntime,
    RemoteAuditImpossible,
    /// Any other reported failure; never matched by a rule.
    Other(String),
}

impl FailureTrigger {
    pub fn as_str(&self) -> &str {
        match self {
            Self::PaymentGatewayError => "payment_gateway_error",
            Self::NoStaffAvailable => "no_staff_available",
            Self::SystemDowntime => "system_downtime",
            Self::RemoteAuditImpossible => "remote_audit_impossible",
            Self::Other(name) => name,
        }
    }

    /// Parse a trigger name; unknown names become [`FailureTrigger::Other`].
    pub fn parse(name: &str) -> Self {
        match name {
            "payment_gateway_error" => Self::PaymentGatewayError,
            "no_staff_available" => Self::NoStaffAvailable,
            "system_downtime" => Self::SystemDowntime,
            "remote_audit_impossible" => Self::RemoteAuditImpossible,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for FailureTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the engine should do to recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Record the failure and stay put so the operation can be retried.
    RetrySameState,
    /// Move to a specific state instead of the requested one.
    ForceState(WorkflowState),
}

#[derive(Debug, Clone, Copy)]
enum Scope {
    AwaitingPayment,
    NonTerminal,
    Only(&'static [WorkflowState]),
}

impl Scope {
    fn contains(&self, state: WorkflowState) -> bool {
        match self {
            Self::AwaitingPayment => state.awaited_milestone().is_some(),
            Self::NonTerminal => !state.is_terminal(),
            Self::Only(states) => states.contains(&state),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RecoveryRule {
    trigger: &'static str,
    scope: Scope,
    action: RecoveryAction,
}

const RULES: &[RecoveryRule] = &[
    RecoveryRule {
        trigger: "payment_gateway_error",
        scope: Scope::AwaitingPayment,
        action: RecoveryAction::RetrySameState,
    },
    RecoveryRule {
        trigger: "no_staff_available",
        scope: Scope::NonTerminal,
        action: RecoveryAction::RetrySameState,
    },
    RecoveryRule {
        trigger: "system_downtime",
        scope: Scope::NonTerminal,
        action: RecoveryAction::RetrySameState,
    },
    RecoveryRule {
        trigger: "remote_audit_impossible",
        scope: Scope::Only(&[WorkflowState::Auditing, WorkflowState::ReAuditing]),
        action: RecoveryAction::ForceState(WorkflowState::AuditDoubt),
    },
];

/// Maps failure triggers to recovery actions.
#[derive(Debug, Clone)]
pub struct AlternativeFlowResolver {
    gate: PaymentGate,
}

impl AlternativeFlowResolver {
    pub fn new(gate: PaymentGate) -> Self {
        Self { gate }
    }

    /// The recovery for `trigger` in `from`, or `None` if no rule matches.
    pub fn resolve(
        &self,
        _application: &Application,
        from: WorkflowState,
        trigger: &FailureTrigger,
    ) -> Option<RecoveryAction> {
        RULES
            .iter()
            .find(|rule| rule.trigger == trigger.as_str() && rule.scope.contains(from))
            .map(|rule| rule.action)
    }

    /// Infer a trigger from a failed primary transition.
    ///
    /// An unmet payment gate whose latest record for the current cycle
    /// is `failed` is read as a gateway error.
    pub fn derive_trigger(&self, application: &Application, error: &WorkflowError) -> Option<FailureTrigger> {
        match error {
            WorkflowError::ConditionNotMet {
                condition: Condition::Payment { milestone, .. },
                ..
            } => self
                .gate
                .latest_record(*milestone, application)
                .filter(|record| record.status == PaymentStatus::Failed)
                .map(|_| FailureTrigger::PaymentGatewayError),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::application_with_herbs;
    use crate::payment::{FeeSchedule, PaymentReason, PaymentRecord};
    use gacp_core::{Amount, Timestamp};

    fn resolver() -> AlternativeFlowResolver {
        AlternativeFlowResolver::new(PaymentGate::new(FeeSchedule::default()))
    }

    #[test]
    fn gateway_errors_retry_only_in_payment_states() {
        let app = application_with_herbs(vec![]);
        let r = resolver();
        assert_eq!(
            r.resolve(&app, WorkflowState::AuditPaymentPending, &FailureTrigger::PaymentGatewayError),
            Some(RecoveryAction::RetrySameState)
        );
        assert_eq!(
            r.resolve(&app, WorkflowState::Reviewing, &FailureTrigger::PaymentGatewayError),
            None
        );
    }

    #[test]
    fn remote_audit_impossible_forces_doubt() {
        let app = application_with_herbs(vec![]);
        let r = resolver();
        assert_eq!(
            r.resolve(&app, WorkflowState::ReAuditing, &FailureTrigger::RemoteAuditImpossible),
            Some(RecoveryAction::ForceState(WorkflowState::AuditDoubt))
        );
        assert_eq!(
            r.resolve(&app, WorkflowState::FieldAuditing, &FailureTrigger::RemoteAuditImpossible),
            None
        );
    }

    #[test]
    fn terminal_states_never_recover() {
        let app = application_with_herbs(vec![]);
        let r = resolver();
        for trigger in [FailureTrigger::NoStaffAvailable, FailureTrigger::SystemDowntime] {
            assert_eq!(r.resolve(&app, WorkflowState::Cancelled, &trigger), None);
            assert!(r.resolve(&app, WorkflowState::Reviewing, &trigger).is_some());
        }
    }

    #[test]
    fn unknown_trigger_is_unmatched() {
        let app = application_with_herbs(vec![]);
        let trigger = FailureTrigger::parse("printer_on_fire");
        assert_eq!(trigger, FailureTrigger::Other("printer_on_fire".into()));
        assert_eq!(resolver().resolve(&app, WorkflowState::Reviewing, &trigger), None);
    }

    #[test]
    fn failed_payment_derives_gateway_trigger() {
        let mut app = application_with_herbs(vec![]);
        let err = WorkflowError::ConditionNotMet {
            from: WorkflowState::PaymentPendingInitial,
            to: WorkflowState::Reviewing,
            condition: Condition::Payment {
                milestone: PaymentReason::Initial,
                cycle: 1,
            },
        };
        assert_eq!(resolver().derive_trigger(&app, &err), None);
        app.push_payment(PaymentRecord {
            milestone_reason: PaymentReason::Initial,
            cycle: 1,
            amount: Amount(5_000),
            status: PaymentStatus::Failed,
            handle: None,
            created_at: Timestamp::now(),
        });
        assert_eq!(
            resolver().derive_trigger(&app, &err),
            Some(FailureTrigger::PaymentGatewayError)
        );
    }
}
