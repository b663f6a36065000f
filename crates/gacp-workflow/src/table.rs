//! # Transition Table
//!
//! The canonical workflow graph as declarative data. Every edge names the
//! role allowed to take it, an optional guard, an optional payment
//! milestone, the action recorded in history, and its effect on the
//! rejection counter.
//!
//! The table is built once per process ([`TransitionTable::canonical`]),
//! validated, and never mutated afterwards. A failed lookup is a value,
//! not an error: the engine turns `None` into `InvalidTransition`.
//!
//! Cancellation edges are generated, one per non-terminal state.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::OnceLock;

use thiserror::Error;

use crate::actor::Role;
use crate::guard::GuardId;
use crate::payment::PaymentReason;
use crate::state::WorkflowState;

/// How an edge changes the rejection counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterEffect {
    Unchanged,
    Increment,
    Reset,
}

impl CounterEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Increment => "increment",
            Self::Reset => "reset",
        }
    }
}

/// One directed edge of the workflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionSpec {
    pub from: WorkflowState,
    pub to: WorkflowState,
    /// `Role::System` means any role may trigger the edge.
    pub required_role: Role,
    pub guard: Option<GuardId>,
    pub milestone: Option<PaymentReason>,
    /// Trigger name written to history.
    pub action: &'static str,
    pub counter: CounterEffect,
}

const fn edge(
    from: WorkflowState,
    to: WorkflowState,
    required_role: Role,
    guard: Option<GuardId>,
    milestone: Option<PaymentReason>,
    action: &'static str,
    counter: CounterEffect,
) -> TransitionSpec {
    TransitionSpec {
        from,
        to,
        required_role,
        guard,
        milestone,
        action,
        counter,
    }
}

use CounterEffect::{Increment, Reset, Unchanged};
use WorkflowState as S;

/// Every edge except cancellation.
#[rustfmt::skip]
const CANONICAL_EDGES: &[TransitionSpec] = &[
    // Intake and document review
    edge(S::Draft, S::Submitted, Role::Farmer, Some(GuardId::HasRequiredDocuments), None, "submit", Unchanged),
    edge(S::Submitted, S::PaymentPendingInitial, Role::System, None, None, "request_review_payment", Unchanged),
    edge(S::PaymentPendingInitial, S::Reviewing, Role::System, None, Some(PaymentReason::Initial), "confirm_review_payment", Unchanged),
    edge(S::Reviewing, S::AuditPaymentPending, Role::Reviewer, Some(GuardId::ReviewApproved), None, "approve_review", Reset),
    edge(S::Reviewing, S::RevisionRequired, Role::Reviewer, Some(GuardId::ReviewRejectedFreeRetry), None, "reject_review", Increment),
    edge(S::Reviewing, S::PaymentPendingResubmission, Role::Reviewer, Some(GuardId::ReviewRejectedPaidRetry), None, "reject_review", Increment),
    edge(S::Reviewing, S::RejectedFinal, Role::Reviewer, Some(GuardId::ReviewRejectedFinal), None, "reject_review", Increment),
    edge(S::RevisionRequired, S::Reviewing, Role::Farmer, Some(GuardId::HasRequiredDocuments), None, "resubmit", Unchanged),
    edge(S::PaymentPendingResubmission, S::Reviewing, Role::Farmer, Some(GuardId::HasRequiredDocuments), Some(PaymentReason::ThirdReview), "resubmit", Unchanged),
    // Audit
    edge(S::AuditPaymentPending, S::AuditScheduled, Role::System, None, Some(PaymentReason::Audit), "schedule_audit", Unchanged),
    edge(S::AuditScheduled, S::Auditing, Role::Auditor, None, None, "start_audit", Unchanged),
    edge(S::Auditing, S::ApprovalPending, Role::Auditor, Some(GuardId::AuditPassed), None, "pass_audit", Unchanged),
    edge(S::Auditing, S::AuditFailed, Role::Auditor, Some(GuardId::AuditFailed), None, "fail_audit", Unchanged),
    edge(S::Auditing, S::AuditDoubt, Role::Auditor, Some(GuardId::AuditDoubtful), None, "flag_audit_doubt", Unchanged),
    edge(S::AuditFailed, S::ReAuditing, Role::System, None, Some(PaymentReason::AuditFail), "start_re_audit", Unchanged),
    edge(S::AuditFailed, S::RejectedFinal, Role::Admin, Some(GuardId::AuditRoundLimitReached), None, "close_after_re_audits", Unchanged),
    edge(S::ReAuditing, S::ApprovalPending, Role::Auditor, Some(GuardId::AuditPassed), None, "pass_audit", Unchanged),
    edge(S::ReAuditing, S::AuditFailed, Role::Auditor, Some(GuardId::AuditFailed), None, "fail_audit", Unchanged),
    edge(S::ReAuditing, S::AuditDoubt, Role::Auditor, Some(GuardId::AuditDoubtful), None, "flag_audit_doubt", Unchanged),
    edge(S::AuditDoubt, S::FieldAuditing, Role::System, None, Some(PaymentReason::FieldAudit), "start_field_audit", Unchanged),
    edge(S::FieldAuditing, S::ApprovalPending, Role::Auditor, Some(GuardId::AuditPassed), None, "pass_audit", Unchanged),
    edge(S::FieldAuditing, S::AuditFailed, Role::Auditor, Some(GuardId::AuditFailed), None, "fail_audit", Unchanged),
    edge(S::FieldAuditing, S::AuditDoubt, Role::Auditor, Some(GuardId::AuditDoubtful), None, "flag_audit_doubt", Unchanged),
    // Approval and issuance
    edge(S::ApprovalPending, S::Approved, Role::Approver, Some(GuardId::ApprovalGranted), None, "approve", Unchanged),
    edge(S::ApprovalPending, S::RejectedFinal, Role::Approver, Some(GuardId::ApprovalDenied), None, "deny_approval", Unchanged),
    edge(S::Approved, S::CertificateIssued, Role::System, None, None, "issue_certificate", Reset),
];

fn cancellation_edge(from: WorkflowState) -> TransitionSpec {
    edge(from, S::Cancelled, Role::System, Some(GuardId::MayCancel), None, "cancel", Reset)
}

// ─── Errors ──────────────────────────────────────────────────────────

/// Structural defects in a transition table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("duplicate edge {from} -> {to}")]
    DuplicateEdge { from: WorkflowState, to: WorkflowState },

    #[error("state {0} is unreachable from draft")]
    Unreachable(WorkflowState),

    #[error("terminal state {0} has outgoing edges")]
    TerminalHasEdges(WorkflowState),

    #[error("non-terminal state {0} has no outgoing edges")]
    DeadEnd(WorkflowState),

    #[error("state {0} cannot reach a terminal state")]
    NoTerminalPath(WorkflowState),

    #[error("milestone {milestone} on {from} -> {to}, but {from} does not await it")]
    MisplacedMilestone {
        from: WorkflowState,
        to: WorkflowState,
        milestone: PaymentReason,
    },
}

// ─── Table ───────────────────────────────────────────────────────────

/// Immutable edge catalogue keyed by `(from, to)`.
#[derive(Debug, Clone)]
pub struct TransitionTable {
    edges: BTreeMap<(WorkflowState, WorkflowState), TransitionSpec>,
}

impl TransitionTable {
    /// Build from a list of edges. Only duplicate `(from, to)` pairs are
    /// rejected here; call [`validate`](Self::validate) for the structural checks.
    pub fn from_specs(specs: impl IntoIterator<Item = TransitionSpec>) -> Result<Self, TableError> {
        let mut edges = BTreeMap::new();
        for spec in specs {
            if edges.insert((spec.from, spec.to), spec).is_some() {
                return Err(TableError::DuplicateEdge {
                    from: spec.from,
                    to: spec.to,
                });
            }
        }
        Ok(Self { edges })
    }

    /// Build and validate the canonical table.
    pub fn build_canonical() -> Result<Self, TableError> {
        let cancellations = WorkflowState::ALL
            .iter()
            .filter(|s| !s.is_terminal())
            .map(|s| cancellation_edge(*s));
        let table = Self::from_specs(CANONICAL_EDGES.iter().copied().chain(cancellations))?;
        table.validate()?;
        Ok(table)
    }

    /// The process-wide canonical table, built on first use.
    pub fn canonical() -> Result<&'static TransitionTable, TableError> {
        static CANONICAL: OnceLock<Result<TransitionTable, TableError>> = OnceLock::new();
        CANONICAL
            .get_or_init(Self::build_canonical)
            .as_ref()
            .map_err(Clone::clone)
    }

    pub fn lookup(&self, from: WorkflowState, to: WorkflowState) -> Option<&TransitionSpec> {
        self.edges.get(&(from, to))
    }

    /// Edges leaving `from`, in catalogue order of the target state.
    pub fn outgoing(&self, from: WorkflowState) -> impl Iterator<Item = &TransitionSpec> {
        self.edges
            .range((from, WorkflowState::Draft)..=(from, WorkflowState::Cancelled))
            .map(|(_, spec)| spec)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransitionSpec> {
        self.edges.values()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Structural validation.
    ///
    /// - every state is reachable from `draft`
    /// - terminal states have no outgoing edges
    /// - non-terminal states have at least one outgoing edge and a path to
    ///   a terminal state
    /// - milestones only appear on edges leaving a state that awaits them
    pub fn validate(&self) -> Result<(), TableError> {
        for spec in self.edges.values() {
            if let Some(milestone) = spec.milestone {
                if spec.from.awaited_milestone() != Some(milestone) {
                    return Err(TableError::MisplacedMilestone {
                        from: spec.from,
                        to: spec.to,
                        milestone,
                    });
                }
            }
        }

        for state in WorkflowState::ALL {
            let has_edges = self.outgoing(state).next().is_some();
            if state.is_terminal() && has_edges {
                return Err(TableError::TerminalHasEdges(state));
            }
            if !state.is_terminal() && !has_edges {
                return Err(TableError::DeadEnd(state));
            }
        }

        let reachable = self.reachable_from(WorkflowState::Draft);
        if let Some(state) = WorkflowState::ALL.iter().find(|s| !reachable.contains(s)) {
            return Err(TableError::Unreachable(*state));
        }

        for state in WorkflowState::ALL.iter().filter(|s| !s.is_terminal()) {
            if !self.reachable_from(*state).iter().any(|s| s.is_terminal()) {
                return Err(TableError::NoTerminalPath(*state));
            }
        }
        Ok(())
    }

    fn reachable_from(&self, start: WorkflowState) -> BTreeSet<WorkflowState> {
        let mut seen = BTreeSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(state) = queue.pop_front() {
            for spec in self.outgoing(state) {
                if seen.insert(spec.to) {
                    queue.push_back(spec.to);
                }
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_table_is_valid() {
        let table = TransitionTable::canonical().unwrap();
        let non_terminal = WorkflowState::ALL.iter().filter(|s| !s.is_terminal()).count();
        assert_eq!(table.len(), CANONICAL_EDGES.len() + non_terminal);
    }

    #[test]
    fn lookup_hits_and_misses() {
        let table = TransitionTable::canonical().unwrap();
        let spec = table
            .lookup(WorkflowState::Draft, WorkflowState::Submitted)
            .unwrap();
        assert_eq!(spec.required_role, Role::Farmer);
        assert_eq!(spec.guard, Some(GuardId::HasRequiredDocuments));
        assert!(table
            .lookup(WorkflowState::Draft, WorkflowState::Approved)
            .is_none());
    }

    #[test]
    fn paid_resubmission_requires_third_review_fee() {
        let table = TransitionTable::canonical().unwrap();
        let spec = table
            .lookup(WorkflowState::PaymentPendingResubmission, WorkflowState::Reviewing)
            .unwrap();
        assert_eq!(spec.milestone, Some(PaymentReason::ThirdReview));
        assert_eq!(spec.counter, CounterEffect::Unchanged);
    }

    #[test]
    fn only_rejections_increment() {
        let table = TransitionTable::canonical().unwrap();
        for spec in table.iter().filter(|s| s.counter == CounterEffect::Increment) {
            assert_eq!(spec.from, WorkflowState::Reviewing);
            assert_eq!(spec.action, "reject_review");
        }
    }

    #[test]
    fn every_non_terminal_state_can_cancel() {
        let table = TransitionTable::canonical().unwrap();
        for state in WorkflowState::ALL {
            let edge = table.lookup(state, WorkflowState::Cancelled);
            assert_eq!(edge.is_some(), !state.is_terminal(), "{state}");
        }
    }

    #[test]
    fn outgoing_is_scoped_to_source() {
        let table = TransitionTable::canonical().unwrap();
        let targets: Vec<_> = table.outgoing(WorkflowState::Auditing).map(|s| s.to).collect();
        assert_eq!(
            targets,
            vec![
                WorkflowState::AuditFailed,
                WorkflowState::AuditDoubt,
                WorkflowState::ApprovalPending,
                WorkflowState::Cancelled,
            ]
        );
    }

    #[test]
    fn duplicate_edges_rejected() {
        let spec = CANONICAL_EDGES[0];
        assert_eq!(
            TransitionTable::from_specs([spec, spec]).unwrap_err(),
            TableError::DuplicateEdge {
                from: spec.from,
                to: spec.to
            }
        );
    }

    #[test]
    fn validation_catches_dead_ends_and_misplaced_milestones() {
        let truncated = TransitionTable::from_specs(CANONICAL_EDGES.iter().copied().filter(|s| {
            s.from != WorkflowState::Approved
        }))
        .unwrap();
        assert_eq!(truncated.validate(), Err(TableError::DeadEnd(WorkflowState::Approved)));

        let mut specs: Vec<_> = CANONICAL_EDGES.to_vec();
        specs[0].milestone = Some(PaymentReason::Audit);
        let table = TransitionTable::from_specs(specs).unwrap();
        assert!(matches!(
            table.validate(),
            Err(TableError::MisplacedMilestone { from: WorkflowState::Draft, .. })
        ));
    }

    #[test]
    fn validation_catches_unreachable_states() {
        let cancellations = WorkflowState::ALL
            .iter()
            .filter(|s| !s.is_terminal())
            .map(|s| cancellation_edge(*s));
        let table = TransitionTable::from_specs(
            CANONICAL_EDGES
                .iter()
                .copied()
                .chain(cancellations)
                .filter(|s| s.to != WorkflowState::FieldAuditing),
        )
        .unwrap();
        assert_eq!(
            table.validate(),
            Err(TableError::Unreachable(WorkflowState::FieldAuditing))
        );
    }
}
