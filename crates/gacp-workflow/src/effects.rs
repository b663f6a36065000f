//! # Post-Commit Side Effects
//!
//! After a transition commits, the engine plans a list of side effects
//! (notifications, staff assignment, certificate generation) and hands
//! them to [`dispatch`]. Side effects are best-effort: a failure is logged
//! and counted, and the committed transition stands.

use gacp_core::Amount;

use crate::application::StaffRole;
use crate::config::DispatchMode;
use crate::payment::PaymentReason;
use crate::state::WorkflowState;

/// Metric counting side effects that failed after commit.
pub const SIDE_EFFECT_FAILURES: &str = "gacp_workflow_side_effect_failures_total";

/// One unit of post-commit work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    /// Tell the owning farmer the state changed.
    NotifyFarmer {
        from: WorkflowState,
        to: WorkflowState,
    },
    /// Tell the farmer a payment is now due.
    AnnouncePayment { milestone: PaymentReason, amount: Amount },
    /// Ask the assignment service for a staff member.
    AssignStaff(StaffRole),
    /// Generate and attach the certificate.
    IssueCertificate,
    /// Escalate to administrators.
    AlertAdministrators { reason: String },
}

impl SideEffect {
    /// Label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotifyFarmer { .. } => "notify_farmer",
            Self::AnnouncePayment { .. } => "announce_payment",
            Self::AssignStaff(_) => "assign_staff",
            Self::IssueCertificate => "issue_certificate",
            Self::AlertAdministrators { .. } => "alert_administrators",
        }
    }
}

/// The staff role filled on entry to `state`, if any.
pub fn staff_role_for(state: WorkflowState) -> Option<StaffRole> {
    match state {
        WorkflowState::Reviewing => Some(StaffRole::Reviewer),
        WorkflowState::AuditScheduled => Some(StaffRole::Auditor),
        WorkflowState::ApprovalPending => Some(StaffRole::Approver),
        _ => None,
    }
}

/// Side effects for a committed move from `from` to `to`. `payment_due`
/// is the fee now owed, when `to` awaits a milestone.
pub fn plan(
    from: WorkflowState,
    to: WorkflowState,
    payment_due: Option<(PaymentReason, Amount)>,
) -> Vec<SideEffect> {
    let mut effects = vec![SideEffect::NotifyFarmer { from, to }];
    if from == to {
        return effects;
    }
    if let Some((milestone, amount)) = payment_due {
        effects.push(SideEffect::AnnouncePayment { milestone, amount });
    }
    if let Some(role) = staff_role_for(to) {
        effects.push(SideEffect::AssignStaff(role));
    }
    if to == WorkflowState::CertificateIssued {
        effects.push(SideEffect::IssueCertificate);
    }
    effects
}

/// Run `job` according to `mode`.
///
/// `Background` uses the current tokio runtime's blocking pool and falls
/// back to running inline when called outside a runtime.
pub fn dispatch<F>(mode: DispatchMode, job: F)
where
    F: FnOnce() + Send + 'static,
{
    match mode {
        DispatchMode::Inline => job(),
        DispatchMode::Background => match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(job);
            }
            Err(_) => job(),
        },
    }
}

/// Log and count a failed side effect.
pub fn record_failure(effect: &SideEffect, application: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(
        application_id = %application,
        effect = effect.label(),
        error = %error,
        "side effect failed; transition remains committed"
    );
    metrics::counter!(SIDE_EFFECT_FAILURES, "effect" => effect.label()).increment(1);
}
