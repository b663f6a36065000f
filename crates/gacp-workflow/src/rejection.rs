//! # Rejection Policy
//!
//! Routes a reviewer rejection by the number of rejections already on
//! record. With the default limits:
//!
//! | Count before rejection | Route | Next state |
//! |---:|---|---|
//! | 0, 1 | free resubmission | `revision_required` |
//! | 2 | paid resubmission (`3rd_review`) | `payment_pending_resubmission` |
//! | 3 | final | `rejected_final` |
//! | > 3 | `MaxRejectionsReached` | none |
//!
//! The counter is incremented once per rejection transition and is not
//! touched by resubmission.

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;
use crate::payment::PaymentReason;
use crate::state::WorkflowState;

/// Where a rejection sends the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionRoute {
    FreeResubmission,
    PaidResubmission,
    Final,
}

impl RejectionRoute {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FreeResubmission => "free_resubmission",
            Self::PaidResubmission => "paid_resubmission",
            Self::Final => "final",
        }
    }
}

/// Thresholds for the rejection counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RejectionPolicy {
    /// Rejections that may be followed by a free resubmission.
    pub free_resubmissions: u32,
    /// Rejection count at which the next rejection is final.
    pub max_rejections: u32,
}

impl Default for RejectionPolicy {
    fn default() -> Self {
        Self {
            free_resubmissions: 2,
            max_rejections: 3,
        }
    }
}

impl RejectionPolicy {
    /// Route a rejection given the counter value before it is incremented.
    pub fn route(&self, count: u32) -> Result<RejectionRoute, WorkflowError> {
        if count < self.free_resubmissions {
            Ok(RejectionRoute::FreeResubmission)
        } else if count < self.max_rejections {
            Ok(RejectionRoute::PaidResubmission)
        } else if count == self.max_rejections {
            Ok(RejectionRoute::Final)
        } else {
            Err(WorkflowError::MaxRejectionsReached {
                count,
                max: self.max_rejections,
            })
        }
    }

    pub fn target_state(route: RejectionRoute) -> WorkflowState {
        match route {
            RejectionRoute::FreeResubmission => WorkflowState::RevisionRequired,
            RejectionRoute::PaidResubmission => WorkflowState::PaymentPendingResubmission,
            RejectionRoute::Final => WorkflowState::RejectedFinal,
        }
    }

    /// The milestone a resubmission on this route must satisfy.
    pub fn resubmission_milestone(route: RejectionRoute) -> Option<PaymentReason> {
        match route {
            RejectionRoute::PaidResubmission => Some(PaymentReason::ThirdReview),
            RejectionRoute::FreeResubmission | RejectionRoute::Final => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_thresholds() {
        let policy = RejectionPolicy::default();
        assert_eq!(policy.route(0).unwrap(), RejectionRoute::FreeResubmission);
        assert_eq!(policy.route(1).unwrap(), RejectionRoute::FreeResubmission);
        assert_eq!(policy.route(2).unwrap(), RejectionRoute::PaidResubmission);
        assert_eq!(policy.route(3).unwrap(), RejectionRoute::Final);
        assert!(matches!(
            policy.route(4),
            Err(WorkflowError::MaxRejectionsReached { count: 4, max: 3 })
        ));
    }

    #[test]
    fn third_rejection_requires_resubmission_fee() {
        let route = RejectionPolicy::default().route(2).unwrap();
        assert_eq!(
            RejectionPolicy::target_state(route),
            WorkflowState::PaymentPendingResubmission
        );
        assert_eq!(
            RejectionPolicy::resubmission_milestone(route),
            Some(PaymentReason::ThirdReview)
        );
    }

    proptest! {
        #[test]
        fn routes_never_soften_as_count_grows(
            free in 0u32..5,
            extra in 0u32..5,
            count in 0u32..12,
        ) {
            let policy = RejectionPolicy { free_resubmissions: free, max_rejections: free + extra };
            let rank = |c: u32| match policy.route(c) {
                Ok(RejectionRoute::FreeResubmission) => 0,
                Ok(RejectionRoute::PaidResubmission) => 1,
                Ok(RejectionRoute::Final) => 2,
                Err(_) => 3,
            };
            prop_assert!(rank(count) <= rank(count + 1));
        }
    }
}
