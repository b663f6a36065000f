//! Per-call transition context: free-text comments, metadata copied into
//! the history entry, and the decision payload for review, audit and
//! approval edges.

use serde::{Deserialize, Serialize};

use crate::alternative::FailureTrigger;
use crate::application::{ApprovalDecision, AuditMode, AuditResult, ChecklistItem, ReviewDecision};

/// A reviewer's checklist and decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewSubmission {
    pub checklist: Vec<ChecklistItem>,
    pub decision: ReviewDecision,
    pub comments: Option<String>,
}

/// An auditor's checklist and stated result for one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSubmission {
    pub mode: AuditMode,
    pub checklist: Vec<ChecklistItem>,
    pub result: AuditResult,
    pub comments: Option<String>,
}

/// The approver's decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalSubmission {
    pub decision: ApprovalDecision,
    pub comments: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionContext {
    pub comments: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub review: Option<ReviewSubmission>,
    pub audit: Option<AuditSubmission>,
    pub approval: Option<ApprovalSubmission>,
    /// Operational failure reported by the caller, consulted for recovery.
    pub failure_trigger: Option<FailureTrigger>,
}

impl TransitionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = Some(comments.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_review(mut self, review: ReviewSubmission) -> Self {
        self.review = Some(review);
        self
    }

    pub fn with_audit(mut self, audit: AuditSubmission) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_approval(mut self, approval: ApprovalSubmission) -> Self {
        self.approval = Some(approval);
        self
    }

    pub fn with_trigger(mut self, trigger: FailureTrigger) -> Self {
        self.failure_trigger = Some(trigger);
        self
    }
}
