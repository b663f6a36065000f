//! # Application Aggregate
//!
//! The certification application and the records it accumulates. Workflow
//! fields (state, history, counters, payments, reviews, audits, approval)
//! are readable by anyone but writable only inside this crate, so every
//! change flows through [`crate::engine::WorkflowEngine`].
//!
//! ## Invariants
//!
//! - `history` grows by exactly one entry per committed transition, and
//!   `history[i].to_state == history[i + 1].from_state`.
//! - `reviews[i].round == i + 1` and `audits[i].round == i + 1`.
//! - `approval` is written at most once.
//! - `version` increases on every persisted change and backs the
//!   repository's compare-and-set.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use gacp_core::{ActorId, ApplicationId, CertificateId, FeeMultiplier, StaffId, Timestamp};

use crate::actor::Role;
use crate::audit::AuditOutcome;
use crate::payment::{PaymentReason, PaymentRecord};
use crate::state::{Stage, WorkflowState};

// ─── Intake data ─────────────────────────────────────────────────────

/// A herb named on the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Herb {
    pub name: String,
    /// Category multiplier applied to fees (1.0–2.0).
    pub multiplier: FeeMultiplier,
    /// Controlled herbs force the special-license flag on the application.
    pub special_license_required: bool,
}

/// Reference to an uploaded document held by the document store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub document_type: String,
    /// Superseded or withdrawn uploads are inactive.
    pub active: bool,
    pub uploaded_at: Timestamp,
}

impl DocumentRef {
    pub fn active(document_type: impl Into<String>, uploaded_at: Timestamp) -> Self {
        Self {
            document_type: document_type.into(),
            active: true,
            uploaded_at,
        }
    }
}

// ─── Review / audit / approval records ───────────────────────────────

/// One scored checklist criterion (0–100).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub criterion: String,
    pub score: u8,
}

impl ChecklistItem {
    pub fn new(criterion: impl Into<String>, score: u8) -> Self {
        Self {
            criterion: criterion.into(),
            score,
        }
    }
}

/// Mean of the checklist scores, rounded half up. `None` for an empty list.
pub fn mean_score(items: &[ChecklistItem]) -> Option<u8> {
    if items.is_empty() {
        return None;
    }
    let total: u32 = items.iter().map(|i| u32::from(i.score)).sum();
    let count = items.len() as u32;
    let mean = (total * 2 + count) / (count * 2);
    u8::try_from(mean).ok()
}

/// The reviewer's stated decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

/// Effective review result after the pass-score threshold is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewResult {
    Approved,
    Rejected,
}

/// A completed document-review round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub round: u32,
    pub reviewer: ActorId,
    pub checklist: Vec<ChecklistItem>,
    pub overall_score: u8,
    pub decision: ReviewDecision,
    pub result: ReviewResult,
    pub comments: Option<String>,
    pub completed_at: Timestamp,
}

/// The auditor's stated result for an audit round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Pass,
    Fail,
    Doubt,
}

impl AuditResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Doubt => "doubt",
        }
    }
}

/// How an audit round was conducted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditMode {
    Online,
    Field,
}

/// A completed audit round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub round: u32,
    pub auditor: ActorId,
    pub mode: AuditMode,
    pub checklist: Vec<ChecklistItem>,
    pub overall_score: u8,
    pub result: AuditResult,
    /// Outcome after escalation thresholds are applied.
    pub outcome: AuditOutcome,
    pub comments: Option<String>,
    pub completed_at: Timestamp,
}

/// The approver's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Granted,
    Denied,
}

/// The single final-approval record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub approver: ActorId,
    pub decision: ApprovalDecision,
    pub comments: Option<String>,
    pub decided_at: Timestamp,
}

/// Certificate produced by the certificate issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedCertificate {
    pub certificate_id: CertificateId,
    pub path: String,
    pub issued_at: Timestamp,
}

// ─── Staff assignment ────────────────────────────────────────────────

/// Staff roles filled by the assignment service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaffRole {
    Reviewer,
    Auditor,
    Approver,
}

impl StaffRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reviewer => "reviewer",
            Self::Auditor => "auditor",
            Self::Approver => "approver",
        }
    }

    /// The workflow role a member of this staff role acts under.
    pub fn role(&self) -> Role {
        match self {
            Self::Reviewer => Role::Reviewer,
            Self::Auditor => Role::Auditor,
            Self::Approver => Role::Approver,
        }
    }

    /// The staff role behind a workflow role, if it is a staff role.
    pub fn for_role(role: Role) -> Option<StaffRole> {
        match role {
            Role::Reviewer => Some(Self::Reviewer),
            Role::Auditor => Some(Self::Auditor),
            Role::Approver => Some(Self::Approver),
            Role::Farmer | Role::Admin | Role::System => None,
        }
    }
}

impl std::fmt::Display for StaffRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Staff currently assigned to the application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignments {
    pub reviewer: Option<StaffId>,
    pub auditor: Option<StaffId>,
    pub approver: Option<StaffId>,
}

impl Assignments {
    pub fn get(&self, role: StaffRole) -> Option<&StaffId> {
        match role {
            StaffRole::Reviewer => self.reviewer.as_ref(),
            StaffRole::Auditor => self.auditor.as_ref(),
            StaffRole::Approver => self.approver.as_ref(),
        }
    }

    fn set(&mut self, role: StaffRole, staff: StaffId) {
        let slot = match role {
            StaffRole::Reviewer => &mut self.reviewer,
            StaffRole::Auditor => &mut self.auditor,
            StaffRole::Approver => &mut self.approver,
        };
        *slot = Some(staff);
    }
}

// ─── History ─────────────────────────────────────────────────────────

/// Whether a transition was requested directly or produced by recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionType {
    Primary,
    Alternative,
}

impl TransitionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Alternative => "alternative",
        }
    }
}

/// Immutable record of one committed transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowHistoryEntry {
    pub from_state: WorkflowState,
    pub to_state: WorkflowState,
    pub actor_id: ActorId,
    pub actor_role: Role,
    /// Trigger name, e.g. `approve_review` or `recover:no_staff_available`.
    pub action: String,
    pub comments: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub transition_type: TransitionType,
    pub timestamp: Timestamp,
}

// ─── Application ─────────────────────────────────────────────────────

/// A certification application and its full workflow record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    id: ApplicationId,
    farmer_id: ActorId,
    pub farm_name: String,
    herbs: Vec<Herb>,
    documents: Vec<DocumentRef>,
    created_at: Timestamp,
    submitted_at: Option<Timestamp>,
    current_state: WorkflowState,
    version: u64,
    rejection_count: u32,
    workflow_history: Vec<WorkflowHistoryEntry>,
    payments: BTreeMap<PaymentReason, Vec<PaymentRecord>>,
    reviews: Vec<ReviewRecord>,
    audits: Vec<AuditRecord>,
    approval: Option<Approval>,
    assignments: Assignments,
    certificate: Option<IssuedCertificate>,
}

impl Application {
    /// A fresh application in `draft`, as created by the intake service.
    pub fn new(farmer_id: ActorId, farm_name: impl Into<String>, created_at: Timestamp) -> Self {
        Self {
            id: ApplicationId::new(),
            farmer_id,
            farm_name: farm_name.into(),
            herbs: Vec::new(),
            documents: Vec::new(),
            created_at,
            submitted_at: None,
            current_state: WorkflowState::Draft,
            version: 0,
            rejection_count: 0,
            workflow_history: Vec::new(),
            payments: BTreeMap::new(),
            reviews: Vec::new(),
            audits: Vec::new(),
            approval: None,
            assignments: Assignments::default(),
            certificate: None,
        }
    }

    /// Add a herb at intake time.
    pub fn with_herb(mut self, herb: Herb) -> Self {
        self.herbs.push(herb);
        self
    }

    /// Attach an uploaded document at intake time.
    pub fn with_document(mut self, document: DocumentRef) -> Self {
        self.documents.push(document);
        self
    }

    pub fn id(&self) -> ApplicationId {
        self.id
    }

    pub fn farmer_id(&self) -> &ActorId {
        &self.farmer_id
    }

    pub fn herbs(&self) -> &[Herb] {
        &self.herbs
    }

    pub fn documents(&self) -> &[DocumentRef] {
        &self.documents
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn submitted_at(&self) -> Option<Timestamp> {
        self.submitted_at
    }

    pub fn state(&self) -> WorkflowState {
        self.current_state
    }

    /// Derived from the state; never stored.
    pub fn stage(&self) -> Stage {
        self.current_state.stage()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn rejection_count(&self) -> u32 {
        self.rejection_count
    }

    pub fn history(&self) -> &[WorkflowHistoryEntry] {
        &self.workflow_history
    }

    pub fn payments(&self) -> &BTreeMap<PaymentReason, Vec<PaymentRecord>> {
        &self.payments
    }

    pub fn payments_for(&self, reason: PaymentReason) -> &[PaymentRecord] {
        self.payments.get(&reason).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn reviews(&self) -> &[ReviewRecord] {
        &self.reviews
    }

    pub fn audits(&self) -> &[AuditRecord] {
        &self.audits
    }

    pub fn approval(&self) -> Option<&Approval> {
        self.approval.as_ref()
    }

    pub fn assignments(&self) -> &Assignments {
        &self.assignments
    }

    pub fn certificate(&self) -> Option<&IssuedCertificate> {
        self.certificate.as_ref()
    }

    /// Types of all active uploaded documents.
    pub fn active_document_types(&self) -> BTreeSet<&str> {
        self.documents
            .iter()
            .filter(|d| d.active)
            .map(|d| d.document_type.as_str())
            .collect()
    }

    /// Whether an approved review exists on record.
    pub fn has_approved_review(&self) -> bool {
        self.reviews.iter().any(|r| r.result == ReviewResult::Approved)
    }

    /// When the application entered its current state.
    pub fn entered_current_state_at(&self) -> Timestamp {
        self.workflow_history
            .last()
            .map(|e| e.timestamp)
            .unwrap_or(self.created_at)
    }

    pub(crate) fn next_review_round(&self) -> u32 {
        self.reviews.last().map(|r| r.round + 1).unwrap_or(1)
    }

    pub(crate) fn next_audit_round(&self) -> u32 {
        self.audits.last().map(|a| a.round + 1).unwrap_or(1)
    }

    // ── Crate-internal mutation ──────────────────────────────────────

    /// Append a history entry and move to its target state.
    pub(crate) fn apply_entry(&mut self, entry: WorkflowHistoryEntry) {
        if entry.to_state == WorkflowState::Submitted && self.submitted_at.is_none() {
            self.submitted_at = Some(entry.timestamp);
        }
        self.current_state = entry.to_state;
        self.workflow_history.push(entry);
    }

    pub(crate) fn push_payment(&mut self, record: PaymentRecord) {
        self.payments
            .entry(record.milestone_reason)
            .or_default()
            .push(record);
    }

    pub(crate) fn push_review(&mut self, record: ReviewRecord) {
        self.reviews.push(record);
    }

    pub(crate) fn push_audit(&mut self, record: AuditRecord) {
        self.audits.push(record);
    }

    pub(crate) fn set_approval(&mut self, approval: Approval) {
        self.approval = Some(approval);
    }

    pub(crate) fn assign(&mut self, role: StaffRole, staff: StaffId) {
        self.assignments.set(role, staff);
    }

    pub(crate) fn set_certificate(&mut self, certificate: IssuedCertificate) {
        self.certificate = Some(certificate);
    }

    pub(crate) fn set_documents(&mut self, documents: Vec<DocumentRef>) {
        self.documents = documents;
    }

    pub(crate) fn set_rejection_count(&mut self, count: u32) {
        self.rejection_count = count;
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }
}
