//! # Collaborator Ports
//!
//! Traits for the services the engine consumes but does not implement:
//! persistence, the payment gateway, notifications, staff assignment,
//! certificate generation and the clock. All are `Send + Sync` and shared
//! behind `Arc`, so one engine can serve many threads.
//!
//! In-memory implementations for tests and the CLI live in
//! [`crate::memory`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use gacp_core::{ActorId, Amount, ApplicationId, CertificateId, PaymentHandle, StaffId, Timestamp};

use crate::actor::Role;
use crate::application::{Application, StaffRole};
use crate::payment::{PaymentReason, PaymentStatus};
use crate::state::WorkflowState;

// ─── Errors ──────────────────────────────────────────────────────────

/// Errors from the application repository.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("application not found: {0}")]
    NotFound(ApplicationId),

    #[error("application already exists: {0}")]
    AlreadyExists(ApplicationId),

    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Errors from external collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// Transient failure; the call may succeed later.
    #[error("{service} unavailable: {reason}")]
    Unavailable {
        service: &'static str,
        reason: String,
    },

    /// The collaborator refused the request.
    #[error("{service} rejected the request: {reason}")]
    Rejected {
        service: &'static str,
        reason: String,
    },

    /// The assignment service has nobody free for the role.
    #[error("no {0} available")]
    NoneAvailable(StaffRole),
}

// ─── Repository ──────────────────────────────────────────────────────

/// What the caller observed at load time; the commit succeeds only if
/// the persisted application still matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitPrecondition {
    pub state: WorkflowState,
    pub version: u64,
}

impl CommitPrecondition {
    pub fn of(application: &Application) -> Self {
        Self {
            state: application.state(),
            version: application.version(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The persisted application no longer matches the precondition.
    Conflict {
        actual_state: WorkflowState,
        actual_version: u64,
    },
}

/// Persistent store of applications with compare-and-set commits.
pub trait ApplicationRepository: Send + Sync {
    fn load(&self, id: ApplicationId) -> Result<Application, RepositoryError>;

    fn insert(&self, application: Application) -> Result<(), RepositoryError>;

    /// Replace the stored application atomically if it still matches
    /// `expected`. State, history and records land together or not at all.
    fn commit(
        &self,
        expected: CommitPrecondition,
        application: Application,
    ) -> Result<CommitOutcome, RepositoryError>;
}

// ─── Payment gateway ─────────────────────────────────────────────────

pub trait PaymentGateway: Send + Sync {
    fn create_request(
        &self,
        milestone: PaymentReason,
        amount: Amount,
        application_id: ApplicationId,
    ) -> Result<PaymentHandle, CollaboratorError>;

    fn check_status(&self, handle: &PaymentHandle) -> Result<PaymentStatus, CollaboratorError>;
}

// ─── Notifications ───────────────────────────────────────────────────

/// Who a notification is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    Actor(ActorId),
    Role(Role),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    StateChanged,
    PaymentRequired,
    StaffAssigned,
    CertificateIssued,
    AdministratorAlert,
}

impl NotificationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StateChanged => "state_changed",
            Self::PaymentRequired => "payment_required",
            Self::StaffAssigned => "staff_assigned",
            Self::CertificateIssued => "certificate_issued",
            Self::AdministratorAlert => "administrator_alert",
        }
    }
}

/// Fire-and-forget notification channel.
pub trait NotificationService: Send + Sync {
    fn notify(
        &self,
        recipient: &Recipient,
        event: NotificationEvent,
        payload: &serde_json::Value,
    ) -> Result<(), CollaboratorError>;
}

// ─── Assignment ──────────────────────────────────────────────────────

/// Picks staff for an application. Returns
/// [`CollaboratorError::NoneAvailable`] when nobody is free.
pub trait AssignmentService: Send + Sync {
    fn assign(&self, application_id: ApplicationId, role: StaffRole) -> Result<StaffId, CollaboratorError>;

    fn assign_reviewer(&self, application_id: ApplicationId) -> Result<StaffId, CollaboratorError> {
        self.assign(application_id, StaffRole::Reviewer)
    }

    fn assign_auditor(&self, application_id: ApplicationId) -> Result<StaffId, CollaboratorError> {
        self.assign(application_id, StaffRole::Auditor)
    }

    fn assign_approver(&self, application_id: ApplicationId) -> Result<StaffId, CollaboratorError> {
        self.assign(application_id, StaffRole::Approver)
    }
}

// ─── Certificates ────────────────────────────────────────────────────

/// What the certificate issuer produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateArtifact {
    pub certificate_id: CertificateId,
    pub path: String,
}

pub trait CertificateIssuer: Send + Sync {
    fn generate(&self, application: &Application) -> Result<CertificateArtifact, CollaboratorError>;
}

// ─── Clock ───────────────────────────────────────────────────────────

/// Source of the current time for guards and history entries.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// The full set of collaborators an engine is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub repository: Arc<dyn ApplicationRepository>,
    pub payments: Arc<dyn PaymentGateway>,
    pub notifications: Arc<dyn NotificationService>,
    pub assignments: Arc<dyn AssignmentService>,
    pub certificates: Arc<dyn CertificateIssuer>,
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
