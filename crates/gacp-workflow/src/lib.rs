//! # gacp-workflow — Certification Workflow Engine
//!
//! Drives a herbal-cultivation certification application from draft to an
//! issued certificate (or a terminal rejection or cancellation) through a
//! single canonical state machine.
//!
//! ## Components
//!
//! - **State catalogue** (`state.rs`): the 18 workflow states grouped into
//!   stages, with terminal and payment-awaiting classification.
//!
//! - **Transition table** (`table.rs`): declarative edges keyed by
//!   `(from, to)` with required role, guard, payment milestone and
//!   rejection-counter effect. Validated for reachability and dead ends
//!   before the engine accepts it.
//!
//! - **Guards** (`guard.rs`): a closed enum of named predicates evaluated
//!   through one exhaustive match. Unknown names fail at parse time.
//!
//! - **Payment gate** (`payment.rs`): fee computation from the herb
//!   multiplier and the completed-payment check per milestone and cycle.
//!
//! - **Policies** (`rejection.rs`, `audit.rs`): rejection routing (free,
//!   paid, final) and audit escalation (pass, fail, doubt).
//!
//! - **Alternative flows** (`alternative.rs`): recovery for operational
//!   failures such as gateway outages or missing staff.
//!
//! - **Engine** (`engine.rs`): the only mutating entry point. Commits with
//!   compare-and-set and dispatches side effects after the commit.
//!
//! ## Collaborators
//!
//! Persistence, payments, notifications, staff assignment, certificate
//! generation and the clock are traits in `ports.rs`. `memory.rs` provides
//! in-process implementations for tests and simulation.

pub mod actor;
pub mod alternative;
pub mod application;
pub mod audit;
pub mod config;
pub mod context;
pub mod effects;
pub mod engine;
pub mod error;
pub mod guard;
pub mod memory;
pub mod payment;
pub mod ports;
pub mod rejection;
pub mod state;
pub mod table;

// ─── Core model re-exports ──────────────────────────────────────────

pub use actor::{Actor, Role};
pub use application::{
    Application, Approval, ApprovalDecision, AuditMode, AuditRecord, AuditResult, ChecklistItem,
    DocumentRef, Herb, IssuedCertificate, ReviewDecision, ReviewRecord, ReviewResult, StaffRole,
    TransitionType, WorkflowHistoryEntry,
};
pub use state::{Stage, WorkflowState};

// ─── Policy re-exports ──────────────────────────────────────────────

pub use alternative::{AlternativeFlowResolver, FailureTrigger, RecoveryAction};
pub use audit::{AuditEscalationPolicy, AuditOutcome};
pub use guard::{GuardError, GuardEvaluator, GuardId};
pub use payment::{FeeSchedule, PaymentGate, PaymentReason, PaymentRecord, PaymentStatus};
pub use rejection::{RejectionPolicy, RejectionRoute};
pub use table::{TableError, TransitionSpec, TransitionTable};

// ─── Engine re-exports ──────────────────────────────────────────────

pub use config::{ConfigError, DispatchMode, WorkflowConfig};
pub use context::{ApprovalSubmission, AuditSubmission, ReviewSubmission, TransitionContext};
pub use engine::{ApplicationStatus, NextAction, PaymentRequirement, TransitionOutcome, WorkflowEngine};
pub use error::{BusinessRule, Condition, ErrorKind, WorkflowError};
pub use ports::{
    ApplicationRepository, AssignmentService, CertificateIssuer, Clock, CollaboratorError,
    Collaborators, NotificationService, PaymentGateway, RepositoryError, SystemClock,
};
