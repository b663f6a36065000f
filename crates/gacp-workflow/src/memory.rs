//! # In-Memory Collaborators
//!
//! Process-local implementations of every port in [`crate::ports`]. Used
//! by the CLI simulator and the integration tests; they keep enough
//! observable state (sent notifications, issued certificates, scripted
//! gateway outcomes) to assert on.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use gacp_core::{Amount, ApplicationId, CertificateId, PaymentHandle, StaffId, Timestamp};

use crate::actor::Actor;
use crate::application::{Application, StaffRole};
use crate::config::WorkflowConfig;
use crate::engine::WorkflowEngine;
use crate::error::WorkflowError;
use crate::payment::{PaymentReason, PaymentRecord, PaymentStatus};
use crate::ports::{
    ApplicationRepository, AssignmentService, CertificateArtifact, CertificateIssuer, Clock,
    CollaboratorError, Collaborators, CommitOutcome, CommitPrecondition, NotificationEvent,
    NotificationService, PaymentGateway, Recipient, RepositoryError,
};

// ─── Repository ──────────────────────────────────────────────────────

/// Applications keyed by id. The compare-and-set runs under the shard
/// lock of the entry, so concurrent commits to one application serialize.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    applications: DashMap<ApplicationId, Application>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.applications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
    }
}

impl ApplicationRepository for InMemoryRepository {
    fn load(&self, id: ApplicationId) -> Result<Application, RepositoryError> {
        self.applications
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(RepositoryError::NotFound(id))
    }

    fn insert(&self, application: Application) -> Result<(), RepositoryError> {
        match self.applications.entry(application.id()) {
            Entry::Occupied(_) => Err(RepositoryError::AlreadyExists(application.id())),
            Entry::Vacant(slot) => {
                slot.insert(application);
                Ok(())
            }
        }
    }

    fn commit(
        &self,
        expected: CommitPrecondition,
        application: Application,
    ) -> Result<CommitOutcome, RepositoryError> {
        let id = application.id();
        let mut stored = self
            .applications
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound(id))?;
        if stored.state() != expected.state || stored.version() != expected.version {
            return Ok(CommitOutcome::Conflict {
                actual_state: stored.state(),
                actual_version: stored.version(),
            });
        }
        *stored = application;
        Ok(CommitOutcome::Committed)
    }
}

// ─── Payment gateway ─────────────────────────────────────────────────

/// A payment request the mock gateway has seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayRequest {
    pub handle: PaymentHandle,
    pub application_id: ApplicationId,
    pub milestone: PaymentReason,
    pub amount: Amount,
}

/// Gateway whose request outcomes are scripted by the test.
///
/// Requests start `pending`; [`MockPaymentGateway::settle`] moves a
/// handle to its final status. [`MockPaymentGateway::fail_next`] makes
/// the next calls fail as if the gateway were down.
#[derive(Debug, Default)]
pub struct MockPaymentGateway {
    sequence: AtomicU64,
    outages: AtomicUsize,
    requests: Mutex<Vec<GatewayRequest>>,
    statuses: Mutex<HashMap<PaymentHandle, PaymentStatus>>,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `calls` gateway calls with `Unavailable`.
    pub fn fail_next(&self, calls: usize) {
        self.outages.store(calls, Ordering::SeqCst);
    }

    /// Set the status the gateway reports for `handle`.
    pub fn settle(&self, handle: &PaymentHandle, status: PaymentStatus) {
        self.statuses.lock().insert(handle.clone(), status);
    }

    pub fn requests(&self) -> Vec<GatewayRequest> {
        self.requests.lock().clone()
    }

    fn take_outage(&self) -> Result<(), CollaboratorError> {
        let consumed = self
            .outages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match consumed {
            Ok(_) => Err(CollaboratorError::Unavailable {
                service: "payment_gateway",
                reason: "scripted outage".to_string(),
            }),
            Err(_) => Ok(()),
        }
    }
}

impl PaymentGateway for MockPaymentGateway {
    fn create_request(
        &self,
        milestone: PaymentReason,
        amount: Amount,
        application_id: ApplicationId,
    ) -> Result<PaymentHandle, CollaboratorError> {
        self.take_outage()?;
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = PaymentHandle::new(format!("pay-{seq:06}")).map_err(|e| CollaboratorError::Rejected {
            service: "payment_gateway",
            reason: e.to_string(),
        })?;
        self.requests.lock().push(GatewayRequest {
            handle: handle.clone(),
            application_id,
            milestone,
            amount,
        });
        self.statuses.lock().insert(handle.clone(), PaymentStatus::Pending);
        Ok(handle)
    }

    fn check_status(&self, handle: &PaymentHandle) -> Result<PaymentStatus, CollaboratorError> {
        self.take_outage()?;
        self.statuses
            .lock()
            .get(handle)
            .copied()
            .ok_or_else(|| CollaboratorError::Rejected {
                service: "payment_gateway",
                reason: format!("unknown handle {handle}"),
            })
    }
}

// ─── Notifications ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub recipient: Recipient,
    pub event: NotificationEvent,
    pub payload: serde_json::Value,
}

/// Records every notification instead of delivering it.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
    failing: std::sync::atomic::AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent delivery fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().clone()
    }

    pub fn count(&self, event: NotificationEvent) -> usize {
        self.sent.lock().iter().filter(|n| n.event == event).count()
    }
}

impl NotificationService for RecordingNotifier {
    fn notify(
        &self,
        recipient: &Recipient,
        event: NotificationEvent,
        payload: &serde_json::Value,
    ) -> Result<(), CollaboratorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable {
                service: "notifications",
                reason: "delivery disabled".to_string(),
            });
        }
        self.sent.lock().push(SentNotification {
            recipient: recipient.clone(),
            event,
            payload: payload.clone(),
        });
        Ok(())
    }
}

// ─── Assignment ──────────────────────────────────────────────────────

/// Round-robin assignment over a fixed roster per role.
#[derive(Debug, Default)]
pub struct RosterAssignmentService {
    roster: RwLock<BTreeMap<StaffRole, Vec<StaffId>>>,
    cursor: Mutex<BTreeMap<StaffRole, usize>>,
}

impl RosterAssignmentService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the roster for `role`. An empty roster makes the role
    /// unassignable.
    pub fn set_roster(&self, role: StaffRole, staff: Vec<StaffId>) {
        self.roster.write().insert(role, staff);
    }

    pub fn with_staff(self, role: StaffRole, staff: Vec<StaffId>) -> Self {
        self.set_roster(role, staff);
        self
    }
}

impl AssignmentService for RosterAssignmentService {
    fn assign(&self, _application_id: ApplicationId, role: StaffRole) -> Result<StaffId, CollaboratorError> {
        let roster = self.roster.read();
        let staff = roster
            .get(&role)
            .filter(|s| !s.is_empty())
            .ok_or(CollaboratorError::NoneAvailable(role))?;
        let mut cursor = self.cursor.lock();
        let next = cursor.entry(role).or_insert(0);
        let picked = staff[*next % staff.len()].clone();
        *next += 1;
        Ok(picked)
    }
}

// ─── Certificates ────────────────────────────────────────────────────

/// Issues sequential certificate numbers without rendering anything.
#[derive(Debug, Default)]
pub struct InMemoryCertificateIssuer {
    sequence: AtomicU64,
    issued: Mutex<Vec<(ApplicationId, CertificateId)>>,
}

impl InMemoryCertificateIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issued(&self) -> Vec<(ApplicationId, CertificateId)> {
        self.issued.lock().clone()
    }
}

impl CertificateIssuer for InMemoryCertificateIssuer {
    fn generate(&self, application: &Application) -> Result<CertificateArtifact, CollaboratorError> {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let year = application.created_at().as_datetime().format("%Y");
        let certificate_id = CertificateId::new(format!("GACP-{year}-{seq:06}")).map_err(|e| {
            CollaboratorError::Rejected {
                service: "certificates",
                reason: e.to_string(),
            }
        })?;
        self.issued.lock().push((application.id(), certificate_id.clone()));
        Ok(CertificateArtifact {
            path: format!("certificates/{certificate_id}.pdf"),
            certificate_id,
        })
    }
}

// ─── Clock ───────────────────────────────────────────────────────────

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: Timestamp) {
        *self.now.lock() = now;
    }

    pub fn advance_days(&self, days: i64) {
        let mut now = self.now.lock();
        *now = now.plus_days(days);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}

// ─── Harness ─────────────────────────────────────────────────────────

/// An engine wired to in-memory collaborators, with handles on each so
/// callers can script and inspect them.
#[derive(Debug, Clone)]
pub struct InMemoryHarness {
    pub engine: WorkflowEngine,
    pub repository: Arc<InMemoryRepository>,
    pub payments: Arc<MockPaymentGateway>,
    pub notifications: Arc<RecordingNotifier>,
    pub assignments: Arc<RosterAssignmentService>,
    pub certificates: Arc<InMemoryCertificateIssuer>,
    pub clock: Arc<ManualClock>,
}

impl InMemoryHarness {
    /// Build a harness whose roster has one member per staff role.
    pub fn new(config: WorkflowConfig, start: Timestamp) -> Result<Self, WorkflowError> {
        let roster = [
            (StaffRole::Reviewer, "reviewer-1"),
            (StaffRole::Auditor, "auditor-1"),
            (StaffRole::Approver, "approver-1"),
        ];
        let assignments = RosterAssignmentService::new();
        for (role, name) in roster {
            assignments.set_roster(role, vec![StaffId::new(name)?]);
        }
        Self::with_assignments(config, start, assignments)
    }

    pub fn with_assignments(
        config: WorkflowConfig,
        start: Timestamp,
        assignments: RosterAssignmentService,
    ) -> Result<Self, WorkflowError> {
        let repository = Arc::new(InMemoryRepository::new());
        let payments = Arc::new(MockPaymentGateway::new());
        let notifications = Arc::new(RecordingNotifier::new());
        let assignments = Arc::new(assignments);
        let certificates = Arc::new(InMemoryCertificateIssuer::new());
        let clock = Arc::new(ManualClock::new(start));
        let engine = WorkflowEngine::new(
            config,
            Collaborators {
                repository: repository.clone(),
                payments: payments.clone(),
                notifications: notifications.clone(),
                assignments: assignments.clone(),
                certificates: certificates.clone(),
                clock: clock.clone(),
            },
        )?;
        Ok(Self {
            engine,
            repository,
            payments,
            notifications,
            assignments,
            certificates,
            clock,
        })
    }

    /// Request, settle as completed, and confirm the payment the current
    /// state awaits.
    pub fn pay(
        &self,
        id: ApplicationId,
        milestone: PaymentReason,
        actor: &Actor,
    ) -> Result<PaymentRecord, WorkflowError> {
        let requested = self.engine.request_payment(id, milestone, actor)?;
        let handle = requested
            .handle
            .ok_or_else(|| WorkflowError::System("gateway returned no handle".to_string()))?;
        self.payments.settle(&handle, PaymentStatus::Completed);
        self.engine.confirm_payment(id, &handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::WorkflowState;
    use gacp_core::ActorId;

    fn application() -> Application {
        Application::new(ActorId::new("farmer-1").unwrap(), "Mae Taeng Farm", Timestamp::now())
    }

    #[test]
    fn commit_rejects_stale_version() {
        let repo = InMemoryRepository::new();
        let app = application();
        let id = app.id();
        repo.insert(app.clone()).unwrap();

        let mut first = app.clone();
        first.bump_version();
        let expected = CommitPrecondition::of(&app);
        assert_eq!(repo.commit(expected, first).unwrap(), CommitOutcome::Committed);

        let mut second = app.clone();
        second.bump_version();
        assert_eq!(
            repo.commit(expected, second).unwrap(),
            CommitOutcome::Conflict {
                actual_state: WorkflowState::Draft,
                actual_version: 1
            }
        );
        assert_eq!(repo.load(id).unwrap().version(), 1);
    }

    #[test]
    fn duplicate_insert_refused() {
        let repo = InMemoryRepository::new();
        let app = application();
        repo.insert(app.clone()).unwrap();
        assert_eq!(repo.insert(app.clone()), Err(RepositoryError::AlreadyExists(app.id())));
        assert_eq!(repo.len(), 1);
    }

    #[test]
    fn gateway_outage_is_consumed() {
        let gateway = MockPaymentGateway::new();
        gateway.fail_next(1);
        let id = ApplicationId::new();
        assert!(gateway.create_request(PaymentReason::Initial, Amount(5_000), id).is_err());
        let handle = gateway.create_request(PaymentReason::Initial, Amount(5_000), id).unwrap();
        assert_eq!(gateway.check_status(&handle).unwrap(), PaymentStatus::Pending);
        gateway.settle(&handle, PaymentStatus::Completed);
        assert_eq!(gateway.check_status(&handle).unwrap(), PaymentStatus::Completed);
    }

    #[test]
    fn roster_rotates_and_empties() {
        let service = RosterAssignmentService::new().with_staff(
            StaffRole::Reviewer,
            vec![StaffId::new("r1").unwrap(), StaffId::new("r2").unwrap()],
        );
        let id = ApplicationId::new();
        assert_eq!(service.assign_reviewer(id).unwrap().as_str(), "r1");
        assert_eq!(service.assign_reviewer(id).unwrap().as_str(), "r2");
        assert_eq!(service.assign_reviewer(id).unwrap().as_str(), "r1");
        assert_eq!(
            service.assign_auditor(id),
            Err(CollaboratorError::NoneAvailable(StaffRole::Auditor))
        );
    }

    #[test]
    fn manual_clock_advances() {
        let start = Timestamp::parse("2026-03-01T00:00:00Z").unwrap();
        let clock = ManualClock::new(start);
        clock.advance_days(8);
        assert_eq!(clock.now(), start.plus_days(8));
    }
}
