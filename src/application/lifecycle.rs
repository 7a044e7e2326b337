use super::authorization::{Action, authorize};
use crate::config::EngineConfig;
use crate::domain::actor::Actor;
use crate::domain::admission::{Admission, AdmissionStatus, OfferImportRow};
use crate::domain::application::{
    Application, ApplicationPatch, ApplicationStatus, NewApplication, format_application_number,
};
use crate::domain::ids::{AdmissionId, ApplicationId, ProgramId};
use crate::domain::ports::{
    Constraint, LedgerBatch, RecordKind, SharedClock, SharedLedger, StoreError,
};
use crate::domain::program::Program;
use crate::error::{AdmissionError, ImportIssue, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Result of an approval: the updated application and the offer it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Offer {
    pub application: Application,
    pub admission: Admission,
}

/// Outcome of one expiry sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub expired: Vec<Admission>,
    /// Overdue offers another writer settled first.
    pub skipped: usize,
}

/// Drives applications and admissions through their state machines.
///
/// Every transition is validated against the status transition tables, authorized, and
/// committed as one ledger batch. Stale writes from concurrent requests are retried
/// from a fresh read.
pub struct LifecycleEngine {
    ledger: SharedLedger,
    clock: SharedClock,
    config: EngineConfig,
}

impl LifecycleEngine {
    pub fn new(ledger: SharedLedger, clock: SharedClock, config: EngineConfig) -> Self {
        Self {
            ledger,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Opens a draft and assigns its application number.
    ///
    /// The number is `max(sequence in session) + 1`; when two drafts race for the same
    /// number the ledger's unique index rejects the loser, which reads again and retries.
    pub async fn create_application(
        &self,
        actor: &Actor,
        draft: NewApplication,
    ) -> Result<Application> {
        authorize(actor, Action::ApplicationCreate, &draft)?;
        self.load_program(draft.program_id).await?;

        let session = draft.session.trim().to_string();
        if session.is_empty() {
            return Err(AdmissionError::ValidationError(
                "admission session must not be empty".to_string(),
            ));
        }

        let id = ApplicationId::new();
        for attempt in 1..=self.config.number_attempts.max(1) {
            let sequence = self.ledger.next_application_sequence(&session).await?;
            let now = self.clock.now();
            let mut application = Application {
                id,
                applicant_id: draft.applicant_id,
                session: session.clone(),
                number: format_application_number(&self.config.number_prefix, &session, sequence),
                sequence,
                program_id: draft.program_id,
                profile: draft.profile.clone(),
                qualifications: draft.qualifications.clone(),
                status: ApplicationStatus::Draft,
                form_paid: false,
                admission_fee_paid: false,
                admin_notes: None,
                created_at: now,
                updated_at: now,
                version: 0,
            };

            match self
                .ledger
                .commit(LedgerBatch::new().put_application(application.clone()))
                .await
            {
                Ok(()) => {
                    application.version += 1;
                    tracing::info!(
                        application = %application.id,
                        number = %application.number,
                        applicant = %application.applicant_id,
                        "application draft created"
                    );
                    return Ok(application);
                }
                Err(StoreError::UniqueViolation(Constraint::ApplicationNumber)) => {
                    tracing::debug!(
                        session = %session,
                        sequence,
                        attempt,
                        "application number already claimed, retrying"
                    );
                }
                Err(StoreError::UniqueViolation(Constraint::ApplicantSession)) => {
                    return Err(AdmissionError::StateConflict(format!(
                        "applicant already has an application for session {session}"
                    )));
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(StoreError::UniqueViolation(Constraint::ApplicationNumber).into())
    }

    /// Applies an edit to a draft. Any other status is a `StateConflict`.
    pub async fn update_application(
        &self,
        actor: &Actor,
        id: ApplicationId,
        patch: ApplicationPatch,
    ) -> Result<Application> {
        retry_stale!(
            self.config.write_attempts,
            self.try_update_application(actor, id, patch.clone())
        )
    }

    async fn try_update_application(
        &self,
        actor: &Actor,
        id: ApplicationId,
        patch: ApplicationPatch,
    ) -> Result<Application> {
        let mut application = self.load_application(id).await?;
        authorize(actor, Action::ApplicationUpdate, &application)?;

        if !application.status.is_editable() {
            return Err(AdmissionError::StateConflict(format!(
                "application {} is {} and can no longer be edited",
                application.number, application.status
            )));
        }
        if let Some(program_id) = patch.program_id {
            if application.form_paid && program_id != application.program_id {
                return Err(AdmissionError::StateConflict(format!(
                    "form fee for {} was paid under its current program",
                    application.number
                )));
            }
            self.load_program(program_id).await?;
        }

        patch.apply(&mut application);
        application.updated_at = self.clock.now();
        self.save_application(application).await
    }

    /// `draft -> submitted`. Requires the form fee and every mandatory field.
    pub async fn submit_application(&self, actor: &Actor, id: ApplicationId) -> Result<Application> {
        retry_stale!(
            self.config.write_attempts,
            self.try_submit_application(actor, id)
        )
    }

    async fn try_submit_application(&self, actor: &Actor, id: ApplicationId) -> Result<Application> {
        let mut application = self.load_application(id).await?;
        authorize(actor, Action::ApplicationSubmit, &application)?;

        if application.status != ApplicationStatus::Draft {
            return Err(AdmissionError::StateConflict(format!(
                "application {} is {}, only drafts can be submitted",
                application.number, application.status
            )));
        }
        if !application.form_paid {
            return Err(AdmissionError::StateConflict(format!(
                "application form fee for {} has not been paid",
                application.number
            )));
        }
        let missing = application.missing_fields();
        if !missing.is_empty() {
            return Err(AdmissionError::IncompleteApplication(missing));
        }

        self.advance(&mut application, ApplicationStatus::Submitted)?;
        self.save_application(application).await
    }

    /// `submitted -> under_review`.
    pub async fn begin_review(&self, actor: &Actor, id: ApplicationId) -> Result<Application> {
        retry_stale!(self.config.write_attempts, self.try_begin_review(actor, id))
    }

    async fn try_begin_review(&self, actor: &Actor, id: ApplicationId) -> Result<Application> {
        let mut application = self.load_application(id).await?;
        authorize(actor, Action::ApplicationReview, &application)?;
        self.advance(&mut application, ApplicationStatus::UnderReview)?;
        self.save_application(application).await
    }

    /// `under_review -> approved`, creating the admission offer in the same batch.
    pub async fn approve_application(
        &self,
        actor: &Actor,
        id: ApplicationId,
        admin_notes: Option<String>,
    ) -> Result<Offer> {
        retry_stale!(
            self.config.write_attempts,
            self.try_approve_application(actor, id, admin_notes.clone())
        )
    }

    async fn try_approve_application(
        &self,
        actor: &Actor,
        id: ApplicationId,
        admin_notes: Option<String>,
    ) -> Result<Offer> {
        let mut application = self.load_application(id).await?;
        authorize(actor, Action::ApplicationDecide, &application)?;

        if self.has_active_admission(id).await? {
            return Err(AdmissionError::DuplicateOffer(id));
        }
        self.advance(&mut application, ApplicationStatus::Approved)?;
        if admin_notes.is_some() {
            application.admin_notes = admin_notes;
        }

        let program = self.load_program(application.program_id).await?;
        let now = self.clock.now();
        let deadline = self.default_deadline(now)?;
        let mut admission = self.build_offer(&application, &program, now, deadline);

        let batch = LedgerBatch::new()
            .put_application(application.clone())
            .put_admission(admission.clone());
        match self.ledger.commit(batch).await {
            Ok(()) => {}
            Err(StoreError::UniqueViolation(Constraint::ActiveAdmission)) => {
                return Err(AdmissionError::DuplicateOffer(id));
            }
            Err(err) => return Err(err.into()),
        }
        application.version += 1;
        admission.version += 1;

        tracing::info!(
            application = %application.id,
            admission = %admission.id,
            fee = %admission.acceptance_fee_amount,
            deadline = %admission.acceptance_deadline,
            "application approved, admission offered"
        );
        Ok(Offer {
            application,
            admission,
        })
    }

    /// `under_review -> rejected`.
    pub async fn reject_application(
        &self,
        actor: &Actor,
        id: ApplicationId,
        admin_notes: Option<String>,
    ) -> Result<Application> {
        retry_stale!(
            self.config.write_attempts,
            self.try_reject_application(actor, id, admin_notes.clone())
        )
    }

    async fn try_reject_application(
        &self,
        actor: &Actor,
        id: ApplicationId,
        admin_notes: Option<String>,
    ) -> Result<Application> {
        let mut application = self.load_application(id).await?;
        authorize(actor, Action::ApplicationDecide, &application)?;
        self.advance(&mut application, ApplicationStatus::Rejected)?;
        if admin_notes.is_some() {
            application.admin_notes = admin_notes;
        }
        self.save_application(application).await
    }

    /// `offered -> accepted`. The deadline is checked before the fee, so an overdue
    /// offer is always `OfferExpired`.
    pub async fn accept_offer(&self, actor: &Actor, id: AdmissionId) -> Result<Admission> {
        retry_stale!(self.config.write_attempts, self.try_accept_offer(actor, id))
    }

    async fn try_accept_offer(&self, actor: &Actor, id: AdmissionId) -> Result<Admission> {
        let mut admission = self.load_admission(id).await?;
        authorize(actor, Action::AdmissionAccept, &admission)?;

        let now = self.clock.now();
        self.check_admission_transition(&admission, AdmissionStatus::Accepted)?;
        if admission.is_overdue(now) {
            return Err(AdmissionError::OfferExpired(id));
        }
        if !admission.acceptance_fee_paid {
            return Err(AdmissionError::StateConflict(format!(
                "acceptance fee for admission {id} has not been paid"
            )));
        }

        self.advance_admission(&mut admission, AdmissionStatus::Accepted)?;
        admission.accepted_at = Some(now);
        let admission = self.save_admission(admission).await?;
        tracing::info!(admission = %admission.id, "admission offer accepted");
        Ok(admission)
    }

    /// `offered -> declined`, allowed at any point before acceptance.
    pub async fn decline_offer(&self, actor: &Actor, id: AdmissionId) -> Result<Admission> {
        retry_stale!(self.config.write_attempts, self.try_decline_offer(actor, id))
    }

    async fn try_decline_offer(&self, actor: &Actor, id: AdmissionId) -> Result<Admission> {
        let mut admission = self.load_admission(id).await?;
        authorize(actor, Action::AdmissionDecline, &admission)?;
        self.advance_admission(&mut admission, AdmissionStatus::Declined)?;

        let now = self.clock.now();
        admission.admission_rejected = true;
        admission.rejection_date = Some(now);
        let admission = self.save_admission(admission).await?;
        tracing::info!(admission = %admission.id, "admission offer declined");
        Ok(admission)
    }

    /// Moves every `offered` admission whose deadline passed before `now` to `expired`.
    ///
    /// Safe to run repeatedly and concurrently: each expiry is a compare-and-swap on the
    /// admission's version, and an offer that is no longer `offered` is skipped.
    pub async fn expire_overdue_offers(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let candidates = self
            .ledger
            .admissions_with_status(AdmissionStatus::Offered)
            .await?;

        let mut report = SweepReport::default();
        for candidate in candidates.into_iter().filter(|a| a.is_overdue(now)) {
            let expired = retry_stale!(
                self.config.write_attempts,
                self.try_expire(candidate.id, now)
            )?;
            match expired {
                Some(admission) => report.expired.push(admission),
                None => report.skipped += 1,
            }
        }

        tracing::info!(
            expired = report.expired.len(),
            skipped = report.skipped,
            now = %now,
            "offer expiry sweep finished"
        );
        Ok(report)
    }

    async fn try_expire(&self, id: AdmissionId, now: DateTime<Utc>) -> Result<Option<Admission>> {
        let mut admission = self.load_admission(id).await?;
        if !admission.status.can_transition_to(AdmissionStatus::Expired)
            || !admission.is_overdue(now)
        {
            return Ok(None);
        }
        self.advance_admission(&mut admission, AdmissionStatus::Expired)?;
        let admission = self.save_admission(admission).await?;
        tracing::debug!(admission = %admission.id, "admission offer expired");
        Ok(Some(admission))
    }

    /// Creates offers for a whole upload, or for none of it.
    ///
    /// Every row is validated first; a single issue rejects the import with the full
    /// list. Rows for applications still `under_review` are approved in the same batch.
    pub async fn import_offers(
        &self,
        actor: &Actor,
        rows: Vec<OfferImportRow>,
    ) -> Result<Vec<Admission>> {
        retry_stale!(
            self.config.write_attempts,
            self.try_import_offers(actor, &rows)
        )
    }

    async fn try_import_offers(
        &self,
        actor: &Actor,
        rows: &[OfferImportRow],
    ) -> Result<Vec<Admission>> {
        let now = self.clock.now();
        let mut issues = Vec::new();
        let mut seen = HashSet::new();
        let mut batch = LedgerBatch::new();
        let mut offers = Vec::new();

        for (index, row) in rows.iter().enumerate() {
            let issue = |text: &str| ImportIssue {
                row: index + 1,
                application_number: row.application_number.to_string(),
                issue: text.to_string(),
            };

            if !seen.insert(row.application_number.clone()) {
                issues.push(issue("application appears more than once in the upload"));
                continue;
            }
            let Some(mut application) = self
                .ledger
                .application_by_number(&row.application_number)
                .await?
            else {
                issues.push(issue("application not found"));
                continue;
            };
            authorize(actor, Action::AdmissionImport, &application)?;

            match application.status {
                ApplicationStatus::UnderReview => {
                    self.advance(&mut application, ApplicationStatus::Approved)?;
                    batch = batch.put_application(application.clone());
                }
                ApplicationStatus::Approved => {}
                other => {
                    issues.push(issue(&format!("application is {other}")));
                    continue;
                }
            }
            if self.has_active_admission(application.id).await? {
                issues.push(issue("application already has an active offer"));
                continue;
            }
            let deadline = match row.acceptance_deadline {
                Some(deadline) => deadline,
                None => self.default_deadline(now)?,
            };
            if deadline <= now {
                issues.push(issue("acceptance deadline is in the past"));
                continue;
            }
            let Some(program) = self.ledger.program(application.program_id).await? else {
                issues.push(issue("program not found"));
                continue;
            };

            let admission = self.build_offer(&application, &program, now, deadline);
            batch = batch.put_admission(admission.clone());
            offers.push(admission);
        }

        if !issues.is_empty() {
            tracing::warn!(
                rows = rows.len(),
                issues = issues.len(),
                "offer import rejected"
            );
            return Err(AdmissionError::ImportRejected(issues));
        }
        if batch.is_empty() {
            return Ok(offers);
        }

        match self.ledger.commit(batch).await {
            Ok(()) => {}
            Err(StoreError::UniqueViolation(Constraint::ActiveAdmission)) => {
                return Err(AdmissionError::StateConflict(
                    "an offer was created concurrently for an application in the upload"
                        .to_string(),
                ));
            }
            Err(err) => return Err(err.into()),
        }
        for offer in &mut offers {
            offer.version += 1;
        }

        tracing::info!(offers = offers.len(), "offer import committed");
        Ok(offers)
    }

    fn build_offer(
        &self,
        application: &Application,
        program: &Program,
        now: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Admission {
        Admission {
            id: AdmissionId::new(),
            application_id: application.id,
            applicant_id: application.applicant_id,
            program_id: program.id,
            status: AdmissionStatus::Offered,
            acceptance_fee_amount: self.config.fees.acceptance_fee(program),
            currency: self.config.fees.currency.clone(),
            offer_date: now,
            acceptance_deadline: deadline,
            accepted_at: None,
            acceptance_fee_paid: false,
            admission_rejected: false,
            rejection_date: None,
            version: 0,
        }
    }

    fn advance(&self, application: &mut Application, next: ApplicationStatus) -> Result<()> {
        if !application.status.can_transition_to(next) {
            return Err(AdmissionError::StateConflict(format!(
                "application {} cannot move from {} to {}",
                application.number, application.status, next
            )));
        }
        tracing::debug!(
            application = %application.id,
            from = %application.status,
            to = %next,
            "application transition"
        );
        application.status = next;
        application.updated_at = self.clock.now();
        Ok(())
    }

    fn default_deadline(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        now.checked_add_signed(self.config.acceptance_window)
            .ok_or_else(|| {
                AdmissionError::ValidationError(
                    "acceptance window runs past the supported date range".to_string(),
                )
            })
    }

    fn check_admission_transition(&self, admission: &Admission, next: AdmissionStatus) -> Result<()> {
        if admission.status.can_transition_to(next) {
            return Ok(());
        }
        match admission.status {
            AdmissionStatus::Expired => Err(AdmissionError::OfferExpired(admission.id)),
            current => Err(AdmissionError::StateConflict(format!(
                "admission {} cannot move from {} to {}",
                admission.id, current, next
            ))),
        }
    }

    fn advance_admission(&self, admission: &mut Admission, next: AdmissionStatus) -> Result<()> {
        self.check_admission_transition(admission, next)?;
        tracing::debug!(
            admission = %admission.id,
            from = %admission.status,
            to = %next,
            "admission transition"
        );
        admission.status = next;
        Ok(())
    }

    async fn has_active_admission(&self, id: ApplicationId) -> Result<bool> {
        Ok(self
            .ledger
            .admissions_for_application(id)
            .await?
            .iter()
            .any(|a| a.status.is_active()))
    }

    async fn save_application(&self, mut application: Application) -> Result<Application> {
        self.ledger
            .commit(LedgerBatch::new().put_application(application.clone()))
            .await?;
        application.version += 1;
        tracing::info!(
            application = %application.id,
            status = %application.status,
            "application saved"
        );
        Ok(application)
    }

    async fn save_admission(&self, mut admission: Admission) -> Result<Admission> {
        self.ledger
            .commit(LedgerBatch::new().put_admission(admission.clone()))
            .await?;
        admission.version += 1;
        Ok(admission)
    }

    async fn load_application(&self, id: ApplicationId) -> Result<Application> {
        self.ledger
            .application(id)
            .await?
            .ok_or_else(|| AdmissionError::not_found(RecordKind::Application, id))
    }

    async fn load_admission(&self, id: AdmissionId) -> Result<Admission> {
        self.ledger
            .admission(id)
            .await?
            .ok_or_else(|| AdmissionError::not_found(RecordKind::Admission, id))
    }

    async fn load_program(&self, id: ProgramId) -> Result<Program> {
        self.ledger
            .program(id)
            .await?
            .ok_or_else(|| AdmissionError::not_found(RecordKind::Program, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::authorization::permissions;
    use crate::domain::actor::{ActorKind, PermissionSet};
    use crate::domain::application::{ApplicantProfile, Qualification};
    use crate::domain::ids::{ApplicationNumber, UserId};
    use crate::domain::ports::{Clock, LedgerStore};
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::in_memory::InMemoryLedger;
    use chrono::{Duration, NaiveDate};
    use std::sync::Arc;

    struct Fixture {
        engine: LifecycleEngine,
        ledger: Arc<InMemoryLedger>,
        clock: ManualClock,
        program: Program,
        staff: Actor,
    }

    async fn fixture() -> Fixture {
        let ledger = Arc::new(InMemoryLedger::new());
        let clock = ManualClock::new(Utc::now());
        let program = Program::new("Computer Science");
        ledger.put_program(program.clone()).await.unwrap();
        let engine = LifecycleEngine::new(
            ledger.clone(),
            Arc::new(clock.clone()),
            EngineConfig::default(),
        );
        let staff = Actor::new(
            UserId::new(),
            ActorKind::Staff,
            [
                permissions::APPLICATION_REVIEW,
                permissions::APPLICATION_APPROVE,
                permissions::ADMISSION_UPLOAD,
            ]
            .into_iter()
            .collect::<PermissionSet>(),
        );
        Fixture {
            engine,
            ledger,
            clock,
            program,
            staff,
        }
    }

    fn new_application(applicant: UserId, program: ProgramId) -> NewApplication {
        NewApplication {
            applicant_id: applicant,
            session: "2025".to_string(),
            program_id: program,
            profile: ApplicantProfile {
                first_name: "Chidi".to_string(),
                last_name: "Okafor".to_string(),
                email: "chidi@example.com".to_string(),
                phone: "+2348011111111".to_string(),
                date_of_birth: NaiveDate::from_ymd_opt(2005, 6, 1),
                ..Default::default()
            },
            qualifications: vec![Qualification {
                institution: "Federal Government College".to_string(),
                certificate: "WAEC".to_string(),
                grade: None,
                year: 2023,
            }],
        }
    }

    /// Drives an application to `under_review`, paying the form fee directly.
    async fn under_review(fx: &Fixture) -> Application {
        let applicant = Actor::applicant(UserId::new());
        let app = fx
            .engine
            .create_application(&applicant, new_application(applicant.id, fx.program.id))
            .await
            .unwrap();
        let mut paid = fx.ledger.application(app.id).await.unwrap().unwrap();
        paid.form_paid = true;
        fx.ledger
            .commit(LedgerBatch::new().put_application(paid))
            .await
            .unwrap();
        fx.engine.submit_application(&applicant, app.id).await.unwrap();
        fx.engine.begin_review(&fx.staff, app.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_application_numbers_are_sequential_per_session() {
        let fx = fixture().await;
        let a = Actor::applicant(UserId::new());
        let b = Actor::applicant(UserId::new());

        let first = fx
            .engine
            .create_application(&a, new_application(a.id, fx.program.id))
            .await
            .unwrap();
        let second = fx
            .engine
            .create_application(&b, new_application(b.id, fx.program.id))
            .await
            .unwrap();

        assert_eq!(first.number.as_str(), "UNI/2025/000001");
        assert_eq!(second.number.as_str(), "UNI/2025/000002");
        assert_eq!(first.status, ApplicationStatus::Draft);
        assert!(!first.form_paid);
    }

    #[tokio::test]
    async fn test_concurrent_creation_yields_distinct_numbers() {
        let fx = Arc::new(fixture().await);
        let mut handles = Vec::new();
        for _ in 0..6 {
            let fx = fx.clone();
            handles.push(tokio::spawn(async move {
                let actor = Actor::applicant(UserId::new());
                fx.engine
                    .create_application(&actor, new_application(actor.id, fx.program.id))
                    .await
                    .unwrap()
                    .number
            }));
        }

        let mut numbers = HashSet::new();
        for handle in handles {
            assert!(numbers.insert(handle.await.unwrap()));
        }
        assert_eq!(numbers.len(), 6);
    }

    #[tokio::test]
    async fn test_one_application_per_session() {
        let fx = fixture().await;
        let applicant = Actor::applicant(UserId::new());
        fx.engine
            .create_application(&applicant, new_application(applicant.id, fx.program.id))
            .await
            .unwrap();

        let err = fx
            .engine
            .create_application(&applicant, new_application(applicant.id, fx.program.id))
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::StateConflict(_)));
    }

    #[tokio::test]
    async fn test_create_for_someone_else_is_unauthorized() {
        let fx = fixture().await;
        let intruder = Actor::applicant(UserId::new());
        let err = fx
            .engine
            .create_application(&intruder, new_application(UserId::new(), fx.program.id))
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn test_edits_only_while_draft() {
        let fx = fixture().await;
        let app = under_review(&fx).await;
        let owner = Actor::applicant(app.applicant_id);

        let err = fx
            .engine
            .update_application(&owner, app.id, ApplicationPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::StateConflict(_)));
    }

    #[tokio::test]
    async fn test_submit_requires_fields() {
        let fx = fixture().await;
        let applicant = Actor::applicant(UserId::new());
        let mut draft = new_application(applicant.id, fx.program.id);
        draft.qualifications.clear();
        let app = fx.engine.create_application(&applicant, draft).await.unwrap();

        let mut paid = fx.ledger.application(app.id).await.unwrap().unwrap();
        paid.form_paid = true;
        fx.ledger
            .commit(LedgerBatch::new().put_application(paid))
            .await
            .unwrap();

        let err = fx
            .engine
            .submit_application(&applicant, app.id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AdmissionError::IncompleteApplication(ref fields) if fields == &vec!["qualifications"]
        ));
    }

    #[tokio::test]
    async fn test_review_order_is_enforced() {
        let fx = fixture().await;
        let applicant = Actor::applicant(UserId::new());
        let app = fx
            .engine
            .create_application(&applicant, new_application(applicant.id, fx.program.id))
            .await
            .unwrap();

        let err = fx
            .engine
            .approve_application(&fx.staff, app.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::StateConflict(_)));
    }

    #[tokio::test]
    async fn test_approve_twice_is_duplicate_offer() {
        let fx = fixture().await;
        let app = under_review(&fx).await;

        let offer = fx
            .engine
            .approve_application(&fx.staff, app.id, Some("strong results".to_string()))
            .await
            .unwrap();
        assert_eq!(offer.application.status, ApplicationStatus::Approved);
        assert_eq!(offer.admission.status, AdmissionStatus::Offered);
        assert_eq!(
            offer.admission.acceptance_fee_amount,
            fx.engine.config().fees.acceptance_fee(&fx.program)
        );

        let err = fx
            .engine
            .approve_application(&fx.staff, app.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::DuplicateOffer(id) if id == app.id));
    }

    #[tokio::test]
    async fn test_reject_keeps_notes() {
        let fx = fixture().await;
        let app = under_review(&fx).await;
        let rejected = fx
            .engine
            .reject_application(&fx.staff, app.id, Some("incomplete results".to_string()))
            .await
            .unwrap();
        assert_eq!(rejected.status, ApplicationStatus::Rejected);
        assert_eq!(rejected.admin_notes.as_deref(), Some("incomplete results"));
    }

    #[tokio::test]
    async fn test_accept_requires_fee_and_deadline() {
        let fx = fixture().await;
        let app = under_review(&fx).await;
        let offer = fx
            .engine
            .approve_application(&fx.staff, app.id, None)
            .await
            .unwrap();
        let owner = Actor::applicant(app.applicant_id);

        let err = fx
            .engine
            .accept_offer(&owner, offer.admission.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::StateConflict(_)));

        let mut paid = fx.ledger.admission(offer.admission.id).await.unwrap().unwrap();
        paid.acceptance_fee_paid = true;
        fx.ledger
            .commit(LedgerBatch::new().put_admission(paid))
            .await
            .unwrap();

        fx.clock.advance(Duration::days(15));
        let err = fx
            .engine
            .accept_offer(&owner, offer.admission.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::OfferExpired(_)));
    }

    #[tokio::test]
    async fn test_decline_marks_rejection() {
        let fx = fixture().await;
        let app = under_review(&fx).await;
        let offer = fx
            .engine
            .approve_application(&fx.staff, app.id, None)
            .await
            .unwrap();
        let owner = Actor::applicant(app.applicant_id);

        let declined = fx
            .engine
            .decline_offer(&owner, offer.admission.id)
            .await
            .unwrap();
        assert_eq!(declined.status, AdmissionStatus::Declined);
        assert!(declined.admission_rejected);
        assert_eq!(declined.rejection_date, Some(fx.clock.now()));

        let err = fx
            .engine
            .accept_offer(&owner, offer.admission.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::StateConflict(_)));
    }

    #[tokio::test]
    async fn test_import_is_all_or_nothing() {
        let fx = fixture().await;
        let ready = under_review(&fx).await;

        let rows = vec![
            OfferImportRow {
                application_number: ready.number.clone(),
                acceptance_deadline: None,
            },
            OfferImportRow {
                application_number: ApplicationNumber::new("UNI/2025/999999"),
                acceptance_deadline: None,
            },
        ];
        let err = fx.engine.import_offers(&fx.staff, rows).await.unwrap_err();
        match err {
            AdmissionError::ImportRejected(issues) => {
                assert_eq!(issues.len(), 1);
                assert_eq!(issues[0].row, 2);
                assert_eq!(issues[0].issue, "application not found");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(
            fx.ledger
                .admissions_for_application(ready.id)
                .await
                .unwrap()
                .is_empty()
        );

        let offers = fx
            .engine
            .import_offers(
                &fx.staff,
                vec![OfferImportRow {
                    application_number: ready.number.clone(),
                    acceptance_deadline: Some(fx.clock.now() + Duration::days(30)),
                }],
            )
            .await
            .unwrap();
        assert_eq!(offers.len(), 1);
        let stored = fx.ledger.application(ready.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ApplicationStatus::Approved);
    }

    #[tokio::test]
    async fn test_import_flags_repeated_rows() {
        let fx = fixture().await;
        let ready = under_review(&fx).await;
        let row = OfferImportRow {
            application_number: ready.number.clone(),
            acceptance_deadline: None,
        };

        let err = fx
            .engine
            .import_offers(&fx.staff, vec![row.clone(), row])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AdmissionError::ImportRejected(ref issues)
                if issues.len() == 1 && issues[0].row == 2
        ));
    }

    #[tokio::test]
    async fn test_settled_offers_reject_further_transitions() {
        let fx = fixture().await;
        let owner_of = |app: &Application| Actor::applicant(app.applicant_id);

        let declined_app = under_review(&fx).await;
        let declined = fx
            .engine
            .approve_application(&fx.staff, declined_app.id, None)
            .await
            .unwrap()
            .admission;
        let declined = fx
            .engine
            .decline_offer(&owner_of(&declined_app), declined.id)
            .await
            .unwrap();
        let err = fx
            .engine
            .decline_offer(&owner_of(&declined_app), declined.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::StateConflict(_)));

        let accepted_app = under_review(&fx).await;
        let offered = fx
            .engine
            .approve_application(&fx.staff, accepted_app.id, None)
            .await
            .unwrap()
            .admission;
        let mut paid = fx.ledger.admission(offered.id).await.unwrap().unwrap();
        paid.acceptance_fee_paid = true;
        fx.ledger
            .commit(LedgerBatch::new().put_admission(paid))
            .await
            .unwrap();
        let accepted = fx
            .engine
            .accept_offer(&owner_of(&accepted_app), offered.id)
            .await
            .unwrap();
        let err = fx
            .engine
            .decline_offer(&owner_of(&accepted_app), accepted.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::StateConflict(_)));

        let report = fx
            .engine
            .expire_overdue_offers(fx.clock.now() + Duration::days(30))
            .await
            .unwrap();
        assert!(report.expired.is_empty());

        let stored = fx.ledger.admission(declined.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AdmissionStatus::Declined);
        assert_eq!(stored.version, declined.version);
        let stored = fx.ledger.admission(accepted.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AdmissionStatus::Accepted);
        assert_eq!(stored.version, accepted.version);
    }
}
