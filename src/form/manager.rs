//! SessionManager: owns every in-progress form and drives it with the
//! record store and the photo store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::input::{Button, Intent};
use super::model::SubmitterIdentity;
use super::prompts;
use super::state::{FormSession, FormStep, StepOutcome};
use crate::channels::{Keyboard, OutgoingResponse};
use crate::error::{MalformedInput, SubmissionError};
use crate::photos::PhotoStore;
use crate::store::RecordStore;

/// One submitter's slot; `None` when no form is in progress.
type Slot = Arc<Mutex<Option<FormSession>>>;

/// Keyed by submitter id. Each slot is locked for the whole handling of one
/// event, so a submitter's session never runs twice in parallel.
pub struct SessionManager {
    store: Arc<dyn RecordStore>,
    photos: Option<Arc<PhotoStore>>,
    slots: RwLock<HashMap<i64, Slot>>,
}

impl SessionManager {
    /// `photos = None` removes the photo step from the form.
    pub fn new(store: Arc<dyn RecordStore>, photos: Option<Arc<PhotoStore>>) -> Self {
        Self {
            store,
            photos,
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Handle one inbound event for `submitter` and return the replies.
    pub async fn handle(
        &self,
        submitter: &SubmitterIdentity,
        intent: &Intent,
    ) -> Vec<OutgoingResponse> {
        let slot = self.slot(submitter.id).await;
        let mut guard = slot.lock().await;

        let (next, replies) = match guard.take() {
            None => self.handle_idle(submitter, intent).await,
            Some(session) => self.handle_active(session, submitter, intent).await,
        };
        *guard = next;
        replies
    }

    /// Whether `submitter_id` has a form in progress.
    pub async fn has_session(&self, submitter_id: i64) -> bool {
        let slot = self.slots.read().await.get(&submitter_id).cloned();
        match slot {
            Some(slot) => slot.lock().await.is_some(),
            None => false,
        }
    }

    /// Drop `submitter_id`'s form, if any. Returns whether one was dropped.
    pub async fn cancel(&self, submitter_id: i64) -> bool {
        let Some(slot) = self.slots.read().await.get(&submitter_id).cloned() else {
            return false;
        };
        let cancelled = slot.lock().await.take().is_some();
        if cancelled {
            debug!(submitter_id, "Form session cancelled");
        }
        cancelled
    }

    /// Current step of `submitter_id`'s form, if any.
    pub async fn current_step(&self, submitter_id: i64) -> Option<FormStep> {
        let slot = self.slots.read().await.get(&submitter_id).cloned()?;
        let guard = slot.lock().await;
        guard.as_ref().map(|s| s.step)
    }

    /// Number of forms in progress. Slots busy handling an event count as
    /// active.
    pub async fn active_count(&self) -> usize {
        self.slots
            .read()
            .await
            .values()
            .filter(|slot| slot.try_lock().map(|g| g.is_some()).unwrap_or(true))
            .count()
    }

    /// Drop sessions idle for at least `max_idle`, and the empty slots no
    /// one is using. Returns how many sessions expired.
    pub async fn expire_idle(&self, max_idle: Duration) -> usize {
        let mut slots = self.slots.write().await;
        let mut expired = 0;
        slots.retain(|submitter_id, slot| {
            let Ok(mut guard) = slot.try_lock() else {
                return true;
            };
            if guard
                .as_ref()
                .is_some_and(|s| s.last_activity.elapsed() >= max_idle)
            {
                *guard = None;
                expired += 1;
                debug!(submitter_id, "Idle session expired");
            }
            guard.is_some() || Arc::strong_count(slot) > 1
        });
        if expired > 0 {
            info!(expired, remaining = slots.len(), "Expired idle sessions");
        }
        expired
    }

    async fn slot(&self, submitter_id: i64) -> Slot {
        if let Some(slot) = self.slots.read().await.get(&submitter_id) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().await;
        Arc::clone(slots.entry(submitter_id).or_default())
    }

    /// No form in progress: show data, or open a form behind the entry gate.
    async fn handle_idle(
        &self,
        submitter: &SubmitterIdentity,
        intent: &Intent,
    ) -> (Option<FormSession>, Vec<OutgoingResponse>) {
        match intent {
            Intent::Button(Button::ViewMyData) => (None, vec![self.view_my_data(submitter.id).await]),
            Intent::Contact { .. } => {
                let (session, mut replies) = self.open(submitter).await;
                let Some(mut session) = session else {
                    return (None, replies);
                };
                replies.clear();
                match session.apply(submitter, intent) {
                    Ok(StepOutcome::Advanced(step)) => {
                        replies.push(prompts::step_prompt(step, &session.draft));
                    }
                    Ok(_) | Err(_) => {
                        replies.push(prompts::step_prompt(session.step, &session.draft));
                    }
                }
                (Some(session), replies)
            }
            _ => {
                let (session, mut replies) = self.open(submitter).await;
                if session.is_some() && *intent == Intent::Start {
                    replies.insert(0, OutgoingResponse::text(prompts::WELCOME));
                }
                (session, replies)
            }
        }
    }

    async fn handle_active(
        &self,
        mut session: FormSession,
        submitter: &SubmitterIdentity,
        intent: &Intent,
    ) -> (Option<FormSession>, Vec<OutgoingResponse>) {
        let outcome = match session.apply(submitter, intent) {
            Ok(outcome) => outcome,
            Err(malformed) => return self.reset(submitter, malformed).await,
        };

        match outcome {
            StepOutcome::Advanced(step) => {
                debug!(submitter_id = submitter.id, %step, "Form advanced");
                let reply = prompts::step_prompt(step, &session.draft);
                (Some(session), vec![reply])
            }
            StepOutcome::Restarted => {
                info!(submitter_id = submitter.id, "Form restarted from institution type");
                (Some(session), vec![prompts::restart_prompt()])
            }
            StepOutcome::PhotoReceived { file_id } => {
                self.receive_photo(session, submitter, &file_id).await
            }
            StepOutcome::ConfirmRequested => self.confirm(session, submitter).await,
        }
    }

    async fn receive_photo(
        &self,
        mut session: FormSession,
        submitter: &SubmitterIdentity,
        file_id: &str,
    ) -> (Option<FormSession>, Vec<OutgoingResponse>) {
        let Some(photos) = &self.photos else {
            let malformed = MalformedInput {
                step: session.step,
                input: "photo".into(),
            };
            return self.reset(submitter, malformed).await;
        };

        let reference = match photos.ingest(submitter.id, file_id).await {
            Ok(reference) => reference,
            Err(e) => {
                warn!(submitter_id = submitter.id, file_id, "Photo ingest failed: {e}");
                let retry = OutgoingResponse::text(prompts::PHOTO_RETRY)
                    .with_keyboard(Keyboard::Photo);
                return (Some(session), vec![retry]);
            }
        };

        match session.attach_photo(reference) {
            Ok(step) => {
                let reply = prompts::step_prompt(step, &session.draft);
                (Some(session), vec![reply])
            }
            Err(malformed) => self.reset(submitter, malformed).await,
        }
    }

    /// Persist the draft. Exactly one terminal acknowledgment is returned.
    async fn confirm(
        &self,
        session: FormSession,
        submitter: &SubmitterIdentity,
    ) -> (Option<FormSession>, Vec<OutgoingResponse>) {
        match self.store.save(&session.draft).await {
            Ok(record) => (None, prompts::saved(&record)),
            Err(SubmissionError::Duplicate { remaining, .. }) => {
                (None, vec![prompts::cooldown_message(remaining)])
            }
            Err(SubmissionError::Incomplete { field }) => {
                let malformed = MalformedInput {
                    step: session.step,
                    input: format!("confirmation without {field}"),
                };
                self.reset(submitter, malformed).await
            }
            Err(SubmissionError::Storage(e)) => {
                error!(submitter_id = submitter.id, "Saving record failed: {e}");
                let retry = OutgoingResponse::text(prompts::SAVE_FAILED)
                    .with_keyboard(Keyboard::Confirmation);
                (Some(session), vec![retry])
            }
        }
    }

    /// Discard the current form and start a new one behind the entry gate.
    async fn reset(
        &self,
        submitter: &SubmitterIdentity,
        malformed: MalformedInput,
    ) -> (Option<FormSession>, Vec<OutgoingResponse>) {
        warn!(
            submitter_id = submitter.id,
            step = %malformed.step,
            input = %malformed.input,
            "Unexpected input, restarting form"
        );
        let (session, mut replies) = self.open(submitter).await;
        replies.insert(0, OutgoingResponse::text(prompts::START_OVER));
        (session, replies)
    }

    /// Entry gate: a new form only when the cooldown allows it.
    async fn open(
        &self,
        submitter: &SubmitterIdentity,
    ) -> (Option<FormSession>, Vec<OutgoingResponse>) {
        match self.store.cooldown_remaining(submitter.id).await {
            Ok(None) => {
                let session = FormSession::new(submitter, self.photos.is_some());
                info!(submitter_id = submitter.id, "Form session opened");
                let reply = prompts::step_prompt(session.step, &session.draft);
                (Some(session), vec![reply])
            }
            Ok(Some(remaining)) => {
                info!(
                    submitter_id = submitter.id,
                    remaining_secs = remaining.as_secs(),
                    "Entry blocked by cooldown"
                );
                (None, vec![prompts::cooldown_message(remaining)])
            }
            Err(e) => {
                error!(submitter_id = submitter.id, "Cooldown check failed: {e}");
                (None, vec![OutgoingResponse::text(prompts::UNAVAILABLE)])
            }
        }
    }

    async fn view_my_data(&self, submitter_id: i64) -> OutgoingResponse {
        match self.store.get_latest(submitter_id).await {
            Ok(record) => prompts::my_data(record.as_ref()),
            Err(e) => {
                error!(submitter_id, "Loading latest record failed: {e}");
                OutgoingResponse::text(prompts::UNAVAILABLE)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DatabaseError;
    use crate::form::model::{Draft, InstitutionCategory, Record};
    use crate::store::{LibSqlBackend, SnapshotHandle};
    use async_trait::async_trait;

    fn ann() -> SubmitterIdentity {
        SubmitterIdentity::from_parts(42, Some("Ann"), None, Some("ann"))
    }

    fn form_inputs() -> Vec<Intent> {
        vec![
            Intent::Contact {
                phone_number: "+100200300".into(),
            },
            Intent::Button(Button::Category(InstitutionCategory::School)),
            Intent::Text("School No.12".into()),
            Intent::Text("1 Main St".into()),
            Intent::Text("near market".into()),
            Intent::Location {
                latitude: 10.0,
                longitude: 20.0,
            },
        ]
    }

    async fn manager() -> SessionManager {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        SessionManager::new(store, None)
    }

    async fn fill(manager: &SessionManager, who: &SubmitterIdentity) {
        manager.handle(who, &Intent::Start).await;
        for intent in form_inputs() {
            manager.handle(who, &intent).await;
        }
    }

    /// Store whose writes always fail.
    struct BrokenStore;

    #[async_trait]
    impl RecordStore for BrokenStore {
        async fn cooldown_remaining(
            &self,
            _submitter_id: i64,
        ) -> Result<Option<Duration>, DatabaseError> {
            Ok(None)
        }
        async fn save(&self, _draft: &Draft) -> Result<Record, SubmissionError> {
            Err(DatabaseError::Query("disk full".into()).into())
        }
        async fn get_latest(&self, _submitter_id: i64) -> Result<Option<Record>, DatabaseError> {
            Ok(None)
        }
        async fn get_all(&self) -> Result<Vec<Record>, DatabaseError> {
            Ok(Vec::new())
        }
        async fn count(&self) -> Result<usize, DatabaseError> {
            Ok(0)
        }
        async fn snapshot(&self) -> Result<SnapshotHandle, DatabaseError> {
            Err(DatabaseError::Snapshot("unsupported".into()))
        }
    }

    #[tokio::test]
    async fn start_opens_session_with_contact_prompt() {
        let m = manager().await;
        let replies = m.handle(&ann(), &Intent::Start).await;
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].content, prompts::WELCOME);
        assert_eq!(replies[1].keyboard, Some(Keyboard::Contact));
        assert_eq!(m.current_step(42).await, Some(FormStep::AwaitingContact));
    }

    #[tokio::test]
    async fn contact_without_session_is_consumed_as_first_step() {
        let m = manager().await;
        let replies = m.handle(&ann(), &form_inputs()[0]).await;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].keyboard, Some(Keyboard::InstitutionType));
        assert_eq!(
            m.current_step(42).await,
            Some(FormStep::AwaitingInstitutionType)
        );
    }

    #[tokio::test]
    async fn full_form_without_photo_step_saves_on_confirm() {
        let m = manager().await;
        fill(&m, &ann()).await;
        assert_eq!(m.current_step(42).await, Some(FormStep::Confirming));

        let replies = m.handle(&ann(), &Intent::Button(Button::Confirm)).await;
        assert!(replies[0].content.starts_with(prompts::SAVE_SUCCESS));
        assert!(!m.has_session(42).await);

        let record = m.store().get_latest(42).await.unwrap().unwrap();
        assert_eq!(record.institution_name, "School No.12");
        assert_eq!(record.handle.as_deref(), Some("@ann"));
    }

    #[tokio::test]
    async fn mismatched_input_resets_to_contact() {
        let m = manager().await;
        m.handle(&ann(), &Intent::Start).await;
        m.handle(&ann(), &form_inputs()[0]).await;

        let replies = m.handle(&ann(), &Intent::Text("University".into())).await;
        assert_eq!(replies[0].content, prompts::START_OVER);
        assert_eq!(replies[1].keyboard, Some(Keyboard::Contact));
        assert_eq!(m.current_step(42).await, Some(FormStep::AwaitingContact));
    }

    #[tokio::test]
    async fn operator_buttons_inside_session_are_malformed() {
        let m = manager().await;
        m.handle(&ann(), &Intent::Start).await;
        m.handle(&ann(), &form_inputs()[0]).await;
        let replies = m
            .handle(&ann(), &Intent::Button(Button::ExportSpreadsheet))
            .await;
        assert_eq!(replies[0].content, prompts::START_OVER);
        assert_eq!(m.current_step(42).await, Some(FormStep::AwaitingContact));
    }

    #[tokio::test]
    async fn cooldown_blocks_entry_without_session() {
        let m = manager().await;
        fill(&m, &ann()).await;
        m.handle(&ann(), &Intent::Button(Button::Confirm)).await;

        let replies = m.handle(&ann(), &Intent::Start).await;
        assert_eq!(replies.len(), 1);
        assert!(replies[0].content.contains("already submitted"));
        assert!(!m.has_session(42).await);

        let replies = m.handle(&ann(), &form_inputs()[0]).await;
        assert!(replies[0].content.contains("already submitted"));
        assert!(!m.has_session(42).await);
    }

    #[tokio::test]
    async fn storage_failure_keeps_session_in_confirming() {
        let m = SessionManager::new(Arc::new(BrokenStore), None);
        fill(&m, &ann()).await;
        let replies = m.handle(&ann(), &Intent::Button(Button::Confirm)).await;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].content, prompts::SAVE_FAILED);
        assert_eq!(m.current_step(42).await, Some(FormStep::Confirming));
    }

    #[tokio::test]
    async fn view_my_data_without_record() {
        let m = manager().await;
        let replies = m.handle(&ann(), &Intent::Button(Button::ViewMyData)).await;
        assert_eq!(replies[0].content, prompts::RECORD_NOT_FOUND);
        assert!(!m.has_session(42).await);
    }

    #[tokio::test]
    async fn sessions_are_independent_per_submitter() {
        let m = manager().await;
        let bob = SubmitterIdentity::from_parts(7, Some("Bob"), None, None);
        m.handle(&ann(), &Intent::Start).await;
        m.handle(&bob, &form_inputs()[0]).await;
        assert_eq!(m.current_step(42).await, Some(FormStep::AwaitingContact));
        assert_eq!(
            m.current_step(7).await,
            Some(FormStep::AwaitingInstitutionType)
        );
        assert_eq!(m.active_count().await, 2);
    }

    #[tokio::test]
    async fn cancel_drops_only_that_form() {
        let m = manager().await;
        let bob = SubmitterIdentity::from_parts(7, Some("Bob"), None, None);
        assert!(!m.cancel(42).await);

        m.handle(&ann(), &Intent::Start).await;
        m.handle(&bob, &Intent::Start).await;
        assert!(m.cancel(42).await);
        assert!(!m.has_session(42).await);
        assert!(m.has_session(7).await);
        assert!(!m.cancel(42).await);
        assert_eq!(m.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn expire_idle_drops_sessions() {
        let m = manager().await;
        m.handle(&ann(), &Intent::Start).await;
        assert_eq!(m.expire_idle(Duration::from_secs(3600)).await, 0);
        assert!(m.has_session(42).await);

        assert_eq!(m.expire_idle(Duration::ZERO).await, 1);
        assert!(!m.has_session(42).await);
        assert_eq!(m.active_count().await, 0);
    }
}
