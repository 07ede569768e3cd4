//! FlowRunner – loads a session, applies exactly **one** user action, and persists the
//! updated session back to storage.
//!
//! Consent is the only action with an asynchronous tail: the decision procedure
//! sleeps for the configured latency before an outcome lands. The runner offers
//! two ways to handle that tail:
//!
//! * [`FlowRunner::run`] resolves the decision inline and returns the session on
//!   the `approved`/`rejected` screen. Handy for terminal clients and tests.
//! * [`FlowRunner::submit`] saves the session with `is_processing = true`, resolves
//!   the decision on a spawned task and returns immediately. Clients poll the
//!   session and show a busy indicator until the flag clears.
//!
//! In both modes the session is saved with the processing flag set before the
//! decision starts, so a concurrent reader sees the busy state and a second
//! consent is ignored. The in-flight guard is held until the resolved session
//! has been saved.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    controller::{DecisionGuard, SessionController},
    error::{FlowError, Result},
    session::{Screen, Session, Transition, UserAction},
    storage::SessionStorage,
};

const RESOLVED_SAVE_ATTEMPTS: u32 = 3;
const RESOLVED_SAVE_BACKOFF: Duration = Duration::from_millis(200);

/// Where a session stands after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Waiting for the next user action
    WaitingForInput,
    /// A loan decision is being made; input is not accepted
    Processing,
    /// The action had no effect on the current screen
    Ignored,
    /// The funnel reached a final screen
    Completed,
}

impl StepStatus {
    pub fn of(session: &Session) -> Self {
        if session.is_processing {
            StepStatus::Processing
        } else if session.screen.is_terminal() {
            StepStatus::Completed
        } else {
            StepStatus::WaitingForInput
        }
    }
}

/// Outcome of one runner step
#[derive(Debug, Clone)]
pub struct StepResult {
    pub session: Session,
    pub status: StepStatus,
}

impl StepResult {
    fn settled(session: Session) -> Self {
        let status = StepStatus::of(&session);
        Self { session, status }
    }
}

/// High-level helper that orchestrates the common _load → apply → save_ pattern.
#[derive(Clone)]
pub struct FlowRunner {
    controller: Arc<SessionController>,
    storage: Arc<dyn SessionStorage>,
}

impl FlowRunner {
    pub fn new(controller: Arc<SessionController>, storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            controller,
            storage,
        }
    }

    pub fn controller(&self) -> &Arc<SessionController> {
        &self.controller
    }

    /// Open and persist a new session. A fresh UUID is used when no id is given.
    pub async fn open(&self, session_id: Option<String>) -> Result<StepResult> {
        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let session = self.controller.open(session_id).await;
        self.storage.save(session.clone()).await?;
        Ok(StepResult::settled(session))
    }

    pub async fn load(&self, session_id: &str) -> Result<Session> {
        self.storage
            .get(session_id)
            .await?
            .ok_or_else(|| FlowError::SessionNotFound(session_id.to_string()))
    }

    /// Apply one action; a decision triggered by consent is resolved before returning
    pub async fn run(&self, session_id: &str, action: &UserAction) -> Result<StepResult> {
        match self.step(session_id, action).await? {
            Step::Done(result) => Ok(result),
            Step::Deciding(guard, pending) => {
                let session = self.controller.resolve(&guard, pending).await?;
                self.persist_resolved(&session).await?;
                drop(guard);
                Ok(StepResult::settled(session))
            }
        }
    }

    /// Apply one action; a decision triggered by consent is resolved in the background
    pub async fn submit(&self, session_id: &str, action: &UserAction) -> Result<StepResult> {
        match self.step(session_id, action).await? {
            Step::Done(result) => Ok(result),
            Step::Deciding(guard, pending) => {
                let runner = self.clone();
                let background = pending.clone();
                tokio::spawn(async move {
                    let session_id = background.id.clone();
                    let saved = match runner.controller.resolve(&guard, background).await {
                        Ok(session) => runner.persist_resolved(&session).await,
                        Err(e) => Err(e),
                    };
                    drop(guard);
                    match saved {
                        Ok(()) => info!(session_id = %session_id, "Background loan decision stored"),
                        Err(e) => error!(
                            session_id = %session_id,
                            error = %e,
                            "Background loan decision failed"
                        ),
                    }
                });

                Ok(StepResult {
                    session: pending,
                    status: StepStatus::Processing,
                })
            }
        }
    }

    async fn step(&self, session_id: &str, action: &UserAction) -> Result<Step> {
        let session = self.load(session_id).await?;

        match self.controller.apply(session, action) {
            Transition::Ignored(session) => Ok(Step::Done(StepResult {
                status: if session.is_processing {
                    StepStatus::Processing
                } else {
                    StepStatus::Ignored
                },
                session,
            })),
            Transition::Advanced(session) => {
                self.storage.save(session.clone()).await?;
                Ok(Step::Done(StepResult::settled(session)))
            }
            Transition::DecisionPending(session) => {
                let guard = self.controller.begin_decision(&session.id)?;

                // Another step may have resolved a decision between our load
                // and taking the guard
                let current = self.load(&session.id).await?;
                if current.is_processing || current.screen != Screen::CollectData {
                    warn!(
                        session_id = %session.id,
                        screen = %current.screen,
                        "Consent given on a stale copy of the session, ignoring"
                    );
                    return Ok(Step::Done(StepResult {
                        status: if current.is_processing {
                            StepStatus::Processing
                        } else {
                            StepStatus::Ignored
                        },
                        session: current,
                    }));
                }

                self.storage.save(session.clone()).await?;
                Ok(Step::Deciding(guard, session))
            }
        }
    }

    /// Save a session whose decision has landed. A few attempts are made,
    /// since a lost save leaves the stored copy marked as processing.
    async fn persist_resolved(&self, session: &Session) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.storage.save(session.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < RESOLVED_SAVE_ATTEMPTS => {
                    warn!(
                        session_id = %session.id,
                        attempt,
                        error = %e,
                        "Saving resolved session failed, retrying"
                    );
                    tokio::time::sleep(RESOLVED_SAVE_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

enum Step {
    Done(StepResult),
    Deciding(DecisionGuard, Session),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::DecisionPolicy;
    use crate::session::{Language, Screen};
    use crate::storage::InMemorySessionStorage;
    use crate::testing::{GatedStorage, RecordingStore, ScriptedSource};

    fn runner_with_storage(
        random: ScriptedSource,
        latency: Duration,
        storage: Arc<dyn SessionStorage>,
    ) -> (FlowRunner, Arc<RecordingStore>) {
        let records = Arc::new(RecordingStore::default());
        let controller = SessionController::builder()
            .records(records.clone())
            .random_source(Box::new(random))
            .policy(DecisionPolicy::default().with_latency(latency))
            .build()
            .unwrap();
        (FlowRunner::new(Arc::new(controller), storage), records)
    }

    fn runner(random: ScriptedSource, latency: Duration) -> (FlowRunner, Arc<RecordingStore>) {
        runner_with_storage(random, latency, Arc::new(InMemorySessionStorage::new()))
    }

    async fn walk_to_consent(runner: &FlowRunner, session_id: &str) {
        for action in [
            UserAction::Start,
            UserAction::ContinueAsGuest,
            UserAction::PickLanguage {
                language: Language::En,
            },
            UserAction::ConfirmInterest,
        ] {
            let result = runner.run(session_id, &action).await.unwrap();
            assert_eq!(result.status, StepStatus::WaitingForInput);
        }
    }

    #[tokio::test]
    async fn test_run_walks_full_funnel() {
        let (runner, records) = runner(
            ScriptedSource::new().with_units([0.9]).with_amounts([12000]),
            Duration::ZERO,
        );

        let opened = runner.open(Some("s1".to_string())).await.unwrap();
        assert_eq!(opened.status, StepStatus::WaitingForInput);
        assert_eq!(opened.session.screen, Screen::Intro);

        walk_to_consent(&runner, "s1").await;

        let decided = runner.run("s1", &UserAction::GiveConsent).await.unwrap();
        assert_eq!(decided.session.screen, Screen::Approved);
        assert_eq!(decided.session.loan_offer().unwrap().installment, 1000);

        let disbursed = runner.run("s1", &UserAction::AcceptOffer).await.unwrap();
        assert_eq!(disbursed.status, StepStatus::Completed);

        let restarted = runner.run("s1", &UserAction::StartOver).await.unwrap();
        assert_eq!(restarted.session.screen, Screen::Intro);
        assert!(restarted.session.decision.is_none());

        let stored = runner.load("s1").await.unwrap();
        assert_eq!(stored, restarted.session);
        assert_eq!(records.profile_calls(), 1);
        assert_eq!(records.decision_calls(), 1);
    }

    #[tokio::test]
    async fn test_ignored_action_leaves_session_untouched() {
        let (runner, _) = runner(ScriptedSource::new(), Duration::ZERO);
        let opened = runner.open(Some("s1".to_string())).await.unwrap();

        let result = runner.run("s1", &UserAction::AcceptOffer).await.unwrap();
        assert_eq!(result.status, StepStatus::Ignored);
        assert_eq!(result.session, opened.session);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let (runner, _) = runner(ScriptedSource::new(), Duration::ZERO);
        let result = runner.run("missing", &UserAction::Start).await;
        assert!(matches!(result, Err(FlowError::SessionNotFound(id)) if id == "missing"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_resolves_in_background() {
        let (runner, records) = runner(
            ScriptedSource::new().with_units([0.2]).with_indices([1]),
            Duration::from_secs(3),
        );
        runner.open(Some("s1".to_string())).await.unwrap();
        walk_to_consent(&runner, "s1").await;

        let submitted = runner.submit("s1", &UserAction::GiveConsent).await.unwrap();
        assert_eq!(submitted.status, StepStatus::Processing);
        assert!(submitted.session.is_processing);

        // While the decision is pending every action is ignored
        let again = runner.submit("s1", &UserAction::GiveConsent).await.unwrap();
        assert_eq!(again.status, StepStatus::Processing);
        let stored = runner.load("s1").await.unwrap();
        assert!(stored.is_processing);
        assert_eq!(StepStatus::of(&stored), StepStatus::Processing);

        tokio::time::sleep(Duration::from_secs(4)).await;

        let stored = runner.load("s1").await.unwrap();
        assert!(!stored.is_processing);
        assert_eq!(stored.screen, Screen::Rejected);
        assert_eq!(
            stored.rejection_reason().unwrap().reason,
            "No or little repayment history found"
        );
        assert_eq!(records.decision_calls(), 1);
        assert!(!runner.controller().is_deciding("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_racing_consent_yields_one_decision() {
        let (runner, records) = runner(
            ScriptedSource::new().with_units([0.9]).with_amounts([20000]),
            Duration::from_secs(3),
        );
        runner.open(Some("s1".to_string())).await.unwrap();
        walk_to_consent(&runner, "s1").await;

        // Simulate a second consent that loaded the session before the first was saved
        let stale = runner.load("s1").await.unwrap();
        let first = runner.submit("s1", &UserAction::GiveConsent).await.unwrap();
        assert_eq!(first.status, StepStatus::Processing);

        let pending = runner
            .controller()
            .apply(stale, &UserAction::GiveConsent)
            .into_session();
        assert!(matches!(
            runner.controller().begin_decision(&pending.id),
            Err(FlowError::DecisionInFlight(_))
        ));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(records.decision_calls(), 1);
        assert_eq!(runner.load("s1").await.unwrap().screen, Screen::Approved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_held_until_resolved_session_is_saved() {
        let storage = Arc::new(GatedStorage::with_delay(Duration::from_secs(1)));
        let (runner, records) = runner_with_storage(
            ScriptedSource::new().with_units([0.9]).with_amounts([24000]),
            Duration::from_secs(3),
            storage.clone(),
        );
        runner.open(Some("s1".to_string())).await.unwrap();
        walk_to_consent(&runner, "s1").await;

        let stale = runner.load("s1").await.unwrap();
        runner.submit("s1", &UserAction::GiveConsent).await.unwrap();

        // Decision drawn at 3s, its save completes at 4s
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert!(runner.controller().is_deciding("s1"));
        assert!(runner.load("s1").await.unwrap().is_processing);

        let replay = runner
            .controller()
            .apply(stale, &UserAction::GiveConsent)
            .into_session();
        assert!(matches!(
            runner.controller().begin_decision(&replay.id),
            Err(FlowError::DecisionInFlight(_))
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!runner.controller().is_deciding("s1"));
        let stored = runner.load("s1").await.unwrap();
        assert_eq!(stored.screen, Screen::Approved);
        assert_eq!(records.decision_calls(), 1);
    }

    #[tokio::test]
    async fn test_consent_on_stale_copy_after_decision_is_ignored() {
        let storage = Arc::new(GatedStorage::default());
        let (runner, records) = runner_with_storage(
            ScriptedSource::new().with_units([0.9]).with_amounts([15000]),
            Duration::ZERO,
            storage.clone(),
        );
        runner.open(Some("s1".to_string())).await.unwrap();
        walk_to_consent(&runner, "s1").await;
        let stale = runner.load("s1").await.unwrap();

        let decided = runner.run("s1", &UserAction::GiveConsent).await.unwrap();
        assert_eq!(decided.session.screen, Screen::Approved);

        storage.serve_stale_once(stale);
        let replay = runner.run("s1", &UserAction::GiveConsent).await.unwrap();
        assert_eq!(replay.status, StepStatus::Ignored);
        assert_eq!(replay.session.screen, Screen::Approved);
        assert_eq!(records.decision_calls(), 1);
        assert!(!runner.controller().is_deciding("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_save_of_resolution_is_retried() {
        let storage = Arc::new(GatedStorage::failing(2));
        let (runner, _) = runner_with_storage(
            ScriptedSource::new().with_units([0.1]).with_indices([0]),
            Duration::ZERO,
            storage,
        );
        runner.open(Some("s1".to_string())).await.unwrap();
        walk_to_consent(&runner, "s1").await;

        let decided = runner.run("s1", &UserAction::GiveConsent).await.unwrap();
        assert_eq!(decided.status, StepStatus::Completed);

        let stored = runner.load("s1").await.unwrap();
        assert!(!stored.is_processing);
        assert_eq!(stored.screen, Screen::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_save_retries_release_the_guard() {
        let storage = Arc::new(GatedStorage::failing(RESOLVED_SAVE_ATTEMPTS as usize));
        let (runner, _) = runner_with_storage(
            ScriptedSource::new().with_units([0.1]).with_indices([0]),
            Duration::ZERO,
            storage,
        );
        runner.open(Some("s1".to_string())).await.unwrap();
        walk_to_consent(&runner, "s1").await;

        let result = runner.run("s1", &UserAction::GiveConsent).await;
        assert!(matches!(result, Err(FlowError::StorageError(_))));
        assert!(!runner.controller().is_deciding("s1"));
    }
}
