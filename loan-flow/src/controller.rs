use dashmap::DashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{
    decision::{DecisionEngine, DecisionPolicy, RandomSource, RngSource},
    error::{FlowError, Result},
    i18n::Translations,
    identity::{AnonymousIdentityProvider, IdentityProvider, authenticate},
    records::{InMemoryRecordStore, LoanDecisionRecord, RecordStore, UserProfileRecord},
    session::{Session, Transition, UserAction},
};

pub const DEFAULT_APP_ID: &str = "default-app-id";

/// Marks a session as having a decision in flight until dropped
#[derive(Debug)]
pub struct DecisionGuard {
    in_flight: Arc<DashSet<String>>,
    session_id: String,
}

impl DecisionGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for DecisionGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.session_id);
    }
}

/// Drives sessions through the loan funnel and talks to the collaborators.
///
/// Transitions themselves are pure (see [`Session::apply`]); the controller
/// adds identity resolution, the profile write, the decision procedure and
/// the decision write around them. Collaborator failures are logged and
/// swallowed, the flow never stops because of them.
pub struct SessionController {
    app_id: String,
    auth_token: Option<String>,
    identity: Arc<dyn IdentityProvider>,
    records: Arc<dyn RecordStore>,
    engine: DecisionEngine,
    translations: Arc<Translations>,
    in_flight: Arc<DashSet<String>>,
}

impl SessionController {
    pub fn builder() -> SessionControllerBuilder {
        SessionControllerBuilder::new()
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn translations(&self) -> &Arc<Translations> {
        &self.translations
    }

    pub fn policy(&self) -> &DecisionPolicy {
        self.engine.policy()
    }

    /// Create a session on the intro screen and resolve its identity
    pub async fn open(&self, session_id: impl Into<String>) -> Session {
        let session = Session::new(session_id);
        info!(session_id = %session.id, "Opening session");
        self.attach_identity(session).await
    }

    /// Sign the session in, falling back to a placeholder id, then write the
    /// profile record. Sessions that already have an identity are returned as is.
    pub async fn attach_identity(&self, session: Session) -> Session {
        if session.auth_ready {
            return session;
        }

        let user_id = authenticate(self.identity.as_ref(), self.auth_token.as_deref()).await;
        let session = session.with_identity(user_id);
        self.ensure_profile(session).await
    }

    /// Write the profile record once per session
    pub async fn ensure_profile(&self, session: Session) -> Session {
        let Some(user_id) = session.user_id.as_deref() else {
            return session;
        };
        if !session.auth_ready || session.profile_saved {
            return session;
        }

        let record = UserProfileRecord::started(&self.app_id, user_id, session.language);
        match self.records.put_profile(&record).await {
            Ok(()) => {
                info!(session_id = %session.id, user_id = %user_id, "Initial user data saved");
                session.with_profile_saved()
            }
            Err(e) => {
                error!(session_id = %session.id, error = %e, "Failed to save initial user data");
                session
            }
        }
    }

    /// Apply one user action
    pub fn apply(&self, session: Session, action: &UserAction) -> Transition {
        let from = session.screen;
        let transition = session.apply(action);

        match &transition {
            Transition::Advanced(next) => info!(
                session_id = %next.id,
                action = action.name(),
                from = %from,
                to = %next.screen,
                "Screen advanced"
            ),
            Transition::DecisionPending(next) => info!(
                session_id = %next.id,
                action = action.name(),
                "Consent given, loan decision pending"
            ),
            Transition::Ignored(next) => debug!(
                session_id = %next.id,
                action = action.name(),
                screen = %from,
                processing = next.is_processing,
                "Action ignored"
            ),
        }

        transition
    }

    /// Claim the right to resolve a decision for `session_id`. Only one
    /// decision may be in flight per session.
    pub fn begin_decision(&self, session_id: &str) -> Result<DecisionGuard> {
        if !self.in_flight.insert(session_id.to_string()) {
            warn!(session_id = %session_id, "Rejected second loan decision while one is in flight");
            return Err(FlowError::DecisionInFlight(session_id.to_string()));
        }
        Ok(DecisionGuard {
            in_flight: self.in_flight.clone(),
            session_id: session_id.to_string(),
        })
    }

    pub fn is_deciding(&self, session_id: &str) -> bool {
        self.in_flight.contains(session_id)
    }

    /// Run the decision procedure for a session waiting on one, then record
    /// the outcome. The caller keeps `guard` until the resolved session is
    /// persisted.
    pub async fn resolve(&self, guard: &DecisionGuard, session: Session) -> Result<Session> {
        if guard.session_id() != session.id || !session.is_processing {
            return Err(FlowError::NoPendingDecision(session.id));
        }

        let decision = self.engine.decide(session.language).await;
        let session = session.with_decision(decision.clone())?;

        info!(
            session_id = %session.id,
            approved = decision.is_approved(),
            screen = %session.screen,
            "Loan decision made"
        );

        if let Some(user_id) = session.user_id.as_deref() {
            let record = LoanDecisionRecord::from_decision(&decision, chrono::Utc::now());
            if let Err(e) = self
                .records
                .merge_decision(&self.app_id, user_id, &record)
                .await
            {
                error!(session_id = %session.id, error = %e, "Failed to save loan decision");
            }
        }

        Ok(session)
    }
}

/// Builder for [`SessionController`]; every collaborator has an in-process default
pub struct SessionControllerBuilder {
    app_id: String,
    auth_token: Option<String>,
    identity: Option<Arc<dyn IdentityProvider>>,
    records: Option<Arc<dyn RecordStore>>,
    policy: DecisionPolicy,
    random: Option<Box<dyn RandomSource>>,
    translations: Option<Arc<Translations>>,
}

impl SessionControllerBuilder {
    pub fn new() -> Self {
        Self {
            app_id: DEFAULT_APP_ID.to_string(),
            auth_token: None,
            identity: None,
            records: None,
            policy: DecisionPolicy::default(),
            random: None,
            translations: None,
        }
    }

    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self
    }

    pub fn auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    pub fn identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn records(mut self, records: Arc<dyn RecordStore>) -> Self {
        self.records = Some(records);
        self
    }

    pub fn policy(mut self, policy: DecisionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn random_source(mut self, random: Box<dyn RandomSource>) -> Self {
        self.random = Some(random);
        self
    }

    pub fn translations(mut self, translations: Arc<Translations>) -> Self {
        self.translations = Some(translations);
        self
    }

    pub fn build(self) -> Result<SessionController> {
        let translations = match self.translations {
            Some(translations) => translations,
            None => Arc::new(Translations::builtin()?),
        };
        let random = self
            .random
            .unwrap_or_else(|| Box::new(RngSource::from_entropy()));
        let engine = DecisionEngine::new(self.policy, translations.clone(), random)?;

        Ok(SessionController {
            app_id: self.app_id,
            auth_token: self.auth_token,
            identity: self
                .identity
                .unwrap_or_else(|| Arc::new(AnonymousIdentityProvider::new())),
            records: self
                .records
                .unwrap_or_else(|| Arc::new(InMemoryRecordStore::new())),
            engine,
            translations,
            in_flight: Arc::new(DashSet::new()),
        })
    }
}

impl Default for SessionControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
