use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::FlowError;

/// Screens of the loan funnel, in the order a user walks through them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Screen {
    Intro,
    Login,
    LanguageSelect,
    StartLoan,
    CollectData,
    Approved,
    Rejected,
    Disbursed,
}

impl Screen {
    pub fn as_str(&self) -> &'static str {
        match self {
            Screen::Intro => "intro",
            Screen::Login => "login",
            Screen::LanguageSelect => "language-select",
            Screen::StartLoan => "start-loan",
            Screen::CollectData => "collect-data",
            Screen::Approved => "approved",
            Screen::Rejected => "rejected",
            Screen::Disbursed => "disbursed",
        }
    }

    /// Screens where the funnel has produced its final answer
    pub fn is_terminal(&self) -> bool {
        matches!(self, Screen::Rejected | Screen::Disbursed)
    }
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Languages with a full translation table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Hi,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::En, Language::Hi];

    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Hi => "hi",
        }
    }

    /// Name of the language written in that language, as shown on the picker
    pub fn native_name(&self) -> &'static str {
        match self {
            Language::En => "English",
            Language::Hi => "हिंदी",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = FlowError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Language::En),
            "hi" => Ok(Language::Hi),
            other => Err(FlowError::UnknownLanguage(other.to_string())),
        }
    }
}

/// Approved amount and its monthly installment, in whole rupees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanOffer {
    pub amount: u32,
    pub installment: u32,
}

/// Display string explaining a rejection, already in the session language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionReason {
    pub reason: String,
}

/// Outcome of the mock underwriting step.
///
/// A session holds at most one of these, so an offer and a rejection
/// reason can never be present at the same time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Decision {
    Approved(LoanOffer),
    Rejected(RejectionReason),
}

impl Decision {
    pub fn is_approved(&self) -> bool {
        matches!(self, Decision::Approved(_))
    }
}

/// Everything a user can do from the chat surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserAction {
    Start,
    SendOtp {
        #[serde(default)]
        phone: String,
    },
    VerifyOtp {
        #[serde(default)]
        code: String,
    },
    ContinueAsGuest,
    PickLanguage {
        language: Language,
    },
    ConfirmInterest,
    DeclineInterest,
    GiveConsent,
    AcceptOffer,
    StartOver,
}

impl UserAction {
    pub fn name(&self) -> &'static str {
        match self {
            UserAction::Start => "start",
            UserAction::SendOtp { .. } => "send_otp",
            UserAction::VerifyOtp { .. } => "verify_otp",
            UserAction::ContinueAsGuest => "continue_as_guest",
            UserAction::PickLanguage { .. } => "pick_language",
            UserAction::ConfirmInterest => "confirm_interest",
            UserAction::DeclineInterest => "decline_interest",
            UserAction::GiveConsent => "give_consent",
            UserAction::AcceptOffer => "accept_offer",
            UserAction::StartOver => "start_over",
        }
    }
}

/// Result of applying a user action to a session
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Moved to the next screen; wait for the next user action
    Advanced(Session),
    /// Consent was given; a decision has to be resolved before anything else happens
    DecisionPending(Session),
    /// The action has no edge from the current screen
    Ignored(Session),
}

impl Transition {
    pub fn session(&self) -> &Session {
        match self {
            Transition::Advanced(session)
            | Transition::DecisionPending(session)
            | Transition::Ignored(session) => session,
        }
    }

    pub fn into_session(self) -> Session {
        match self {
            Transition::Advanced(session)
            | Transition::DecisionPending(session)
            | Transition::Ignored(session) => session,
        }
    }
}

/// State of one user's walk through the loan funnel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub screen: Screen,
    pub language: Language,
    pub user_id: Option<String>,
    pub auth_ready: bool,
    pub is_processing: bool,
    pub decision: Option<Decision>,
    pub profile_saved: bool,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            screen: Screen::Intro,
            language: Language::default(),
            user_id: None,
            auth_ready: false,
            is_processing: false,
            decision: None,
            profile_saved: false,
        }
    }

    pub fn loan_offer(&self) -> Option<&LoanOffer> {
        match &self.decision {
            Some(Decision::Approved(offer)) => Some(offer),
            _ => None,
        }
    }

    pub fn rejection_reason(&self) -> Option<&RejectionReason> {
        match &self.decision {
            Some(Decision::Rejected(reason)) => Some(reason),
            _ => None,
        }
    }

    /// Record the identity resolved for this session. Identity always ends up ready,
    /// even when the provider failed and a placeholder id was issued.
    pub fn with_identity(self, user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            auth_ready: true,
            ..self
        }
    }

    pub fn with_profile_saved(self) -> Self {
        Self {
            profile_saved: true,
            ..self
        }
    }

    /// Apply a user action. Transitions only move forward; the single backward
    /// edge is "start over" from the disbursed screen.
    pub fn apply(self, action: &UserAction) -> Transition {
        if self.is_processing {
            return Transition::Ignored(self);
        }

        match (self.screen, action) {
            (Screen::Intro, UserAction::Start) => Transition::Advanced(self.on(Screen::Login)),
            (Screen::Login, UserAction::ContinueAsGuest) => {
                Transition::Advanced(self.on(Screen::LanguageSelect))
            }
            (Screen::LanguageSelect, UserAction::PickLanguage { language }) => {
                Transition::Advanced(Self {
                    language: *language,
                    ..self.on(Screen::StartLoan)
                })
            }
            (Screen::StartLoan, UserAction::ConfirmInterest) => {
                Transition::Advanced(self.on(Screen::CollectData))
            }
            (Screen::CollectData, UserAction::GiveConsent) => {
                Transition::DecisionPending(Self {
                    is_processing: true,
                    ..self
                })
            }
            (Screen::Approved, UserAction::AcceptOffer) => {
                Transition::Advanced(self.on(Screen::Disbursed))
            }
            (Screen::Disbursed, UserAction::StartOver) => Transition::Advanced(self.reset()),
            _ => Transition::Ignored(self),
        }
    }

    /// Land the decision that was pending since consent was given
    pub fn with_decision(self, decision: Decision) -> Result<Self, FlowError> {
        if !self.is_processing || self.screen != Screen::CollectData {
            return Err(FlowError::NoPendingDecision(self.id));
        }

        let screen = match decision {
            Decision::Approved(_) => Screen::Approved,
            Decision::Rejected(_) => Screen::Rejected,
        };

        Ok(Self {
            screen,
            is_processing: false,
            decision: Some(decision),
            ..self
        })
    }

    /// Back to the intro screen with a clean loan state. Identity and the
    /// profile write survive, they belong to the user rather than the attempt.
    pub fn reset(self) -> Self {
        Self {
            screen: Screen::Intro,
            language: Language::default(),
            is_processing: false,
            decision: None,
            ..self
        }
    }

    fn on(self, screen: Screen) -> Self {
        Self { screen, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_at(screen: Screen) -> Session {
        Session {
            screen,
            ..Session::new("s1")
        }
    }

    fn advance(session: Session, action: UserAction) -> Session {
        match session.apply(&action) {
            Transition::Advanced(next) => next,
            other => panic!("expected {} to advance, got {:?}", action.name(), other),
        }
    }

    #[test]
    fn test_happy_path_reaches_processing() {
        let session = Session::new("s1");
        let session = advance(session, UserAction::Start);
        assert_eq!(session.screen, Screen::Login);
        let session = advance(session, UserAction::ContinueAsGuest);
        assert_eq!(session.screen, Screen::LanguageSelect);
        let session = advance(
            session,
            UserAction::PickLanguage {
                language: Language::Hi,
            },
        );
        assert_eq!(session.screen, Screen::StartLoan);
        assert_eq!(session.language, Language::Hi);
        let session = advance(session, UserAction::ConfirmInterest);
        assert_eq!(session.screen, Screen::CollectData);

        match session.apply(&UserAction::GiveConsent) {
            Transition::DecisionPending(pending) => {
                assert!(pending.is_processing);
                assert_eq!(pending.screen, Screen::CollectData);
                assert!(pending.decision.is_none());
            }
            other => panic!("expected pending decision, got {:?}", other),
        }
    }

    #[test]
    fn test_consent_is_single_fire() {
        let pending = session_at(Screen::CollectData)
            .apply(&UserAction::GiveConsent)
            .into_session();

        let again = pending.clone().apply(&UserAction::GiveConsent);
        assert!(matches!(again, Transition::Ignored(_)));
        assert_eq!(again.session(), &pending);
    }

    #[test]
    fn test_unmapped_actions_are_ignored() {
        let cases = [
            (Screen::Intro, UserAction::ContinueAsGuest),
            (
                Screen::Login,
                UserAction::SendOtp {
                    phone: "9876543210".to_string(),
                },
            ),
            (
                Screen::Login,
                UserAction::VerifyOtp {
                    code: "123456".to_string(),
                },
            ),
            (Screen::StartLoan, UserAction::DeclineInterest),
            (Screen::Approved, UserAction::StartOver),
            (Screen::Rejected, UserAction::StartOver),
            (Screen::Rejected, UserAction::AcceptOffer),
        ];

        for (screen, action) in cases {
            let session = session_at(screen);
            let result = session.clone().apply(&action);
            assert!(
                matches!(result, Transition::Ignored(_)),
                "{} on {} should be ignored",
                action.name(),
                screen
            );
            assert_eq!(result.session(), &session);
        }
    }

    #[test]
    fn test_decision_lands_on_matching_screen() {
        let pending = session_at(Screen::CollectData)
            .apply(&UserAction::GiveConsent)
            .into_session();

        let approved = pending
            .clone()
            .with_decision(Decision::Approved(LoanOffer {
                amount: 12000,
                installment: 1000,
            }))
            .unwrap();
        assert_eq!(approved.screen, Screen::Approved);
        assert!(!approved.is_processing);
        assert!(approved.loan_offer().is_some());
        assert!(approved.rejection_reason().is_none());

        let rejected = pending
            .with_decision(Decision::Rejected(RejectionReason {
                reason: "Insufficient income data".to_string(),
            }))
            .unwrap();
        assert_eq!(rejected.screen, Screen::Rejected);
        assert!(rejected.loan_offer().is_none());
        assert!(rejected.rejection_reason().is_some());
    }

    #[test]
    fn test_decision_without_consent_is_an_error() {
        let result = session_at(Screen::StartLoan).with_decision(Decision::Rejected(
            RejectionReason {
                reason: "x".to_string(),
            },
        ));
        assert!(matches!(result, Err(FlowError::NoPendingDecision(id)) if id == "s1"));
    }

    #[test]
    fn test_start_over_keeps_identity() {
        let session = Session {
            screen: Screen::Disbursed,
            language: Language::Hi,
            decision: Some(Decision::Approved(LoanOffer {
                amount: 24000,
                installment: 2000,
            })),
            ..Session::new("s1")
        }
        .with_identity("user-1")
        .with_profile_saved();

        let reset = advance(session, UserAction::StartOver);
        assert_eq!(reset.screen, Screen::Intro);
        assert_eq!(reset.language, Language::En);
        assert!(reset.decision.is_none());
        assert!(!reset.is_processing);
        assert_eq!(reset.user_id.as_deref(), Some("user-1"));
        assert!(reset.auth_ready);
        assert!(reset.profile_saved);
    }

    #[test]
    fn test_language_codes() {
        assert_eq!("hi".parse::<Language>().unwrap(), Language::Hi);
        assert_eq!(" EN ".parse::<Language>().unwrap(), Language::En);
        assert!(matches!(
            "fr".parse::<Language>(),
            Err(FlowError::UnknownLanguage(code)) if code == "fr"
        ));
    }

    #[test]
    fn test_wire_format() {
        let action: UserAction =
            serde_json::from_str(r#"{"type":"pick_language","language":"hi"}"#).unwrap();
        assert_eq!(
            action,
            UserAction::PickLanguage {
                language: Language::Hi
            }
        );

        let decision = Decision::Approved(LoanOffer {
            amount: 12000,
            installment: 1000,
        });
        let value = serde_json::to_value(&decision).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"status": "approved", "amount": 12000, "installment": 1000})
        );

        let screen = serde_json::to_value(Screen::LanguageSelect).unwrap();
        assert_eq!(screen, serde_json::json!("language-select"));
    }
}
