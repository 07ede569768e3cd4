//! Chat content for the current screen, ready for a presentation layer to draw.

use serde::Serialize;

use crate::{
    i18n::{MessageId, Translations},
    session::{Language, Screen, Session, UserAction},
};

/// A button the user can press, and the action it emits
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Control {
    pub label: String,
    pub action: UserAction,
}

/// A text field shown alongside the controls
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputField {
    pub name: String,
    pub placeholder: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenView {
    pub screen: Screen,
    pub language: Language,
    /// Show a busy indicator and accept no input
    pub busy: bool,
    pub title: Option<String>,
    /// Assistant chat bubbles, in display order
    pub messages: Vec<String>,
    pub inputs: Vec<InputField>,
    pub controls: Vec<Control>,
    pub user_id: Option<String>,
}

/// Format a rupee amount with Indian digit grouping, e.g. `₹1,23,456`
pub fn format_inr(amount: u64) -> String {
    let digits = amount.to_string();
    if digits.len() <= 3 {
        return format!("₹{digits}");
    }

    let (head, tail) = digits.split_at(digits.len() - 3);
    let mut groups = Vec::new();
    let mut end = head.len();
    while end > 0 {
        let start = end.saturating_sub(2);
        groups.push(&head[start..end]);
        end = start;
    }
    groups.reverse();

    format!("₹{},{}", groups.join(","), tail)
}

pub fn render(session: &Session, translations: &Translations) -> ScreenView {
    let language = session.language;
    let t = |id: MessageId| translations.lookup(language, id).to_string();
    let control = |id: MessageId, action: UserAction| Control {
        label: t(id),
        action,
    };

    let mut view = ScreenView {
        screen: session.screen,
        language,
        busy: session.is_processing,
        title: None,
        messages: Vec::new(),
        inputs: Vec::new(),
        controls: Vec::new(),
        user_id: session.user_id.clone(),
    };

    if session.is_processing {
        view.title = Some(t(MessageId::Processing));
        view.messages.push(t(MessageId::ProcessingNote));
        return view;
    }

    match session.screen {
        Screen::Intro => {
            view.title = Some(t(MessageId::WelcomeTitle));
            view.messages.push(t(MessageId::Tagline));
            view.controls
                .push(control(MessageId::WelcomeButton, UserAction::Start));
        }
        Screen::Login => {
            view.title = Some(t(MessageId::LoginTitle));
            view.inputs = vec![
                InputField {
                    name: "phone".to_string(),
                    placeholder: t(MessageId::PhonePlaceholder),
                },
                InputField {
                    name: "otp".to_string(),
                    placeholder: t(MessageId::OtpPlaceholder),
                },
            ];
            view.controls = vec![
                control(
                    MessageId::SendOtp,
                    UserAction::SendOtp {
                        phone: String::new(),
                    },
                ),
                control(
                    MessageId::VerifyOtp,
                    UserAction::VerifyOtp {
                        code: String::new(),
                    },
                ),
                control(MessageId::ContinueAsGuest, UserAction::ContinueAsGuest),
            ];
        }
        Screen::LanguageSelect => {
            view.title = Some(t(MessageId::WelcomeTitle));
            view.controls = Language::ALL
                .iter()
                .map(|language| Control {
                    label: language.native_name().to_string(),
                    action: UserAction::PickLanguage {
                        language: *language,
                    },
                })
                .collect();
        }
        Screen::StartLoan => {
            view.messages.push(t(MessageId::LoanQuestion));
            view.controls = vec![
                control(MessageId::Yes, UserAction::ConfirmInterest),
                control(MessageId::No, UserAction::DeclineInterest),
            ];
        }
        Screen::CollectData => {
            view.messages.push(t(MessageId::ConsentRequest));
            view.messages.push(t(MessageId::ConsentNote));
            view.controls
                .push(control(MessageId::GiveConsent, UserAction::GiveConsent));
        }
        Screen::Approved => {
            view.title = Some(t(MessageId::ApprovedTitle));
            view.messages.push(t(MessageId::ApprovedChat));
            if let Some(offer) = session.loan_offer() {
                view.messages.push(format_inr(offer.amount.into()));
                view.messages.push(format!(
                    "{}: {}{}",
                    t(MessageId::Emi),
                    format_inr(offer.installment.into()),
                    t(MessageId::PerMonth)
                ));
            }
            view.controls
                .push(control(MessageId::Accept, UserAction::AcceptOffer));
        }
        Screen::Rejected => {
            view.title = Some(t(MessageId::RejectedTitle));
            view.messages.push(t(MessageId::RejectedChat));
            if let Some(rejection) = session.rejection_reason() {
                view.messages
                    .push(format!("{}: {}", t(MessageId::ReasonLabel), rejection.reason));
            }
            view.messages.push(t(MessageId::RejectedNote));
        }
        Screen::Disbursed => {
            view.messages.push(t(MessageId::DisbursedChat));
            view.controls
                .push(control(MessageId::StartOver, UserAction::StartOver));
        }
    }

    view
}
