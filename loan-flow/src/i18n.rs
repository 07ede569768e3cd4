//! Translation tables keyed by language and message id.
//!
//! Tables are YAML documents embedded at build time. Every message is a
//! required field, so a table with a missing or misspelled key fails to load
//! instead of falling back to another language at render time.

use serde::Deserialize;
use std::collections::HashMap;

use crate::{
    error::{FlowError, Result},
    session::Language,
};

const EN_TABLE: &str = include_str!("../locales/en.yaml");
const HI_TABLE: &str = include_str!("../locales/hi.yaml");

/// Identifier of a translatable string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    Tagline,
    WelcomeTitle,
    WelcomeButton,
    LoginTitle,
    PhonePlaceholder,
    SendOtp,
    OtpPlaceholder,
    VerifyOtp,
    ContinueAsGuest,
    LoanQuestion,
    Yes,
    No,
    ConsentRequest,
    GiveConsent,
    ConsentNote,
    Processing,
    ProcessingNote,
    ApprovedTitle,
    ApprovedChat,
    Emi,
    PerMonth,
    Accept,
    RejectedTitle,
    RejectedChat,
    RejectedNote,
    ReasonLabel,
    DisbursedChat,
    StartOver,
}

/// One language's table
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Messages {
    tagline: String,
    welcome_title: String,
    welcome_button: String,
    login_title: String,
    phone_placeholder: String,
    send_otp: String,
    otp_placeholder: String,
    verify_otp: String,
    continue_as_guest: String,
    chat1: String,
    yes: String,
    no: String,
    chat2: String,
    give_consent: String,
    consent_note: String,
    processing: String,
    processing_note: String,
    approved_title: String,
    approved_chat: String,
    emi: String,
    per_month: String,
    accept: String,
    rejected_title: String,
    rejected_chat: String,
    rejected_note: String,
    reason_label: String,
    disbursed_chat: String,
    start_over: String,
    reasons: [String; 3],
}

impl Messages {
    pub fn parse(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| FlowError::Translation(e.to_string()))
    }

    pub fn get(&self, id: MessageId) -> &str {
        match id {
            MessageId::Tagline => &self.tagline,
            MessageId::WelcomeTitle => &self.welcome_title,
            MessageId::WelcomeButton => &self.welcome_button,
            MessageId::LoginTitle => &self.login_title,
            MessageId::PhonePlaceholder => &self.phone_placeholder,
            MessageId::SendOtp => &self.send_otp,
            MessageId::OtpPlaceholder => &self.otp_placeholder,
            MessageId::VerifyOtp => &self.verify_otp,
            MessageId::ContinueAsGuest => &self.continue_as_guest,
            MessageId::LoanQuestion => &self.chat1,
            MessageId::Yes => &self.yes,
            MessageId::No => &self.no,
            MessageId::ConsentRequest => &self.chat2,
            MessageId::GiveConsent => &self.give_consent,
            MessageId::ConsentNote => &self.consent_note,
            MessageId::Processing => &self.processing,
            MessageId::ProcessingNote => &self.processing_note,
            MessageId::ApprovedTitle => &self.approved_title,
            MessageId::ApprovedChat => &self.approved_chat,
            MessageId::Emi => &self.emi,
            MessageId::PerMonth => &self.per_month,
            MessageId::Accept => &self.accept,
            MessageId::RejectedTitle => &self.rejected_title,
            MessageId::RejectedChat => &self.rejected_chat,
            MessageId::RejectedNote => &self.rejected_note,
            MessageId::ReasonLabel => &self.reason_label,
            MessageId::DisbursedChat => &self.disbursed_chat,
            MessageId::StartOver => &self.start_over,
        }
    }

    pub fn reasons(&self) -> &[String; 3] {
        &self.reasons
    }
}

/// Tables for every supported language
#[derive(Debug, Clone)]
pub struct Translations {
    tables: HashMap<Language, Messages>,
}

impl Translations {
    /// Load the tables shipped with the crate
    pub fn builtin() -> Result<Self> {
        Self::from_tables([(Language::En, EN_TABLE), (Language::Hi, HI_TABLE)])
    }

    /// Build from raw YAML tables. Every [`Language`] must be covered.
    pub fn from_tables<'a>(tables: impl IntoIterator<Item = (Language, &'a str)>) -> Result<Self> {
        let mut parsed = HashMap::new();
        for (language, yaml) in tables {
            let messages = Messages::parse(yaml).map_err(|e| {
                FlowError::Translation(format!("table '{}': {}", language.code(), e))
            })?;
            parsed.insert(language, messages);
        }

        if let Some(missing) = Language::ALL.iter().find(|l| !parsed.contains_key(*l)) {
            return Err(FlowError::Translation(format!(
                "no table for language '{}'",
                missing.code()
            )));
        }

        Ok(Self { tables: parsed })
    }

    fn table(&self, language: Language) -> &Messages {
        // Construction guarantees a table for every language
        &self.tables[&language]
    }

    pub fn lookup(&self, language: Language, id: MessageId) -> &str {
        self.table(language).get(id)
    }

    pub fn reasons(&self, language: Language) -> &[String; 3] {
        self.table(language).reasons()
    }
}
