pub mod controller;
pub mod decision;
pub mod error;
pub mod i18n;
pub mod identity;
pub mod records;
pub mod runner;
pub mod session;
pub mod storage;
pub mod view;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use controller::{DecisionGuard, SessionController, SessionControllerBuilder};
pub use decision::{DecisionEngine, DecisionPolicy, RandomSource, RngSource};
pub use error::{FlowError, Result};
pub use i18n::{MessageId, Translations};
pub use identity::{AnonymousIdentityProvider, IdentityProvider, authenticate};
#[cfg(feature = "rest-identity")]
pub use identity::RestIdentityProvider;
pub use records::{InMemoryRecordStore, LoanDecisionRecord, RecordStore, UserProfileRecord};
#[cfg(feature = "postgres")]
pub use records::PostgresRecordStore;
pub use runner::{FlowRunner, StepResult, StepStatus};
pub use session::{
    Decision, Language, LoanOffer, RejectionReason, Screen, Session, Transition, UserAction,
};
pub use storage::{InMemorySessionStorage, SessionStorage};
pub use view::{ScreenView, render};
