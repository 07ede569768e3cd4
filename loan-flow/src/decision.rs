//! Mock underwriting. There is no scoring here: the outcome is a weighted coin
//! flip, the amount a uniform draw, and a rejection picks one of the fixed
//! reasons for the session language.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use crate::{
    error::{FlowError, Result},
    i18n::Translations,
    session::{Decision, Language, LoanOffer, RejectionReason},
};

pub const DEFAULT_APPROVAL_RATE: f64 = 0.7;
pub const DEFAULT_MIN_AMOUNT: u32 = 5_000;
pub const DEFAULT_MAX_AMOUNT: u32 = 50_000;
pub const DEFAULT_INSTALLMENTS: u32 = 12;
pub const DEFAULT_LATENCY: Duration = Duration::from_secs(3);

/// Source of randomness for the decision procedure
pub trait RandomSource: Send {
    /// Uniform draw in [0, 1)
    fn next_unit(&mut self) -> f64;

    /// Uniform integer in [low, high], both ends inclusive
    fn next_between(&mut self, low: u32, high: u32) -> u32;

    /// Uniform index in [0, len); `len` is never zero
    fn next_index(&mut self, len: usize) -> usize;
}

/// Adapts any `rand` generator to [`RandomSource`]
pub struct RngSource<R>(R);

impl<R> RngSource<R> {
    pub fn new(rng: R) -> Self {
        Self(rng)
    }
}

impl RngSource<StdRng> {
    pub fn from_entropy() -> Self {
        Self(StdRng::from_os_rng())
    }

    pub fn seeded(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng + Send> RandomSource for RngSource<R> {
    fn next_unit(&mut self) -> f64 {
        self.0.random::<f64>()
    }

    fn next_between(&mut self, low: u32, high: u32) -> u32 {
        self.0.random_range(low..=high)
    }

    fn next_index(&mut self, len: usize) -> usize {
        self.0.random_range(0..len)
    }
}

/// Knobs of the mock underwriting step
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionPolicy {
    /// The draw approves when `u >= reject_below`; the approval rate is
    /// `1 - reject_below`
    pub reject_below: f64,
    pub min_amount: u32,
    pub max_amount: u32,
    /// Number of monthly installments the amount is split into
    pub installments: u32,
    /// Artificial "analysis" delay before the outcome is returned
    pub latency: Duration,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            reject_below: cutoff_for(DEFAULT_APPROVAL_RATE),
            min_amount: DEFAULT_MIN_AMOUNT,
            max_amount: DEFAULT_MAX_AMOUNT,
            installments: DEFAULT_INSTALLMENTS,
            latency: DEFAULT_LATENCY,
        }
    }
}

/// `1 - approval_rate`, snapped to nine decimal places so that a rate of
/// 0.7 yields a cutoff of exactly 0.3 rather than 0.30000000000000004
fn cutoff_for(approval_rate: f64) -> f64 {
    ((1.0 - approval_rate) * 1e9).round() / 1e9
}

impl DecisionPolicy {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.reject_below) {
            return Err(FlowError::InvalidPolicy(format!(
                "approval rate {} is outside [0, 1]",
                self.approval_rate()
            )));
        }
        if self.min_amount > self.max_amount {
            return Err(FlowError::InvalidPolicy(format!(
                "minimum amount {} exceeds maximum {}",
                self.min_amount, self.max_amount
            )));
        }
        if self.installments == 0 {
            return Err(FlowError::InvalidPolicy(
                "installments must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn approval_rate(&self) -> f64 {
        1.0 - self.reject_below
    }

    pub fn with_approval_rate(self, approval_rate: f64) -> Self {
        Self {
            reject_below: cutoff_for(approval_rate),
            ..self
        }
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        Self { latency, ..self }
    }
}

/// Draw one outcome. Pure apart from the random source, so it can be driven
/// deterministically in tests.
pub fn draw(
    policy: &DecisionPolicy,
    reasons: &[String; 3],
    rng: &mut dyn RandomSource,
) -> Decision {
    let roll = rng.next_unit();

    if roll >= policy.reject_below {
        let amount = rng.next_between(policy.min_amount, policy.max_amount);
        Decision::Approved(LoanOffer {
            amount,
            installment: amount / policy.installments,
        })
    } else {
        let index = rng.next_index(reasons.len());
        Decision::Rejected(RejectionReason {
            reason: reasons[index].clone(),
        })
    }
}

/// The decision procedure: waits out the configured latency, then draws an
/// outcome using the reasons of the requested language.
pub struct DecisionEngine {
    policy: DecisionPolicy,
    translations: Arc<Translations>,
    rng: Mutex<Box<dyn RandomSource>>,
}

impl DecisionEngine {
    pub fn new(
        policy: DecisionPolicy,
        translations: Arc<Translations>,
        rng: Box<dyn RandomSource>,
    ) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            policy,
            translations,
            rng: Mutex::new(rng),
        })
    }

    pub fn policy(&self) -> &DecisionPolicy {
        &self.policy
    }

    pub async fn decide(&self, language: Language) -> Decision {
        tokio::time::sleep(self.policy.latency).await;
        self.draw_now(language)
    }

    /// Draw without the artificial latency
    pub fn draw_now(&self, language: Language) -> Decision {
        let reasons = self.translations.reasons(language);
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let decision = draw(&self.policy, reasons, rng.as_mut());
        debug!(language = %language, approved = decision.is_approved(), "Loan decision drawn");
        decision
    }
}
