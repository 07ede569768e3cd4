use anyhow::{Context, Result, bail};
use loan_flow::DecisionPolicy;
use loan_flow::controller::DEFAULT_APP_ID;
use std::time::Duration;

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Settings read from the environment at startup
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub app_id: String,
    pub bind_addr: String,
    pub database_url: Option<String>,
    pub identity_url: Option<String>,
    pub identity_api_key: Option<String>,
    pub initial_auth_token: Option<String>,
    pub policy: DecisionPolicy,
    /// Idle time after which an in-memory session is dropped
    pub session_ttl: Duration,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let mut policy = DecisionPolicy::default();
        if let Some(rate) = var("APPROVAL_RATE") {
            let approval_rate: f64 = rate
                .parse()
                .with_context(|| format!("APPROVAL_RATE must be a number, got '{rate}'"))?;
            policy = policy.with_approval_rate(approval_rate);
        }
        if let Some(latency) = var("DECISION_LATENCY_MS") {
            let millis: u64 = latency.parse().with_context(|| {
                format!("DECISION_LATENCY_MS must be a whole number, got '{latency}'")
            })?;
            policy.latency = Duration::from_millis(millis);
        }
        policy.validate()?;

        let session_ttl = match var("SESSION_TTL_SECS") {
            Some(ttl) => {
                let secs: u64 = ttl.parse().with_context(|| {
                    format!("SESSION_TTL_SECS must be a whole number, got '{ttl}'")
                })?;
                if secs == 0 {
                    bail!("SESSION_TTL_SECS must be at least 1");
                }
                Duration::from_secs(secs)
            }
            None => DEFAULT_SESSION_TTL,
        };

        Ok(Self {
            app_id: var("APP_ID").unwrap_or_else(|| DEFAULT_APP_ID.to_string()),
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            database_url: var("DATABASE_URL"),
            identity_url: var("IDENTITY_URL"),
            identity_api_key: var("IDENTITY_API_KEY"),
            initial_auth_token: var("INITIAL_AUTH_TOKEN"),
            policy,
            session_ttl,
        })
    }
}
