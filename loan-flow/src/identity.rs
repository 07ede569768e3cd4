use async_trait::async_trait;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::{FlowError, Result};

/// Identity provider the session signs in with
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Sign in with a custom token when one is given, anonymously otherwise.
    /// Returns the user id assigned by the provider.
    async fn sign_in(&self, token: Option<&str>) -> Result<String>;
}

/// Resolve a user id for a new session. Never fails: when the provider is
/// unreachable or rejects the token, a local placeholder id is issued.
pub async fn authenticate(provider: &dyn IdentityProvider, token: Option<&str>) -> String {
    match provider.sign_in(token).await {
        Ok(user_id) if !user_id.trim().is_empty() => {
            info!(user_id = %user_id, custom_token = token.is_some(), "Signed in");
            user_id
        }
        Ok(_) => {
            let fallback = placeholder_user_id();
            error!(user_id = %fallback, "Identity provider returned an empty user id, using placeholder");
            fallback
        }
        Err(e) => {
            let fallback = placeholder_user_id();
            error!(error = %e, user_id = %fallback, "Sign-in failed, using placeholder");
            fallback
        }
    }
}

/// `user-<unix millis>-<0..100000>`
pub fn placeholder_user_id() -> String {
    format!(
        "user-{}-{}",
        chrono::Utc::now().timestamp_millis(),
        rand::random_range(0..100_000u32)
    )
}

/// Whether `user_id` has the shape produced by [`placeholder_user_id`]
pub fn is_placeholder_user_id(user_id: &str) -> bool {
    let Some(rest) = user_id.strip_prefix("user-") else {
        return false;
    };
    let Some((millis, suffix)) = rest.split_once('-') else {
        return false;
    };
    let digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    digits(millis) && digits(suffix) && suffix.parse::<u32>().is_ok_and(|n| n < 100_000)
}

/// In-process provider. Anonymous sign-ins get a fresh UUID; a custom token
/// is taken as an already-verified user id.
#[derive(Debug, Default, Clone)]
pub struct AnonymousIdentityProvider;

impl AnonymousIdentityProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl IdentityProvider for AnonymousIdentityProvider {
    async fn sign_in(&self, token: Option<&str>) -> Result<String> {
        match token.map(str::trim) {
            Some("") => Err(FlowError::Identity("custom token is empty".to_string())),
            Some(token) => Ok(token.to_string()),
            None => Ok(Uuid::new_v4().to_string()),
        }
    }
}

#[cfg(feature = "rest-identity")]
pub use rest::RestIdentityProvider;

#[cfg(feature = "rest-identity")]
mod rest {
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use tracing::debug;

    use super::IdentityProvider;
    use crate::error::{FlowError, Result};

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct SignInRequest<'a> {
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<&'a str>,
        return_secure_token: bool,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct SignInResponse {
        local_id: Option<String>,
    }

    /// Provider speaking the Identity Toolkit REST dialect:
    /// `accounts:signUp` for anonymous users and
    /// `accounts:signInWithCustomToken` for token sign-in.
    #[derive(Clone)]
    pub struct RestIdentityProvider {
        client: reqwest::Client,
        base_url: String,
        api_key: String,
    }

    impl RestIdentityProvider {
        pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
            Self {
                client: reqwest::Client::new(),
                base_url: base_url.into().trim_end_matches('/').to_string(),
                api_key: api_key.into(),
            }
        }

        fn endpoint(&self, token: Option<&str>) -> String {
            let method = if token.is_some() {
                "accounts:signInWithCustomToken"
            } else {
                "accounts:signUp"
            };
            format!("{}/{}", self.base_url, method)
        }
    }

    #[async_trait]
    impl IdentityProvider for RestIdentityProvider {
        async fn sign_in(&self, token: Option<&str>) -> Result<String> {
            let url = self.endpoint(token);
            debug!(url = %url, "Calling identity provider");

            let response = self
                .client
                .post(&url)
                .query(&[("key", self.api_key.as_str())])
                .json(&SignInRequest {
                    token,
                    return_secure_token: true,
                })
                .send()
                .await
                .map_err(|e| FlowError::Identity(e.to_string()))?;

            if !response.status().is_success() {
                return Err(FlowError::Identity(format!(
                    "identity provider returned {}",
                    response.status()
                )));
            }

            let body: SignInResponse = response
                .json()
                .await
                .map_err(|e| FlowError::Identity(e.to_string()))?;

            body.local_id
                .ok_or_else(|| FlowError::Identity("response carried no localId".to_string()))
        }
    }

}
