//! Identity provider (OAuth 2.0 authorization-code flow)

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::ProviderConfig;
use crate::error::AppError;

/// Identity asserted by the provider after a successful code exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderIdentity {
    /// Stable subject identifier
    pub subject: String,
    pub email: String,
}

/// Third-party identity provider
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// URL that starts authentication at the provider
    fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<String, AppError>;

    /// Exchange an authorization code for the user's identity
    ///
    /// # Errors
    /// `AuthExchange` when the provider rejects the code; other variants for
    /// transport or decoding failures
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<ProviderIdentity, AppError>;
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Token endpoint error body (RFC 6749 section 5.2)
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Generic OAuth 2.0 provider reached over HTTP
pub struct OAuthIdentityProvider {
    config: ProviderConfig,
    http_client: reqwest::Client,
}

impl OAuthIdentityProvider {
    pub fn new(config: ProviderConfig, http_client: reqwest::Client) -> Self {
        Self {
            config,
            http_client,
        }
    }
}

#[async_trait]
impl IdentityProvider for OAuthIdentityProvider {
    fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<String, AppError> {
        let mut url = url::Url::parse(&self.config.authorize_url).map_err(|e| {
            AppError::Config(format!("auth.provider.authorize_url is invalid: {e}"))
        })?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", &self.config.scopes)
            .append_pair("state", state);
        Ok(url.to_string())
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<ProviderIdentity, AppError> {
        // 1. Exchange code for access token
        let response = self
            .http_client
            .post(&self.config.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let reason = match response.json::<TokenErrorResponse>().await {
                Ok(body) => body.error_description.unwrap_or(body.error),
                Err(_) => format!("token endpoint returned {status}"),
            };
            return Err(AppError::AuthExchange(reason));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::AuthExchange(format!("malformed token response: {e}")))?;

        // 2. Fetch user info
        let userinfo: serde_json::Value = self
            .http_client
            .get(&self.config.userinfo_url)
            .bearer_auth(&token.access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?
            .error_for_status()
            .map_err(|e| AppError::AuthExchange(format!("userinfo request failed: {e}")))?
            .json()
            .await?;

        identity_from_userinfo(&userinfo)
    }
}

/// Pull subject and email out of a userinfo document
///
/// OpenID Connect providers use `sub`; some OAuth-only providers use a
/// numeric `id` instead.
fn identity_from_userinfo(userinfo: &serde_json::Value) -> Result<ProviderIdentity, AppError> {
    let subject = match userinfo.get("sub").or_else(|| userinfo.get("id")) {
        Some(serde_json::Value::String(subject)) => subject.clone(),
        Some(serde_json::Value::Number(subject)) => subject.to_string(),
        _ => {
            return Err(AppError::AuthExchange(
                "userinfo response has no subject".to_string(),
            ));
        }
    };

    let email = userinfo
        .get("email")
        .and_then(|email| email.as_str())
        .filter(|email| !email.is_empty())
        .ok_or_else(|| AppError::AuthExchange("userinfo response has no email".to_string()))?;

    Ok(ProviderIdentity {
        subject,
        email: email.to_string(),
    })
}
