use crate::client::OAuth2Client;
use async_trait::async_trait;
use cfauth_core::strategy::utils;
use cfauth_core::{
    AuthError, AuthOutcome, AuthenticationStrategy, ForwardedRequest, OAuthProvider, Profile,
    Verification, Verify,
};
use http::request::Parts;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Options shared by every OAuth2 strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyOptions {
    /// Where the provider sends the user back. A path is resolved against
    /// the `Host` of the inbound request.
    pub callback_url: Option<String>,
    /// Scopes requested on the authorization redirect.
    pub scope: Vec<String>,
    /// Separator used to join `scope`.
    pub scope_separator: String,
    /// Hand the callback request to the verifier.
    pub pass_req_to_callback: bool,
    /// Do not fetch the user-info document; the verifier gets an empty profile.
    pub skip_user_profile: bool,
}

impl Default for StrategyOptions {
    fn default() -> Self {
        Self {
            callback_url: None,
            scope: Vec::new(),
            scope_separator: " ".to_string(),
            pass_req_to_callback: false,
            skip_user_profile: false,
        }
    }
}

/// Orchestrates the standard OAuth2 Authorization Code flow.
///
/// The same entry point serves both legs of the flow: a request without a
/// `code` is answered with a redirect to the provider, and the provider's
/// callback carrying a `code` is exchanged, profiled and verified.
pub struct OAuth2Strategy<P, V> {
    client: Arc<OAuth2Client>,
    provider: P,
    verifier: V,
    options: StrategyOptions,
}

impl<P: OAuthProvider, V: Verify> OAuth2Strategy<P, V> {
    /// Create a strategy from a shared client, provider hooks and a verifier.
    pub fn new(client: Arc<OAuth2Client>, provider: P, verifier: V, options: StrategyOptions) -> Self {
        Self {
            client,
            provider,
            verifier,
            options,
        }
    }

    /// The provider hooks.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// The underlying OAuth2 client.
    pub fn client(&self) -> &OAuth2Client {
        &self.client
    }

    /// The strategy options.
    pub fn options(&self) -> &StrategyOptions {
        &self.options
    }

    /// Build the authorization redirect for this request.
    pub fn authorization_url(&self, parts: &Parts) -> Result<String, AuthError> {
        let callback_url = self.callback_url(parts);
        let scope = (!self.options.scope.is_empty())
            .then(|| self.options.scope.join(&self.options.scope_separator));
        let params = self.provider.authorization_params();

        let url = self
            .client
            .authorize_url(callback_url.as_deref(), scope.as_deref(), &params)?;
        Ok(url.to_string())
    }

    async fn complete(&self, parts: &Parts, code: &str) -> Result<AuthOutcome<V::User>, AuthError> {
        let callback_url = self.callback_url(parts);
        let token = self
            .client
            .exchange_code(code, callback_url.as_deref())
            .await?;

        let profile = if self.options.skip_user_profile {
            Profile::default()
        } else {
            self.provider.user_profile(&token.access_token).await?
        };

        let verification = Verification {
            request: self
                .options
                .pass_req_to_callback
                .then(|| ForwardedRequest::from(parts)),
            token,
            profile,
        };

        match self.verifier.verify(verification).await? {
            Some(user) => Ok(AuthOutcome::Success(user)),
            None => {
                log::debug!("Verifier refused {} login", self.provider.provider_id());
                Ok(AuthOutcome::Fail(None))
            }
        }
    }

    fn callback_url(&self, parts: &Parts) -> Option<String> {
        let callback_url = self.options.callback_url.as_deref()?;
        let absolute = url::Url::parse(callback_url)
            .is_ok_and(|url| matches!(url.scheme(), "http" | "https"));
        if absolute {
            return Some(callback_url.to_string());
        }
        let host = parts
            .headers
            .get(http::header::HOST)
            .and_then(|h| h.to_str().ok())
            .or_else(|| parts.uri.authority().map(|a| a.as_str()));
        let Some(host) = host else {
            return Some(callback_url.to_string());
        };
        let scheme = parts
            .headers
            .get("x-forwarded-proto")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.split(',').next())
            .map(str::trim)
            .or_else(|| parts.uri.scheme_str())
            .unwrap_or("http");
        let path = callback_url.strip_prefix('/').unwrap_or(callback_url);
        Some(format!("{scheme}://{host}/{path}"))
    }
}

#[async_trait]
impl<P, V> AuthenticationStrategy<V::User> for OAuth2Strategy<P, V>
where
    P: OAuthProvider,
    V: Verify,
{
    fn name(&self) -> &str {
        self.provider.provider_id()
    }

    async fn authenticate(&self, parts: &Parts) -> Result<AuthOutcome<V::User>, AuthError> {
        let query = utils::query_params(&parts.uri);

        if let Some(error) = query.get("error") {
            let description = query
                .get("error_description")
                .cloned()
                .unwrap_or_else(|| error.clone());
            if error == "access_denied" {
                log::debug!("User denied access to {}", self.provider.provider_id());
                return Ok(AuthOutcome::Fail(Some(description)));
            }
            log::warn!(
                "{} returned an authorization error: {}",
                self.provider.provider_id(),
                error
            );
            return Err(AuthError::Provider(description));
        }

        if let Some(code) = query.get("code") {
            return self.complete(parts, code).await;
        }

        let url = self.authorization_url(parts)?;
        log::debug!("Redirecting to {} for authorization", self.provider.provider_id());
        Ok(AuthOutcome::Redirect(url))
    }
}
