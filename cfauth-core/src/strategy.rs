use crate::error::AuthError;
use async_trait::async_trait;
use http::request::Parts;
use std::collections::HashMap;
use std::sync::Arc;

/// The result of running a strategy against a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome<U> {
    /// The user agent must be sent to this URL to continue.
    Redirect(String),
    /// The user was authenticated.
    Success(U),
    /// Authentication was refused, with an optional message for the user.
    Fail(Option<String>),
}

impl<U> AuthOutcome<U> {
    /// Returns the authenticated user, if any.
    pub fn into_user(self) -> Option<U> {
        match self {
            AuthOutcome::Success(user) => Some(user),
            _ => None,
        }
    }
}

/// Trait for an authentication strategy.
///
/// A strategy is registered under its [`name`](AuthenticationStrategy::name)
/// and is responsible for turning an inbound request into an outcome.
#[async_trait]
pub trait AuthenticationStrategy<U>: Send + Sync {
    /// The name the strategy is registered and routed under.
    fn name(&self) -> &str;

    /// Attempt to authenticate the request.
    ///
    /// Returns:
    /// - `Ok(AuthOutcome::Redirect(url))` when the flow has to leave the application.
    /// - `Ok(AuthOutcome::Success(user))` if authentication was successful.
    /// - `Ok(AuthOutcome::Fail(_))` if the user was refused.
    /// - `Err(AuthError)` for transport, provider or configuration failures.
    async fn authenticate(&self, parts: &Parts) -> Result<AuthOutcome<U>, AuthError>;
}

#[async_trait]
impl<U, T> AuthenticationStrategy<U> for Arc<T>
where
    T: AuthenticationStrategy<U> + ?Sized,
    U: Send + 'static,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn authenticate(&self, parts: &Parts) -> Result<AuthOutcome<U>, AuthError> {
        (**self).authenticate(parts).await
    }
}

/// A registry of strategies keyed by name.
pub struct Authenticator<U> {
    strategies: HashMap<String, Arc<dyn AuthenticationStrategy<U>>>,
}

impl<U> Clone for Authenticator<U> {
    fn clone(&self) -> Self {
        Self {
            strategies: self.strategies.clone(),
        }
    }
}

impl<U> Authenticator<U> {
    /// Create a new builder for the Authenticator.
    pub fn builder() -> AuthenticatorBuilder<U> {
        AuthenticatorBuilder::default()
    }

    /// Look up a registered strategy.
    pub fn strategy(&self, name: &str) -> Option<Arc<dyn AuthenticationStrategy<U>>> {
        self.strategies.get(name).cloned()
    }

    /// Names of all registered strategies.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.strategies.keys().map(String::as_str)
    }

    /// Authenticate the request with the strategy registered under `name`.
    pub async fn authenticate(&self, name: &str, parts: &Parts) -> Result<AuthOutcome<U>, AuthError> {
        let strategy = self
            .strategies
            .get(name)
            .ok_or_else(|| AuthError::UnknownStrategy(name.to_string()))?;
        strategy.authenticate(parts).await
    }
}

/// Builder for the `Authenticator`.
pub struct AuthenticatorBuilder<U> {
    strategies: HashMap<String, Arc<dyn AuthenticationStrategy<U>>>,
}

impl<U> Default for AuthenticatorBuilder<U> {
    fn default() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }
}

impl<U> AuthenticatorBuilder<U> {
    /// Register a strategy under its own name.
    ///
    /// A strategy registered later under the same name replaces the earlier one.
    pub fn with_strategy<S>(mut self, strategy: S) -> Self
    where
        S: AuthenticationStrategy<U> + 'static,
    {
        let name = strategy.name().to_string();
        self.strategies.insert(name, Arc::new(strategy));
        self
    }

    /// Build the `Authenticator`.
    pub fn build(self) -> Authenticator<U> {
        Authenticator {
            strategies: self.strategies,
        }
    }
}

/// Utility functions for common authentication tasks.
pub mod utils {
    use base64::Engine;
    use std::collections::HashMap;

    /// Build the `Basic` authorization value for a client id and secret.
    pub fn basic_authorization(client_id: &str, client_secret: &str) -> String {
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{client_id}:{client_secret}"));
        format!("Basic {encoded}")
    }

    /// Decode the query string of a URI.
    ///
    /// When a key repeats, the last value wins.
    pub fn query_params(uri: &http::Uri) -> HashMap<String, String> {
        uri.query()
            .map(|query| {
                url::form_urlencoded::parse(query.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
