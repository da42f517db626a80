//! # cfauth Core
//!
//! `cfauth-core` provides the foundational traits and types for the cfauth authentication framework.
//! It defines the abstractions shared by the OAuth2 flow and the provider crates: the provider hooks,
//! the verification step that turns a provider profile into an application user, and the
//! name-keyed strategy registry a host application routes through.

#![warn(missing_docs)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;

/// Errors that can occur during the authentication process.
pub mod error;
pub use crate::error::AuthError;

/// Tokens, profiles and the data handed to verifiers.
pub mod state;
pub use crate::state::{ForwardedRequest, OAuthToken, Profile, Verification};

/// Strategies, the strategy registry and header utilities.
pub mod strategy;
pub use crate::strategy::{AuthOutcome, AuthenticationStrategy, Authenticator, AuthenticatorBuilder};

/// Provider-specific hooks used by the generic OAuth2 flow.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Get the provider identifier.
    fn provider_id(&self) -> &str;

    /// Extra query parameters for the authorization redirect.
    fn authorization_params(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    /// Fetch the user-info document with an access token.
    async fn user_profile(&self, access_token: &str) -> Result<Profile, AuthError>;
}

/// Decides which application user, if any, a verified provider login maps to.
///
/// Return `Ok(None)` to refuse the user. Return an error only for internal
/// failures such as an unreachable user database.
#[async_trait]
pub trait Verify: Send + Sync {
    /// The type of the local user object.
    type User: Send + 'static;

    /// Map a completed provider login to a local user.
    async fn verify(&self, verification: Verification) -> Result<Option<Self::User>, AuthError>;
}

/// A [`Verify`] implementation backed by an async closure. See [`verify_fn`].
#[derive(Clone)]
pub struct VerifyFn<F>(F);

/// Use an async closure as a verifier.
///
/// ```
/// use cfauth_core::{verify_fn, Verification};
///
/// let verifier = verify_fn(|verification: Verification| async move {
///     Ok(verification.profile.get_str("user_id").map(str::to_owned))
/// });
/// # let _ = verifier;
/// ```
pub fn verify_fn<F, Fut, U>(f: F) -> VerifyFn<F>
where
    F: Fn(Verification) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<U>, AuthError>> + Send,
{
    VerifyFn(f)
}

#[async_trait]
impl<F, Fut, U> Verify for VerifyFn<F>
where
    F: Fn(Verification) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<U>, AuthError>> + Send,
    U: Send + 'static,
{
    type User = U;

    async fn verify(&self, verification: Verification) -> Result<Option<U>, AuthError> {
        (self.0)(verification).await
    }
}

#[async_trait]
impl<T: Verify + ?Sized> Verify for std::sync::Arc<T> {
    type User = T::User;

    async fn verify(&self, verification: Verification) -> Result<Option<Self::User>, AuthError> {
        (**self).verify(verification).await
    }
}
