//! # cfauth Flow
//!
//! `cfauth-flow` drives the OAuth2 Authorization Code flow. It is the bridge between the core
//! traits and the provider crates: providers describe their endpoints and how to fetch a
//! profile, and this crate performs the redirect, the code exchange and the verification.
//!
//! ## Key Components
//!
//! - **[`OAuth2Client`]**: Builds authorization URLs, exchanges codes and calls protected resources.
//! - **[`OAuth2Strategy`]**: The authenticate entry point shared by every OAuth2 provider.
//! - **[`StrategyOptions`]**: Callback URL, scopes and verifier options.

#![warn(missing_docs)]

pub use cfauth_core::{
    verify_fn, AuthError, AuthOutcome, AuthenticationStrategy, Authenticator, OAuthProvider,
    OAuthToken, Profile, Verification, Verify,
};

/// Generic OAuth2 client.
pub mod client;
/// OAuth2 Authorization Code flow implementation.
pub mod oauth2;

pub use client::OAuth2Client;
pub use oauth2::{OAuth2Strategy, StrategyOptions};
