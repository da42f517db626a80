//! # cfauth
//!
//! Cloud Foundry UAA login for Rust applications.
//!
//! This crate re-exports the pieces of the framework behind feature flags:
//!
//! - `flow`: the generic OAuth2 client and strategy ([`flow`]).
//! - `cloudfoundry`: the Cloud Foundry strategy ([`cloudfoundry`]).

#![warn(missing_docs)]

pub use cfauth_core as core;
pub use cfauth_core::{
    verify_fn, AuthError, AuthOutcome, AuthenticationStrategy, Authenticator, ForwardedRequest,
    OAuthToken, Profile, Verification, Verify,
};

/// The generic OAuth2 flow.
#[cfg(feature = "flow")]
pub use cfauth_flow as flow;

/// The Cloud Foundry strategy.
#[cfg(feature = "cloudfoundry")]
pub use cfauth_providers_cloudfoundry as cloudfoundry;

#[cfg(feature = "cloudfoundry")]
pub use cfauth_providers_cloudfoundry::{CloudFoundryOptions, CloudFoundryStrategy};
