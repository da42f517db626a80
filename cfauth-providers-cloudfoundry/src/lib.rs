//! # cfauth Cloud Foundry
//!
//! Authenticates users against a Cloud Foundry UAA with the OAuth2 Authorization Code flow.
//!
//! The strategy sends the application's credentials to the token endpoint as a
//! `Basic` authorization header, fetches the user-info document with the
//! resulting bearer token, and hands that document to the application's
//! verifier unchanged.
//!
//! ```no_run
//! use cfauth_core::{verify_fn, Verification};
//! use cfauth_providers_cloudfoundry::{CloudFoundryOptions, CloudFoundryStrategy};
//!
//! let strategy = CloudFoundryStrategy::new(
//!     CloudFoundryOptions::new("123-456-789", "shhh-its-a-secret")
//!         .with_callback_url("https://myapp.example.com/auth/cloudfoundry/callback"),
//!     verify_fn(|v: Verification| async move {
//!         Ok(v.profile.get_str("user_id").map(str::to_owned))
//!     }),
//! );
//!
//! // Have the application remember the state it hands out, and check it in the verifier.
//! strategy.set_state_param_callback(|| "random-state".to_string());
//! ```

#![warn(missing_docs)]

use async_trait::async_trait;
use cfauth_core::strategy::utils;
use cfauth_core::{AuthError, AuthOutcome, AuthenticationStrategy, OAuthProvider, Profile, Verify};
use cfauth_flow::{OAuth2Client, OAuth2Strategy, StrategyOptions};
use http::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use http::request::Parts;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// The name the strategy is registered under.
pub const STRATEGY_NAME: &str = "cloudfoundry";

/// Default authorization endpoint.
pub const DEFAULT_AUTHORIZATION_URL: &str = "https://login.cloudfoundry.com/oauth/authorize";

/// Default token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://login.cloudfoundry.com/oauth/token";

/// Default user-info endpoint.
pub const DEFAULT_USER_PROFILE_URI: &str = "https://uaa.cloudfoundry.com/userinfo";

/// Version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns a random-looking value for the `state` parameter of each authorization redirect.
pub type StateParamCallback = Arc<dyn Fn() -> String + Send + Sync>;

/// Configuration for a [`CloudFoundryStrategy`].
///
/// Every endpoint has a default pointing at the public Cloud Foundry login
/// server, so only the client credentials are required.
#[derive(Clone, Deserialize)]
pub struct CloudFoundryOptions {
    /// Your Cloud Foundry application's client id.
    pub client_id: String,
    /// Your Cloud Foundry application's client secret.
    pub client_secret: String,
    /// The UAA authorization endpoint.
    #[serde(default = "default_authorization_url")]
    pub authorization_url: String,
    /// The UAA token endpoint.
    #[serde(default = "default_token_url")]
    pub token_url: String,
    /// URL to which the UAA redirects the user after granting authorization.
    #[serde(default)]
    pub callback_url: Option<String>,
    /// The user-info endpoint.
    #[serde(default = "default_user_profile_uri")]
    pub user_profile_uri: String,
    /// Scopes to request.
    #[serde(default)]
    pub scope: Vec<String>,
    /// Hand the callback request to the verifier, e.g. to check `state`.
    #[serde(default)]
    pub pass_req_to_callback: bool,
    /// Skip the user-info request.
    #[serde(default)]
    pub skip_user_profile: bool,
}

fn default_authorization_url() -> String {
    DEFAULT_AUTHORIZATION_URL.to_string()
}

fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.to_string()
}

fn default_user_profile_uri() -> String {
    DEFAULT_USER_PROFILE_URI.to_string()
}

impl std::fmt::Debug for CloudFoundryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudFoundryOptions")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("authorization_url", &self.authorization_url)
            .field("token_url", &self.token_url)
            .field("callback_url", &self.callback_url)
            .field("user_profile_uri", &self.user_profile_uri)
            .field("scope", &self.scope)
            .field("pass_req_to_callback", &self.pass_req_to_callback)
            .field("skip_user_profile", &self.skip_user_profile)
            .finish()
    }
}

impl CloudFoundryOptions {
    /// Options with the default endpoints.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authorization_url: default_authorization_url(),
            token_url: default_token_url(),
            callback_url: None,
            user_profile_uri: default_user_profile_uri(),
            scope: Vec::new(),
            pass_req_to_callback: false,
            skip_user_profile: false,
        }
    }

    /// Set the authorization endpoint.
    pub fn with_authorization_url(mut self, url: impl Into<String>) -> Self {
        self.authorization_url = url.into();
        self
    }

    /// Set the token endpoint.
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    /// Set the callback URL.
    pub fn with_callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }

    /// Set the user-info endpoint.
    pub fn with_user_profile_uri(mut self, uri: impl Into<String>) -> Self {
        self.user_profile_uri = uri.into();
        self
    }

    /// Set the requested scopes.
    pub fn with_scope<I, S>(mut self, scope: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope = scope.into_iter().map(Into::into).collect();
        self
    }

    /// Hand the callback request to the verifier.
    pub fn pass_req_to_callback(mut self, enabled: bool) -> Self {
        self.pass_req_to_callback = enabled;
        self
    }

    /// Skip the user-info request.
    pub fn skip_user_profile(mut self, enabled: bool) -> Self {
        self.skip_user_profile = enabled;
        self
    }
}

/// Cloud Foundry specific hooks for the generic OAuth2 flow.
pub struct CloudFoundry {
    client: Arc<OAuth2Client>,
    user_profile_uri: RwLock<String>,
    original_authorization: HeaderValue,
    state_param_callback: RwLock<Option<StateParamCallback>>,
}

impl CloudFoundry {
    fn new(client: Arc<OAuth2Client>, user_profile_uri: String, original_authorization: HeaderValue) -> Self {
        Self {
            client,
            user_profile_uri: RwLock::new(user_profile_uri),
            original_authorization,
            state_param_callback: RwLock::new(None),
        }
    }

    /// The endpoint profile fetches currently go to.
    pub fn user_profile_uri(&self) -> String {
        self.user_profile_uri
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Point subsequent profile fetches at another endpoint.
    pub fn set_user_profile_uri(&self, uri: impl Into<String>) {
        *self
            .user_profile_uri
            .write()
            .unwrap_or_else(PoisonError::into_inner) = uri.into();
    }

    /// Restore the client's outbound headers to the single `Basic`
    /// authorization header computed at construction.
    pub fn reset(&self) {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, self.original_authorization.clone());
        self.client.replace_custom_headers(headers);
        log::debug!("Restored the Cloud Foundry token request headers");
    }

    /// Install the callback that produces the `state` parameter.
    pub fn set_state_param_callback<F>(&self, callback: F)
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        *self
            .state_param_callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    /// The authorization header computed from the client credentials.
    pub fn original_authorization(&self) -> &HeaderValue {
        &self.original_authorization
    }
}

#[async_trait]
impl OAuthProvider for CloudFoundry {
    fn provider_id(&self) -> &str {
        STRATEGY_NAME
    }

    fn authorization_params(&self) -> HashMap<String, String> {
        let callback = self
            .state_param_callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut params = HashMap::new();
        if let Some(callback) = callback {
            params.insert("state".to_string(), callback());
        }
        params
    }

    async fn user_profile(&self, access_token: &str) -> Result<Profile, AuthError> {
        let uri = self.user_profile_uri();
        let body = self.client.get(&uri, access_token).await?;
        Profile::from_json(&body).map_err(|e| {
            log::warn!("User info from {uri} is not valid JSON: {e}");
            AuthError::from(e)
        })
    }
}

/// Authenticates requests by delegating to Cloud Foundry using OAuth 2.0.
///
/// Create one per application at startup and register it with an
/// [`Authenticator`](cfauth_core::Authenticator); it is registered as
/// `cloudfoundry`.
///
/// The verifier receives the access token, refresh token and the raw
/// user-info document, plus the callback request when
/// [`CloudFoundryOptions::pass_req_to_callback`] is set.
///
/// Call [`reset`](Self::reset) when logging a user out. Two tasks running
/// `reset` and a login on the same strategy at once can interleave; the last
/// writer of the outbound headers wins.
pub struct CloudFoundryStrategy<V> {
    inner: OAuth2Strategy<CloudFoundry, V>,
}

impl<V: Verify> CloudFoundryStrategy<V> {
    /// Create the strategy from its options and the application's verifier.
    pub fn new(options: CloudFoundryOptions, verifier: V) -> Self {
        Self::with_http_client(options, verifier, reqwest::Client::new())
    }

    /// Create the strategy with a preconfigured HTTP client.
    pub fn with_http_client(options: CloudFoundryOptions, verifier: V, http: reqwest::Client) -> Self {
        let authorization = basic_authorization_header(&options.client_id, &options.client_secret);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, authorization.clone());

        let client = Arc::new(
            OAuth2Client::new(
                options.client_id,
                options.client_secret,
                options.authorization_url,
                options.token_url,
            )
            .with_http_client(http)
            .with_custom_headers(headers)
            .with_auth_method("Bearer")
            .use_authorization_header_for_get(true),
        );
        let provider = CloudFoundry::new(client.clone(), options.user_profile_uri, authorization);
        let strategy_options = StrategyOptions {
            callback_url: options.callback_url,
            scope: options.scope,
            pass_req_to_callback: options.pass_req_to_callback,
            skip_user_profile: options.skip_user_profile,
            ..StrategyOptions::default()
        };

        Self {
            inner: OAuth2Strategy::new(client, provider, verifier, strategy_options),
        }
    }

    /// Always `cloudfoundry`.
    pub fn name(&self) -> &'static str {
        STRATEGY_NAME
    }

    /// Fetch the user-info document for an access token.
    pub async fn user_profile(&self, access_token: &str) -> Result<Profile, AuthError> {
        self.inner.provider().user_profile(access_token).await
    }

    /// The endpoint profile fetches currently go to.
    pub fn user_profile_uri(&self) -> String {
        self.inner.provider().user_profile_uri()
    }

    /// Point subsequent profile fetches at another endpoint.
    ///
    /// The URI is not validated; a bad value surfaces on the next fetch.
    pub fn set_user_profile_uri(&self, uri: impl Into<String>) {
        self.inner.provider().set_user_profile_uri(uri);
    }

    /// Restore the token request headers to the value computed at construction.
    ///
    /// Call this when logging a user out so that the next login starts from
    /// a clean `Authorization` header.
    pub fn reset(&self) {
        self.inner.provider().reset();
    }

    /// The extra parameters for the next authorization redirect:
    /// `{"state": ..}` when a state callback is installed, empty otherwise.
    pub fn authorization_params(&self) -> HashMap<String, String> {
        self.inner.provider().authorization_params()
    }

    /// Install the callback that produces the `state` parameter.
    ///
    /// The strategy neither stores nor checks the value; keep track of the
    /// values handed out and compare them in the verifier.
    pub fn set_state_param_callback<F>(&self, callback: F)
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.inner.provider().set_state_param_callback(callback);
    }

    /// The underlying OAuth2 client.
    pub fn client(&self) -> &OAuth2Client {
        self.inner.client()
    }

    /// The Cloud Foundry hooks.
    pub fn provider(&self) -> &CloudFoundry {
        self.inner.provider()
    }
}

#[async_trait]
impl<V: Verify> AuthenticationStrategy<V::User> for CloudFoundryStrategy<V> {
    fn name(&self) -> &str {
        STRATEGY_NAME
    }

    async fn authenticate(&self, parts: &Parts) -> Result<AuthOutcome<V::User>, AuthError> {
        self.inner.authenticate(parts).await
    }
}

fn basic_authorization_header(client_id: &str, client_secret: &str) -> HeaderValue {
    // "Basic " followed by base64 is always visible ASCII.
    let mut value = HeaderValue::from_str(&utils::basic_authorization(client_id, client_secret))
        .expect("basic authorization is a valid header value");
    value.set_sensitive(true);
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfauth_core::{verify_fn, Verification};
    use http::header::HeaderName;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn build(options: CloudFoundryOptions) -> CloudFoundryStrategy<impl Verify<User = String>> {
        CloudFoundryStrategy::new(
            options,
            verify_fn(|v: Verification| async move { Ok(v.profile.get_str("id").map(str::to_owned)) }),
        )
    }

    fn options() -> CloudFoundryOptions {
        CloudFoundryOptions::new("123-456-789", "shhh-its-a-secret")
    }

    #[test]
    fn reports_a_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn is_named_cloudfoundry() {
        let strategy = build(options());
        assert_eq!(strategy.name(), "cloudfoundry");
        assert_eq!(AuthenticationStrategy::name(&strategy), "cloudfoundry");

        let custom = build(
            options()
                .with_authorization_url("https://login.example.com/oauth/authorize")
                .with_token_url("https://login.example.com/oauth/token"),
        );
        assert_eq!(custom.name(), "cloudfoundry");
    }

    #[test]
    fn defaults_point_at_public_cloud_foundry() {
        let strategy = build(options());
        assert_eq!(strategy.client().authorization_endpoint(), DEFAULT_AUTHORIZATION_URL);
        assert_eq!(strategy.client().token_endpoint(), DEFAULT_TOKEN_URL);
        assert_eq!(strategy.user_profile_uri(), DEFAULT_USER_PROFILE_URI);
        assert_eq!(strategy.client().auth_method(), "Bearer");
        assert!(strategy.client().uses_authorization_header_for_get());
    }

    #[test]
    fn token_requests_carry_basic_credentials() {
        let strategy = build(options());
        let expected = "Basic MTIzLTQ1Ni03ODk6c2hoaC1pdHMtYS1zZWNyZXQ=";
        assert_eq!(strategy.client().custom_header(&AUTHORIZATION).unwrap(), expected);
        assert_eq!(strategy.provider().original_authorization(), expected);
    }

    #[test]
    fn reset_restores_the_original_header() {
        let strategy = build(options());
        let original = strategy.client().custom_header(&AUTHORIZATION).unwrap();

        strategy
            .client()
            .set_custom_header(AUTHORIZATION, HeaderValue::from_static("Bearer stale"));
        strategy.client().set_custom_header(
            HeaderName::from_static("x-leftover"),
            HeaderValue::from_static("1"),
        );
        strategy.reset();

        let headers = strategy.client().custom_headers();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get(AUTHORIZATION), Some(&original));

        strategy.client().remove_custom_header(&AUTHORIZATION);
        strategy.reset();
        assert_eq!(strategy.client().custom_header(&AUTHORIZATION), Some(original));
    }

    #[test]
    fn authorization_params_follow_the_state_callback() {
        let strategy = build(options());
        assert!(strategy.authorization_params().is_empty());

        strategy.set_state_param_callback(|| "abc123".to_string());
        let params = strategy.authorization_params();
        assert_eq!(params.len(), 1);
        assert_eq!(params.get("state").map(String::as_str), Some("abc123"));
    }

    #[test]
    fn state_callback_runs_for_every_redirect() {
        let strategy = build(options());
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = counter.clone();
        strategy.set_state_param_callback(move || {
            let n = seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            format!("state-{n}")
        });

        assert_eq!(strategy.authorization_params()["state"], "state-0");
        assert_eq!(strategy.authorization_params()["state"], "state-1");
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: CloudFoundryOptions = serde_json::from_value(json!({
            "client_id": "app",
            "client_secret": "secret",
            "callback_url": "https://app/cb",
            "scope": ["openid"]
        }))
        .unwrap();
        assert_eq!(options.authorization_url, DEFAULT_AUTHORIZATION_URL);
        assert_eq!(options.token_url, DEFAULT_TOKEN_URL);
        assert_eq!(options.user_profile_uri, DEFAULT_USER_PROFILE_URI);
        assert_eq!(options.callback_url.as_deref(), Some("https://app/cb"));
        assert_eq!(options.scope, vec!["openid".to_string()]);
        assert!(!options.pass_req_to_callback);
    }

    #[test]
    fn debug_hides_the_secret() {
        let rendered = format!("{:?}", options());
        assert!(rendered.contains("123-456-789"));
        assert!(!rendered.contains("shhh-its-a-secret"));
    }

    #[tokio::test]
    async fn user_profile_is_fetched_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "42"})))
            .expect(1)
            .mount(&server)
            .await;

        let strategy = build(options().with_user_profile_uri(format!("{}/userinfo", server.uri())));
        let profile = strategy.user_profile("tok").await.unwrap();
        assert_eq!(profile.into_inner(), json!({"id": "42"}));

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests[0].url.query(), None);
    }

    #[tokio::test]
    async fn set_user_profile_uri_redirects_fetches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"user_id": "7"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(0)
            .mount(&server)
            .await;

        let strategy = build(options().with_user_profile_uri(format!("{}/userinfo", server.uri())));
        let uri = format!("{}/info", server.uri());
        strategy.set_user_profile_uri(uri.clone());
        assert_eq!(strategy.user_profile_uri(), uri);

        let profile = strategy.user_profile("tok").await.unwrap();
        assert_eq!(profile.get_str("user_id"), Some("7"));
    }

    #[tokio::test]
    async fn invalid_json_profile_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not-json"))
            .mount(&server)
            .await;

        let strategy = build(options().with_user_profile_uri(format!("{}/userinfo", server.uri())));
        let err = strategy.user_profile("tok").await.unwrap_err();
        assert!(matches!(err, AuthError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn profile_endpoint_errors_propagate() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_token"))
            .mount(&server)
            .await;

        let strategy = build(options().with_user_profile_uri(format!("{}/userinfo", server.uri())));
        let err = strategy.user_profile("expired").await.unwrap_err();
        assert!(matches!(err, AuthError::Http { status: 401, .. }));
    }

    #[tokio::test]
    async fn unreachable_profile_endpoint_is_a_network_error() {
        let strategy = build(options().with_user_profile_uri("http://127.0.0.1:1/userinfo"));
        let err = strategy.user_profile("tok").await.unwrap_err();
        assert!(matches!(err, AuthError::Network(_)));
    }
}
