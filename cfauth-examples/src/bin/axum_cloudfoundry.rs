use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use cfauth::cloudfoundry::STRATEGY_NAME;
use cfauth::{
    AuthError, AuthOutcome, Authenticator, CloudFoundryOptions, CloudFoundryStrategy, Verification,
    Verify,
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing_subscriber::EnvFilter;

/// The application's view of a Cloud Foundry user.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct User {
    pub id: String,
    pub username: Option<String>,
    pub email: Option<String>,
}

/// State values handed out on the authorization redirect and not yet seen again.
type IssuedStates = Arc<Mutex<HashSet<String>>>;

/// Checks the round-tripped `state` before accepting the profile.
pub struct StateCheckingVerifier {
    states: IssuedStates,
}

#[async_trait]
impl Verify for StateCheckingVerifier {
    type User = User;

    async fn verify(&self, verification: Verification) -> Result<Option<User>, AuthError> {
        let state = verification
            .request
            .as_ref()
            .and_then(|request| request.query().get("state").cloned());
        let known = match state {
            Some(state) => self
                .states
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&state),
            None => false,
        };
        if !known {
            tracing::warn!("state value didn't match, possible CSRF");
            return Ok(None);
        }

        let profile = &verification.profile;
        let Some(id) = profile.get_str("user_id").or_else(|| profile.get_str("id")) else {
            return Ok(None);
        };
        Ok(Some(User {
            id: id.to_string(),
            username: profile.get_str("user_name").map(str::to_owned),
            email: profile.get_str("email").map(str::to_owned),
        }))
    }
}

#[derive(Clone)]
struct AppState {
    authenticator: Authenticator<User>,
    strategy: Arc<CloudFoundryStrategy<StateCheckingVerifier>>,
}

fn build_state(options: CloudFoundryOptions) -> AppState {
    let states = IssuedStates::default();
    let strategy = Arc::new(CloudFoundryStrategy::new(
        options.pass_req_to_callback(true),
        StateCheckingVerifier {
            states: states.clone(),
        },
    ));
    strategy.set_state_param_callback(move || {
        let state = uuid::Uuid::new_v4().to_string();
        states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(state.clone());
        state
    });

    let authenticator = Authenticator::builder()
        .with_strategy(strategy.clone())
        .build();
    AppState {
        authenticator,
        strategy,
    }
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/auth/cloudfoundry", get(login))
        .route("/auth/cloudfoundry/callback", get(login))
        .route("/logout", get(logout))
        .with_state(state)
}

async fn index() -> impl IntoResponse {
    "Welcome! Go to /auth/cloudfoundry to login."
}

async fn login(State(state): State<AppState>, request: Request) -> Response {
    let (parts, _body) = request.into_parts();
    match state.authenticator.authenticate(STRATEGY_NAME, &parts).await {
        Ok(AuthOutcome::Redirect(url)) => Redirect::to(&url).into_response(),
        Ok(AuthOutcome::Success(user)) => {
            tracing::info!(user = %user.id, "Cloud Foundry login succeeded");
            Json(user).into_response()
        }
        Ok(AuthOutcome::Fail(message)) => (
            StatusCode::UNAUTHORIZED,
            message.unwrap_or_else(|| "Login refused".to_string()),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Cloud Foundry login failed");
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    state.strategy.reset();
    Redirect::to("/")
}

fn options_from_env() -> CloudFoundryOptions {
    let client_id = std::env::var("CF_CLIENT_ID").expect("CF_CLIENT_ID must be set");
    let client_secret = std::env::var("CF_CLIENT_SECRET").expect("CF_CLIENT_SECRET must be set");
    let callback_url = std::env::var("CF_CALLBACK_URL")
        .unwrap_or_else(|_| "http://localhost:3000/auth/cloudfoundry/callback".to_string());

    let mut options = CloudFoundryOptions::new(client_id, client_secret).with_callback_url(callback_url);
    if let Ok(url) = std::env::var("CF_AUTHORIZATION_URL") {
        options = options.with_authorization_url(url);
    }
    if let Ok(url) = std::env::var("CF_TOKEN_URL") {
        options = options.with_token_url(url);
    }
    if let Ok(uri) = std::env::var("CF_USER_PROFILE_URI") {
        options = options.with_user_profile_uri(uri);
    }
    if let Ok(scope) = std::env::var("CF_SCOPE") {
        options = options.with_scope(scope.split_whitespace());
    }
    options
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,cfauth_flow=debug")),
        )
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let app = app(build_state(options_from_env()));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .unwrap();
    tracing::info!("Listening on {}", listener.local_addr().unwrap());
    axum::serve(listener, app).await.unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, HeaderValue};
    use serde_json::json;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options(server: &MockServer) -> CloudFoundryOptions {
        CloudFoundryOptions::new("app", "secret")
            .with_authorization_url(format!("{}/oauth/authorize", server.uri()))
            .with_token_url(format!("{}/oauth/token", server.uri()))
            .with_user_profile_uri(format!("{}/userinfo", server.uri()))
            .with_callback_url("/auth/cloudfoundry/callback")
    }

    async fn mount_uaa(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "at"})))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "user_id": "u-1",
                "user_name": "marissa",
                "email": "marissa@example.com"
            })))
            .mount(server)
            .await;
    }

    fn get(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri(uri)
            .header(header::HOST, "localhost:3000")
            .body(Body::empty())
            .unwrap()
    }

    async fn issued_state(app: &Router) -> String {
        let response = app.clone().oneshot(get("/auth/cloudfoundry")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        let location = url::Url::parse(location).unwrap();
        location
            .query_pairs()
            .find(|(key, _)| key == "state")
            .map(|(_, value)| value.into_owned())
            .unwrap()
    }

    #[tokio::test]
    async fn test_login_redirects_with_state() {
        let server = MockServer::start().await;
        let app = app(build_state(options(&server)));

        let state = issued_state(&app).await;
        assert!(!state.is_empty());
    }

    #[tokio::test]
    async fn test_callback_with_issued_state() {
        let server = MockServer::start().await;
        mount_uaa(&server).await;
        let app = app(build_state(options(&server)));

        let state = issued_state(&app).await;
        let response = app
            .clone()
            .oneshot(get(&format!("/auth/cloudfoundry/callback?code=c&state={state}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let user: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            user,
            json!({"id": "u-1", "username": "marissa", "email": "marissa@example.com"})
        );

        // A state value is only good once.
        let response = app
            .oneshot(get(&format!("/auth/cloudfoundry/callback?code=c&state={state}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_callback_with_forged_state() {
        let server = MockServer::start().await;
        mount_uaa(&server).await;
        let app = app(build_state(options(&server)));

        let response = app
            .oneshot(get("/auth/cloudfoundry/callback?code=c&state=forged"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_token_failure_is_bad_gateway() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let app = app(build_state(options(&server)));

        let response = app
            .oneshot(get("/auth/cloudfoundry/callback?code=c&state=s"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_logout_resets_token_headers() {
        let server = MockServer::start().await;
        let state = build_state(options(&server));
        let original = state.strategy.provider().original_authorization().clone();
        state
            .strategy
            .client()
            .set_custom_header(header::AUTHORIZATION, HeaderValue::from_static("stale"));
        let app = app(state.clone());

        let response = app.oneshot(get("/logout")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/");
        assert_eq!(
            state.strategy.client().custom_header(&header::AUTHORIZATION),
            Some(original)
        );
    }
}
