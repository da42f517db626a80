use cfauth_core::{AuthError, OAuthToken};
use http::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};
use url::Url;

const RESERVED_AUTHORIZE_PARAMS: [&str; 4] = ["response_type", "client_id", "redirect_uri", "scope"];

/// A generic OAuth2 client.
///
/// Knows the provider's endpoints and the application's credentials, and
/// performs the three requests of the authorization code flow: building the
/// authorization redirect, exchanging the code, and calling protected
/// resources with the resulting access token.
///
/// Custom headers are sent with every token-endpoint request and every
/// resource request. They can be changed after construction through `&self`;
/// two tasks mutating the headers of the same client concurrently may
/// interleave, and the last write wins.
pub struct OAuth2Client {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    authorize_url: String,
    token_url: String,
    auth_method: String,
    access_token_name: String,
    use_authorization_header_for_get: bool,
    custom_headers: RwLock<HeaderMap>,
}

impl std::fmt::Debug for OAuth2Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2Client")
            .field("client_id", &self.client_id)
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .field("auth_method", &self.auth_method)
            .field(
                "use_authorization_header_for_get",
                &self.use_authorization_header_for_get,
            )
            .finish_non_exhaustive()
    }
}

impl OAuth2Client {
    /// Create a client for the given credentials and endpoints.
    ///
    /// Nothing is validated here; a malformed endpoint surfaces as an
    /// error from the first request that uses it.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        authorize_url: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authorize_url: authorize_url.into(),
            token_url: token_url.into(),
            auth_method: "Bearer".to_string(),
            access_token_name: "access_token".to_string(),
            use_authorization_header_for_get: false,
            custom_headers: RwLock::new(HeaderMap::new()),
        }
    }

    /// Use a preconfigured HTTP client.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Headers sent with every request to the provider.
    pub fn with_custom_headers(self, headers: HeaderMap) -> Self {
        self.replace_custom_headers(headers);
        self
    }

    /// The scheme used when presenting an access token, `Bearer` by default.
    pub fn with_auth_method(mut self, method: impl Into<String>) -> Self {
        self.auth_method = method.into();
        self
    }

    /// The query parameter carrying the access token when it is not sent
    /// in a header, `access_token` by default.
    pub fn with_access_token_name(mut self, name: impl Into<String>) -> Self {
        self.access_token_name = name.into();
        self
    }

    /// Send the access token in the `Authorization` header on resource
    /// requests instead of the query string.
    pub fn use_authorization_header_for_get(mut self, enabled: bool) -> Self {
        self.use_authorization_header_for_get = enabled;
        self
    }

    /// The application's client identifier.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The authorization endpoint.
    pub fn authorization_endpoint(&self) -> &str {
        &self.authorize_url
    }

    /// The token endpoint.
    pub fn token_endpoint(&self) -> &str {
        &self.token_url
    }

    /// The scheme used when presenting an access token.
    pub fn auth_method(&self) -> &str {
        &self.auth_method
    }

    /// Whether resource requests carry the token in the `Authorization` header.
    pub fn uses_authorization_header_for_get(&self) -> bool {
        self.use_authorization_header_for_get
    }

    /// A snapshot of the current custom headers.
    pub fn custom_headers(&self) -> HeaderMap {
        self.custom_headers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The current value of a custom header.
    pub fn custom_header(&self, name: &HeaderName) -> Option<HeaderValue> {
        self.custom_headers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Add or overwrite a custom header.
    pub fn set_custom_header(&self, name: HeaderName, value: HeaderValue) {
        self.custom_headers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, value);
    }

    /// Remove a custom header.
    pub fn remove_custom_header(&self, name: &HeaderName) {
        self.custom_headers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    /// Replace every custom header at once.
    pub fn replace_custom_headers(&self, headers: HeaderMap) {
        *self
            .custom_headers
            .write()
            .unwrap_or_else(PoisonError::into_inner) = headers;
    }

    /// Build the URL the user agent is redirected to.
    ///
    /// `response_type`, `client_id`, `redirect_uri` and `scope` always come
    /// from the arguments; `extra` parameters are appended in key order and
    /// cannot override them.
    pub fn authorize_url(
        &self,
        redirect_uri: Option<&str>,
        scope: Option<&str>,
        extra: &HashMap<String, String>,
    ) -> Result<Url, AuthError> {
        let mut url = Url::parse(&self.authorize_url)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.client_id);
            if let Some(redirect_uri) = redirect_uri {
                query.append_pair("redirect_uri", redirect_uri);
            }
            if let Some(scope) = scope {
                query.append_pair("scope", scope);
            }
            let extra: BTreeMap<_, _> = extra
                .iter()
                .filter(|(key, _)| !RESERVED_AUTHORIZE_PARAMS.contains(&key.as_str()))
                .collect();
            for (key, value) in extra {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Exchange an authorization code for tokens.
    ///
    /// The client secret is placed in the form body only when no custom
    /// `Authorization` header is configured, so a client never
    /// authenticates in two ways at once.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<OAuthToken, AuthError> {
        let headers = self.custom_headers();

        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.client_id.as_str()),
        ];
        if let Some(redirect_uri) = redirect_uri {
            form.push(("redirect_uri", redirect_uri));
        }
        if !headers.contains_key(AUTHORIZATION) {
            form.push(("client_secret", self.client_secret.as_str()));
        }

        log::debug!("Exchanging authorization code at {}", self.token_url);
        let response = self
            .http
            .post(&self.token_url)
            .headers(headers)
            .header(ACCEPT, "application/json")
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            log::warn!(
                "Token endpoint {} answered with status {}",
                self.token_url,
                status
            );
            return Err(AuthError::Http {
                status: status.as_u16(),
                body,
            });
        }

        parse_token_response(&body)
    }

    /// Call a protected resource with an access token, returning the body.
    pub async fn get(&self, url: &str, access_token: &str) -> Result<String, AuthError> {
        let mut target = Url::parse(url)?;
        let mut headers = self.custom_headers();

        if self.use_authorization_header_for_get {
            let value = HeaderValue::from_str(&format!("{} {}", self.auth_method, access_token))
                .map_err(|e| AuthError::Token(e.to_string()))?;
            headers.insert(AUTHORIZATION, value);
        } else {
            target
                .query_pairs_mut()
                .append_pair(&self.access_token_name, access_token);
        }

        log::debug!("Fetching protected resource {url}");
        let response = self.http.get(target).headers(headers).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            log::warn!("Resource {url} answered with status {status}");
            return Err(AuthError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

/// Decode a token response, accepting JSON or a form-encoded body.
fn parse_token_response(body: &str) -> Result<OAuthToken, AuthError> {
    let fields = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => map,
        _ => url::form_urlencoded::parse(body.as_bytes())
            .into_owned()
            .map(|(key, value)| (key, Value::String(value)))
            .collect::<Map<String, Value>>(),
    };

    if let Some(error) = fields.get("error").and_then(Value::as_str) {
        let description = fields
            .get("error_description")
            .and_then(Value::as_str)
            .unwrap_or(error);
        return Err(AuthError::Provider(description.to_string()));
    }
    if !fields.get("access_token").is_some_and(Value::is_string) {
        return Err(AuthError::Token(
            "token response did not include an access_token".into(),
        ));
    }

    Ok(serde_json::from_value(Value::Object(fields))?)
}
