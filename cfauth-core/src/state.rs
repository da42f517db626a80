use http::{HeaderMap, Method, Uri};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Tokens returned by the provider's token endpoint.
///
/// Only `access_token` is required. A known optional field that arrives in an
/// unexpected shape is kept in `extra` rather than failing the decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct OAuthToken {
    /// The access token used against protected resources.
    pub access_token: String,
    /// The token type, usually `bearer`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// The refresh token, if the provider issued one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    /// Scopes granted to the access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Any other fields the provider included in the response.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl TryFrom<Map<String, Value>> for OAuthToken {
    type Error = String;

    fn try_from(fields: Map<String, Value>) -> Result<Self, Self::Error> {
        let mut token = OAuthToken {
            access_token: String::new(),
            token_type: None,
            refresh_token: None,
            expires_in: None,
            scope: None,
            extra: HashMap::new(),
        };
        let mut access_token = None;

        for (key, value) in fields {
            let leftover = match (key.as_str(), value) {
                ("access_token", Value::String(v)) => {
                    access_token = Some(v);
                    None
                }
                ("token_type", Value::String(v)) => {
                    token.token_type = Some(v);
                    None
                }
                ("refresh_token", Value::String(v)) => {
                    token.refresh_token = Some(v);
                    None
                }
                ("scope", Value::String(v)) => {
                    token.scope = Some(v);
                    None
                }
                ("expires_in", Value::Number(n)) if n.is_u64() => {
                    token.expires_in = n.as_u64();
                    None
                }
                ("expires_in", Value::String(v)) if v.trim().parse::<u64>().is_ok() => {
                    token.expires_in = v.trim().parse().ok();
                    None
                }
                ("token_type" | "refresh_token" | "scope" | "expires_in", Value::Null) => None,
                (_, value) => Some(value),
            };
            if let Some(value) = leftover {
                token.extra.insert(key, value);
            }
        }

        token.access_token = access_token.ok_or("missing string field `access_token`")?;
        Ok(token)
    }
}

/// The user-info document returned by a provider.
///
/// The document is kept exactly as the provider sent it; no field is
/// validated or renamed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Profile(serde_json::Value);

impl Profile {
    /// Wrap a decoded JSON document.
    pub fn new(raw: serde_json::Value) -> Self {
        Self(raw)
    }

    /// Decode a profile from a response body.
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body).map(Self)
    }

    /// Look up a top-level field.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// Look up a top-level string field.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(serde_json::Value::as_str)
    }

    /// The underlying JSON document.
    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }

    /// Consume the profile, returning the JSON document.
    pub fn into_inner(self) -> serde_json::Value {
        self.0
    }
}

impl From<serde_json::Value> for Profile {
    fn from(raw: serde_json::Value) -> Self {
        Self(raw)
    }
}

/// The parts of the inbound callback request handed to a verifier.
#[derive(Debug, Clone)]
pub struct ForwardedRequest {
    /// Request method.
    pub method: Method,
    /// Full request URI, including the query string.
    pub uri: Uri,
    /// Request headers.
    pub headers: HeaderMap,
}

impl ForwardedRequest {
    /// Decoded query parameters of the callback request.
    pub fn query(&self) -> HashMap<String, String> {
        crate::strategy::utils::query_params(&self.uri)
    }
}

impl From<&http::request::Parts> for ForwardedRequest {
    fn from(parts: &http::request::Parts) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
        }
    }
}

/// Everything a verifier needs to decide who the user is.
#[derive(Debug, Clone)]
pub struct Verification {
    /// The callback request, present only when request forwarding is enabled.
    pub request: Option<ForwardedRequest>,
    /// The token response.
    pub token: OAuthToken,
    /// The provider's user-info document.
    pub profile: Profile,
}

impl Verification {
    /// The access token issued by the provider.
    pub fn access_token(&self) -> &str {
        &self.token.access_token
    }

    /// The refresh token, if one was issued.
    pub fn refresh_token(&self) -> Option<&str> {
        self.token.refresh_token.as_deref()
    }
}
