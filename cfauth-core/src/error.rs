/// Errors that can occur while authenticating against an OAuth2 provider.
///
/// Every failure is returned to the caller; nothing in the framework retries.
/// An application-level rejection (the verifier deciding the user is not
/// acceptable) is not an error and is reported as a failed outcome instead.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The provider reported an error on the authorization callback.
    #[error("Provider error: {0}")]
    Provider(String),
    /// The request never produced a response.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    /// The provider answered with a non-success status.
    #[error("Unexpected status {status} from provider: {body}")]
    Http {
        /// HTTP status code of the response.
        status: u16,
        /// Raw response body.
        body: String,
    },
    /// A response body could not be decoded as JSON.
    #[error("Malformed response: {0}")]
    MalformedResponse(#[from] serde_json::Error),
    /// The token endpoint answered without a usable access token.
    #[error("Token error: {0}")]
    Token(String),
    /// A configured endpoint could not be used.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// No strategy is registered under the requested name.
    #[error("Unknown authentication strategy: {0}")]
    UnknownStrategy(String),
}

impl From<url::ParseError> for AuthError {
    fn from(err: url::ParseError) -> Self {
        AuthError::Configuration(err.to_string())
    }
}
