//! Error taxonomy for the telemetry client.
//!
//! Authentication problems are always wrapped in [`Error::Authentication`] so
//! callers only need two coarse classes: "could not authenticate" and
//! "could not retrieve telemetry". Malformed record data is never an error;
//! the decoder drops it per record.

use thiserror::Error;

/// Stage-specific cause of a failed login handshake.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("identity and secret are both required")]
    MissingCredentials,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("login API returned HTTP {status}: {body}")]
    LoginRejected { status: u16, body: String },

    #[error("token endpoint returned HTTP {status}: {body}")]
    TokenRejected { status: u16, body: String },

    #[error("no authorization code in redirect chain (last url: {last_url})")]
    MissingAuthorizationCode { last_url: String },

    #[error("token response is missing {field}")]
    MissingToken { field: &'static str },

    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("malformed identity token: {0}")]
    MalformedIdToken(String),

    #[error("{stage}: {source}")]
    Transport {
        stage: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

/// Errors surfaced by the client and the range cache.
#[derive(Error, Debug)]
pub enum Error {
    #[error("authentication failed: {0}")]
    Authentication(#[source] AuthError),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status} from {endpoint}")]
    Http {
        status: u16,
        endpoint: String,
        body: String,
    },

    #[error("invalid time range: start {start} is after end {end}")]
    InvalidRange { start: String, end: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("no device found for this account")]
    NoDevice,
}

impl From<AuthError> for Error {
    fn from(err: AuthError) -> Self {
        Error::Authentication(err)
    }
}

impl Error {
    /// True for every failure that should be shown as "could not authenticate".
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Error::Authentication(_) | Error::NotAuthenticated)
    }

    /// True when the login API explicitly rejected the identity/secret pair.
    pub fn is_invalid_credentials(&self) -> bool {
        matches!(self, Error::Authentication(AuthError::InvalidCredentials))
    }
}

/// Failures of the durable key-value store. These are logged by the cache,
/// never propagated to query callers.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage I/O error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize {key}: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}
