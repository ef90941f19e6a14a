//! Session and authentication manager for the pump telemetry platform.
//!
//! Login is a browser-style handshake: a cookie-establishing page load, a
//! JSON credential post, an OAuth authorization-code + PKCE exchange, and a
//! token request. The resulting bearer token and owner id are then attached
//! to every call on a separate, cookie-less API session.

mod endpoints;
pub mod id_token;
pub mod pkce;

use chrono::{DateTime, Utc};
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::redirect::Policy;
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::decode::{self, TelemetryRecord};
use crate::error::{AuthError, Error};

pub use endpoints::{
    date_range_query, device_metadata_path, telemetry_path, EndpointBases, Endpoints, Region,
    DEFAULT_CLIENT_ID, DEFAULT_SCOPES,
};
pub use pkce::PkcePair;

/// Default per-request timeout (30 seconds)
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const CLIENT_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) \
     AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148";
const CLIENT_ACCEPT: &str = "application/json, text/plain, */*";

/// Identity, secret and region for one logical client.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub identity: String,
    pub secret: String,
    #[serde(default)]
    pub region: Region,
    /// Device to read; the most recently active device is used when absent.
    #[serde(default)]
    pub device_id: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .field("region", &self.region)
            .field("device_id", &self.device_id)
            .finish()
    }
}

/// Established session state. Both values are set together or not at all.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub owner_id: String,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("owner_id", &self.owner_id)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub region: Region,
    /// Replaces the region's hosts (self-hosted mirrors, local mocks).
    pub endpoint_bases: Option<EndpointBases>,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            region: Region::Us,
            endpoint_bases: None,
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

/// Per-device report metadata returned by the platform.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMetadata {
    #[serde(rename = "tconnectDeviceId", deserialize_with = "string_or_number")]
    pub device_id: String,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub model_number: Option<String>,
    #[serde(default)]
    pub min_date_with_events: Option<String>,
    #[serde(default)]
    pub max_date_with_events: Option<String>,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    id_token: Option<String>,
}

/// HTTP client for the telemetry platform.
pub struct TelemetryClient {
    region: Region,
    endpoints: Endpoints,
    custom_endpoints: bool,
    /// Cookie session that follows redirects; exposes the final URL.
    cookie_http: Client,
    /// Same cookie jar, redirects disabled, for the credential post.
    login_http: Client,
    /// Cookie-less session for bearer-authenticated API calls.
    api_http: Client,
    session: Option<Session>,
    device_id: Option<String>,
}

impl TelemetryClient {
    /// Create a new client. Returns an error if an HTTP client fails to build
    /// (e.g., TLS configuration issues).
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        let mut browser_headers = HeaderMap::new();
        browser_headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));
        browser_headers.insert(ACCEPT, HeaderValue::from_static(CLIENT_ACCEPT));

        let mut api_headers = browser_headers.clone();
        api_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let jar = Arc::new(Jar::default());
        let cookie_http = Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .default_headers(browser_headers.clone())
            .timeout(config.request_timeout)
            .build()
            .map_err(Error::Client)?;
        let login_http = Client::builder()
            .cookie_provider(jar)
            .redirect(Policy::none())
            .default_headers(browser_headers)
            .timeout(config.request_timeout)
            .build()
            .map_err(Error::Client)?;
        let api_http = Client::builder()
            .default_headers(api_headers)
            .timeout(config.request_timeout)
            .build()
            .map_err(Error::Client)?;

        let (endpoints, custom_endpoints) = match &config.endpoint_bases {
            Some(bases) => (Endpoints::from_bases(bases), true),
            None => (Endpoints::for_region(config.region), false),
        };

        Ok(Self {
            region: config.region,
            endpoints,
            custom_endpoints,
            cookie_http,
            login_http,
            api_http,
            session: None,
            device_id: None,
        })
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Switch region. Drops any established session; explicitly configured
    /// endpoint hosts are kept.
    pub fn select_region(&mut self, region: Region) {
        if region == self.region {
            return;
        }
        self.region = region;
        if !self.custom_endpoints {
            self.endpoints = Endpoints::for_region(region);
        }
        self.logout();
    }

    pub fn logout(&mut self) {
        self.session = None;
        self.device_id = None;
    }

    /// Run the login handshake and store the resulting session.
    ///
    /// Every failure is reported as [`Error::Authentication`]; a 401 from the
    /// login API is [`AuthError::InvalidCredentials`] and stops the handshake
    /// before any PKCE or OAuth traffic.
    #[tracing::instrument(name = "login", skip_all, fields(region = %self.region))]
    pub async fn login(&mut self, identity: &str, secret: &str) -> Result<Session, Error> {
        self.logout();

        if identity.is_empty() || secret.is_empty() {
            return Err(AuthError::MissingCredentials.into());
        }

        match self.handshake(identity, secret).await {
            Ok(session) => {
                info!(owner_id = %session.owner_id, "login succeeded");
                self.session = Some(session.clone());
                Ok(session)
            }
            Err(e) => {
                warn!(error = %e, "login failed");
                Err(Error::Authentication(e))
            }
        }
    }

    async fn handshake(&self, identity: &str, secret: &str) -> Result<Session, AuthError> {
        let ep = &self.endpoints;

        debug!("loading login page");
        self.cookie_http
            .get(&ep.login_page)
            .send()
            .await
            .map_err(transport("login page"))?;

        debug!("posting credentials");
        let response = self
            .login_http
            .post(&ep.login_api)
            .json(&LoginRequest {
                username: identity,
                password: secret,
            })
            .send()
            .await
            .map_err(transport("login api"))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(AuthError::InvalidCredentials);
        }
        if !(status.is_success() || status.is_redirection()) {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "(failed to read body)".to_string());
            return Err(AuthError::LoginRejected {
                status: status.as_u16(),
                body,
            });
        }

        let pkce = PkcePair::generate();
        let code = self.authorization_code(&pkce).await?;

        debug!("exchanging authorization code");
        let response = self
            .cookie_http
            .post(&ep.token)
            .form(&[
                ("grant_type", "authorization_code"),
                ("client_id", ep.client_id.as_str()),
                ("code", code.as_str()),
                ("redirect_uri", ep.redirect_uri.as_str()),
                ("code_verifier", pkce.verifier.as_str()),
            ])
            .send()
            .await
            .map_err(transport("token endpoint"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "(failed to read body)".to_string());
            return Err(AuthError::TokenRejected {
                status: status.as_u16(),
                body,
            });
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(transport("token response"))?;
        let access_token = non_empty(tokens.access_token).ok_or(AuthError::MissingToken {
            field: "access_token",
        })?;
        let id_token = non_empty(tokens.id_token).ok_or(AuthError::MissingToken {
            field: "id_token",
        })?;

        let owner_id = id_token::owner_id(&id_token)?;

        Ok(Session {
            access_token,
            owner_id,
        })
    }

    /// Follow the authorize redirect chain and pull out the `code` parameter,
    /// taking one extra hop through `ReturnUrl` when the chain stops at an
    /// intermediate page.
    async fn authorization_code(&self, pkce: &PkcePair) -> Result<String, AuthError> {
        let ep = &self.endpoints;
        let authorize_url = Url::parse_with_params(
            &ep.authorize,
            &[
                ("client_id", ep.client_id.as_str()),
                ("response_type", "code"),
                ("scope", ep.scopes.as_str()),
                ("redirect_uri", ep.redirect_uri.as_str()),
                ("code_challenge", pkce.challenge.as_str()),
                ("code_challenge_method", "S256"),
            ],
        )
        .map_err(|e| AuthError::InvalidUrl {
            url: ep.authorize.clone(),
            reason: e.to_string(),
        })?;

        debug!("requesting authorization code");
        let response = self
            .cookie_http
            .get(authorize_url)
            .send()
            .await
            .map_err(transport("authorize"))?;
        let final_url = response.url().clone();

        if let Some(code) = query_param(&final_url, "code") {
            return Ok(code);
        }

        let Some(return_url) = query_param(&final_url, "ReturnUrl") else {
            return Err(AuthError::MissingAuthorizationCode {
                last_url: redact_query(&final_url),
            });
        };
        let next = final_url
            .join(&return_url)
            .map_err(|e| AuthError::InvalidUrl {
                url: return_url.clone(),
                reason: e.to_string(),
            })?;

        debug!("following ReturnUrl for authorization code");
        let response = self
            .cookie_http
            .get(next)
            .send()
            .await
            .map_err(transport("authorize return url"))?;
        let final_url = response.url().clone();

        query_param(&final_url, "code").ok_or_else(|| AuthError::MissingAuthorizationCode {
            last_url: redact_query(&final_url),
        })
    }

    /// Issue a bearer-authenticated call on the API session.
    ///
    /// Fails with [`Error::NotAuthenticated`] before touching the network if
    /// no session is established. Non-2xx responses become [`Error::Http`].
    pub async fn authenticated_request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<Response, Error> {
        let session = self.session.as_ref().ok_or(Error::NotAuthenticated)?;
        let url = self.endpoints.api_url(path);

        let mut request = self
            .api_http
            .request(method.clone(), &url)
            .bearer_auth(&session.access_token)
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "(failed to read body)".to_string());
            warn!(%method, path, status = status.as_u16(), "API returned error status");
            return Err(Error::Http {
                status: status.as_u16(),
                endpoint: path.to_string(),
                body,
            });
        }

        Ok(response)
    }

    /// Fetch and decode telemetry for one device between two instants.
    #[tracing::instrument(
        name = "fetch_telemetry",
        skip(self),
        fields(records = tracing::field::Empty)
    )]
    pub async fn fetch_raw_telemetry(
        &self,
        device_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TelemetryRecord>, Error> {
        let session = self.session.as_ref().ok_or(Error::NotAuthenticated)?;
        let path = telemetry_path(&session.owner_id, device_id);
        let query = date_range_query(start, end);

        let response = self
            .authenticated_request(Method::GET, &path, &query, None)
            .await?;
        let body = response.bytes().await?;
        let records = decode::decode(&body);

        tracing::Span::current().record("records", records.len());
        debug!(bytes = body.len(), records = records.len(), "telemetry fetched");
        Ok(records)
    }

    /// List the devices that have uploaded reports for this owner.
    pub async fn fetch_device_metadata(&self) -> Result<Vec<DeviceMetadata>, Error> {
        let session = self.session.as_ref().ok_or(Error::NotAuthenticated)?;
        let path = device_metadata_path(&session.owner_id);
        let response = self
            .authenticated_request(Method::GET, &path, &[], None)
            .await?;
        Ok(response.json().await?)
    }

    /// Device with the most recent events.
    pub async fn latest_device(&self) -> Result<DeviceMetadata, Error> {
        let devices = self.fetch_device_metadata().await?;
        pick_latest_device(devices).ok_or(Error::NoDevice)
    }
}

/// Log in with a fresh client for `region`.
pub async fn login(
    identity: &str,
    secret: &str,
    region: Region,
) -> Result<(TelemetryClient, Session), Error> {
    let mut client = TelemetryClient::new(ClientConfig {
        region,
        ..ClientConfig::default()
    })?;
    let session = client.login(identity, secret).await?;
    Ok((client, session))
}

#[async_trait::async_trait]
impl crate::cache::TelemetrySource for TelemetryClient {
    async fn authenticate(&mut self, credentials: &Credentials) -> Result<(), Error> {
        self.select_region(credentials.region);
        self.login(&credentials.identity, &credentials.secret)
            .await?;

        let device_id = match &credentials.device_id {
            Some(id) => id.clone(),
            None => self.latest_device().await?.device_id,
        };
        debug!(device_id = %device_id, "telemetry device selected");
        self.device_id = Some(device_id);
        Ok(())
    }

    async fn fetch_range(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TelemetryRecord>, Error> {
        let device_id = self.device_id.clone().ok_or(Error::NotAuthenticated)?;
        self.fetch_raw_telemetry(&device_id, start, end).await
    }
}

fn pick_latest_device(devices: Vec<DeviceMetadata>) -> Option<DeviceMetadata> {
    devices
        .into_iter()
        .max_by(|a, b| a.max_date_with_events.cmp(&b.max_date_with_events))
}

fn transport(stage: &'static str) -> impl FnOnce(reqwest::Error) -> AuthError {
    move |source| AuthError::Transport { stage, source }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// URL without its query string, for error messages.
fn redact_query(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}
