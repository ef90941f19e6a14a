#![allow(dead_code)] // Test helpers appear unused when compiled independently

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, NaiveDate, Utc};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use pumpsync::session::EndpointBases;
use pumpsync::ClientConfig;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

pub const PASSWORD: &str = "correct horse";
pub const OWNER_ID: &str = "9876";
pub const DEVICE_ID: &str = "1234567";
pub const ACCESS_TOKEN: &str = "access-token-1";

const AUTH_CODE: &str = "auth-code-1";
const SESSION_COOKIE: &str = "sso_session=abc";
const LOGIN_COOKIE: &str = "sso_login=ok";
const PUMP_EPOCH_UNIX: i64 = 1_199_145_600;

/// How the authorize endpoint hands out the code.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum AuthorizeFlow {
    /// Redirect straight to the callback with `code`.
    #[default]
    Direct,
    /// Stop at an interstitial page carrying `ReturnUrl`.
    ReturnUrl,
    /// Like `ReturnUrl`, but the second hop lands on a page without `code`.
    ReturnUrlWithoutCode,
}

#[derive(Clone, Debug, Default)]
pub struct PlatformOptions {
    pub flow: AuthorizeFlow,
    pub omit_id_token: bool,
    pub omit_access_token: bool,
    pub compress: bool,
    /// Records served by the telemetry endpoint, keyed by their report date.
    pub records: Vec<(NaiveDate, [u8; 26])>,
}

#[derive(Default)]
struct PlatformData {
    hits: HashMap<&'static str, usize>,
    challenge: Option<String>,
    telemetry_queries: Vec<(String, String)>,
    fail_telemetry: bool,
}

#[derive(Clone)]
struct PlatformState {
    options: Arc<PlatformOptions>,
    data: Arc<Mutex<PlatformData>>,
}

impl PlatformState {
    async fn hit(&self, endpoint: &'static str) {
        *self.data.lock().await.hits.entry(endpoint).or_default() += 1;
    }
}

pub struct MockPlatform {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
    state: PlatformState,
    pub base_url: String,
}

impl MockPlatform {
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }

    /// Requests seen by one endpoint ("login_page", "login", "authorize",
    /// "interstitial", "authorize_resume", "authorize_consent", "callback",
    /// "token", "metadata", "telemetry").
    pub async fn hits(&self, endpoint: &str) -> usize {
        self.state
            .data
            .lock()
            .await
            .hits
            .get(endpoint)
            .copied()
            .unwrap_or(0)
    }

    /// `(minDate, maxDate)` of every telemetry request, in order.
    pub async fn telemetry_queries(&self) -> Vec<(String, String)> {
        self.state.data.lock().await.telemetry_queries.clone()
    }

    pub async fn set_fail_telemetry(&self, fail: bool) {
        self.state.data.lock().await.fail_telemetry = fail;
    }

    /// Client settings pointing every host at this server.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            endpoint_bases: Some(EndpointBases {
                sso: self.base_url.clone(),
                services: self.base_url.clone(),
                api: self.base_url.clone(),
            }),
            request_timeout: Duration::from_secs(5),
            ..ClientConfig::default()
        }
    }
}

/// Best-effort check for whether binding to loopback is permitted in the current sandbox.
pub async fn can_bind_loopback() -> bool {
    match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => false,
        Err(_) => true, // treat other errors as non-fatal for skipping
    }
}

/// Spawn the mock platform on an ephemeral loopback port.
pub async fn spawn_mock_platform(options: PlatformOptions) -> MockPlatform {
    let state = PlatformState {
        options: Arc::new(options),
        data: Arc::new(Mutex::new(PlatformData::default())),
    };

    let app = Router::new()
        .route("/", get(login_page))
        .route("/accounts/api/login", post(login))
        .route("/accounts/api/connect/authorize", get(authorize))
        .route("/accounts/api/connect/authorize/resume", get(authorize_resume))
        .route("/accounts/api/connect/authorize/consent", get(authorize_consent))
        .route("/interstitial", get(interstitial))
        .route("/auth/callback", get(callback))
        .route("/accounts/api/connect/token", post(token))
        .route("/api/reports/reportsfacade/*rest", get(reports))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind mock platform listener");
    let port = listener.local_addr().unwrap().port();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        if let Err(err) = server.await {
            eprintln!("mock platform server error: {}", err);
        }
    });

    MockPlatform {
        shutdown_tx,
        handle,
        state,
        base_url: format!("http://127.0.0.1:{}", port),
    }
}

/// Compact JWT with an unsigned payload.
pub fn id_token(claims: &Value) -> String {
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

/// Seconds since the pump epoch for `at`.
pub fn pump_offset(at: DateTime<Utc>) -> u32 {
    (at.timestamp() - PUMP_EPOCH_UNIX) as u32
}

/// Encode a Dexcom G6 CGM reading taken at `at`.
pub fn cgm_window(at: DateTime<Utc>, sequence: u32, glucose: u16) -> [u8; 26] {
    let offset = pump_offset(at);
    let mut w = [0u8; 26];
    w[0..2].copy_from_slice(&256u16.to_be_bytes());
    w[2..6].copy_from_slice(&offset.to_be_bytes());
    w[6..10].copy_from_slice(&sequence.to_be_bytes());
    w[14..16].copy_from_slice(&glucose.to_be_bytes());
    w[18..22].copy_from_slice(&offset.to_be_bytes());
    w[23] = 5;
    w
}

fn has_cookie(headers: &HeaderMap, cookie: &str) -> bool {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.split(';').any(|c| c.trim() == cookie))
}

fn bearer_ok(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        == Some(ACCESS_TOKEN)
}

async fn login_page(State(state): State<PlatformState>) -> Response {
    state.hit("login_page").await;
    (
        [(header::SET_COOKIE, format!("{}; Path=/", SESSION_COOKIE))],
        "<html>login</html>",
    )
        .into_response()
}

#[derive(Deserialize)]
struct LoginBody {
    username: String,
    password: String,
}

async fn login(
    State(state): State<PlatformState>,
    headers: HeaderMap,
    Json(body): Json<LoginBody>,
) -> Response {
    state.hit("login").await;
    if !has_cookie(&headers, SESSION_COOKIE) {
        return (StatusCode::BAD_REQUEST, "no session cookie").into_response();
    }
    if body.username.is_empty() || body.password != PASSWORD {
        return (StatusCode::UNAUTHORIZED, "bad credentials").into_response();
    }
    (
        [(header::SET_COOKIE, format!("{}; Path=/", LOGIN_COOKIE))],
        Json(json!({ "status": "SUCCESS" })),
    )
        .into_response()
}

async fn authorize(
    State(state): State<PlatformState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.hit("authorize").await;
    if !has_cookie(&headers, LOGIN_COOKIE) {
        return Redirect::to("/").into_response();
    }
    if params.get("code_challenge_method").map(String::as_str) != Some("S256") {
        return (StatusCode::BAD_REQUEST, "S256 required").into_response();
    }
    state.data.lock().await.challenge = params.get("code_challenge").cloned();

    match state.options.flow {
        AuthorizeFlow::Direct => {
            Redirect::to(&format!("/auth/callback?code={}", AUTH_CODE)).into_response()
        }
        AuthorizeFlow::ReturnUrl => Redirect::to(
            "/interstitial?ReturnUrl=%2Faccounts%2Fapi%2Fconnect%2Fauthorize%2Fresume",
        )
        .into_response(),
        AuthorizeFlow::ReturnUrlWithoutCode => Redirect::to(
            "/interstitial?ReturnUrl=%2Faccounts%2Fapi%2Fconnect%2Fauthorize%2Fconsent",
        )
        .into_response(),
    }
}

async fn interstitial(State(state): State<PlatformState>) -> &'static str {
    state.hit("interstitial").await;
    "<html>continue</html>"
}

async fn authorize_resume(State(state): State<PlatformState>) -> Redirect {
    state.hit("authorize_resume").await;
    Redirect::to(&format!("/auth/callback?code={}", AUTH_CODE))
}

async fn authorize_consent(State(state): State<PlatformState>) -> &'static str {
    state.hit("authorize_consent").await;
    "<html>approve access?</html>"
}

async fn callback(State(state): State<PlatformState>) -> &'static str {
    state.hit("callback").await;
    "<html>done</html>"
}

async fn token(
    State(state): State<PlatformState>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.hit("token").await;
    let challenge = state.data.lock().await.challenge.clone();

    let verifier = form.get("code_verifier").cloned().unwrap_or_default();
    let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    if form.get("grant_type").map(String::as_str) != Some("authorization_code")
        || form.get("code").map(String::as_str) != Some(AUTH_CODE)
        || challenge.as_deref() != Some(expected.as_str())
    {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_grant" })),
        )
            .into_response();
    }

    let mut body = json!({
        "token_type": "Bearer",
        "expires_in": 3600,
    });
    if !state.options.omit_access_token {
        body["access_token"] = Value::String(ACCESS_TOKEN.to_string());
    }
    if !state.options.omit_id_token {
        body["id_token"] = Value::String(id_token(&json!({
            "sub": "user-1",
            "pumperId": OWNER_ID,
        })));
    }
    Json(body).into_response()
}

async fn reports(
    State(state): State<PlatformState>,
    headers: HeaderMap,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if !bearer_ok(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let rest = uri
        .path()
        .trim_start_matches("/api/reports/reportsfacade/")
        .to_string();
    let segments: Vec<&str> = rest.split('/').collect();

    match segments.as_slice() {
        [owner, "pumpeventmetadata"] if *owner == OWNER_ID => {
            state.hit("metadata").await;
            Json(json!([
                {
                    "tconnectDeviceId": 1111111,
                    "serialNumber": "OLD",
                    "maxDateWithEvents": "2023-01-01T00:00:00",
                },
                {
                    "tconnectDeviceId": DEVICE_ID,
                    "serialNumber": "NEW",
                    "maxDateWithEvents": "2024-06-01T00:00:00",
                },
            ]))
            .into_response()
        }
        ["pumpevents", owner, device] if *owner == OWNER_ID && *device == DEVICE_ID => {
            state.hit("telemetry").await;
            let min = params.get("minDate").cloned().unwrap_or_default();
            let max = params.get("maxDate").cloned().unwrap_or_default();
            let fail = {
                let mut data = state.data.lock().await;
                data.telemetry_queries.push((min.clone(), max.clone()));
                data.fail_telemetry
            };
            if fail {
                return (StatusCode::INTERNAL_SERVER_ERROR, "upstream down").into_response();
            }
            let (Ok(min), Ok(max)) = (
                NaiveDate::parse_from_str(&min, "%m-%d-%Y"),
                NaiveDate::parse_from_str(&max, "%m-%d-%Y"),
            ) else {
                return (StatusCode::BAD_REQUEST, "bad date").into_response();
            };
            telemetry_body(&state.options, min, max).into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

fn telemetry_body(options: &PlatformOptions, min: NaiveDate, max: NaiveDate) -> Json<String> {
    let mut raw = Vec::new();
    for (date, window) in &options.records {
        if *date >= min && *date <= max {
            raw.extend_from_slice(window);
        }
    }
    if options.compress {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).unwrap();
        raw = encoder.finish().unwrap();
    }
    Json(STANDARD.encode(raw))
}
