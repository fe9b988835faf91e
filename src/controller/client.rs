//! Avi controller REST client

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, COOKIE, REFERER, RETRY_AFTER, SET_COOKIE};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info, warn};

use super::{Controller, ControllerRequest};
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::tools::Method;

/// Cookie names the controller uses for the session id, newest first
const SESSION_COOKIES: [&str; 2] = ["avi-sessionid", "sessionid"];
const CSRF_COOKIE: &str = "csrftoken";
/// Error bodies are cut to this many characters before reaching the model
const MAX_ERROR_CHARS: usize = 500;

/// Authenticated controller session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AviSession {
    pub cookie_name: String,
    pub session_id: String,
    pub csrf_token: String,
}

impl AviSession {
    fn cookie_header(&self) -> String {
        format!(
            "{}={}; {}={}",
            self.cookie_name, self.session_id, CSRF_COOKIE, self.csrf_token
        )
    }
}

/// Avi API client
///
/// One instance is shared by every session. Each `execute` performs a single
/// round trip; a process-wide semaphore bounds how many run at once.
pub struct AviClient {
    http_client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    version: String,
    tenant: String,
    session: RwLock<Option<AviSession>>,
    in_flight: Arc<Semaphore>,
}

impl AviClient {
    /// Create a new client; call [`AviClient::login`] before executing requests
    pub fn new(config: &ControllerConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .danger_accept_invalid_certs(config.insecure)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            base_url: config.base_url(),
            username: config.username.clone(),
            password: config.password.clone(),
            version: config.version.clone(),
            tenant: config.tenant.clone(),
            session: RwLock::new(None),
            in_flight: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Authenticate and store the session cookies
    pub async fn login(&self) -> Result<(), ControllerError> {
        let response = self
            .http_client
            .post(format!("{}/login", self.base_url))
            .header(CONTENT_TYPE, "application/json")
            .header("X-Avi-Version", &self.version)
            .json(&json!({ "username": self.username, "password": self.password }))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let cookies = parse_set_cookies(response.headers());
        let text = response.text().await.map_err(classify_transport)?;

        if !status.is_success() {
            return Err(match status {
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    ControllerError::AuthenticationFailure(format!(
                        "login rejected ({}): {}",
                        status.as_u16(),
                        error_message(&text)
                    ))
                }
                _ => classify_status(status, None, &text),
            });
        }

        let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
        let session = session_from(&cookies, &body).ok_or_else(|| {
            ControllerError::AuthenticationFailure("login response carried no session".to_string())
        })?;

        let version = body
            .get("version")
            .and_then(|v| v.get("Version"))
            .and_then(Value::as_str)
            .unwrap_or(&self.version);
        info!(
            "Logged in to {} as {} (controller version {})",
            self.base_url, self.username, version
        );
        *self.session.write().await = Some(session);
        Ok(())
    }

    /// End the controller session; failures are logged, not returned
    pub async fn logout(&self) {
        let Some(session) = self.session.write().await.take() else {
            return;
        };
        let headers = match self.headers(&session) {
            Ok(headers) => headers,
            Err(e) => {
                warn!("Skipping logout: {}", e);
                return;
            }
        };
        match self
            .http_client
            .post(format!("{}/logout", self.base_url))
            .headers(headers)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => info!("Logged out of {}", self.base_url),
            Ok(response) => warn!("Logout returned HTTP {}", response.status()),
            Err(e) => warn!("Logout failed: {}", e),
        }
    }

    pub async fn is_logged_in(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Cheap authenticated read used by health checks
    pub async fn ping(&self) -> Result<(), ControllerError> {
        let request = ControllerRequest::new(Method::Get, "/virtualservice")
            .with_query(vec![("page_size".to_string(), "1".to_string())]);
        self.execute(&request).await.map(|_| ())
    }

    /// Build headers for API requests
    fn headers(&self, session: &AviSession) -> Result<HeaderMap, ControllerError> {
        let value = |v: &str| {
            HeaderValue::from_str(v)
                .map_err(|e| ControllerError::Fatal(format!("invalid header value: {}", e)))
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert("x-avi-version", value(&self.version)?);
        headers.insert("x-avi-tenant", value(&self.tenant)?);
        headers.insert("x-csrftoken", value(&session.csrf_token)?);
        headers.insert(REFERER, value(&self.base_url)?);
        headers.insert(COOKIE, value(&session.cookie_header())?);
        Ok(headers)
    }
}

#[async_trait]
impl Controller for AviClient {
    async fn execute(&self, request: &ControllerRequest) -> Result<Value, ControllerError> {
        let _permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| ControllerError::Fatal("controller client is shut down".to_string()))?;

        let session = self.session.read().await.clone().ok_or_else(|| {
            ControllerError::AuthenticationFailure("not logged in to the controller".to_string())
        })?;

        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| ControllerError::Fatal(e.to_string()))?;
        let url = format!("{}/api{}", self.base_url, request.path);
        debug!("Avi {} {} query={:?}", method, request.path, request.query);

        let mut builder = self
            .http_client
            .request(method, &url)
            .headers(self.headers(&session)?)
            .query(&request.query);
        // Starts once the permit is held; queueing is not charged to the request
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(classify_transport)?;
        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let text = response.text().await.map_err(classify_transport)?;

        if !status.is_success() {
            let err = classify_status(status, retry_after, &text);
            debug!("Avi {} failed: {}", request.path, err);
            return Err(err);
        }

        Ok(normalize(status, &text))
    }
}

// =============================================================================
// Response handling
// =============================================================================

fn classify_transport(e: reqwest::Error) -> ControllerError {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        ControllerError::TransientNetworkFailure(e.to_string())
    } else {
        ControllerError::Fatal(e.to_string())
    }
}

fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> ControllerError {
    let message = format!("HTTP {}: {}", status.as_u16(), error_message(body));
    match status.as_u16() {
        401 | 403 => ControllerError::AuthenticationFailure(message),
        400 | 409 | 412 | 422 => ControllerError::ValidationRejected(message),
        404 => ControllerError::NotFound(message),
        429 => ControllerError::RateLimited {
            message,
            retry_after,
        },
        408 | 500 | 502 | 503 | 504 => ControllerError::TransientNetworkFailure(message),
        _ => ControllerError::Fatal(message),
    }
}

/// Pull the human-readable part out of an error body
fn error_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|v| {
            ["error", "detail", "message"]
                .iter()
                .find_map(|k| v.get(*k).and_then(Value::as_str))
        })
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string());
    if message.is_empty() {
        return "no details".to_string();
    }
    message.chars().take(MAX_ERROR_CHARS).collect()
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Normalize a successful body into a JSON payload
///
/// Collections become `{count, results, has_more}`; empty bodies become
/// `{status}`; anything that is not JSON is wrapped as `{raw}`.
fn normalize(status: StatusCode, text: &str) -> Value {
    if text.trim().is_empty() {
        return json!({ "status": status.as_u16() });
    }
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => return json!({ "raw": text }),
    };
    match value.get("results").and_then(Value::as_array) {
        Some(results) => {
            let count = value
                .get("count")
                .and_then(Value::as_u64)
                .unwrap_or(results.len() as u64);
            let has_more = value
                .get("next")
                .map_or(false, |next| !next.is_null() && next != "");
            json!({ "count": count, "results": results, "has_more": has_more })
        }
        None => value,
    }
}

fn parse_set_cookies(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|cookie| {
            let pair = cookie.split(';').next()?;
            let (name, value) = pair.split_once('=')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn session_from(cookies: &[(String, String)], body: &Value) -> Option<AviSession> {
    let cookie = |name: &str| {
        cookies
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    };
    let field = |name: &str| body.get(name).and_then(Value::as_str).map(str::to_string);

    let (cookie_name, session_id) = SESSION_COOKIES
        .iter()
        .find_map(|name| cookie(name).map(|v| (name.to_string(), v)))
        .or_else(|| field("sessionid").map(|v| ("sessionid".to_string(), v)))?;
    let csrf_token = cookie(CSRF_COOKIE).or_else(|| field(CSRF_COOKIE))?;

    Some(AviSession {
        cookie_name,
        session_id,
        csrf_token,
    })
}
