use chrono::{DateTime, Duration, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OnceCell};

use crate::config::ClientConfig;
use crate::error::{Error, RejectionReason, Result};

/// Login credentials for the ThermoWorks Cloud account.
///
/// Constructed once by the caller and held for the session's lifetime. The
/// password is only transmitted during sign-in; refreshes use the refresh
/// handle instead.
#[derive(Clone)]
pub struct Credential {
    pub email: String,
    password: String,
}

impl Credential {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A bearer token issued by the identity service.
#[derive(Debug, Clone)]
pub struct AuthToken {
    /// Opaque bearer value attached to authorized requests.
    pub bearer: String,
    /// Id of the user the token was issued to.
    pub user_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Handle for obtaining a new token without re-sending the password.
    pub refresh_token: Option<String>,
}

impl AuthToken {
    pub fn new(
        bearer: String,
        user_id: String,
        refresh_token: Option<String>,
        expires_in_seconds: i64,
    ) -> Self {
        let issued_at = Utc::now();
        // Lifetimes beyond the representable date range saturate instead
        // of overflowing.
        let expires_at = Duration::try_seconds(expires_in_seconds)
            .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
            .unwrap_or(if expires_in_seconds >= 0 {
                DateTime::<Utc>::MAX_UTC
            } else {
                DateTime::<Utc>::MIN_UTC
            });
        Self {
            bearer,
            user_id,
            issued_at,
            expires_at,
            refresh_token,
        }
    }

    /// Whether the token is still usable, treating anything within
    /// `margin_seconds` of nominal expiry as already expired so a token
    /// cannot expire while a request carrying it is in flight.
    pub fn is_valid(&self, margin_seconds: i64) -> bool {
        match Duration::try_seconds(margin_seconds)
            .and_then(|margin| self.expires_at.checked_sub_signed(margin))
        {
            Some(threshold) => Utc::now() < threshold,
            None => false,
        }
    }
}

/// Observable lifecycle of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Unauthenticated,
    Authenticating,
    Authenticated,
    Refreshing,
}

#[derive(Debug, Default)]
struct StoreInner {
    token: Option<AuthToken>,
    state: SessionState,
}

/// Holder for the session's current token. Pure state, no network access.
///
/// Mutation is synchronous and brief; the lock is never held across an
/// await point.
#[derive(Debug, Default)]
pub struct TokenStore {
    inner: StdMutex<StoreInner>,
}

impl TokenStore {
    /// True iff a token is present and unexpired under the margin.
    pub fn is_valid(&self, margin_seconds: i64) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .token
            .as_ref()
            .is_some_and(|token| token.is_valid(margin_seconds))
    }

    /// The current token, valid or not.
    pub fn current(&self) -> Result<AuthToken> {
        let inner = self.inner.lock().unwrap();
        inner.token.clone().ok_or(Error::Unauthenticated)
    }

    /// Atomically swap in a new token and mark the session authenticated.
    pub fn replace(&self, token: AuthToken) {
        let mut inner = self.inner.lock().unwrap();
        inner.token = Some(token);
        inner.state = SessionState::Authenticated;
    }

    /// Mark the current token expired without discarding it, so the refresh
    /// handle and user id remain usable on the refresh path.
    pub fn invalidate(&self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(token) = inner.token.as_mut() {
            token.expires_at = token.issued_at;
        }
    }

    /// Expire the stored token only if it still carries the given bearer.
    /// A request observing a rejection for an old bearer must not expire
    /// the fresh token a concurrent refresh has already swapped in.
    pub(crate) fn invalidate_if_current(&self, bearer: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(token) = inner.token.as_mut() {
            if token.bearer == bearer {
                token.expires_at = token.issued_at;
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().unwrap().state
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.inner.lock().unwrap().state = state;
    }

    /// Drop the token entirely. The caller must log in again.
    pub(crate) fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.token = None;
        inner.state = SessionState::Unauthenticated;
    }

    pub(crate) fn refresh_handle(&self) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .token
            .as_ref()
            .and_then(|token| token.refresh_token.clone())
    }

    pub(crate) fn user_id(&self) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.token.as_ref().map(|token| token.user_id.clone())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignInRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    id_token: String,
    refresh_token: Option<String>,
    /// Token lifetime in seconds, as a string of digits.
    expires_in: String,
    local_id: String,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
}

// The token endpoint uses snake_case where sign-in uses camelCase.
#[derive(Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: Option<String>,
    expires_in: String,
    user_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebConfigResponse {
    project_id: String,
}

#[derive(Deserialize)]
struct IdentityErrorBody {
    error: IdentityError,
}

#[derive(Deserialize)]
struct IdentityError {
    message: String,
}

/// The sign-in error body carries an upper-snake-case code as its message,
/// sometimes followed by explanatory text.
fn rejection_reason(body: &str) -> RejectionReason {
    match serde_json::from_str::<IdentityErrorBody>(body) {
        Ok(parsed) => {
            let code = parsed
                .error
                .message
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_string();
            RejectionReason::from_backend_code(&code)
        }
        Err(_) => RejectionReason::Other(Error::truncate_body(body)),
    }
}

struct SessionInner {
    http: reqwest::Client,
    config: ClientConfig,
    credential: Credential,
    store: TokenStore,
    /// Serializes token refreshes so N requests racing on an expired token
    /// produce exactly one backend refresh call.
    refresh_gate: Mutex<()>,
    /// Firestore project id discovered from the app's web config.
    project_id: OnceCell<String>,
}

/// An authenticated session against the ThermoWorks Cloud backend.
///
/// Owns the token lifecycle: login, refresh-on-expiry, and a single
/// refresh-and-retry when the backend rejects a bearer token mid-session.
/// Cheap to clone; clones share one token store, so any number of
/// concurrent requests ride one session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(credential: Credential, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                http: reqwest::Client::new(),
                config,
                credential,
                store: TokenStore::default(),
                refresh_gate: Mutex::new(()),
                project_id: OnceCell::new(),
            }),
        }
    }

    pub fn store(&self) -> &TokenStore {
        &self.inner.store
    }

    pub fn state(&self) -> SessionState {
        self.inner.store.state()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Id of the signed-in user.
    pub fn user_id(&self) -> Result<String> {
        self.inner.store.user_id().ok_or(Error::Unauthenticated)
    }

    /// Prime the session from a previously issued token, skipping the
    /// password sign-in. The token may already be expired as long as it
    /// carries a refresh handle.
    pub fn restore(&self, token: AuthToken) {
        debug!("Session restored for user {}", token.user_id);
        self.inner.store.replace(token);
    }

    /// Exchange the credential for a token and mark the session
    /// authenticated.
    pub async fn login(&self) -> Result<()> {
        self.inner.store.set_state(SessionState::Authenticating);
        match self.sign_in().await {
            Ok(token) => {
                debug!("Signed in as user {}", token.user_id);
                self.inner.store.replace(token);
                Ok(())
            }
            Err(e) => {
                self.inner.store.clear();
                Err(e)
            }
        }
    }

    /// Issue an authorized request against the document store.
    ///
    /// Guarantees the request carries a currently-valid bearer token,
    /// refreshing first if needed. If the response status is in the
    /// configured auth-expiry set, the token is invalidated and the request
    /// retried exactly once behind a fresh token; a second auth-expiry
    /// response is terminal. All other responses are returned as-is.
    pub async fn request(&self, method: reqwest::Method, path: &str) -> Result<reqwest::Response> {
        self.ensure_valid_token().await?;
        let bearer = self.inner.store.current()?.bearer;
        let response = self.send_authorized(method.clone(), path, &bearer).await?;

        if !self.inner.config.is_auth_expiry_status(response.status()) {
            return Ok(response);
        }

        debug!(
            "Bearer token rejected with {} on {}, refreshing and retrying once",
            response.status(),
            path
        );
        self.inner.store.invalidate_if_current(&bearer);
        self.ensure_valid_token().await?;
        let retry_bearer = self.inner.store.current()?.bearer;
        let retry = self.send_authorized(method, path, &retry_bearer).await?;

        if self.inner.config.is_auth_expiry_status(retry.status()) {
            debug!("Retry of {} also rejected, giving up on this session", path);
            self.inner.store.clear();
            return Err(Error::Unauthenticated);
        }
        Ok(retry)
    }

    async fn send_authorized(
        &self,
        method: reqwest::Method,
        path: &str,
        bearer: &str,
    ) -> Result<reqwest::Response> {
        let url = format!(
            "{}/v1/projects/{}/databases/(default)/documents/{}",
            self.inner.config.firestore_host,
            self.project_id().await?,
            path
        );

        let response = self
            .inner
            .http
            .request(method, &url)
            .query(&[("key", self.inner.config.api_key.as_str())])
            .bearer_auth(bearer)
            .send()
            .await?;
        Ok(response)
    }

    /// Refresh or re-login as needed so the store holds a valid token.
    ///
    /// The gate admits one task to the refresh; everyone else queues on it
    /// and re-checks validity once admitted, so late arrivals find the
    /// store already refreshed and perform no backend call. If the
    /// refreshing task is cancelled mid-flight the gate is released and
    /// the next waiter takes over the refresh itself.
    async fn ensure_valid_token(&self) -> Result<()> {
        let margin = self.inner.config.token_expiry_margin_seconds;
        if self.inner.store.is_valid(margin) {
            return Ok(());
        }

        let _gate = self.inner.refresh_gate.lock().await;
        if self.inner.store.is_valid(margin) {
            // Another task refreshed while we waited.
            return Ok(());
        }

        self.inner.store.set_state(SessionState::Refreshing);
        match self.refresh().await {
            Ok(token) => {
                debug!("Token refreshed for user {}", token.user_id);
                self.inner.store.replace(token);
                Ok(())
            }
            Err(Error::Unauthenticated) if self.inner.config.relogin_on_refresh_failure => {
                debug!("Refresh unavailable, falling back to password login");
                self.login().await
            }
            Err(e) => {
                self.inner.store.clear();
                Err(e)
            }
        }
    }

    async fn refresh(&self) -> Result<AuthToken> {
        let handle = self
            .inner
            .store
            .refresh_handle()
            .ok_or(Error::Unauthenticated)?;

        let url = format!("{}/v1/token", self.inner.config.token_host);
        let response = self
            .inner
            .http
            .post(&url)
            .query(&[("key", self.inner.config.api_key.as_str())])
            .json(&RefreshRequest {
                grant_type: "refresh_token",
                refresh_token: &handle,
            })
            .send()
            .await
            .map_err(|e| Error::AuthServiceUnavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::AuthServiceUnavailable(e.to_string()))?;

        if status.is_success() {
            let payload: RefreshResponse = serde_json::from_str(&body)
                .map_err(|e| Error::UnexpectedResponse(format!("refresh payload: {e}")))?;
            token_from_parts(
                payload.id_token,
                payload.user_id,
                payload.refresh_token,
                &payload.expires_in,
            )
        } else if status.is_client_error() {
            // The refresh handle has been revoked or superseded.
            Err(Error::Unauthenticated)
        } else {
            Err(Error::AuthServiceUnavailable(format!(
                "token refresh returned {status}: {}",
                Error::truncate_body(&body)
            )))
        }
    }

    async fn sign_in(&self) -> Result<AuthToken> {
        // Project discovery comes first so a signed-in session can reach
        // the document store immediately.
        self.project_id().await?;

        let url = format!(
            "{}/v1/accounts:signInWithPassword",
            self.inner.config.identity_host
        );
        let response = self
            .inner
            .http
            .post(&url)
            .query(&[("key", self.inner.config.api_key.as_str())])
            .json(&SignInRequest {
                email: &self.inner.credential.email,
                password: &self.inner.credential.password,
                return_secure_token: true,
            })
            .send()
            .await
            .map_err(|e| Error::AuthServiceUnavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::AuthServiceUnavailable(e.to_string()))?;

        if status.is_success() {
            let payload: SignInResponse = serde_json::from_str(&body)
                .map_err(|e| Error::UnexpectedResponse(format!("sign-in payload: {e}")))?;
            token_from_parts(
                payload.id_token,
                payload.local_id,
                payload.refresh_token,
                &payload.expires_in,
            )
        } else if status.is_client_error() {
            Err(Error::InvalidCredentials(rejection_reason(&body)))
        } else {
            Err(Error::AuthServiceUnavailable(format!(
                "sign-in returned {status}: {}",
                Error::truncate_body(&body)
            )))
        }
    }

    async fn project_id(&self) -> Result<&str> {
        self.inner
            .project_id
            .get_or_try_init(|| self.discover_project_id())
            .await
            .map(|id| id.as_str())
    }

    async fn discover_project_id(&self) -> Result<String> {
        let url = format!(
            "{}/v1alpha/projects/-/apps/{}/webConfig",
            self.inner.config.firebase_host, self.inner.config.app_id
        );
        debug!("Discovering application web config");

        let response = self
            .inner
            .http
            .get(&url)
            .header("accept", "application/json")
            .header("x-goog-api-key", &self.inner.config.api_key)
            .send()
            .await
            .map_err(|e| Error::AuthServiceUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::AuthServiceUnavailable(format!(
                "web config returned {status}: {}",
                Error::truncate_body(&body)
            )));
        }

        let config: WebConfigResponse = response
            .json()
            .await
            .map_err(|e| Error::AuthServiceUnavailable(format!("invalid web config: {e}")))?;
        Ok(config.project_id)
    }
}

fn token_from_parts(
    bearer: String,
    user_id: String,
    refresh_token: Option<String>,
    expires_in: &str,
) -> Result<AuthToken> {
    let seconds: i64 = expires_in.parse().map_err(|_| {
        Error::UnexpectedResponse(format!("token lifetime is not a number: {expires_in:?}"))
    })?;
    Ok(AuthToken::new(bearer, user_id, refresh_token, seconds))
}
