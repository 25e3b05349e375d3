//! Session credential acquisition and renewal.
//!
//! Obtaining a credential is a two-step exchange against the auth service:
//!
//! 1. `GET /devApp/appToken?accessKey=..&secretAccessKey=..` yields a raw token.
//! 2. `GET /partnerOpenInfo/getAppBuyerList?app_token=..&timestamp=..&sign=..`
//!    where `sign = md5("app_token" + token + "timestamp" + timestamp + secret)`
//!    yields the application record the session belongs to.
//!
//! The token, timestamp and sign from step 2 are replayed as query parameters
//! on every business call.
//!
//! ```text
//! Unauthenticated ──▶ Authenticating ──▶ Valid ──(time)──▶ StaleButUsable
//!        ▲                  │   ▲                                │
//!        │                  │   └────────────────────────────────┘
//!        └── reset() ── Fatal ◀─┘ (key/secret rejected)
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwapOption;
use md5::{Digest, Md5};
use serde::de::DeserializeOwned;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};

use crate::config::Config;
use crate::envelope::{ApplicationRecord, RemoteEnvelope};
use crate::error::{resolve_message, CredentialError, CODE_OK, CODE_TOO_MANY_REQUESTS};
use crate::http_client::{HttpClient, HttpRequest, HttpResponse};

pub const TOKEN_PATH: &str = "/devApp/appToken";
pub const APPLICATION_PATH: &str = "/partnerOpenInfo/getAppBuyerList";

/// `md5("app_token" + token + "timestamp" + timestamp + app_secret)` as lowercase hex.
pub fn sign(token: &str, timestamp: i64, app_secret: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(b"app_token");
    hasher.update(token.as_bytes());
    hasher.update(b"timestamp");
    hasher.update(timestamp.to_string().as_bytes());
    hasher.update(app_secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn now_epoch() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Signed, time-bounded session proof attached to every business call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub signature: String,
    pub issued_at_epoch: i64,
    pub expires_at_epoch: i64,
    pub owner_id: String,
    pub valid: bool,
    pub application: ApplicationRecord,
}

impl Credential {
    /// Usable but within `margin_secs` of expiry (or already invalid).
    pub fn needs_refresh(&self, now: i64, margin_secs: i64) -> bool {
        !self.valid || self.expires_at_epoch.saturating_sub(now) <= margin_secs
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at_epoch
    }

    /// Copy with the validity flag cleared.
    pub fn invalidated(&self) -> Self {
        Self {
            valid: false,
            ..self.clone()
        }
    }

    /// Adds the `app_token`, `sign` and `timestamp` query parameters.
    pub fn attach(&self, request: HttpRequest) -> HttpRequest {
        request
            .with_query("app_token", &self.token)
            .with_query("sign", &self.signature)
            .with_query("timestamp", self.issued_at_epoch.to_string())
    }
}

/// Position in the credential state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticating,
    Valid,
    StaleButUsable,
    Fatal,
}

/// Owns the process-wide session credential.
///
/// Reads see whole credentials: a refresh swaps in a new `Arc<Credential>`
/// rather than mutating the current one. Concurrent refreshes collapse into
/// a single exchange; callers arriving while one is in flight wait for it
/// and reuse its result, whether that is a credential or an error.
pub struct CredentialManager {
    http: Arc<dyn HttpClient>,
    app_key: String,
    app_secret: String,
    auth_base_url: String,
    timeout_ms: u64,
    ttl_secs: i64,
    refresh_margin_secs: i64,
    current: ArcSwapOption<Credential>,
    refresh_lock: tokio::sync::Mutex<()>,
    fatal: Mutex<Option<CredentialError>>,
    /// Failure of the most recent refresh, cleared by a successful one.
    last_failure: Mutex<Option<CredentialError>>,
    /// Bumped each time a refresh completes.
    generation: AtomicU64,
    refreshing: AtomicBool,
    exchanges: AtomicUsize,
}

/// Clears the `refreshing` flag even if the refresh future is dropped.
struct RefreshingGuard<'a>(&'a AtomicBool);

impl<'a> RefreshingGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for RefreshingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialManager")
            .field("auth_base_url", &self.auth_base_url)
            .field("state", &self.state())
            .field("exchanges", &self.exchange_count())
            .finish_non_exhaustive()
    }
}

impl CredentialManager {
    pub fn new(config: &Config, http: Arc<dyn HttpClient>) -> Self {
        Self {
            http,
            app_key: config.app_key.clone(),
            app_secret: config.app_secret.clone(),
            auth_base_url: config.auth_base_url.trim_end_matches('/').to_owned(),
            timeout_ms: config.timeout_ms,
            ttl_secs: i64::try_from(config.credential_ttl_secs).unwrap_or(i64::MAX),
            refresh_margin_secs: i64::try_from(config.credential_refresh_margin_secs)
                .unwrap_or(i64::MAX),
            current: ArcSwapOption::const_empty(),
            refresh_lock: tokio::sync::Mutex::new(()),
            fatal: Mutex::new(None),
            last_failure: Mutex::new(None),
            generation: AtomicU64::new(0),
            refreshing: AtomicBool::new(false),
            exchanges: AtomicUsize::new(0),
        }
    }

    /// The stored credential, valid or not.
    pub fn current(&self) -> Option<Arc<Credential>> {
        self.current.load_full()
    }

    pub fn state(&self) -> AuthState {
        if self.fatal_error().is_some() {
            return AuthState::Fatal;
        }
        if self.refreshing.load(Ordering::SeqCst) {
            return AuthState::Authenticating;
        }

        let now = now_epoch();
        match self.current.load().as_deref() {
            None => AuthState::Unauthenticated,
            Some(credential) if !credential.valid || credential.is_expired(now) => {
                AuthState::Unauthenticated
            }
            Some(credential) if credential.needs_refresh(now, self.refresh_margin_secs) => {
                AuthState::StaleButUsable
            }
            Some(_) => AuthState::Valid,
        }
    }

    /// Number of token exchanges performed so far.
    pub fn exchange_count(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    fn fatal_error(&self) -> Option<CredentialError> {
        self.fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn last_failure(&self) -> Option<CredentialError> {
        self.last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn fresh_credential(&self) -> Option<Arc<Credential>> {
        self.current
            .load_full()
            .filter(|credential| !credential.needs_refresh(now_epoch(), self.refresh_margin_secs))
    }

    /// Returns a credential that is valid beyond the refresh margin,
    /// refreshing it first if needed.
    ///
    /// In the `Fatal` state this fails immediately without network traffic
    /// until [`CredentialManager::reset`] is called.
    pub async fn ensure_valid(&self) -> Result<Arc<Credential>, CredentialError> {
        if let Some(error) = self.fatal_error() {
            return Err(error);
        }
        if let Some(credential) = self.fresh_credential() {
            return Ok(credential);
        }

        let observed = self.generation.load(Ordering::SeqCst);
        let _guard = self.refresh_lock.lock().await;

        // another caller may have refreshed while we waited
        if let Some(error) = self.fatal_error() {
            return Err(error);
        }
        if let Some(credential) = self.fresh_credential() {
            return Ok(credential);
        }
        if self.generation.load(Ordering::SeqCst) != observed {
            if let Some(error) = self.last_failure() {
                return Err(error);
            }
        }

        let result = {
            let _refreshing = RefreshingGuard::enter(&self.refreshing);
            self.refresh().await
        };
        self.generation.fetch_add(1, Ordering::SeqCst);

        match result {
            Ok(credential) => {
                let credential = Arc::new(credential);
                self.current.store(Some(Arc::clone(&credential)));
                *self
                    .last_failure
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = None;
                Ok(credential)
            }
            Err(error) => {
                self.invalidate();
                *self
                    .last_failure
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(error.clone());
                if error.is_fatal() {
                    error!(%error, "credential refresh failed permanently");
                    *self.fatal.lock().unwrap_or_else(PoisonError::into_inner) =
                        Some(error.clone());
                } else {
                    warn!(%error, "credential refresh failed");
                }
                Err(error)
            }
        }
    }

    /// Marks the stored credential invalid so the next call refreshes it.
    pub fn invalidate(&self) {
        if let Some(credential) = self.current.load_full() {
            if credential.valid {
                self.current.store(Some(Arc::new(credential.invalidated())));
            }
        }
    }

    /// Leaves `Fatal` and drops the stored credential.
    pub fn reset(&self) {
        *self.fatal.lock().unwrap_or_else(PoisonError::into_inner) = None;
        *self
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.current.store(None);
    }

    /// Installs a previously obtained credential.
    pub fn restore(&self, credential: Credential) {
        self.current.store(Some(Arc::new(credential)));
    }

    #[instrument(skip(self), fields(auth_base_url = %self.auth_base_url))]
    async fn refresh(&self) -> Result<Credential, CredentialError> {
        if self.app_key.trim().is_empty() || self.app_secret.trim().is_empty() {
            return Err(CredentialError::MissingKeys);
        }

        self.exchanges.fetch_add(1, Ordering::SeqCst);
        info!("refreshing session credential");

        let request = HttpRequest::get(format!("{}{TOKEN_PATH}", self.auth_base_url))
            .with_query("accessKey", &self.app_key)
            .with_query("secretAccessKey", &self.app_secret)
            .with_timeout_ms(self.timeout_ms);
        let token: String = self.call(request).await?;
        let token = token.trim().to_owned();
        if token.is_empty() {
            return Err(CredentialError::EmptyToken);
        }

        let timestamp = now_epoch();
        let signature = sign(&token, timestamp, &self.app_secret);
        let request = HttpRequest::get(format!("{}{APPLICATION_PATH}", self.auth_base_url))
            .with_query("app_token", &token)
            .with_query("timestamp", timestamp.to_string())
            .with_query("sign", &signature)
            .with_timeout_ms(self.timeout_ms);
        let records: Vec<ApplicationRecord> = self.call(request).await?;
        let application = records
            .into_iter()
            .next()
            .ok_or(CredentialError::NoApplication)?;

        let credential = Credential {
            token,
            signature,
            issued_at_epoch: timestamp,
            expires_at_epoch: timestamp.saturating_add(self.ttl_secs),
            owner_id: application.partner_open_id.clone(),
            valid: true,
            application,
        };
        info!(
            owner_id = %credential.owner_id,
            expires_at = credential.expires_at_epoch,
            "session credential refreshed"
        );
        Ok(credential)
    }

    async fn call<T: DeserializeOwned>(&self, request: HttpRequest) -> Result<T, CredentialError> {
        let response = self
            .http
            .execute(request)
            .await
            .map_err(CredentialError::Transport)?;
        decode_auth_response(&response)
    }
}

fn decode_auth_response<T: DeserializeOwned>(
    response: &HttpResponse,
) -> Result<T, CredentialError> {
    if response.is_too_many_requests() {
        return Err(CredentialError::Rejected {
            code: CODE_TOO_MANY_REQUESTS,
            message: resolve_message(CODE_TOO_MANY_REQUESTS, ""),
        });
    }

    let envelope: RemoteEnvelope<Value> =
        serde_json::from_str(&response.body).map_err(|error| CredentialError::Decode {
            status: response.status_line(),
            message: error.to_string(),
        })?;

    if envelope.code != CODE_OK || envelope.success == Some(false) {
        return Err(CredentialError::Rejected {
            code: envelope.code,
            message: resolve_message(envelope.code, &envelope.message),
        });
    }

    let datas = envelope.datas.ok_or_else(|| CredentialError::Decode {
        status: response.status_line(),
        message: String::from("missing datas"),
    })?;
    serde_json::from_value(datas).map_err(|error| CredentialError::Decode {
        status: response.status_line(),
        message: error.to_string(),
    })
}
