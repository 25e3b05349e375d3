//! Signed, retried, optionally cached business calls.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::cache::{CacheMode, CachePolicy, ResponseCache};
use crate::cache_key::{scoped_request_key, CanonicalParams};
use crate::config::Config;
use crate::credential::CredentialManager;
use crate::envelope::RemoteEnvelope;
use crate::error::{resolve_message, ApiError};
use crate::http_client::{HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient};
use crate::pagination::{PageRequest, PagedData};
use crate::retry::RetryPolicy;

/// Runs one logical remote operation per [`RequestExecutor::execute`] call.
///
/// The executor owns the session: one [`CredentialManager`] and one
/// [`ResponseCache`] shared by every call made through it. Clone the
/// surrounding `Arc` to share it across tasks.
pub struct RequestExecutor {
    config: Config,
    http: Arc<dyn HttpClient>,
    credentials: Arc<CredentialManager>,
    cache: ResponseCache,
    retry: RetryPolicy,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("config", &self.config)
            .field("credentials", &self.credentials)
            .field("cache_entries", &self.cache.len())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl RequestExecutor {
    pub fn new(config: Config, http: Arc<dyn HttpClient>) -> Result<Self, ApiError> {
        config.validate()?;

        let credentials = Arc::new(CredentialManager::new(&config, Arc::clone(&http)));
        let cache = ResponseCache::from_config(&config);
        let retry = RetryPolicy::from_config(&config);
        Ok(Self {
            config,
            http,
            credentials,
            cache,
            retry,
        })
    }

    /// Reads `TONGTOOL_*` variables and talks to the network through reqwest.
    pub fn from_env() -> Result<Self, ApiError> {
        Self::new(Config::from_env()?, Arc::new(ReqwestHttpClient::new()))
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Shares an existing cache. Keys are scoped by app key, so executors for
    /// different accounts never read each other's entries.
    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// First page at the configured default page size.
    pub fn page_request(&self) -> PageRequest {
        PageRequest::first(self.config.default_page_size)
    }

    fn endpoint_url(&self, path: &str) -> String {
        let base = self.config.api_base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    fn effective_policy(&self, policy: CachePolicy) -> CachePolicy {
        if self.cache.is_disabled() {
            CachePolicy {
                mode: CacheMode::Bypass,
                ..policy
            }
        } else {
            policy
        }
    }

    /// POSTs `params` to `path` and decodes the envelope's `datas` as `T`.
    ///
    /// A valid credential is obtained first and its error is returned
    /// unchanged. A cache hit returns without touching the network or the
    /// credential. Responses are cached only after they decode successfully.
    #[instrument(skip(self, params, policy), fields(path = %path, mode = ?policy.mode))]
    pub async fn execute<P, T>(
        &self,
        path: &str,
        params: &P,
        policy: CachePolicy,
    ) -> Result<T, ApiError>
    where
        P: Serialize + CanonicalParams + ?Sized,
        T: DeserializeOwned,
    {
        let credential = self.credentials.ensure_valid().await?;
        let policy = self.effective_policy(policy);

        let key = (policy.reads() || policy.writes())
            .then(|| scoped_request_key(&self.config.app_key, path, params));
        if let (true, Some(key)) = (policy.reads(), key.as_deref()) {
            if let Some(payload) = self.cache.get(key) {
                debug!("cache hit");
                return decode_response(&HttpResponse::ok_json(&*payload));
            }
            debug!("cache miss");
        }

        let body = serde_json::to_string(params)?;
        if self.config.debug {
            debug!(body = %body, "request body");
        }

        let url = self.endpoint_url(path);
        let mut failures = 0u32;
        let (decoded, raw) = loop {
            let request = credential.attach(
                HttpRequest::post(url.as_str())
                    .with_json_body(body.as_str())
                    .with_timeout_ms(self.config.timeout_ms),
            );

            match self.attempt::<T>(request).await {
                Ok(success) => break success,
                Err(error) => {
                    if error.is_auth_failure() {
                        self.credentials.invalidate();
                    }

                    let decision = self.retry.decide(failures, &error);
                    if !decision.should_retry {
                        return Err(error);
                    }

                    failures += 1;
                    warn!(
                        attempt = failures,
                        wait_ms = decision.wait.as_millis() as u64,
                        %error,
                        "retrying request"
                    );
                    tokio::time::sleep(decision.wait).await;
                }
            }
        };

        if let (true, Some(key)) = (policy.writes(), key) {
            if let Err(error) = self.cache.put(key, raw, policy.ttl) {
                warn!(%error, "response not cached");
            }
        }

        Ok(decoded)
    }

    async fn attempt<T: DeserializeOwned>(
        &self,
        request: HttpRequest,
    ) -> Result<(T, String), ApiError> {
        let response = self.http.execute(request).await?;
        if self.config.debug {
            debug!(status = response.status, body = %response.body, "response body");
        }

        let decoded = decode_response(&response)?;
        Ok((decoded, response.body))
    }

    /// Walks pages from the configured default size until a short page.
    ///
    /// `params` builds the request for each page. Each page is a separate
    /// call with its own cache entry.
    pub async fn execute_all_pages<P, T, F>(
        &self,
        path: &str,
        params: F,
        policy: CachePolicy,
    ) -> Result<Vec<T>, ApiError>
    where
        F: Fn(PageRequest) -> P,
        P: Serialize + CanonicalParams,
        T: DeserializeOwned,
    {
        let mut page = self.page_request();
        let mut items = Vec::new();
        loop {
            let data: PagedData<T> = self.execute(path, &params(page), policy).await?;
            let last = data.is_last_page(&page);
            items.extend(data.array);
            if last {
                return Ok(items);
            }
            page = page.next();
        }
    }
}

/// Classifies a raw business response and decodes its `datas`.
///
/// HTTP 429 is rate limiting. A body that is not an envelope is a decode
/// error carrying the status line, except on 5xx where it counts as a
/// retryable transport failure.
pub fn decode_response<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, ApiError> {
    if response.is_too_many_requests() {
        return Err(ApiError::RateLimited {
            code: i64::from(response.status),
            message: resolve_message(crate::error::CODE_TOO_MANY_REQUESTS, ""),
        });
    }

    let envelope: RemoteEnvelope<Value> = match serde_json::from_str(&response.body) {
        Ok(envelope) => envelope,
        Err(error) if response.status >= 500 => {
            return Err(ApiError::Transport(HttpError::new(format!(
                "{}: {error}",
                response.status_line()
            ))));
        }
        Err(error) => {
            return Err(ApiError::Decode {
                status: response.status_line(),
                message: error.to_string(),
            });
        }
    };

    envelope.check()?;
    if !response.is_success() {
        return Err(ApiError::Decode {
            status: response.status_line(),
            message: String::from("success envelope on a failed HTTP status"),
        });
    }

    serde_json::from_value(envelope.datas.unwrap_or(Value::Null)).map_err(|error| {
        ApiError::Decode {
            status: response.status_line(),
            message: error.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::credential::{AuthState, APPLICATION_PATH, TOKEN_PATH};
    use crate::error::{ApiErrorKind, CredentialError};
    use crate::http_client::ScriptedHttpClient;
    use crate::retry::Backoff;

    const ORDERS_PATH: &str = "/openapi/tongtool/ordersQuery";

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct Order {
        order_id: String,
        #[serde(deserialize_with = "crate::tolerant::deserialize")]
        amount: f64,
    }

    fn config() -> Config {
        Config {
            auth_base_url: String::from("https://auth.test"),
            api_base_url: String::from("https://api.test/"),
            ..Config::new("key", "secret")
        }
    }

    fn authenticated_http() -> Arc<ScriptedHttpClient> {
        let http = ScriptedHttpClient::new();
        http.reply_json(
            TOKEN_PATH,
            r#"{"success":true,"code":200,"message":"","datas":"tok"}"#,
        )
        .reply_json(
            APPLICATION_PATH,
            r#"{"success":true,"code":200,"message":"","datas":[{"partnerOpenId":"P-1"}]}"#,
        );
        Arc::new(http)
    }

    fn executor(http: &Arc<ScriptedHttpClient>) -> RequestExecutor {
        RequestExecutor::new(config(), http.clone())
            .expect("valid config")
            .with_retry_policy(RetryPolicy::uniform(
                2,
                Backoff::Fixed {
                    delay: Duration::from_millis(1),
                },
            ))
    }

    fn params() -> BTreeMap<String, Value> {
        BTreeMap::from([
            (String::from("merchantId"), json!("M1")),
            (String::from("pageNo"), json!(1)),
        ])
    }

    #[test]
    fn missing_keys_are_rejected_at_construction() {
        let error = RequestExecutor::new(Config::default(), Arc::new(ScriptedHttpClient::new()))
            .expect_err("keys required");

        assert_eq!(error.kind(), ApiErrorKind::Config);
    }

    #[tokio::test]
    async fn successful_call_is_signed_decoded_and_cached() {
        let http = authenticated_http();
        http.reply_json(
            ORDERS_PATH,
            r#"{"code":200,"message":"","datas":{"orderId":"O-1","amount":"3.50"}}"#,
        );
        let executor = executor(&http);

        let order: Order = executor
            .execute(ORDERS_PATH, &params(), CachePolicy::enabled())
            .await
            .expect("call succeeds");

        assert_eq!(
            order,
            Order {
                order_id: String::from("O-1"),
                amount: 3.5,
            }
        );
        assert_eq!(executor.cache().len(), 1);

        let request = http
            .requests()
            .into_iter()
            .find(|request| request.url.contains(ORDERS_PATH))
            .expect("business request recorded");
        assert_eq!(request.url, format!("https://api.test{ORDERS_PATH}"));
        assert_eq!(request.query_value("app_token"), Some("tok"));
        assert!(request.query_value("sign").is_some());
        assert!(request.query_value("timestamp").is_some());
        assert_eq!(
            request.body.as_deref(),
            Some(r#"{"merchantId":"M1","pageNo":1}"#)
        );
    }

    #[tokio::test]
    async fn cache_hit_performs_no_network_call() {
        let http = authenticated_http();
        http.reply_json(
            ORDERS_PATH,
            r#"{"code":200,"message":"","datas":{"orderId":"O-1","amount":1}}"#,
        );
        let executor = executor(&http);

        let first: Order = executor
            .execute(ORDERS_PATH, &params(), CachePolicy::enabled())
            .await
            .expect("first call");
        let calls_after_first = http.calls();
        let credential_before = executor.credentials().current();

        let second: Order = executor
            .execute(ORDERS_PATH, &params(), CachePolicy::enabled())
            .await
            .expect("cached call");

        assert_eq!(first, second);
        assert_eq!(http.calls(), calls_after_first);
        assert_eq!(executor.credentials().current(), credential_before);
    }

    #[tokio::test]
    async fn shared_cache_keeps_accounts_apart() {
        let http_a = authenticated_http();
        http_a.reply_json(
            ORDERS_PATH,
            r#"{"code":200,"message":"","datas":{"orderId":"A-1","amount":1}}"#,
        );
        let http_b = authenticated_http();
        http_b.reply_json(
            ORDERS_PATH,
            r#"{"code":200,"message":"","datas":{"orderId":"B-1","amount":2}}"#,
        );
        let a = executor(&http_a);
        let b = RequestExecutor::new(
            Config {
                app_key: String::from("other-key"),
                ..config()
            },
            http_b.clone(),
        )
        .expect("valid config")
        .with_cache(a.cache().clone());

        let from_a: Order = a
            .execute(ORDERS_PATH, &params(), CachePolicy::enabled())
            .await
            .expect("account a");
        let from_b: Order = b
            .execute(ORDERS_PATH, &params(), CachePolicy::enabled())
            .await
            .expect("account b");

        assert_eq!(from_a.order_id, "A-1");
        assert_eq!(from_b.order_id, "B-1");
        assert_eq!(http_b.calls_to(ORDERS_PATH), 1);
        assert_eq!(a.cache().len(), 2);
    }

    #[tokio::test]
    async fn bypass_and_refresh_modes_skip_cache_reads() {
        let http = authenticated_http();
        http.reply_json(ORDERS_PATH, r#"{"code":200,"message":"","datas":[]}"#);
        let executor = executor(&http);

        let _: Vec<Value> = executor
            .execute(ORDERS_PATH, &params(), CachePolicy::bypass())
            .await
            .expect("bypass call");
        assert!(executor.cache().is_empty());

        let _: Vec<Value> = executor
            .execute(ORDERS_PATH, &params(), CachePolicy::refresh())
            .await
            .expect("refresh call");
        let _: Vec<Value> = executor
            .execute(ORDERS_PATH, &params(), CachePolicy::refresh())
            .await
            .expect("refresh call");

        assert_eq!(http.calls_to(ORDERS_PATH), 3);
        assert_eq!(executor.cache().len(), 1);
    }

    #[tokio::test]
    async fn token_expired_surfaces_fallback_and_is_not_cached() {
        let http = authenticated_http();
        http.reply_json(ORDERS_PATH, r#"{"code":523,"message":"","datas":null}"#);
        let executor = executor(&http);

        let error = executor
            .execute::<_, Value>(ORDERS_PATH, &params(), CachePolicy::enabled())
            .await
            .expect_err("523 surfaces");

        assert_eq!(error.to_string(), "523: Token 已过期");
        assert!(executor.cache().is_empty());
        assert_eq!(http.calls_to(ORDERS_PATH), 1);
        assert_eq!(executor.credentials().state(), AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn rate_limit_retries_stop_after_budget() {
        let http = authenticated_http();
        http.reply_json(ORDERS_PATH, r#"{"code":526,"message":"","datas":null}"#);
        let executor = executor(&http);

        let error = executor
            .execute::<_, Value>(ORDERS_PATH, &params(), CachePolicy::enabled())
            .await
            .expect_err("budget exhausted");

        assert_eq!(error.kind(), ApiErrorKind::RateLimited);
        assert_eq!(error.to_string(), "526: 请求太频繁");
        assert_eq!(http.calls_to(ORDERS_PATH), 3);
    }

    #[tokio::test]
    async fn http_429_is_retried_then_succeeds() {
        let http = authenticated_http();
        http.reply(ORDERS_PATH, Ok(HttpResponse::new(429, "")))
            .reply_json(ORDERS_PATH, r#"{"code":200,"message":"","datas":7}"#);
        let executor = executor(&http);

        let value: i64 = executor
            .execute(ORDERS_PATH, &params(), CachePolicy::bypass())
            .await
            .expect("second attempt succeeds");

        assert_eq!(value, 7);
        assert_eq!(http.calls_to(ORDERS_PATH), 2);
    }

    #[tokio::test]
    async fn transient_transport_failure_is_retried() {
        let http = authenticated_http();
        http.reply(ORDERS_PATH, Err(HttpError::new("connection reset")))
            .reply_json(ORDERS_PATH, r#"{"code":200,"message":"","datas":"done"}"#);
        let executor = executor(&http);

        let value: String = executor
            .execute(ORDERS_PATH, &params(), CachePolicy::enabled())
            .await
            .expect("retry succeeds");

        assert_eq!(value, "done");
        assert_eq!(http.calls_to(ORDERS_PATH), 2);
    }

    #[tokio::test]
    async fn business_errors_are_not_retried() {
        let http = authenticated_http();
        http.reply_json(
            ORDERS_PATH,
            r#"{"code":525,"message":"pageSize too large","datas":null}"#,
        );
        let executor = executor(&http);

        let error = executor
            .execute::<_, Value>(ORDERS_PATH, &params(), CachePolicy::enabled())
            .await
            .expect_err("invalid parameters");

        assert_eq!(error.to_string(), "525: pageSize too large");
        assert_eq!(http.calls_to(ORDERS_PATH), 1);
    }

    #[tokio::test]
    async fn credential_failure_aborts_call_with_credential_error() {
        let http = Arc::new(ScriptedHttpClient::new());
        http.reply_json(
            TOKEN_PATH,
            r#"{"success":false,"code":524,"message":"","datas":null}"#,
        );
        let executor = executor(&http);

        let error = executor
            .execute::<_, Value>(ORDERS_PATH, &params(), CachePolicy::enabled())
            .await
            .expect_err("cannot authenticate");

        assert!(matches!(
            error,
            ApiError::Credential(CredentialError::Rejected { code: 524, .. })
        ));
        assert_eq!(http.calls_to(ORDERS_PATH), 0);
    }

    #[tokio::test]
    async fn disabled_cache_never_stores() {
        let http = authenticated_http();
        http.reply_json(ORDERS_PATH, r#"{"code":200,"message":"","datas":1}"#);
        let executor = RequestExecutor::new(
            Config {
                enable_cache: false,
                ..config()
            },
            http.clone(),
        )
        .expect("valid config");

        for _ in 0..2 {
            let _: i64 = executor
                .execute(ORDERS_PATH, &params(), CachePolicy::enabled())
                .await
                .expect("call succeeds");
        }

        assert!(executor.cache().is_empty());
        assert_eq!(http.calls_to(ORDERS_PATH), 2);
    }

    #[tokio::test]
    async fn all_pages_are_collected_until_short_page() {
        let http = authenticated_http();
        http.reply_json(
            ORDERS_PATH,
            r#"{"code":200,"message":"","datas":{"array":[1,2],"pageNo":1,"pageSize":2}}"#,
        )
        .reply_json(
            ORDERS_PATH,
            r#"{"code":200,"message":"","datas":{"array":[3],"pageNo":"2","pageSize":"2"}}"#,
        );
        let executor = RequestExecutor::new(
            Config {
                default_page_size: 2,
                ..config()
            },
            http.clone(),
        )
        .expect("valid config");

        let items: Vec<i64> = executor
            .execute_all_pages(ORDERS_PATH, |page| page, CachePolicy::bypass())
            .await
            .expect("pages collected");

        assert_eq!(items, vec![1, 2, 3]);
        let pages: Vec<_> = http
            .requests()
            .into_iter()
            .filter(|request| request.url.contains(ORDERS_PATH))
            .filter_map(|request| request.body)
            .collect();
        assert_eq!(
            pages,
            vec![
                String::from(r#"{"pageNo":1,"pageSize":2}"#),
                String::from(r#"{"pageNo":2,"pageSize":2}"#),
            ]
        );
    }

    #[test]
    fn unparseable_bodies_are_classified_by_status() {
        let gateway = decode_response::<Value>(&HttpResponse::new(502, "<html>"))
            .expect_err("not an envelope");
        assert_eq!(gateway.kind(), ApiErrorKind::Transport);
        assert!(gateway.is_retryable());

        let not_found = decode_response::<Value>(&HttpResponse::new(404, "not here"))
            .expect_err("not an envelope");
        assert!(matches!(
            not_found,
            ApiError::Decode { ref status, .. } if status == "404 Not Found"
        ));
        assert!(!not_found.is_retryable());
    }
}
