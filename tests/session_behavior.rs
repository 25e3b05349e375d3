//! Behavior-driven tests for the session layer
//!
//! These tests drive the executor end to end against a scripted transport
//! and verify how credentials, caching and retries interact.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{json, Value};
use tongtool_tests::*;

fn order_query(merchant: &str) -> BTreeMap<String, Value> {
    BTreeMap::from([
        (String::from("merchantId"), json!(merchant)),
        (String::from("pageNo"), json!(1)),
        (String::from("pageSize"), json!(100)),
    ])
}

// =============================================================================
// Credentials
// =============================================================================

#[tokio::test]
async fn when_many_callers_hit_an_expired_credential_only_one_exchange_runs() {
    // Given: A session holding an expired credential and a slow auth service
    let http = Arc::new(ScriptedHttpClient::new().with_latency(Duration::from_millis(25)));
    script_auth(&http);
    http.reply_json(ORDERS_PATH, r#"{"code":200,"message":"","datas":[]}"#);
    let executor = Arc::new(executor_with(&http, test_config()));
    executor.credentials().restore(expired_credential());

    // When: Twenty calls for different merchants start at once
    let handles: Vec<_> = (0..20)
        .map(|index| {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move {
                executor
                    .execute::<_, Vec<Value>>(
                        ORDERS_PATH,
                        &order_query(&format!("M{index}")),
                        CachePolicy::enabled(),
                    )
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.expect("task joins").expect("call succeeds");
    }

    // Then: The auth service saw exactly one exchange and every call was signed with it
    assert_eq!(executor.credentials().exchange_count(), 1);
    assert_eq!(http.calls_to(TOKEN_PATH), 1);
    assert_eq!(http.calls_to(APPLICATION_PATH), 1);

    let business: Vec<_> = http
        .requests()
        .into_iter()
        .filter(|request| request.url.contains(ORDERS_PATH))
        .collect();
    assert_eq!(business.len(), 20);
    assert!(business
        .iter()
        .all(|request| request.query_value("app_token") == Some("token-1")));
}

#[tokio::test]
async fn when_auth_service_is_down_concurrent_callers_share_one_failure() {
    // Given: A slow auth service whose token endpoint drops the connection
    let http = Arc::new(ScriptedHttpClient::new().with_latency(Duration::from_millis(25)));
    http.reply(TOKEN_PATH, Err(HttpError::new("connection reset")));
    let executor = Arc::new(executor_with(&http, test_config()));

    // When: Ten calls start at once
    let handles: Vec<_> = (0..10)
        .map(|index| {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move {
                executor
                    .execute::<_, Vec<Value>>(
                        ORDERS_PATH,
                        &order_query(&format!("M{index}")),
                        CachePolicy::enabled(),
                    )
                    .await
            })
        })
        .collect();

    // Then: Every caller sees the transport failure of a single exchange
    for handle in handles {
        let error = handle.await.expect("task joins").expect_err("auth is down");
        assert!(matches!(
            error,
            ApiError::Credential(CredentialError::Transport(_))
        ));
    }
    assert_eq!(executor.credentials().exchange_count(), 1);
    assert_eq!(http.calls_to(TOKEN_PATH), 1);
    assert_eq!(http.calls_to(ORDERS_PATH), 0);
}

#[tokio::test]
async fn when_token_expires_mid_session_next_call_refreshes() {
    // Given: A session whose first business call reports an expired token
    let http = Arc::new(ScriptedHttpClient::new());
    script_auth(&http);
    http.reply_json(ORDERS_PATH, r#"{"code":523,"message":"","datas":null}"#)
        .reply_json(ORDERS_PATH, r#"{"code":200,"message":"","datas":["O-1"]}"#);
    let executor = executor_with(&http, test_config());

    // When: The call is made twice
    let first = executor
        .execute::<_, Vec<String>>(ORDERS_PATH, &order_query("M1"), CachePolicy::enabled())
        .await;
    let second = executor
        .execute::<_, Vec<String>>(ORDERS_PATH, &order_query("M1"), CachePolicy::enabled())
        .await;

    // Then: The first fails with the local fallback text and the second re-authenticates
    let error = first.expect_err("expired token surfaces");
    assert_eq!(error.to_string(), "523: Token 已过期");
    assert_eq!(second.expect("refreshed call succeeds"), vec!["O-1"]);
    assert_eq!(executor.credentials().exchange_count(), 2);
    assert_eq!(executor.credentials().state(), AuthState::Valid);
}

#[tokio::test]
async fn when_keys_are_rejected_session_stays_fatal_until_reset() {
    // Given: An auth service that rejects the keys once, then accepts them
    let http = Arc::new(ScriptedHttpClient::new());
    http.reply_json(
        TOKEN_PATH,
        r#"{"success":false,"code":524,"message":"","datas":null}"#,
    );
    script_auth(&http);
    http.reply_json(ORDERS_PATH, r#"{"code":200,"message":"","datas":1}"#);
    let executor = executor_with(&http, test_config());

    // When: Calls are made before the keys are fixed
    let first = executor
        .execute::<_, i64>(ORDERS_PATH, &order_query("M1"), CachePolicy::enabled())
        .await
        .expect_err("keys rejected");
    let second = executor
        .execute::<_, i64>(ORDERS_PATH, &order_query("M1"), CachePolicy::enabled())
        .await
        .expect_err("still fatal");

    // Then: Both fail with the authentication error and only one exchange was attempted
    assert_eq!(first.kind(), ApiErrorKind::Authentication);
    assert_eq!(first.to_string(), second.to_string());
    assert_eq!(http.calls(), 1);
    assert_eq!(executor.credentials().state(), AuthState::Fatal);

    // And: After reset the session recovers
    executor.credentials().reset();
    let value = executor
        .execute::<_, i64>(ORDERS_PATH, &order_query("M1"), CachePolicy::enabled())
        .await
        .expect("recovered");
    assert_eq!(value, 1);
}

// =============================================================================
// Caching
// =============================================================================

#[tokio::test]
async fn when_same_query_repeats_with_reordered_fields_cache_answers() {
    // Given: A warmed cache for one order query
    let http = Arc::new(ScriptedHttpClient::new());
    script_auth(&http);
    http.reply_json(ORDERS_PATH, r#"{"code":200,"message":"","datas":{"total":"3"}}"#);
    let executor = executor_with(&http, test_config());
    let _: Value = executor
        .execute(
            ORDERS_PATH,
            &json!({"merchantId": "M1", "pageNo": 1, "pageSize": 100}),
            CachePolicy::enabled(),
        )
        .await
        .expect("first call");
    let calls = http.calls();

    // When: The same query is issued with its fields in a different order
    let cached: Value = executor
        .execute(
            ORDERS_PATH,
            &json!({"pageSize": 100, "pageNo": 1, "merchantId": "M1"}),
            CachePolicy::enabled(),
        )
        .await
        .expect("cached call");

    // Then: No network call was made
    assert_eq!(cached, json!({"total": "3"}));
    assert_eq!(http.calls(), calls);
}

#[tokio::test]
async fn when_paths_differ_same_parameters_do_not_share_cache_entries() {
    // Given: Two endpoints answering the same parameters differently
    let http = Arc::new(ScriptedHttpClient::new());
    script_auth(&http);
    http.reply_json(ORDERS_PATH, r#"{"code":200,"message":"","datas":"orders"}"#)
        .reply_json(PRODUCTS_PATH, r#"{"code":200,"message":"","datas":"products"}"#);
    let executor = executor_with(&http, test_config());
    let params = order_query("M1");

    // When: Both are called with identical parameters
    let orders: String = executor
        .execute(ORDERS_PATH, &params, CachePolicy::enabled())
        .await
        .expect("orders");
    let products: String = executor
        .execute(PRODUCTS_PATH, &params, CachePolicy::enabled())
        .await
        .expect("products");

    // Then: Each endpoint keeps its own entry
    assert_eq!(orders, "orders");
    assert_eq!(products, "products");
    assert_eq!(executor.cache().len(), 2);
}

#[tokio::test]
async fn when_cache_entry_expires_network_is_used_again() {
    // Given: A cache entry written with a short per-call TTL
    let http = Arc::new(ScriptedHttpClient::new());
    script_auth(&http);
    http.reply_json(ORDERS_PATH, r#"{"code":200,"message":"","datas":5}"#);
    let executor = executor_with(&http, test_config());
    let policy = CachePolicy::enabled().with_ttl(Duration::from_millis(30));
    let _: i64 = executor
        .execute(ORDERS_PATH, &order_query("M1"), policy)
        .await
        .expect("first call");

    // When: The TTL passes
    tokio::time::sleep(Duration::from_millis(60)).await;
    let _: i64 = executor
        .execute(ORDERS_PATH, &order_query("M1"), policy)
        .await
        .expect("second call");

    // Then: Both calls reached the endpoint
    assert_eq!(http.calls_to(ORDERS_PATH), 2);
}

// =============================================================================
// Retries
// =============================================================================

#[tokio::test]
async fn when_rate_limit_persists_caller_sees_it_after_budget() {
    // Given: An endpoint that always answers with the rate-limit code
    let http = Arc::new(ScriptedHttpClient::new());
    script_auth(&http);
    http.reply_json(ORDERS_PATH, r#"{"code":526,"message":"","datas":null}"#);
    let executor = RequestExecutor::new(test_config(), http.clone())
        .expect("valid config")
        .with_retry_policy(fast_retry(3));

    // When: A call is made
    let error = executor
        .execute::<_, Value>(ORDERS_PATH, &order_query("M1"), CachePolicy::enabled())
        .await
        .expect_err("budget exhausted");

    // Then: One attempt plus three retries were made and nothing was cached
    assert_eq!(error.kind(), ApiErrorKind::RateLimited);
    assert_eq!(http.calls_to(ORDERS_PATH), 4);
    assert!(executor.cache().is_empty());
}

#[tokio::test]
async fn when_rate_limit_clears_call_succeeds_transparently() {
    // Given: An endpoint that rate limits twice before answering
    let http = Arc::new(ScriptedHttpClient::new());
    script_auth(&http);
    http.reply_json(ORDERS_PATH, r#"{"code":526,"message":"","datas":null}"#)
        .reply(ORDERS_PATH, Ok(HttpResponse::new(429, "")))
        .reply_json(ORDERS_PATH, r#"{"code":200,"message":"","datas":"ok"}"#);
    let executor = executor_with(&http, test_config());

    // When: A call is made
    let value: String = executor
        .execute(ORDERS_PATH, &order_query("M1"), CachePolicy::enabled())
        .await
        .expect("third attempt succeeds");

    // Then: The caller only sees the final answer
    assert_eq!(value, "ok");
    assert_eq!(http.calls_to(ORDERS_PATH), 3);
}

#[tokio::test]
async fn when_network_keeps_failing_transport_error_surfaces() {
    // Given: An endpoint whose connection always resets
    let http = Arc::new(ScriptedHttpClient::new());
    script_auth(&http);
    http.reply(ORDERS_PATH, Err(HttpError::new("connection reset by peer")));
    let executor = executor_with(&http, test_config());

    // When: A call is made
    let error = executor
        .execute::<_, Value>(ORDERS_PATH, &order_query("M1"), CachePolicy::enabled())
        .await
        .expect_err("transport failure");

    // Then: It was retried within budget and surfaced as a transport error
    assert_eq!(error.kind(), ApiErrorKind::Transport);
    assert!(error.to_string().contains("connection reset by peer"));
    assert_eq!(http.calls_to(ORDERS_PATH), 3);
}
