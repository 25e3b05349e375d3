//! # Tongtool Core
//!
//! Session runtime for the Tongtool open API.
//!
//! ## Overview
//!
//! Endpoint modules describe *what* to call; this crate handles *how*:
//!
//! - **Credentials** obtained through the two-step token exchange, signed,
//!   renewed before expiry, with concurrent refreshes collapsed into one
//! - **Retries** for rate limiting and transient transport failures
//! - **Canonical cache keys** independent of map and field order
//! - **Tolerant decoding** of numbers and booleans sent with the wrong JSON type
//! - **Response caching** in a sharded in-memory TTL store
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | In-memory response cache and per-call cache policy |
//! | [`cache_key`] | Deterministic parameter encoding for cache keys |
//! | [`config`] | Runtime configuration |
//! | [`credential`] | Credential record, signing and the credential manager |
//! | [`envelope`] | `{code, message, datas}` wire envelope |
//! | [`error`] | Error taxonomy and the envelope code table |
//! | [`executor`] | Request executor composing everything above |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`pagination`] | Page parameters and list payloads |
//! | [`retry`] | Retry policy and backoff |
//! | [`tolerant`] | Type-tolerant scalar decoding |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tongtool_core::{CachePolicy, RequestExecutor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = RequestExecutor::from_env()?;
//!     let page = executor.page_request();
//!
//!     let orders: serde_json::Value = executor
//!         .execute("/openapi/tongtool/ordersQuery", &page, CachePolicy::enabled())
//!         .await?;
//!     println!("{orders}");
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ Endpoint caller  │
//! └────────┬─────────┘
//!          │ execute(path, params, policy)
//!          ▼
//! ┌──────────────────┐     ┌───────────────────┐
//! │ RequestExecutor  │────▶│ CredentialManager │
//! └────────┬─────────┘     └───────────────────┘
//!          │
//!          ├──────────────▶ ResponseCache (canonical key)
//!          │
//!          ▼
//! ┌──────────────────┐     ┌───────────────────┐
//! │ RetryPolicy      │────▶│ HttpClient        │
//! └──────────────────┘     └───────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use tongtool_core::{ApiError, ApiErrorKind};
//!
//! fn handle_error(error: ApiError) {
//!     match error.kind() {
//!         ApiErrorKind::Authentication => {
//!             // Fix app key/secret, then reset the credential manager
//!         }
//!         ApiErrorKind::RateLimited => {
//!             // Retry budget exhausted
//!         }
//!         _ => {}
//!     }
//! }
//! ```
//!
//! ## Security
//!
//! - The app secret, token and signature are never logged
//! - `Config`'s `Debug` output redacts the app secret

pub mod cache;
pub mod cache_key;
pub mod config;
pub mod credential;
pub mod envelope;
pub mod error;
pub mod executor;
pub mod http_client;
pub mod pagination;
pub mod retry;
pub mod tolerant;

// Re-export commonly used types at crate root for convenience

// Caching
pub use cache::{CacheEntry, CacheError, CacheMode, CachePolicy, ResponseCache};
pub use cache_key::{request_key, scoped_request_key, CanonicalParams, ParamValue};

// Configuration
pub use config::Config;

// Credentials
pub use credential::{sign, AuthState, Credential, CredentialManager};

// Wire types
pub use envelope::{ApplicationRecord, RemoteEnvelope};
pub use pagination::{PageRequest, PagedData};

// Errors
pub use error::{error_wrap, fallback_message, ApiError, ApiErrorKind, CredentialError};

// Execution
pub use executor::{decode_response, RequestExecutor};
pub use retry::{Backoff, RetryDecision, RetryPolicy};

// HTTP
pub use http_client::{
    HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient,
    ScriptedHttpClient,
};

// Decoding
pub use tolerant::{DecodeError, Tolerant};
