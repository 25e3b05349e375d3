use serde::Serialize;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tongtool_core::{ApiError, ApplicationRecord, Credential, RequestExecutor};

use crate::error::CliError;

/// Public fields of a session credential. Token and signature are omitted.
#[derive(Debug, Serialize)]
struct SessionSummary<'a> {
    owner_id: &'a str,
    issued_at: String,
    expires_at: String,
    state: String,
    application: &'a ApplicationRecord,
}

fn rfc3339(epoch: i64) -> Result<String, CliError> {
    OffsetDateTime::from_unix_timestamp(epoch)
        .map_err(|error| CliError::Command(error.to_string()))?
        .format(&Rfc3339)
        .map_err(|error| CliError::Command(error.to_string()))
}

fn summarize(credential: &Credential, state: String) -> Result<Value, CliError> {
    let summary = SessionSummary {
        owner_id: &credential.owner_id,
        issued_at: rfc3339(credential.issued_at_epoch)?,
        expires_at: rfc3339(credential.expires_at_epoch)?,
        state,
        application: &credential.application,
    };
    Ok(serde_json::to_value(summary)?)
}

pub async fn run(executor: &RequestExecutor) -> Result<Value, CliError> {
    let manager = executor.credentials();
    let credential = manager.ensure_valid().await.map_err(ApiError::from)?;
    summarize(&credential, format!("{:?}", manager.state()))
}
