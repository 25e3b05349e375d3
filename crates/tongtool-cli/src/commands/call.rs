use std::time::Instant;

use serde_json::Value;
use tongtool_core::{CachePolicy, RequestExecutor};
use tracing::info;

use crate::cli::CallArgs;
use crate::error::CliError;

fn parse_body(raw: &str) -> Result<Value, CliError> {
    let body: Value = serde_json::from_str(raw)
        .map_err(|error| CliError::Command(format!("--body is not valid JSON: {error}")))?;
    if !body.is_object() {
        return Err(CliError::Command(String::from(
            "--body must be a JSON object",
        )));
    }
    Ok(body)
}

pub async fn run(args: &CallArgs, executor: &RequestExecutor) -> Result<Value, CliError> {
    let body = parse_body(&args.body)?;
    let policy = if args.no_cache {
        CachePolicy::bypass()
    } else {
        CachePolicy::enabled()
    };

    let mut datas = Value::Null;
    for iteration in 1..=args.repeat {
        let started = Instant::now();
        datas = executor.execute(&args.path, &body, policy).await?;
        info!(
            iteration,
            elapsed_ms = started.elapsed().as_millis() as u64,
            cache_entries = executor.cache().len(),
            exchanges = executor.credentials().exchange_count(),
            "call completed"
        );
    }
    Ok(datas)
}
