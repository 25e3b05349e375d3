mod auth;
mod call;

use std::sync::Arc;

use serde_json::Value;
use tongtool_core::{Config, ReqwestHttpClient, RequestExecutor};

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub async fn run(cli: &Cli) -> Result<Value, CliError> {
    let executor = build_executor(cli)?;

    match &cli.command {
        Command::Auth => auth::run(&executor).await,
        Command::Call(args) => call::run(args, &executor).await,
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    let mut config = match &cli.config {
        Some(path) => Config::from_json_file(path)?,
        None => Config::from_env()?,
    };

    if cli.debug {
        config.debug = true;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    Ok(config)
}

fn build_executor(cli: &Cli) -> Result<RequestExecutor, CliError> {
    let config = load_config(cli)?;
    Ok(RequestExecutor::new(
        config,
        Arc::new(ReqwestHttpClient::new()),
    )?)
}
