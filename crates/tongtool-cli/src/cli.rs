//! CLI argument definitions for tongtool.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `auth` | Obtain a session credential and print its public fields |
//! | `call` | POST a JSON body to an endpoint and print `datas` |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | none | JSON config file (otherwise `TONGTOOL_*` variables) |
//! | `--debug` | `false` | Debug logging, including request and response bodies |
//! | `--quiet` | `false` | Only log errors |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--timeout-ms` | config | Per-request timeout override |
//!
//! # Examples
//!
//! ```bash
//! tongtool auth --pretty
//! tongtool call /openapi/tongtool/ordersQuery --body '{"merchantId":"M1","pageNo":1}'
//! tongtool call /openapi/tongtool/ordersQuery --repeat 3
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Tongtool open API client.
#[derive(Debug, Parser)]
#[command(
    name = "tongtool",
    author,
    version,
    about = "Signed, retried and cached calls against the Tongtool open API"
)]
pub struct Cli {
    /// JSON configuration file. `TONGTOOL_*` variables are used when omitted.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level and include request/response bodies.
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,

    /// Only log errors.
    #[arg(long, global = true, default_value_t = false, conflicts_with = "debug")]
    pub quiet: bool,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Request timeout in milliseconds.
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the token exchange and print the session record.
    Auth,
    /// Execute a business call.
    Call(CallArgs),
}

#[derive(Debug, Args)]
pub struct CallArgs {
    /// Endpoint path, e.g. `/openapi/tongtool/ordersQuery`.
    pub path: String,

    /// JSON request body.
    #[arg(long, default_value = "{}")]
    pub body: String,

    /// Skip the response cache.
    #[arg(long, default_value_t = false)]
    pub no_cache: bool,

    /// Run the same call this many times in one session.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub repeat: u32,
}
