use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use ctxrpc_core::{Env, Rpc, RpcConfig, DEFAULT_CHUNK_SIZE};
use ctxrpc_peer::{connect, Connection};
use serde_json::Value;
use tokio::runtime::Runtime;

use crate::exit::{peer_error, rpc_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod serve;
pub mod trigger;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a server context with demo procedures.
    Serve(ServeArgs),
    /// Call a server procedure and print its result.
    Call(CallArgs),
    /// Fire a server event.
    Trigger(TriggerArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args),
        Command::Call(args) => call::run(args, format),
        Command::Trigger(args) => trigger::run(args),
        Command::Version(args) => version::run(args),
    }
}

/// Settings shared by every command that runs an `Rpc` instance.
#[derive(Args, Debug, Clone)]
pub struct RpcArgs {
    /// Namespace both sides must share.
    #[arg(long, env = "CTXRPC_NAMESPACE", default_value = "default")]
    pub namespace: String,
    /// Split serialized arguments into chunks of this many characters.
    #[arg(long, env = "CTXRPC_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,
}

impl RpcArgs {
    pub fn config(&self) -> RpcConfig {
        RpcConfig {
            chunk_size: self.chunk_size,
            ..RpcConfig::default()
        }
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    #[command(flatten)]
    pub rpc: RpcArgs,
    /// Accept clients running as other users.
    #[arg(long)]
    pub allow_other_users: bool,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Procedure name.
    pub name: String,
    /// JSON arguments.
    #[arg(long)]
    pub json: Option<String>,
    /// Maximum time to wait for the result (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    #[command(flatten)]
    pub rpc: RpcArgs,
}

#[derive(Args, Debug)]
pub struct TriggerArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Event name.
    pub name: String,
    /// JSON arguments.
    #[arg(long)]
    pub json: Option<String>,
    #[command(flatten)]
    pub rpc: RpcArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn runtime() -> CliResult<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("runtime setup failed: {err}")))
}

/// Start a client context connected to the server at `path`.
///
/// Must run inside `rt`'s context so the instance can spawn handlers.
pub(crate) fn client(path: &std::path::Path, args: &RpcArgs) -> CliResult<(Rpc, Connection)> {
    let rpc = Rpc::builder(Env::Client).config(args.config()).build();
    rpc.init(&args.namespace)
        .map_err(|err| rpc_error("init failed", err))?;
    let connection = connect(path).map_err(|err| peer_error("connect failed", err))?;
    connection
        .attach(&rpc)
        .map_err(|err| peer_error("attach failed", err))?;
    Ok((rpc, connection))
}

pub(crate) fn parse_args(json: Option<&str>) -> CliResult<Option<Value>> {
    json.map(|text| {
        serde_json::from_str::<Value>(text)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))
    })
    .transpose()
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn json_arguments_are_optional_but_must_parse() {
        assert_eq!(parse_args(None).unwrap(), None);
        assert_eq!(parse_args(Some(r#"{"x":1}"#)).unwrap(), Some(json!({"x": 1})));
        assert_eq!(parse_args(Some("{nope")).unwrap_err().code, USAGE);
    }
}
