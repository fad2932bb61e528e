mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "ctxrpc", version, about = "Call procedures and fire events on a ctxrpc server")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr). `CTXRPC_LOG` takes precedence.
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    match cmd::run(cli.command, format) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_call_subcommand() {
        let cli = Cli::try_parse_from([
            "ctxrpc",
            "call",
            "/tmp/test.sock",
            "getTime",
            "--timeout",
            "500ms",
            "--namespace",
            "game",
        ])
        .expect("call args should parse");

        let Command::Call(args) = cli.command else {
            panic!("expected call");
        };
        assert_eq!(args.name, "getTime");
        assert_eq!(args.timeout, "500ms");
        assert_eq!(args.rpc.namespace, "game");
    }

    #[test]
    fn call_requires_a_procedure_name() {
        let err = Cli::try_parse_from(["ctxrpc", "call", "/tmp/test.sock"])
            .expect_err("missing name should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "ctxrpc",
            "trigger",
            "/tmp/test.sock",
            "log",
            "--json",
            "\"hi\"",
            "--log-level",
            "debug",
            "--format",
            "raw",
        ])
        .expect("trigger args should parse");

        assert!(matches!(cli.command, Command::Trigger(_)));
        assert_eq!(cli.log_level, LogLevel::Debug);
        assert!(matches!(cli.format, Some(OutputFormat::Raw)));
    }
}
