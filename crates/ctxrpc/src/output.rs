use std::io::{IsTerminal, Write};
use std::time::Duration;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct CallOutput<'a> {
    procedure: &'a str,
    peer_id: &'a str,
    elapsed_ms: f64,
    result: &'a Value,
}

/// Print the value a remote procedure returned.
pub fn print_result(
    procedure: &str,
    peer_id: &str,
    elapsed: Duration,
    result: &Value,
    format: OutputFormat,
) {
    let elapsed_ms = (elapsed.as_secs_f64() * 1000.0 * 100.0).round() / 100.0;
    match format {
        OutputFormat::Json => {
            let out = CallOutput {
                procedure,
                peer_id,
                elapsed_ms,
                result,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PROCEDURE", "AS", "ELAPSED", "RESULT"])
                .add_row(vec![
                    procedure.to_string(),
                    peer_id.to_string(),
                    format!("{elapsed_ms:.2}ms"),
                    result.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let body = serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string());
            println!("{procedure} ({elapsed_ms:.2}ms):\n{body}");
        }
        OutputFormat::Raw => print_raw(result),
    }
}

/// Strings print bare, everything else as compact JSON.
pub fn print_raw(value: &Value) {
    let mut out = std::io::stdout();
    let _ = match value {
        Value::String(text) => writeln!(out, "{text}"),
        other => writeln!(out, "{other}"),
    };
    let _ = out.flush();
}
