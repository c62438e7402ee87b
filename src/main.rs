//! Purpose: `crashflow` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, runs commands, emits results on stdout.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: All transformations go through the `api` boundary.
#![allow(clippy::result_large_err)]
use std::io::{self, IsTerminal, Read};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand, ValueEnum, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};

mod serve;

use crashflow::api::{
    Error, ErrorKind, PortalClient, ReportWindow, ScriptOptions, TransportMode, decode_wrapped,
    fix_malformed_json, generate_sql, records_from_value, to_exit_code,
};
use serve::ServeConfig;

const DEFAULT_BIND: &str = "127.0.0.1:5000";
const DEFAULT_MAX_BODY_BYTES: u64 = 1024 * 1024;

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

#[derive(Debug, Parser)]
#[command(
    name = "crashflow",
    version,
    about = "Normalize malformed WSDOT collision JSON and emit batched insert scripts",
    after_help = r#"Learn more:
  $ crashflow <command> --help"#,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ModeArg {
    Pedestrian,
    Bicyclist,
}

impl ModeArg {
    fn to_transport(self) -> TransportMode {
        match self {
            ModeArg::Pedestrian => TransportMode::Pedestrian,
            ModeArg::Bicyclist => TransportMode::Bicyclist,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FetchFormat {
    Json,
    Sql,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Normalize a malformed payload into pretty-printed JSON
    Fix {
        /// Input file path (use - for stdin)
        input: Option<PathBuf>,
    },
    /// Convert a record payload into a batched SQL insert script
    Sql {
        /// Input file path (use - for stdin); wrapped payloads are dequoted first
        input: Option<PathBuf>,
        /// Mode label stamped onto every generated row
        #[arg(long)]
        mode: String,
        /// Records per INSERT statement
        #[arg(long)]
        batch_size: Option<usize>,
        /// Write the script to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Fetch a report window from the WSDOT portal and normalize it
    Fetch {
        #[arg(long, value_enum)]
        mode: ModeArg,
        /// Report window start, yyyymmdd
        #[arg(long)]
        start: String,
        /// Report window end, yyyymmdd
        #[arg(long)]
        end: String,
        /// Output format
        #[arg(long, value_enum, default_value = "json")]
        format: FetchFormat,
        /// Records per INSERT statement (sql format only)
        #[arg(long)]
        batch_size: Option<usize>,
        /// Write the output to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Run the HTTP server wrapping the core transformations
    Serve {
        #[arg(long, default_value = DEFAULT_BIND)]
        bind: SocketAddr,
        /// Permit binding to a non-loopback address
        #[arg(long)]
        allow_non_loopback: bool,
        /// Maximum accepted request body size in bytes
        #[arg(long, default_value_t = DEFAULT_MAX_BODY_BYTES)]
        max_body_bytes: u64,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Run `crashflow --help` for usage."));
            }
        },
    };

    match cli.command {
        Command::Fix { input } => {
            let raw = read_input(input.as_deref())?;
            let fixed = fix_malformed_json(&raw)?;
            println!("{fixed}");
            Ok(RunOutcome::ok())
        }
        Command::Sql {
            input,
            mode,
            batch_size,
            out,
        } => {
            let raw = read_input(input.as_deref())?;
            let value = decode_wrapped(&raw)?;
            let records = records_from_value(&value)?;
            let sql = generate_sql(&records, &mode, &script_options(batch_size))?;
            write_output(out.as_deref(), &sql)?;
            Ok(RunOutcome::ok())
        }
        Command::Fetch {
            mode,
            start,
            end,
            format,
            batch_size,
            out,
        } => {
            let window = ReportWindow::new(start, end)?;
            let client = PortalClient::new()?;
            let raw = client.fetch_raw(mode.to_transport(), &window)?;
            let output = match format {
                FetchFormat::Json => fix_malformed_json(&raw)?,
                FetchFormat::Sql => {
                    let value = decode_wrapped(&raw)?;
                    let records = records_from_value(&value)?;
                    generate_sql(
                        &records,
                        mode.to_transport().label(),
                        &script_options(batch_size),
                    )?
                }
            };
            write_output(out.as_deref(), &output)?;
            Ok(RunOutcome::ok())
        }
        Command::Serve {
            bind,
            allow_non_loopback,
            max_body_bytes,
        } => {
            let config = ServeConfig {
                bind,
                allow_non_loopback,
                max_body_bytes,
            };
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to start runtime")
                        .with_source(err)
                })?;
            runtime.block_on(serve::serve(config))?;
            Ok(RunOutcome::ok())
        }
        Command::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "crashflow", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
    }
}

fn script_options(batch_size: Option<usize>) -> ScriptOptions {
    match batch_size {
        Some(batch_size) => ScriptOptions::new().with_batch_size(batch_size),
        None => ScriptOptions::new(),
    }
}

fn read_input(path: Option<&Path>) -> Result<String, Error> {
    match path {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read input")
                .with_path(path)
                .with_source(err)
        }),
        _ => {
            let mut text = String::new();
            io::stdin().read_to_string(&mut text).map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to read stdin")
                    .with_source(err)
            })?;
            Ok(text)
        }
    }
}

fn write_output(path: Option<&Path>, text: &str) -> Result<(), Error> {
    match path {
        Some(path) => std::fs::write(path, text).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to write output")
                .with_path(path)
                .with_source(err)
        }),
        None => {
            print!("{text}");
            if !text.ends_with('\n') {
                println!();
            }
            Ok(())
        }
    }
}

fn clap_error_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    rendered
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("invalid arguments")
        .trim_start_matches("error: ")
        .to_string()
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("error: {}", error_message(err));
        if let Some(hint) = err.hint() {
            eprintln!("hint: {hint}");
        }
        return;
    }

    let value = error_json(err);
    let line = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{line}");
}

fn error_message(err: &Error) -> String {
    match err.message() {
        Some(message) => message.to_string(),
        None => format!("{:?}", err.kind()),
    }
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

#[cfg(test)]
mod tests {
    use super::{ModeArg, clap_error_summary, error_json, script_options};
    use crashflow::api::{Error, ErrorKind, TransportMode};
    use clap::Parser;

    #[test]
    fn mode_arg_maps_to_transport_mode() {
        assert_eq!(
            ModeArg::Pedestrian.to_transport(),
            TransportMode::Pedestrian
        );
        assert_eq!(ModeArg::Bicyclist.to_transport(), TransportMode::Bicyclist);
    }

    #[test]
    fn script_options_default_when_batch_size_absent() {
        assert_eq!(script_options(None).batch_size, 500);
        assert_eq!(script_options(Some(25)).batch_size, 25);
    }

    #[test]
    fn error_json_carries_kind_message_hint() {
        let err = Error::new(ErrorKind::Decode)
            .with_message("input does not decode")
            .with_hint("Check the payload.");
        let value = error_json(&err);
        let inner = value.get("error").and_then(|v| v.as_object()).expect("error object");
        assert_eq!(inner.get("kind").and_then(|v| v.as_str()), Some("Decode"));
        assert_eq!(
            inner.get("message").and_then(|v| v.as_str()),
            Some("input does not decode")
        );
        assert_eq!(
            inner.get("hint").and_then(|v| v.as_str()),
            Some("Check the payload.")
        );
    }

    #[test]
    fn clap_errors_summarize_to_one_line() {
        let err = super::Cli::try_parse_from(["crashflow", "sql"]).expect_err("missing --mode");
        let summary = clap_error_summary(&err);
        assert!(!summary.is_empty());
        assert!(!summary.contains('\n'));
    }
}
