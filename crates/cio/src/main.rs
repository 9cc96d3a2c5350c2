#![forbid(unsafe_code)]

mod server;
mod wire;

use ldb_storage::StoreConfig;
use serde_json::{Value as Json, json};
use std::io::{BufRead, Read, Write};
use std::process::ExitCode;

const DATA_DIR_ENV: &str = "LOGSDB_DATA_DIR";
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_SENTINEL: &str = "exit";

fn usage() -> &'static str {
    "ldb_cio — JSON command surface for the experiment record store\n\n\
USAGE:\n\
  ldb_cio [--data-dir DIR] [-v] <create|append|query|backup> [--input JSON]\n\
  ldb_cio [--data-dir DIR] [-v] cio [--sentinel WORD]\n\
\n\
One-shot mode takes the request object from --input (or stdin) and prints\n\
one JSON line on stdout. Stream mode (`cio`) reads one request object per\n\
line, each carrying an \"operation\" key, and answers one line each until\n\
the sentinel line (default: exit) is read.\n\
\n\
FLAGS:\n\
  --data-dir DIR   Store directory (else $LOGSDB_DATA_DIR, else ./data)\n\
  --input JSON     Request body for one-shot operations\n\
  --sentinel WORD  Stream-mode terminator line\n\
  -v, --verbose    Diagnostics on stderr (stdout stays protocol-only)\n\
  -h, --help       Print this help and exit\n\
  -V, --version    Print the version and exit\n"
}

struct CliArgs {
    data_dir: Option<String>,
    input: Option<String>,
    sentinel: String,
    verbose: bool,
    operation: Option<String>,
}

fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    let mut parsed = CliArgs {
        data_dir: None,
        input: None,
        sentinel: DEFAULT_SENTINEL.to_string(),
        verbose: false,
        operation: None,
    };

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--data-dir" => {
                parsed.data_dir = Some(
                    iter.next()
                        .ok_or("--data-dir needs a directory argument")?
                        .clone(),
                );
            }
            "--input" => {
                parsed.input = Some(iter.next().ok_or("--input needs a JSON argument")?.clone());
            }
            "--sentinel" => {
                parsed.sentinel = iter.next().ok_or("--sentinel needs a word")?.clone();
            }
            "-v" | "--verbose" => parsed.verbose = true,
            other if other.starts_with('-') => {
                return Err(format!("unknown flag {other}"));
            }
            other => {
                if parsed.operation.is_some() {
                    return Err(format!("unexpected extra argument {other}"));
                }
                parsed.operation = Some(other.to_string());
            }
        }
    }
    Ok(parsed)
}

fn resolve_config(data_dir: Option<String>) -> StoreConfig {
    let dir = data_dir
        .or_else(|| std::env::var(DATA_DIR_ENV).ok())
        .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
    StoreConfig::new(dir)
}

fn main() -> ExitCode {
    let args = std::env::args().collect::<Vec<_>>();
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        print!("{}", usage());
        return ExitCode::SUCCESS;
    }
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-V" | "--version"))
    {
        println!("ldb_cio {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let parsed = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(detail) => {
            eprintln!("ldb_cio: {detail}");
            eprint!("{}", usage());
            return ExitCode::from(2);
        }
    };
    let config = resolve_config(parsed.data_dir);

    let result = match parsed.operation.as_deref() {
        Some("cio") => run_stream(&config, parsed.verbose, &parsed.sentinel),
        Some(operation @ ("create" | "append" | "query" | "backup")) => {
            run_once(&config, parsed.verbose, operation, parsed.input.as_deref())
        }
        Some(other) => {
            eprintln!("ldb_cio: unknown operation {other}");
            eprint!("{}", usage());
            return ExitCode::from(2);
        }
        None => {
            eprintln!("ldb_cio: an operation is required");
            eprint!("{}", usage());
            return ExitCode::from(2);
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ldb_cio: {err}");
            ExitCode::FAILURE
        }
    }
}

/// One request, one answer line. A malformed body is still answered as a
/// structured error with exit code 0; only transport failures are fatal.
fn run_once(
    config: &StoreConfig,
    verbose: bool,
    operation: &str,
    input: Option<&str>,
) -> Result<(), std::io::Error> {
    let body = match input {
        Some(body) => body.to_string(),
        None => {
            let mut body = String::new();
            std::io::stdin().lock().read_to_string(&mut body)?;
            body
        }
    };

    let answer = match serde_json::from_str::<Json>(&body) {
        Ok(payload) => server::handle(config, verbose, operation, &payload),
        Err(err) => json!({ "error": "bad_request", "detail": err.to_string() }),
    };
    emit_line(&answer)
}

fn run_stream(
    config: &StoreConfig,
    verbose: bool,
    sentinel: &str,
) -> Result<(), std::io::Error> {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == sentinel {
            if verbose {
                eprintln!("ldb_cio: sentinel read, exiting");
            }
            break;
        }

        let answer = match serde_json::from_str::<Json>(trimmed) {
            Ok(payload) => match payload.get("operation").and_then(Json::as_str) {
                Some(operation) => {
                    let operation = operation.to_string();
                    server::handle(config, verbose, &operation, &payload)
                }
                None => json!({
                    "error": "bad_request",
                    "detail": "request object needs an \"operation\" key",
                }),
            },
            Err(err) => json!({ "error": "bad_request", "detail": err.to_string() }),
        };
        emit_line(&answer)?;
    }
    Ok(())
}

fn emit_line(answer: &Json) -> Result<(), std::io::Error> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{answer}")?;
    stdout.flush()
}
