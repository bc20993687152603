//! cc-lintgate: lint-on-write hook for Claude Code.
//!
//! Reads one hook request from stdin, writes the decision JSON to stdout and
//! the blocking report to stderr. Exit 0 approves, 2 blocks, 1 is a
//! non-blocking failure.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use cc_lintgate::config::{self, ConfigLoader};
use cc_lintgate::executor::{DEFAULT_TIMEOUT, Executor};
use cc_lintgate::protocol::EXIT_ERROR;
use cc_lintgate::{build_engine, logging};

#[derive(Parser)]
#[command(name = "cc-lintgate", version)]
#[command(about = "Lint files written by Claude Code and block edits that introduce errors")]
struct Cli {
    /// Evaluation deadline, e.g. `30s`, `1m30s` or a number of seconds
    #[arg(long, global = true, value_parser = parse_timeout)]
    timeout: Option<Duration>,
    /// Extra config file applied after every other layer
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<String>,
    /// Log at debug level regardless of CC_LINTGATE_LOG
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Show which linters, overrides and settings apply to each file
    ShowActions {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn parse_timeout(s: &str) -> Result<Duration, String> {
    config::parse_duration(s).map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.debug);

    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(e) => return fail(format!("cannot determine working directory: {e}")),
    };
    let explicit = cli
        .config
        .as_deref()
        .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()));

    let config = match ConfigLoader::new(&cwd).with_explicit(explicit).load() {
        Ok(config) => config,
        Err(e) => return fail(e),
    };
    let timeout = cli.timeout.or(config.timeout).unwrap_or(DEFAULT_TIMEOUT);
    let engine = match build_engine(config, &cwd) {
        Ok(engine) => engine,
        Err(e) => return fail(e),
    };

    if let Some(Command::ShowActions { files }) = cli.command {
        let mut out = std::io::stdout().lock();
        for file in &files {
            let _ = writeln!(out, "{}", engine.show_actions(file, &cwd));
        }
        return ExitCode::SUCCESS;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => return fail(format!("failed to start runtime: {e}")),
    };
    let executor = Executor::new(Arc::new(engine))
        .with_cwd(cwd)
        .with_timeout(timeout)
        .with_decision_log(true);
    let outcome = runtime.block_on(executor.execute_with_exit_code(tokio::io::stdin()));

    print!("{}", outcome.stdout);
    let _ = std::io::stdout().flush();
    eprint!("{}", outcome.stderr);
    log::debug!("exit {}", outcome.exit_code);
    ExitCode::from(outcome.exit_code as u8)
}

fn fail(message: impl std::fmt::Display) -> ExitCode {
    log::error!("{message}");
    eprintln!("cc-lintgate: {message}");
    ExitCode::from(EXIT_ERROR as u8)
}
