//! chainbatch CLI — inspect defaults and preview batch schedules.
//!
//! Usage:
//! ```bash
//! chainbatch info
//! chainbatch plan handlers.json
//! chainbatch --log-level debug --json-logs plan handlers.json
//! ```

mod logging;
mod plan;

use std::env;
use std::fs;
use std::process;

use anyhow::{bail, Context};

use chainbatch_core::ProcessorConfig;

use crate::logging::LogConfig;
use crate::plan::PlanFile;

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    let (log, args) = match split_log_flags(args) {
        Ok(split) => split,
        Err(e) => {
            eprintln!("{e}");
            print_usage();
            process::exit(1);
        }
    };
    logging::init_tracing(&log);

    let Some(command) = args.first() else {
        print_usage();
        process::exit(1);
    };

    let result = match command.as_str() {
        "info" => {
            cmd_info();
            Ok(())
        }
        "plan" => cmd_plan(args.get(1).map(String::as_str)),
        "version" | "--version" | "-V" => {
            println!("chainbatch {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

/// Pull `--log-level <level>` and `--json-logs` out of the argument list.
fn split_log_flags(args: Vec<String>) -> anyhow::Result<(LogConfig, Vec<String>)> {
    let mut log = LogConfig::default();
    let mut rest = Vec::with_capacity(args.len());
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--log-level" => match iter.next() {
                Some(level) => log.level = level,
                None => bail!("--log-level needs a value"),
            },
            "--json-logs" => log.json = true,
            _ => rest.push(arg),
        }
    }
    Ok((log, rest))
}

fn print_usage() {
    println!("chainbatch {}", env!("CARGO_PKG_VERSION"));
    println!("Range-aware batch scheduling and block processing for substrate archives\n");
    println!("USAGE:");
    println!("    chainbatch [--log-level <LEVEL>] [--json-logs] <COMMAND>\n");
    println!("COMMANDS:");
    println!("    info         Show ChainBatch configuration defaults");
    println!("    plan <FILE>  Print the merged batch schedule for a JSON plan file");
    println!("    version      Print version");
    println!("    help         Print this help");
}

fn cmd_info() {
    let defaults = ProcessorConfig::default();
    println!("ChainBatch v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default batch size: {} blocks/request", defaults.batch_size);
    println!("  Default poll interval: {} ms", defaults.poll_interval_ms);
    println!("  Default channel capacity: {} batches", defaults.channel_capacity);
    println!(
        "  Default retry: {} retries, {}ms initial backoff, {}ms cap",
        defaults.retry.max_retries, defaults.retry.initial_backoff_ms, defaults.retry.max_backoff_ms
    );
    println!("  Storage backends: memory, SQLite (feature: sqlite)");
    println!("  Handler kinds: pre, post, event, call, evm_log, contract_event, gear_message");
}

fn cmd_plan(path: Option<&str>) -> anyhow::Result<()> {
    let Some(path) = path else {
        bail!("usage: chainbatch plan <FILE>");
    };
    let json = fs::read_to_string(path).with_context(|| format!("cannot read {path}"))?;
    let batches = PlanFile::parse(&json)?.schedule()?;
    tracing::info!(path, batches = batches.len(), "schedule computed");
    print!("{}", plan::render(&batches)?);
    Ok(())
}
