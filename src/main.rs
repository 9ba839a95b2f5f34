//! `policy-composition` CLI entry point.
//!
//! Provides `validate` to check a configuration against the built-in policy
//! registry, and `classify` to replay a trace of interception-point calls
//! through the classifier.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{info, warn};

use policy_composition::config::{load_config, Config};
use policy_composition::event::arguments::CallArguments;
use policy_composition::event::classifier::classify;
use policy_composition::event::session::{ClientInfo, SessionContext};
use policy_composition::logging;
use policy_composition::policies::builtin_registry;
use policy_composition::policy::PolicyDispatcher;

/// Event correlation and policy dispatch engine.
#[derive(Parser)]
#[command(name = "policy-composition", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Load a configuration and resolve every policy it names.
    Validate {
        /// Config file, TOML or JSON; the default location when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Replay a JSON-lines trace of calls and print the classified events.
    Classify {
        /// File with one `{"pep": ..., "arguments": {...}}` object per line.
        #[arg(long)]
        trace: PathBuf,
        /// Client user for the replayed session.
        #[arg(long, default_value = "rods")]
        user: String,
        /// Client zone for the replayed session.
        #[arg(long, default_value = "tempZone")]
        zone: String,
    },
}

/// One line of a trace file.
#[derive(Debug, Deserialize)]
struct TraceCall {
    pep: String,
    arguments: CallArguments,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Validate { config } => handle_validate(config.as_deref()),
        Command::Classify { trace, user, zone } => handle_classify(&trace, &user, &zone),
    }
}

/// Load the configuration and build a dispatcher over the built-in registry.
fn handle_validate(path: Option<&Path>) -> anyhow::Result<()> {
    let config = match path {
        Some(path) => load_config(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };
    logging::init_cli(&config.engine.log_level);

    let registry = builtin_registry();
    let dispatcher = PolicyDispatcher::new(&config.policies_to_invoke, &registry)
        .context("configuration names an invalid policy")?;
    info!(
        instance = %config.engine.instance_name,
        policies = dispatcher.len(),
        "configuration valid"
    );

    let mut stdout = std::io::stdout().lock();
    writeln!(
        stdout,
        "configuration valid: {} policies_to_invoke",
        config.policies_to_invoke.len()
    )?;
    for descriptor in &config.policies_to_invoke {
        writeln!(
            stdout,
            "  {} events=[{}] clauses=[{}]",
            descriptor.policy,
            descriptor.events.join(", "),
            descriptor.active_policy_clauses.join(", ")
        )?;
    }
    Ok(())
}

/// Replay a trace through one session, printing each record as a JSON line.
fn handle_classify(trace: &Path, user: &str, zone: &str) -> anyhow::Result<()> {
    logging::init_cli("info");

    let contents = std::fs::read_to_string(trace)
        .with_context(|| format!("failed to read trace at {}", trace.display()))?;
    let mut session = SessionContext::new(ClientInfo::for_user(user, zone));
    let mut stdout = std::io::stdout().lock();
    let mut failed = 0_usize;

    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line_number = index.saturating_add(1);
        let call: TraceCall = serde_json::from_str(line)
            .with_context(|| format!("invalid trace entry on line {line_number}"))?;

        match classify(&mut session, &call.pep, &call.arguments) {
            Ok(events) => {
                for classified in events {
                    writeln!(stdout, "{}", classified.record.to_value())?;
                }
            }
            Err(e) => {
                warn!(line = line_number, pep = %call.pep, error = %e, "call not classified");
                failed = failed.saturating_add(1);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} call(s) could not be classified");
    }
    Ok(())
}
