//! Binary entry point: parse arguments, load configuration, bring up logging,
//! and launch the bus server. Kept deliberately thin — all behaviour lives in
//! `indigo-core`/`indigo-server`.

use std::sync::Arc;

use clap::Parser;
use sloggers::types::Severity;

use indigo_core::Bus;
use indigo_server::{NullAnnouncer, ResourceTable};
use indigo_support::config::ServerConfig;

/// INDIGO property bus server.
#[derive(Parser)]
#[command(name = "indigod", version, author = "Bush Hammer Industries")]
struct Args {
    /// Path to a TOML config file; defaults built in if omitted.
    #[arg(long)]
    config: Option<String>,

    /// Overrides the configured listening port.
    #[arg(long)]
    port: Option<u16>,

    /// Overrides the configured log level (trace, debug, info, warning, error, critical).
    #[arg(long)]
    log_level: Option<String>,
}

fn main() {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path),
        None => ServerConfig::default(),
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(level) = &args.log_level {
        config.server.log_level = level.clone();
    }

    let severity = parse_severity(&config.server.log_level);
    let log = indigo_support::logging::init(severity);
    slog::info!(log, "starting indigo bus server"; "port" => config.server.port);

    let bus = Bus::new(log.clone());
    let resources = ResourceTable::new();
    let announcer = Arc::new(NullAnnouncer::new(log.clone()));

    if let Err(err) = indigo_server::run(bus, config, resources, announcer, log.clone()) {
        slog::crit!(log, "server exited with error"; "error" => %err);
        std::process::exit(1);
    }
}

fn parse_severity(level: &str) -> Severity {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Severity::Trace,
        "debug" => Severity::Debug,
        "warning" | "warn" => Severity::Warning,
        "error" => Severity::Error,
        "critical" | "crit" => Severity::Critical,
        _ => Severity::Info,
    }
}
