// ============================================================
// Layer 6 - Logging
// ============================================================
// One tracing subscriber with two outputs:
//   - stderr, coloured when attached to a terminal
//   - a per-run log file, plain text
//
// The file name comes from a template whose `{datetime}` token
// is replaced by the local start time, so every run gets its own
// file. RUST_LOG overrides the default filter.
//
// Reference: tracing-subscriber docs (Registry, EnvFilter)

use std::{
    fs::{self, File},
    io::IsTerminal,
    path::PathBuf,
    sync::Mutex,
};

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

pub const CRATE_TARGET: &str = "adversarial_lora";

/// Expand `{datetime}` in the template to the current local time.
pub fn resolve_log_path(template: &str) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    PathBuf::from(template.replace("{datetime}", &stamp))
}

/// Install the global subscriber. Returns the log file path.
pub fn init(template: &str, debug: bool) -> Result<PathBuf> {
    let path = resolve_log_path(template);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create log directory '{}'", parent.display()))?;
    }
    let file = File::create(&path)
        .with_context(|| format!("Cannot create log file '{}'", path.display()))?;

    let level  = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"))
        .add_directive(format!("{CRATE_TARGET}={level}").parse()?);

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal());
    let logfile = fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(file));

    Registry::default()
        .with(filter)
        .with(console)
        .with(logfile)
        .try_init()
        .context("A tracing subscriber is already installed")?;

    Ok(path)
}
