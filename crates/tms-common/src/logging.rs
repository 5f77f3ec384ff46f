//! ---
//! tms_section: "01-core-functionality"
//! tms_subsection: "module"
//! tms_type: "source"
//! tms_scope: "code"
//! tms_description: "Shared primitives and utilities for the core runtime."
//! tms_version: "v0.0.0-prealpha"
//! tms_owner: "tbd"
//! ---
use anyhow::Result;
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "TMS_LOG";

/// Default levels for the workspace crates. Tick and frame chatter stays at
/// debug, so `info` on these targets shows alerts, recomputes and lifecycle.
const CRATE_LEVELS: [(&str, &str); 5] = [
    ("tms_common", "info"),
    ("tms_rt", "warn"),
    ("tms_sim", "info"),
    ("tms_core", "info"),
    ("tmsd", "info"),
];

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Available log formats for the daemon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    StructuredJson,
    #[default]
    Pretty,
}

/// Filter directive built from the configuration: the global level first,
/// then the crate defaults with `config.targets` overriding them.
pub fn default_directives(config: &LoggingConfig) -> String {
    let mut levels: IndexMap<&str, &str> = CRATE_LEVELS.into_iter().collect();
    for (target, level) in &config.targets {
        levels.insert(target.as_str(), level.as_str());
    }
    std::iter::once(config.level.clone())
        .chain(
            levels
                .into_iter()
                .map(|(target, level)| format!("{target}={level}")),
        )
        .collect::<Vec<_>>()
        .join(",")
}

/// Pick the filter: `TMS_LOG`, then `RUST_LOG`, then the configured levels.
/// An unparsable environment directive falls back to the configured levels.
fn resolve_filter(config: &LoggingConfig) -> EnvFilter {
    let configured = default_directives(config);
    let from_env = [LOG_ENV, EnvFilter::DEFAULT_ENV]
        .into_iter()
        .find_map(|source| std::env::var(source).ok().map(|directive| (source, directive)));
    match from_env {
        Some((source, directive)) => EnvFilter::try_new(&directive).unwrap_or_else(|err| {
            eprintln!("invalid {source} directive ({err}); using {configured}");
            EnvFilter::new(&configured)
        }),
        None => EnvFilter::new(&configured),
    }
}

/// Install the global subscriber for `service_name`.
///
/// Stdout carries the configured format; the daily rolling file under
/// `config.directory` is always JSON so alert history can be grepped by
/// `tank_id` and `severity`. Calling this twice keeps the first subscriber.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)?;
    let prefix = config.file_prefix.as_deref().unwrap_or(service_name);

    let file_appender = daily(&config.directory, format!("{prefix}.log"));
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);

    let stdout_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .flatten_event(true)
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .compact()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };

    let file_layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .json()
        .flatten_event(true)
        .with_writer(file_writer)
        .boxed();

    tracing_subscriber::registry()
        .with(resolve_filter(config))
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(
        service = %service_name,
        log_dir = %config.directory.display(),
        format = ?config.format,
        "tracing initialised"
    );
    Ok(())
}
