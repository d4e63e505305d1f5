//! Tracing setup for the bridge.
//!
//! The configured level applies to the pmbridge crates. The HTTP and database
//! stacks stay at `warn` unless the level names them explicitly, so a `debug`
//! run shows SOAP candidate negotiation without connection-pool chatter.
//! `RUST_LOG`, when set, replaces all of this.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, tracing_subscriber::Registry>> =
    OnceLock::new();

/// Dependencies that are only interesting when something is wrong.
const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "rustls", "sqlx", "h2"];

pub fn init_tracing() {
    init_tracing_with_level("info");
}

pub fn init_tracing_with_level(level: &str) {
    let filter = if rust_log_set() {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| service_filter(level))
    } else {
        service_filter(level)
    };

    let (reload_layer, handle) = reload::Layer::new(filter);
    let _ = LOG_RELOAD_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Switches to the configured level once the config is loaded. No-op when
/// `RUST_LOG` is set or tracing was never initialized.
pub fn apply_logging_level(level: &str) {
    if rust_log_set() {
        return;
    }
    if let Some(handle) = LOG_RELOAD_HANDLE.get() {
        let _ = handle.modify(|f| {
            *f = service_filter(level);
        });
    }
}

fn rust_log_set() -> bool {
    std::env::var_os("RUST_LOG").is_some()
}

fn service_filter(level: &str) -> EnvFilter {
    EnvFilter::new(filter_directives(level))
}

/// `level` followed by `warn` directives for every quiet target the level
/// does not already mention.
fn filter_directives(level: &str) -> String {
    let mut directives = vec![level.trim().to_string()];
    directives.extend(
        QUIET_TARGETS
            .iter()
            .filter(|target| !level.contains(&format!("{target}=")))
            .map(|target| format!("{target}=warn")),
    );
    directives.join(",")
}
