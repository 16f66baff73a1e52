//! Logging and tracing infrastructure for enginelink.
//!
//! Structured logging goes through the tracing crate. Two targets matter to
//! operators: the crate's own events, and [`ENGINE_TARGET`], which carries
//! every line the engine writes to its diagnostic stream so that noise can
//! be filtered separately (`RUST_LOG=info,enginelink::engine=warn`).

use std::sync::Once;
use tracing::{info, info_span, Span};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Tracing target for lines the engine writes to its diagnostic stream.
pub const ENGINE_TARGET: &str = "enginelink::engine";

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

static INIT: Once = Once::new();

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize the global tracing subscriber with human-readable output.
///
/// Only the first call (of either init function) installs a subscriber.
pub fn init_tracing() {
    INIT.call_once(|| {
        let fmt_layer = fmt::layer()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_names(true)
            .with_line_number(true);

        let _ = tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt_layer)
            .try_init();

        info!("enginelink tracing initialized");
    });
}

/// Initialize tracing with JSON output, one object per event.
pub fn init_tracing_json() {
    INIT.call_once(|| {
        let fmt_layer = fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_current_span(true);

        let _ = tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt_layer)
            .try_init();

        info!("enginelink tracing initialized (JSON mode)");
    });
}

/// Span wrapping one command on the wire; closing it logs the duration.
pub fn command_span(session_id: u64, command: &str) -> Span {
    info_span!("engine_command", session_id, command)
}

/// Forward one line of engine diagnostics into the log.
pub fn log_engine_line(pid: Option<u32>, line: &str) {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    if trimmed.is_empty() {
        return;
    }
    info!(target: ENGINE_TARGET, pid = ?pid, "{}", trimmed);
}
