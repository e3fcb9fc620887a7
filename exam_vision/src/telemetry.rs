// THEORY:
// Logging setup for binaries that embed the exam pipeline. The library itself
// only emits `tracing` events; whoever owns `main` decides where they go by
// calling `init_tracing` once at startup.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";
const JSON_LOG_ENV: &str = "EXAM_VISION_JSON_LOG";

/// Installs a global fmt subscriber filtered by `RUST_LOG` (default `info`).
/// JSON lines are emitted when `EXAM_VISION_JSON_LOG` is `1` or `true`.
/// Calling it again after a subscriber is installed does nothing.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true);

    let installed = if json_requested() {
        builder.json().flatten_event(true).try_init()
    } else {
        builder.try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

fn json_requested() -> bool {
    std::env::var(JSON_LOG_ENV)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init_tracing();
        init_tracing();
        tracing::info!("still logging");
    }
}
