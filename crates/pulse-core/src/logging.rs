#![forbid(unsafe_code)]

//! JSON log output for hosts that do not install their own subscriber.
//!
//! Only compiled with the `tracing-json` feature. Libraries never call this;
//! binaries and test harnesses do, once, at startup.

use tracing_subscriber::EnvFilter;

/// Environment variable consulted for the filter directive.
pub const FILTER_ENV: &str = "PULSE_LOG";

/// Install a global JSON formatter filtered by `PULSE_LOG`
/// (default `pulse=info`).
///
/// Returns `false` if a global subscriber was already installed.
pub fn init() -> bool {
    let filter =
        EnvFilter::try_from_env(FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("pulse=info"));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_reports_already_installed() {
        let _ = init();
        assert!(!init());
    }
}
