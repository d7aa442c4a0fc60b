#![forbid(unsafe_code)]

//! Runtime configuration.

use std::env;

/// Environment variable overriding [`RuntimeConfig::label`].
pub const LABEL_ENV: &str = "PULSE_RUNTIME_LABEL";
/// Environment variable enabling [`RuntimeConfig::trace_dispatch`]
/// (`1` or `true`).
pub const TRACE_DISPATCH_ENV: &str = "PULSE_TRACE_DISPATCH";

/// Configuration for a [`Runtime`](super::Runtime).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Name attached to this runtime's log events.
    pub label: String,
    /// Emit a `TRACE` event for every dispatch.
    pub trace_dispatch: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            label: "pulse".to_owned(),
            trace_dispatch: false,
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    #[must_use]
    pub fn with_trace_dispatch(mut self, enabled: bool) -> Self {
        self.trace_dispatch = enabled;
        self
    }

    /// Defaults overridden by `PULSE_RUNTIME_LABEL` and `PULSE_TRACE_DISPATCH`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the
    /// `PULSE_*` keys.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(val) = lookup(LABEL_ENV)
            && !val.trim().is_empty()
        {
            config.label = val.trim().to_owned();
        }
        if let Some(val) = lookup(TRACE_DISPATCH_ENV) {
            config.trace_dispatch = val == "1" || val.eq_ignore_ascii_case("true");
        }
        config
    }
}
