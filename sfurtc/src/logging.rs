//! `tracing` subscriber setup

use crate::config::GlobalConfig;
use crate::error::{Result, SessionError};
use tracing_subscriber::{fmt, EnvFilter};

/// Filter directive implied by a configuration
///
/// An explicit `log_filter` wins, then `RUST_LOG`, then the debug flag.
pub fn filter_directive(config: &GlobalConfig) -> String {
    if let Some(filter) = &config.log_filter {
        return filter.clone();
    }
    if let Ok(env) = std::env::var(EnvFilter::DEFAULT_ENV) {
        if !env.is_empty() {
            return env;
        }
    }
    if config.debug_logging {
        "sfurtc=debug,sfurtc_core=debug,sfurtc_media=debug".to_string()
    } else {
        "info".to_string()
    }
}

/// Install a global fmt subscriber
///
/// Returns `false` when the host already installed one. An unparsable
/// filter is an error.
pub fn init_logging(config: &GlobalConfig) -> Result<bool> {
    let directive = filter_directive(config);
    let filter = EnvFilter::try_new(&directive).map_err(|e| SessionError::Initialization {
        reason: format!("invalid log filter {:?}: {}", directive, e),
    })?;
    Ok(fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok())
}
