use tracing_subscriber::EnvFilter;

use crate::error::{BreathlessError, Result};

/// Filter used when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "breathless_engine=debug,breathless_shell=debug,info"
    } else {
        "breathless_engine=info,breathless_shell=info,warn"
    }
}

pub fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)))
}

/// Install the global fmt subscriber. Only binaries should call this.
pub fn init_tracing(verbose: bool) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| BreathlessError::Config(format!("failed to install tracing subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_raises_library_level() {
        assert!(default_directive(true).contains("breathless_engine=debug"));
        assert!(default_directive(false).contains("breathless_engine=info"));
    }

    #[test]
    fn second_install_is_an_error() {
        let _ = init_tracing(false);
        assert!(matches!(init_tracing(false), Err(BreathlessError::Config(_))));
    }
}
