//! Tracing subscriber setup for hosts that do not install their own.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Installs a stderr fmt subscriber filtered by `config.filter`, unless
/// `RUST_LOG` is set.
///
/// Returns false when a global subscriber was already set, which is not an
/// error: the host's subscriber keeps receiving our events.
pub fn init(config: &LoggingConfig) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter(config))
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

fn filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_comes_from_config() {
        let config = LoggingConfig {
            filter: "solutions_compute=debug".to_string(),
        };
        if std::env::var_os("RUST_LOG").is_none() {
            assert_eq!(filter(&config).to_string(), "solutions_compute=debug");
        }
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let config = LoggingConfig::default();
        init(&config);
        assert!(!init(&config));
    }
}
