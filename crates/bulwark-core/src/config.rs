//! Loading `resilience.toml` files.
//!
//! Parsing only checks shape; semantic validation (delay bounds, thresholds,
//! fallback cycles) happens when the config is applied to an orchestrator.

use std::path::Path;

use bulwark_types::config::ResilienceConfig;
use bulwark_types::error::ConfigurationError;

/// Parse a TOML configuration string.
pub fn parse_config(toml_str: &str) -> Result<ResilienceConfig, ConfigurationError> {
    toml::from_str(toml_str).map_err(|e| ConfigurationError::Parse(e.to_string()))
}

/// Read and parse a configuration file.
pub fn load_config(path: &Path) -> Result<ResilienceConfig, ConfigurationError> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    tracing::debug!(
        path = %path.display(),
        nodes = config.nodes.len(),
        "loaded resilience config"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use bulwark_types::resilience::RetryStrategy;

    use super::*;

    #[test]
    fn test_parse_config_error_is_parse_variant() {
        let err = parse_config("[nodes.a.retry]\nmax_retries = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigurationError::Parse(_)));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[nodes.fetch.retry]
max_retries = 3
strategy = "fibonacci"
base_delay_ms = 50
max_delay_ms = 1000

[nodes.fetch]
fallback = "fetch-cache"
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        let fetch = &config.nodes["fetch"];
        assert_eq!(fetch.retry.as_ref().unwrap().strategy, RetryStrategy::Fibonacci);
        assert_eq!(fetch.fallback.as_deref(), Some("fetch-cache"));
    }

    #[test]
    fn test_load_config_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigurationError::Io(_)));
    }
}
