//! Configuration file loading.
//!
//! ## Responsibility
//! Read a TOML file from disk, parse it into an [`OrchestratorConfig`], and
//! run validation before returning.
//!
//! ## Guarantees
//! - A successfully loaded config is always validated
//! - I/O errors and parse errors are distinguished in the error type
//! - File path is included in every error message

use std::path::Path;

use super::validation::{self, ConfigError};
use super::OrchestratorConfig;

/// Load an [`OrchestratorConfig`] from a TOML file.
///
/// # Returns
///
/// - `Ok(OrchestratorConfig)` if the file is readable, well-formed, and valid.
/// - `Err(ConfigError::Io)` if the file cannot be read.
/// - `Err(ConfigError::Parse)` if the TOML is malformed.
/// - `Err(ConfigError::Validation)` if semantic constraints are violated.
///
/// # Example
///
/// ```rust,ignore
/// use tokio_translation_orchestrator::config::loader::load_from_file;
/// use std::path::Path;
///
/// let config = load_from_file(Path::new("orchestrator.toml"))?;
/// println!("default concurrency: {}", config.queue.default_concurrency);
/// ```
pub fn load_from_file(path: &Path) -> Result<OrchestratorConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: path.display().to_string(),
        source: e,
    })?;

    load_from_str(&content, &path.display().to_string())
}

/// Load an [`OrchestratorConfig`] from a TOML string.
///
/// `source_name` identifies the source in error messages.
pub fn load_from_str(content: &str, source_name: &str) -> Result<OrchestratorConfig, ConfigError> {
    let config: OrchestratorConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })?;

    validation::validate(&config).map_err(|errors| {
        ConfigError::Validation(
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    })?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VALID_TOML: &str = r#"
[queue]
default_concurrency = 2

[queue.per_backend]
deepl = 6

[queue.throttle]
max_delay_ms = 1500

[router]
rerank_interval = 20
max_retries_per_backend = 0

[cache]
capacity = 50
ttl_s = 60
update_age_on_get = true

[confidence]
auto_approve = 0.85
auto_reject = 0.25

[[glossary.terms]]
source = "Dashboard"
targets = { de = "Übersicht" }

[runtime]
batch_concurrency = 3
"#;

    #[test]
    fn test_load_from_str_valid_toml_succeeds() {
        let config = load_from_str(VALID_TOML, "test").expect("test: valid config");
        assert_eq!(config.queue.default_concurrency, 2);
        assert_eq!(config.queue.limit_for("deepl"), 6);
        assert_eq!(config.queue.throttle.max_delay_ms, 1500);
        assert_eq!(config.router.rerank_interval, 20);
        assert_eq!(config.router.max_retries_per_backend, 0);
        assert!(config.cache.update_age_on_get);
        assert_eq!(config.runtime.batch_concurrency, 3);
        assert_eq!(config.glossary.terms.len(), 1);
    }

    #[test]
    fn test_load_from_str_partial_sections_keep_defaults() {
        let config = load_from_str("[cache]\ncapacity = 7\n", "partial").expect("test: partial");
        assert_eq!(config.cache.capacity, 7);
        assert_eq!(config.cache.ttl_s, 3600);
        assert_eq!(config.router.quarantine_threshold, 5);
    }

    #[test]
    fn test_load_from_str_invalid_toml_returns_parse_error() {
        let result = load_from_str("not valid toml [[[", "bad.toml");
        assert!(matches!(result.unwrap_err(), ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_from_str_validation_failure_returns_validation_error() {
        let result = load_from_str("[queue]\ndefault_concurrency = 0\n", "zero.toml");
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("queue.default_concurrency"));
    }

    #[test]
    fn test_load_from_file_valid_toml_succeeds() {
        let dir = tempfile::tempdir().expect("test: create tempdir");
        let path = dir.path().join("orchestrator.toml");
        let mut f = std::fs::File::create(&path).expect("test: create file");
        f.write_all(VALID_TOML.as_bytes()).expect("test: write");
        drop(f);

        let config = load_from_file(&path).expect("test: load from file");
        assert_eq!(config.cache.capacity, 50);
    }

    #[test]
    fn test_load_from_file_missing_file_returns_io_error() {
        let result = load_from_file(Path::new("/nonexistent/path/orchestrator.toml"));
        assert!(matches!(result.unwrap_err(), ConfigError::Io { .. }));
    }

    #[test]
    fn test_load_from_file_error_names_the_file() {
        let dir = tempfile::tempdir().expect("test: create tempdir");
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "not valid [[[").expect("test: write");

        let err = load_from_file(&path).unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }
}
