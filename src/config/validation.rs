//! Configuration validation
//!
//! Validates configuration and reports issues.

use super::types::Config;

/// Result of configuration validation
#[derive(Debug, Clone)]
pub struct ConfigValidationResult {
    /// Whether the config is valid
    pub valid: bool,
    /// Validation errors (critical)
    pub errors: Vec<ValidationIssue>,
    /// Validation warnings (non-critical)
    pub warnings: Vec<ValidationIssue>,
}

impl ConfigValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        ConfigValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error
    pub fn with_error(mut self, issue: ValidationIssue) -> Self {
        self.valid = false;
        self.errors.push(issue);
        self
    }

    /// Add a warning
    pub fn with_warning(mut self, issue: ValidationIssue) -> Self {
        self.warnings.push(issue);
        self
    }
}

/// A validation issue
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the config field
    pub path: String,
    /// Issue message
    pub message: String,
    /// Suggested fix
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    /// Create a new issue
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Add a suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " ({})", suggestion)?;
        }
        Ok(())
    }
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> ConfigValidationResult {
    let mut result = ConfigValidationResult::valid();

    result = validate_server_config(config, result);
    result = validate_runner_config(config, result);

    result
}

fn validate_server_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    if config.server.socket_addr().is_err() {
        result = result.with_error(
            ValidationIssue::new(
                "server.bind",
                format!("Cannot form a socket address from {}:{}", config.server.bind, config.server.port),
            )
            .with_suggestion("Use an IP address such as 127.0.0.1 or 0.0.0.0"),
        );
    }

    result
}

fn validate_runner_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let runner = &config.runner;

    if runner.args.is_empty() {
        result = result.with_error(
            ValidationIssue::new(
                "runner.args",
                "No interpreter flags configured; the code would be treated as a file path",
            )
            .with_suggestion("Use [\"-u\", \"-c\"]"),
        );
    } else if !runner.args.iter().any(|a| a == "-u") {
        result = result.with_warning(
            ValidationIssue::new(
                "runner.args",
                "Output buffering is not disabled; lines may only arrive when the program exits",
            )
            .with_suggestion("Add \"-u\" before \"-c\""),
        );
    }

    if runner.timeout.is_zero() {
        result = result.with_error(
            ValidationIssue::new("runner.timeout", "Timeout must be greater than zero")
                .with_suggestion("Set runner.timeout to a value such as \"30s\""),
        );
    }

    if runner.max_output_bytes == 0 {
        result = result.with_error(ValidationIssue::new(
            "runner.max_output_bytes",
            "Output limit must be greater than zero",
        ));
    }

    if runner.max_concurrent == 0 {
        result = result.with_error(
            ValidationIssue::new(
                "runner.max_concurrent",
                "No execution slots; every request would be rejected",
            )
            .with_suggestion("Set runner.max_concurrent to at least 1"),
        );
    }

    if which::which(&runner.interpreter).is_err() {
        result = result.with_warning(
            ValidationIssue::new(
                "runner.interpreter",
                format!("Interpreter not found: {}", runner.interpreter.display()),
            )
            .with_suggestion("Install Python 3 or set RUNNER_INTERPRETER"),
        );
    }

    if let Some(dir) = &runner.working_dir {
        if !dir.is_dir() {
            result = result.with_warning(
                ValidationIssue::new(
                    "runner.working_dir",
                    format!("Working directory does not exist: {}", dir.display()),
                )
                .with_suggestion("Create the directory or unset runner.working_dir"),
            );
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        let result = validate_config(&config);

        // Defaults may warn (no python3 on PATH) but never error
        assert!(result.errors.is_empty());
        assert!(result.valid);
    }

    #[test]
    fn test_zero_limits_are_errors() {
        let mut config = Config::default();
        config.runner.max_concurrent = 0;
        config.runner.timeout = Duration::ZERO;
        config.runner.max_output_bytes = 0;

        let result = validate_config(&config);
        assert!(!result.valid);
        let paths: Vec<&str> = result.errors.iter().map(|i| i.path.as_str()).collect();
        assert!(paths.contains(&"runner.max_concurrent"));
        assert!(paths.contains(&"runner.timeout"));
        assert!(paths.contains(&"runner.max_output_bytes"));
    }

    #[test]
    fn test_missing_unbuffered_flag_warns() {
        let mut config = Config::default();
        config.runner.args = vec!["-c".to_string()];

        let result = validate_config(&config);
        assert!(result.warnings.iter().any(|i| i.path == "runner.args"));
    }

    #[test]
    fn test_missing_interpreter_warns() {
        let mut config = Config::default();
        config.runner.interpreter = "/definitely/not/here/python3".into();

        let result = validate_config(&config);
        let issue = result
            .warnings
            .iter()
            .find(|i| i.path == "runner.interpreter")
            .expect("interpreter warning");
        assert!(issue.to_string().contains("RUNNER_INTERPRETER"));
    }
}
