//! Configuration module
//!
//! Configuration is split into focused modules:
//! - types/mod.rs: Core configuration types (Config, ServerConfig)
//! - types/runner.rs: Interpreter and execution limits
//! - io.rs: Configuration loading and saving
//! - validation.rs: Configuration validation
//! - paths.rs: Configuration file paths

mod io;
mod paths;
mod types;
mod validation;

// Re-export core config types
pub use types::{Config, ServerConfig};

// Re-export runner types
pub use types::runner::RunnerConfig;

// Re-export IO and utilities
pub use io::{apply_env_overrides, load_config, load_config_from_path, save_config};
pub use paths::{config_dir, config_path};
pub use validation::{validate_config, ConfigValidationResult, ValidationIssue};
