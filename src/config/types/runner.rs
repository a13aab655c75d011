//! Runner configuration types
//!
//! Which interpreter runs submitted code, and the limits every session is held to.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Interpreter executable, either a bare name looked up on PATH or a path
    #[serde(default = "default_interpreter")]
    pub interpreter: PathBuf,
    /// Flags placed before the code; the last one must take the source text
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Wall-clock limit for one session, after which the child is killed
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Maximum bytes relayed per session before the child is killed
    #[serde(default = "default_max_output")]
    pub max_output_bytes: usize,
    /// Maximum number of children alive at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Working directory for the child
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Start the child from an empty environment (PATH is kept)
    #[serde(default)]
    pub clear_env: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            interpreter: default_interpreter(),
            args: default_args(),
            timeout: default_timeout(),
            max_output_bytes: default_max_output(),
            max_concurrent: default_max_concurrent(),
            working_dir: None,
            env: HashMap::new(),
            clear_env: false,
        }
    }
}

impl RunnerConfig {
    /// Set the interpreter
    pub fn with_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the output ceiling
    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    /// Set the concurrency limit
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Add environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

fn default_interpreter() -> PathBuf {
    PathBuf::from("python3")
}

fn default_args() -> Vec<String> {
    vec!["-u".to_string(), "-c".to_string()]
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_output() -> usize {
    1024 * 1024 // 1MB
}

fn default_max_concurrent() -> usize {
    16
}
