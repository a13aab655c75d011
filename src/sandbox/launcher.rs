//! Execution launcher
//!
//! Starts a fresh interpreter per request with unbuffered output, passing the
//! submitted source as a `-c` argument rather than through a temp file.
//! There is no OS-level confinement here (no seccomp, namespaces or rlimits);
//! the child runs with the service's own privileges.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::RunnerConfig;
use crate::error::{Error, Result};
use crate::sandbox::session::{ExecutionRequest, ExecutionSession, SessionLimits};

/// Spawns one child process per request, bounded by a pool of execution slots
#[derive(Debug, Clone)]
pub struct Launcher {
    config: Arc<RunnerConfig>,
    slots: Arc<Semaphore>,
}

impl Launcher {
    /// Create a launcher with `config.max_concurrent` execution slots
    pub fn new(config: RunnerConfig) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent));
        Launcher {
            config: Arc::new(config),
            slots,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Number of sessions that could start right now
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Resolve the interpreter against PATH
    pub fn resolve_interpreter(&self) -> Result<PathBuf> {
        which::which(&self.config.interpreter).map_err(|e| {
            Error::launch(
                &self.config.interpreter,
                std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string()),
            )
        })
    }

    /// Start a child running `request.code`.
    ///
    /// Fails with [`Error::Busy`] when every slot is taken and with
    /// [`Error::Launch`] when the interpreter is missing or cannot be spawned.
    /// Neither is retried.
    pub fn launch_with_id(&self, id: Uuid, request: ExecutionRequest) -> Result<ExecutionSession> {
        let permit = self.slots.clone().try_acquire_owned().map_err(|_| {
            Error::Busy(format!(
                "all {} execution slots are in use",
                self.config.max_concurrent
            ))
        })?;

        let interpreter = self.resolve_interpreter()?;
        let mut command = self.command(&interpreter, &request.code);

        let child = command
            .spawn()
            .map_err(|e| Error::launch(&interpreter, e))?;

        let session = ExecutionSession::new(
            id,
            child,
            SessionLimits {
                timeout: self.config.timeout,
                max_output_bytes: self.config.max_output_bytes,
            },
            Some(permit),
        );

        info!(
            session = %id,
            pid = session.pid(),
            interpreter = %interpreter.display(),
            code_len = request.code.len(),
            "Launched child"
        );

        Ok(session)
    }

    /// [`Launcher::launch_with_id`] with a fresh session id
    pub fn launch(&self, request: ExecutionRequest) -> Result<ExecutionSession> {
        self.launch_with_id(Uuid::new_v4(), request)
    }

    fn command(&self, interpreter: &Path, code: &str) -> Command {
        let mut command = Command::new(interpreter);

        if self.config.clear_env {
            command.env_clear();
            if let Some(path) = std::env::var_os("PATH") {
                command.env("PATH", path);
            }
        }

        command
            .args(&self.config.args)
            .arg(code)
            .envs(&self.config.env)
            .env("PYTHONUNBUFFERED", "1")
            .env("PYTHONIOENCODING", "utf-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }

        debug!(args = ?self.config.args, "Prepared interpreter command");
        command
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh_config() -> RunnerConfig {
        RunnerConfig {
            interpreter: PathBuf::from("sh"),
            args: vec!["-c".to_string()],
            ..RunnerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_launch_and_reap() {
        let launcher = Launcher::new(sh_config());
        let mut session = launcher.launch(ExecutionRequest::new("exit 0")).unwrap();
        assert!(session.pid().is_some());

        let status = session.reap().await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_launch_error() {
        let launcher = Launcher::new(
            RunnerConfig::default().with_interpreter("/nonexistent/bin/python3"),
        );
        let err = launcher
            .launch(ExecutionRequest::new("print('hi')"))
            .unwrap_err();

        assert!(matches!(err, Error::Launch { .. }));
        // A failed launch gives its slot back
        assert_eq!(launcher.available_slots(), 16);
    }

    #[tokio::test]
    async fn test_slots_are_exhausted_then_released() {
        let launcher = Launcher::new(sh_config().with_max_concurrent(1));

        let mut first = launcher.launch(ExecutionRequest::new("sleep 1")).unwrap();
        assert_eq!(launcher.available_slots(), 0);

        let err = launcher.launch(ExecutionRequest::new("exit 0")).unwrap_err();
        assert!(matches!(err, Error::Busy(_)));

        first.kill();
        first.reap().await.unwrap();
        assert_eq!(launcher.available_slots(), 1);
        assert!(launcher.launch(ExecutionRequest::new("exit 0")).is_ok());
    }

    #[tokio::test]
    async fn test_env_and_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sh_config()
            .with_env("COURSE_GREETING", "hi")
            .with_timeout(Duration::from_secs(5));
        config.working_dir = Some(dir.path().to_path_buf());
        let launcher = Launcher::new(config);

        let mut session = launcher
            .launch(ExecutionRequest::new(
                "test \"$COURSE_GREETING\" = hi && test \"$PYTHONUNBUFFERED\" = 1 && touch marker",
            ))
            .unwrap();
        let status = session.reap().await.unwrap();

        assert!(status.success());
        assert!(dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn test_clear_env_keeps_path() {
        // Only reads the environment: mutating it would race other test threads.
        // cargo exports CARGO_MANIFEST_DIR to every test process it runs.
        if std::env::var_os("CARGO_MANIFEST_DIR").is_none() {
            return;
        }
        let script = "test -z \"$CARGO_MANIFEST_DIR\" && test -n \"$PATH\"";

        let inherited = Launcher::new(sh_config());
        let mut session = inherited.launch(ExecutionRequest::new(script)).unwrap();
        assert!(!session.reap().await.unwrap().success());

        let mut config = sh_config();
        config.clear_env = true;
        let cleared = Launcher::new(config);
        let mut session = cleared.launch(ExecutionRequest::new(script)).unwrap();
        assert!(session.reap().await.unwrap().success());
    }
}
