//! Per-request execution session
//!
//! An [`ExecutionSession`] owns one child process and its pipes. The child is
//! reaped exactly once: either by [`ExecutionSession::reap`] on the normal path,
//! or by a background task started from `Drop` when the session is abandoned
//! (client disconnect, handler error, panic unwinding).

use serde::{Deserialize, Serialize};
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Request to execute code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Source text, run verbatim
    pub code: String,
}

impl ExecutionRequest {
    /// Create a new execution request
    pub fn new(code: impl Into<String>) -> Self {
        ExecutionRequest { code: code.into() }
    }
}

/// Lifecycle of a session. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Spawned,
    DrainingStdout,
    DrainingStderr,
    /// Both pipes reached end-of-stream, or the child was killed
    Exited,
    /// The wait call returned
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Spawned => write!(f, "spawned"),
            SessionState::DrainingStdout => write!(f, "draining-stdout"),
            SessionState::DrainingStderr => write!(f, "draining-stderr"),
            SessionState::Exited => write!(f, "exited"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Limits a session is held to
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    /// Wall-clock budget, measured from spawn
    pub timeout: Duration,
    /// Bytes relayed before the child is killed
    pub max_output_bytes: usize,
}

/// One running child process, exclusively owned by one request
pub struct ExecutionSession {
    id: Uuid,
    pid: Option<u32>,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    state: SessionState,
    exit_status: Option<ExitStatus>,
    limits: SessionLimits,
    deadline: Instant,
    timed_out: bool,
    truncated: bool,
    permit: Option<OwnedSemaphorePermit>,
}

impl ExecutionSession {
    pub(crate) fn new(
        id: Uuid,
        mut child: Child,
        limits: SessionLimits,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Self {
        ExecutionSession {
            id,
            pid: child.id(),
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
            child: Some(child),
            state: SessionState::Spawned,
            exit_status: None,
            limits,
            deadline: Instant::now() + limits.timeout,
            timed_out: false,
            truncated: false,
            permit,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// OS process id, if the child had not already been reaped at spawn
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn limits(&self) -> SessionLimits {
        self.limits
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Exit status, set once the child has been reaped
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub(crate) fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    pub(crate) fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    pub(crate) fn advance(&mut self, next: SessionState) {
        debug_assert!(
            next >= self.state,
            "session {} moved backwards: {} -> {}",
            self.id,
            self.state,
            next
        );
        if next > self.state {
            debug!(session = %self.id, from = %self.state, to = %next, "Session state change");
            self.state = next;
        }
    }

    pub(crate) fn mark_timed_out(&mut self) {
        if !self.timed_out {
            warn!(session = %self.id, timeout = ?self.limits.timeout, "Execution timed out");
            self.timed_out = true;
        }
        self.kill();
    }

    pub(crate) fn mark_truncated(&mut self) {
        if !self.truncated {
            warn!(
                session = %self.id,
                limit = self.limits.max_output_bytes,
                "Output limit exceeded"
            );
            self.truncated = true;
        }
        self.kill();
    }

    /// Send SIGKILL to the child. The child still has to be reaped.
    pub fn kill(&mut self) {
        if let Some(child) = self.child.as_mut() {
            // Fails only if the child is already gone, which is fine
            if let Err(e) = child.start_kill() {
                debug!(session = %self.id, "start_kill: {}", e);
            }
        }
    }

    /// Wait for the child to exit and release its resources.
    ///
    /// Bounded by the session deadline; past it the child is killed first. The
    /// child stays owned by the session until the wait returns, so if this future
    /// is dropped midway, `Drop` still reaps it.
    pub async fn reap(&mut self) -> Result<ExitStatus> {
        let Some(child) = self.child.as_mut() else {
            return self
                .exit_status
                .ok_or_else(|| Error::Internal(format!("session {} has no child", self.id)));
        };

        let status = match tokio::time::timeout_at(self.deadline, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                if !self.timed_out {
                    warn!(session = %self.id, timeout = ?self.limits.timeout, "Execution timed out");
                    self.timed_out = true;
                }
                // kill() also waits
                child.kill().await?;
                child.wait().await?
            }
        };

        self.child = None;
        self.exit_status = Some(status);
        self.permit = None;
        self.advance(SessionState::Closed);
        debug!(session = %self.id, status = %status, "Child reaped");

        Ok(status)
    }
}

impl Drop for ExecutionSession {
    fn drop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        // Nobody reads the output any more
        if let Err(e) = child.start_kill() {
            debug!(session = %self.id, "start_kill: {}", e);
        }

        let id = self.id;
        let permit = self.permit.take();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(session = %id, "Session abandoned, reaping in background");
                handle.spawn(async move {
                    let _permit = permit;
                    match child.wait().await {
                        Ok(status) => debug!(session = %id, status = %status, "Abandoned child reaped"),
                        Err(e) => error!(session = %id, "Failed to reap abandoned child: {}", e),
                    }
                });
            }
            Err(_) => {
                // No runtime left to wait on; kill_on_drop and tokio's orphan
                // queue take over from here
                if let Ok(None) = child.try_wait() {
                    warn!(session = %id, "Session dropped outside a runtime; child left to the orphan reaper");
                }
            }
        }
    }
}

impl std::fmt::Debug for ExecutionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionSession")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("state", &self.state)
            .field("exit_status", &self.exit_status)
            .field("timed_out", &self.timed_out)
            .field("truncated", &self.truncated)
            .finish()
    }
}
