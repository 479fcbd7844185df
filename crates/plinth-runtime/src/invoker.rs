//! Privilege escalation invoker.
//!
//! Launches one action program per call, with a fixed argv and a scrubbed
//! environment, feeds it the encoded request on stdin and collects its
//! output. The invoker never retries: a privileged program may have changed
//! the host before failing, so retry is a decision for the caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use plinth_core::{BrokerConfig, EscalationConfig};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// `PATH` given to every action program.
pub const SAFE_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Variable naming the requested action, for multi-action programs.
///
/// `sudo` strips it under its default `env_reset`; the action name is also
/// carried inside the request frame.
pub const ACTION_ENV_VAR: &str = "PLINTH_ACTION";

/// Runs privileged programs under the helper so the deadline is enforced
/// with root's authority. The broker cannot signal a root-owned child.
pub const DEADLINE_PROGRAM: &str = "/usr/bin/timeout";

/// How long to wait for output pipes to drain after the program exits.
/// A daemonized grandchild can hold them open indefinitely.
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// One program launch.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    pub action: &'a str,
    pub executable: &'a Path,
    pub privileged: bool,
    pub payload: &'a [u8],
    pub timeout: Duration,
}

/// Raw result of a launch that got as far as starting the program.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationOutput {
    pub exit_status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub timed_out: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// The program could not be started or supervised.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to launch {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("lost track of {path} while waiting: {source}")]
    Wait {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Launch strategy seam.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn execute(&self, invocation: Invocation<'_>) -> Result<InvocationOutput, LaunchError>;
}

/// Real invoker backed by `tokio::process`.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    launcher: Option<(PathBuf, Vec<&'static str>)>,
    env: Vec<(String, String)>,
    kill_grace: Duration,
    max_output_bytes: usize,
}

impl ProcessInvoker {
    /// Build from configuration. Allow-listed variables are captured now,
    /// once; invocations never consult the broker's environment.
    pub fn new(escalation: &EscalationConfig, broker: &BrokerConfig) -> Self {
        let mut env = vec![
            ("PATH".to_string(), SAFE_PATH.to_string()),
            ("LANG".to_string(), "C.UTF-8".to_string()),
        ];
        for name in &escalation.env_allowlist {
            if let Ok(value) = std::env::var(name) {
                env.retain(|(k, _)| k != name);
                env.push((name.clone(), value));
            }
        }

        Self {
            launcher: escalation.launcher(),
            env,
            kill_grace: broker.kill_grace(),
            max_output_bytes: broker.max_output_bytes,
        }
    }

    /// Invoker that runs every program directly, without a helper.
    pub fn direct(broker: &BrokerConfig) -> Self {
        Self::new(
            &EscalationConfig {
                method: plinth_core::EscalationMethod::None,
                ..Default::default()
            },
            broker,
        )
    }

    /// Program and argv for an invocation. Only fixed helper flags, the
    /// action's deadline and the absolute program path ever appear here.
    ///
    /// Behind a helper the program runs as
    /// `helper [flags] /usr/bin/timeout --kill-after=<grace> <timeout> <program>`.
    pub fn argv(&self, invocation: &Invocation<'_>) -> (PathBuf, Vec<String>) {
        match &self.launcher {
            Some((helper, args)) if invocation.privileged => {
                let mut argv: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                argv.push(DEADLINE_PROGRAM.to_string());
                argv.push(format!("--kill-after={}", seconds_arg(self.kill_grace)));
                argv.push(seconds_arg(invocation.timeout));
                argv.push(invocation.executable.to_string_lossy().into_owned());
                (helper.clone(), argv)
            }
            _ => (invocation.executable.to_path_buf(), Vec::new()),
        }
    }

    fn command(&self, invocation: &Invocation<'_>) -> Command {
        let (program, args) = self.argv(invocation);
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.env_clear();
        cmd.envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        cmd.env(ACTION_ENV_VAR, invocation.action);
        cmd.current_dir("/");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group, so a timeout can signal everything the program started.
        #[cfg(unix)]
        cmd.process_group(0);
        cmd.kill_on_drop(true);
        cmd
    }

    async fn terminate(&self, child: &mut Child, path: &Path) -> Result<ExitStatus, LaunchError> {
        let wait_err = |source| LaunchError::Wait {
            path: path.to_path_buf(),
            source,
        };

        if let Some(pid) = child.id() {
            signal_group(pid, libc::SIGTERM);
        }
        match tokio::time::timeout(self.kill_grace, child.wait()).await {
            Ok(status) => status.map_err(wait_err),
            Err(_) => {
                tracing::warn!(path = %path.display(), "Action ignored SIGTERM, killing");
                if let Some(pid) = child.id() {
                    signal_group(pid, libc::SIGKILL);
                }
                child.kill().await.map_err(wait_err)?;
                child.wait().await.map_err(wait_err)
            }
        }
    }
}

#[async_trait]
impl Invoker for ProcessInvoker {
    async fn execute(&self, invocation: Invocation<'_>) -> Result<InvocationOutput, LaunchError> {
        let path = invocation.executable.to_path_buf();
        let mut command = self.command(&invocation);

        let started_at = Utc::now();
        let mut child = command.spawn().map_err(|source| LaunchError::Spawn {
            path: path.clone(),
            source,
        })?;

        tracing::info!(
            action = %invocation.action,
            pid = ?child.id(),
            privileged = invocation.privileged,
            timeout_ms = invocation.timeout.as_millis() as u64,
            "Action launched"
        );

        let stdout = Capture::new(self.max_output_bytes);
        let stderr = Capture::new(self.max_output_bytes);
        let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(3);

        if let Some(mut stdin) = child.stdin.take() {
            let payload = invocation.payload.to_vec();
            let action = invocation.action.to_string();
            tasks.push(tokio::spawn(async move {
                // A program that exits without reading its input is not a launch failure.
                if let Err(e) = stdin.write_all(&payload).await {
                    tracing::debug!(%action, error = %e, "Action did not consume its request");
                }
                drop(stdin);
            }));
        }
        if let Some(pipe) = child.stdout.take() {
            tasks.push(stdout.drain(pipe));
        }
        if let Some(pipe) = child.stderr.take() {
            tasks.push(stderr.drain(pipe));
        }

        let (status, timed_out) = match tokio::time::timeout(invocation.timeout, child.wait()).await {
            Ok(status) => (
                status.map_err(|source| LaunchError::Wait {
                    path: path.clone(),
                    source,
                })?,
                false,
            ),
            Err(_) => {
                tracing::warn!(
                    action = %invocation.action,
                    timeout_ms = invocation.timeout.as_millis() as u64,
                    "Action timed out, terminating"
                );
                (self.terminate(&mut child, &path).await?, true)
            }
        };

        for mut task in tasks {
            if tokio::time::timeout(PIPE_DRAIN_TIMEOUT, &mut task).await.is_err() {
                task.abort();
            }
        }

        let finished_at = Utc::now();
        let (stdout, stdout_truncated) = stdout.take();
        let (stderr, stderr_truncated) = stderr.take();

        Ok(InvocationOutput {
            exit_status: exit_code(status),
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
            timed_out,
            started_at,
            finished_at,
        })
    }
}

/// Bounded output buffer shared with its reader task, so partial output
/// survives the task being aborted.
#[derive(Clone)]
struct Capture {
    inner: Arc<Mutex<CaptureState>>,
}

struct CaptureState {
    data: Vec<u8>,
    truncated: bool,
    limit: usize,
}

impl Capture {
    fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CaptureState {
                data: Vec::new(),
                truncated: false,
                limit,
            })),
        }
    }

    fn drain<R>(&self, mut pipe: R) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let capture = self.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 8192];
            loop {
                match pipe.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => capture.push(&buf[..n]),
                }
            }
        })
    }

    fn push(&self, chunk: &[u8]) {
        let Ok(mut state) = self.inner.lock() else {
            return;
        };
        let room = state.limit.saturating_sub(state.data.len());
        if chunk.len() > room {
            state.truncated = true;
        }
        let keep = chunk.len().min(room);
        state.data.extend_from_slice(&chunk[..keep]);
    }

    fn take(&self) -> (Vec<u8>, bool) {
        match self.inner.lock() {
            Ok(mut state) => (std::mem::take(&mut state.data), state.truncated),
            Err(_) => (Vec::new(), true),
        }
    }
}

fn signal_group(pid: u32, signal: libc::c_int) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions; a negative pid
    // addresses the process group created for this child.
    let rc = unsafe { libc::kill(-pgid, signal) };
    if rc != 0 {
        tracing::debug!(
            pgid,
            signal,
            error = %std::io::Error::last_os_error(),
            "Failed to signal action process group"
        );
    }
}

/// Duration in the `<seconds>s` form `timeout(1)` accepts.
fn seconds_arg(duration: Duration) -> String {
    format!("{}s", duration.as_secs_f64())
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
