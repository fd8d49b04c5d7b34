//! Command execution layer: run message text through the system shell with a
//! wall-clock budget and capture stdout and stderr separately.
//!
//! Commands go through the interpreter on purpose (pipes, redirection, globbing).
//! The interpreter runs in its own process group. When a command finishes, times
//! out or fails, the whole group is killed, so nothing a command starts outlives
//! its reply. Backgrounded daemons (`nohup ... &`) are killed too.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use crate::config::CommandSettings;

/// Per-stream capture cap; older bytes are dropped first.
const MAX_CAPTURE_BYTES: usize = 1024 * 1024;
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

#[cfg(windows)]
const SHELL_FLAG: &str = "/C";
#[cfg(not(windows))]
const SHELL_FLAG: &str = "-c";

/// Outcome of running one command. Exactly one variant describes what happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    /// The interpreter exited on its own (successfully or not).
    Completed {
        stdout: String,
        stderr: String,
        exit_code: Option<i32>,
    },
    /// The budget ran out; the process group was killed. Holds whatever was read before the deadline.
    TimedOut {
        stdout: String,
        stderr: String,
        after: Duration,
    },
    /// The interpreter could not be started (or waited on).
    LaunchFailed { error: String },
}

impl ExecutionResult {
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

/// Runs commands with a fixed shell, working directory, and timeout.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    shell: PathBuf,
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(settings: &CommandSettings) -> Self {
        Self {
            shell: settings.shell.clone(),
            working_dir: settings.working_dir.clone(),
            timeout: settings.timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `command_text` via `<shell> -c`. Never fails: launch problems and timeouts
    /// are reported through the returned [`ExecutionResult`].
    pub async fn execute(&self, command_text: &str) -> ExecutionResult {
        let mut cmd = Command::new(&self.shell);
        cmd.arg(SHELL_FLAG)
            .arg(command_text)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                log::warn!("failed to start {}: {}", self.shell.display(), e);
                return ExecutionResult::LaunchFailed {
                    error: e.to_string(),
                };
            }
        };

        // Taken now: once the shell is reaped `id()` returns None, but its group may live on.
        let pid = child.id();
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        // The deadline covers pipe drain as well: a backgrounded descendant can keep
        // the pipes open after the shell itself has exited.
        let finished = tokio::time::timeout(self.timeout, async {
            let (status, _, _) = tokio::join!(
                child.wait(),
                read_capped(stdout_pipe, &mut stdout),
                read_capped(stderr_pipe, &mut stderr),
            );
            status
        })
        .await;

        match finished {
            Ok(Ok(status)) => {
                kill_leftovers(pid);
                ExecutionResult::Completed {
                    stdout: lossy(stdout),
                    stderr: lossy(stderr),
                    exit_code: status.code(),
                }
            }
            Ok(Err(e)) => {
                terminate(&mut child, pid).await;
                ExecutionResult::LaunchFailed {
                    error: format!("waiting for command failed: {}", e),
                }
            }
            Err(_) => {
                log::info!("command exceeded {:?}, killing process group", self.timeout);
                terminate(&mut child, pid).await;
                ExecutionResult::TimedOut {
                    stdout: lossy(stdout),
                    stderr: lossy(stderr),
                    after: self.timeout,
                }
            }
        }
    }
}

/// Read a pipe to EOF into `buf`, keeping at most the last [`MAX_CAPTURE_BYTES`].
async fn read_capped<R>(reader: Option<R>, buf: &mut Vec<u8>)
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else { return };
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.len() > MAX_CAPTURE_BYTES {
                    let overflow = buf.len() - MAX_CAPTURE_BYTES;
                    buf.drain(..overflow);
                }
            }
            Err(e) => {
                log::debug!("reading command output failed: {}", e);
                break;
            }
        }
    }
}

fn lossy(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

/// The shell has exited; kill whatever is left in its group. ESRCH means nothing was.
#[cfg(unix)]
fn kill_leftovers(pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else { return };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => log::debug!("killed leftover processes in group {}", pid),
        Err(Errno::ESRCH) => {}
        Err(e) => log::debug!("killpg({}) failed: {}", pid, e),
    }
}

#[cfg(not(unix))]
fn kill_leftovers(_pid: Option<u32>) {}

/// Kill the whole process group, then reap the shell.
#[cfg(unix)]
async fn terminate(child: &mut Child, pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = pid {
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            log::debug!("killpg({}) failed: {}", pid, e);
            let _ = child.start_kill();
        }
    }
    if tokio::time::timeout(REAP_TIMEOUT, child.wait()).await.is_err() {
        log::warn!("command did not exit after SIGKILL");
    }
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child, _pid: Option<u32>) {
    let _ = child.start_kill();
    if tokio::time::timeout(REAP_TIMEOUT, child.wait()).await.is_err() {
        log::warn!("command did not exit after kill");
    }
}
