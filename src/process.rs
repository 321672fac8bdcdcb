//! Bounded process execution and pid-file tracking
//!
//! Every external command runs under a timeout so a wedged daemon or
//! control socket cannot hang the controller.

use crate::error::{NetmodeError, NetmodeResult};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

/// Poll interval while waiting for a process to appear or exit
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Run a command to completion and return its stdout
///
/// Non-zero exit status becomes [`NetmodeError::CommandFailed`]; exceeding
/// `limit` becomes [`NetmodeError::Timeout`] and the child is killed.
pub async fn run<I, S>(program: &Path, args: I, limit: Duration) -> NetmodeResult<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
    let cmd_str = describe(program, &args);
    debug!("Running: {}", cmd_str);

    let mut cmd = Command::new(program);
    cmd.args(&args).kill_on_drop(true);

    let output = match timeout(limit, cmd.output()).await {
        Ok(result) => result.map_err(|e| NetmodeError::CommandFailed {
            cmd: cmd_str.clone(),
            code: None,
            stderr: e.to_string(),
        })?,
        Err(_) => {
            return Err(NetmodeError::Timeout(format!(
                "'{}' did not finish within {}s",
                cmd_str,
                limit.as_secs_f32()
            )))
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if !output.status.success() {
        return Err(NetmodeError::CommandFailed {
            cmd: cmd_str,
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(stdout)
}

fn describe(program: &Path, args: &[OsString]) -> String {
    let mut s = program.display().to_string();
    for arg in args {
        s.push(' ');
        s.push_str(&arg.to_string_lossy());
    }
    s
}

/// A daemon's pid file
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read_pid(&self) -> Option<i32> {
        let contents = fs::read_to_string(&self.path).await.ok()?;
        contents.trim().parse::<i32>().ok().filter(|pid| *pid > 0)
    }

    /// Whether the recorded pid refers to a live process
    pub async fn is_running(&self) -> bool {
        match self.read_pid().await {
            Some(pid) => Path::new(&format!("/proc/{}", pid)).exists(),
            None => false,
        }
    }

    /// Poll until the pid file names a live process, or `limit` passes
    pub async fn wait_until_running(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if self.is_running().await {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Send SIGTERM to the recorded process and wait for it to exit
    pub async fn terminate(&self, limit: Duration) -> NetmodeResult<()> {
        let pid = match self.read_pid().await {
            Some(pid) if self.is_running().await => pid,
            _ => {
                let _ = fs::remove_file(&self.path).await;
                return Ok(());
            }
        };

        debug!("Sending SIGTERM to pid {} ({})", pid, self.path.display());
        // SAFETY: kill(2) with a positive pid read from our own pid file
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(NetmodeError::Io(err));
            }
        }

        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if !self.is_running().await {
                let _ = fs::remove_file(&self.path).await;
                return Ok(());
            }
            sleep(POLL_INTERVAL).await;
        }

        warn!("pid {} still alive after SIGTERM", pid);
        Err(NetmodeError::Timeout(format!(
            "process {} ({}) did not stop",
            pid,
            self.path.display()
        )))
    }
}
