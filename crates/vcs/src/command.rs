//! Runs external VCS tools against a working copy.
//!
//! Every invocation is bounded by a timeout, and children are spawned with
//! kill-on-drop so an abandoned invocation never outlives its handle.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::trace;
use utils::shell::resolve_executable_path;

use crate::error::VcsError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// A VCS executable plus the environment and time bound it always runs with
#[derive(Debug, Clone)]
pub struct VcsCommand {
    program: &'static str,
    timeout: Duration,
    envs: Vec<(&'static str, &'static str)>,
}

impl VcsCommand {
    pub fn git(timeout: Duration) -> Self {
        Self {
            program: "git",
            timeout,
            envs: vec![("GIT_TERMINAL_PROMPT", "0"), ("LC_ALL", "C")],
        }
    }

    pub fn hg(timeout: Duration) -> Self {
        Self {
            program: "hg",
            timeout,
            envs: vec![("HGPLAIN", "1"), ("HGENCODING", "utf-8"), ("LC_ALL", "C")],
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run to completion and return stdout on success
    pub async fn run<I, S>(&self, cwd: &Path, args: I) -> Result<String, VcsError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args = collect_args(args);
        let shown = self.command_line(&args);
        let output = self.output(cwd, &args, &shown).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(classify_error(shown, output.status, stderr));
        }
        String::from_utf8(output.stdout)
            .map_err(|e| VcsError::parse(shown, format!("output is not UTF-8: {e}")))
    }

    /// Run to completion and hand back the exit code with stdout.
    ///
    /// For commands that answer through their exit code; failures to start,
    /// timeouts and signal deaths are still errors.
    pub async fn run_status<I, S>(&self, cwd: &Path, args: I) -> Result<(i32, String), VcsError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args = collect_args(args);
        let shown = self.command_line(&args);
        let output = self.output(cwd, &args, &shown).await?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let code = match output.status.code() {
            Some(code) if code < 128 => code,
            _ => return Err(classify_error(shown, output.status, stderr)),
        };
        Ok((code, String::from_utf8_lossy(&output.stdout).into_owned()))
    }

    /// Spawn and stream stdout as `delimiter`-terminated records
    pub async fn spawn_records<I, S>(
        &self,
        cwd: &Path,
        args: I,
        delimiter: u8,
    ) -> Result<RecordReader, VcsError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args = collect_args(args);
        let shown = self.command_line(&args);
        let mut child = self.command(cwd, &args).await?.spawn()?;
        trace!(repo = ?cwd, "Spawned {} command: {}", self.program, shown);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VcsError::parse(shown.clone(), "stdout was not captured"))?;
        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_end(&mut buf).await;
            }
            buf
        });

        Ok(RecordReader {
            command: shown,
            child,
            stdout: BufReader::new(stdout),
            stderr_task: Some(stderr_task),
            delimiter,
            timeout: self.timeout,
            finished: false,
        })
    }

    async fn output(
        &self,
        cwd: &Path,
        args: &[OsString],
        shown: &str,
    ) -> Result<std::process::Output, VcsError> {
        let mut cmd = self.command(cwd, args).await?;
        trace!(repo = ?cwd, "Running {} command: {}", self.program, shown);

        match timeout(self.timeout, cmd.output()).await {
            Ok(output) => Ok(output?),
            Err(_) => Err(VcsError::BackendTimeout {
                command: shown.to_string(),
                timeout: self.timeout,
            }),
        }
    }

    async fn command(&self, cwd: &Path, args: &[OsString]) -> Result<Command, VcsError> {
        let program: PathBuf = resolve_executable_path(self.program)
            .await
            .ok_or(VcsError::NotInstalled(self.program))?;

        let mut cmd = Command::new(program);
        cmd.current_dir(cwd)
            .args(args)
            .envs(self.envs.iter().copied())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }

    fn command_line(&self, args: &[OsString]) -> String {
        let mut shown = self.program.to_string();
        for arg in args {
            shown.push(' ');
            shown.push_str(&arg.to_string_lossy());
        }
        shown
    }
}

fn collect_args<I, S>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    args.into_iter().map(|a| a.as_ref().to_os_string()).collect()
}

/// Map a failed command's stderr onto the error taxonomy
pub fn classify_error(command: String, status: ExitStatus, stderr: String) -> VcsError {
    let lower = stderr.to_ascii_lowercase();

    if lower.contains("not a git repository")
        || lower.contains("does not appear to be a git repository")
        || lower.contains("could not read from remote")
        || lower.contains("repository not found")
        || lower.contains("authentication failed")
        || lower.contains("could not read username")
        || lower.contains("unable to access")
        || lower.contains("no repository found")
        || (lower.contains("repository")
            && (lower.contains("not found") || lower.contains("does not exist")))
    {
        VcsError::RepositoryUnavailable(stderr)
    } else if lower.contains("unknown revision")
        || lower.contains("ambiguous argument")
        || lower.contains("bad revision")
        || lower.contains("not a valid object name")
        || lower.contains("needed a single revision")
        || lower.contains("bad object")
        || lower.contains("unknown branch")
        || lower.contains("parse error")
    {
        VcsError::InvalidQuery(stderr)
    } else {
        VcsError::CommandFailed {
            command,
            status,
            stderr,
        }
    }
}

/// Streaming view over a running command's stdout.
///
/// Dropping the reader kills the process.
pub struct RecordReader {
    command: String,
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr_task: Option<JoinHandle<Vec<u8>>>,
    delimiter: u8,
    timeout: Duration,
    finished: bool,
}

impl RecordReader {
    pub fn command(&self) -> &str {
        &self.command
    }

    /// OS process id of the running command; `None` once it has been reaped
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Next record without its delimiter, or `None` once the command exited
    /// successfully.
    pub async fn next_record(&mut self) -> Result<Option<Vec<u8>>, VcsError> {
        if self.finished {
            return Ok(None);
        }

        let mut buf = Vec::new();
        let read = match timeout(self.timeout, self.stdout.read_until(self.delimiter, &mut buf)).await {
            Ok(read) => read?,
            Err(_) => {
                self.finished = true;
                let _ = self.child.start_kill();
                return Err(VcsError::BackendTimeout {
                    command: self.command.clone(),
                    timeout: self.timeout,
                });
            }
        };

        if read == 0 {
            self.finished = true;
            self.finish().await?;
            return Ok(None);
        }
        if buf.last() == Some(&self.delimiter) {
            buf.pop();
        }
        Ok(Some(buf))
    }

    async fn finish(&mut self) -> Result<(), VcsError> {
        let status = match timeout(self.timeout, self.child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                let _ = self.child.start_kill();
                return Err(VcsError::BackendTimeout {
                    command: self.command.clone(),
                    timeout: self.timeout,
                });
            }
        };
        if status.success() {
            return Ok(());
        }

        let stderr = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };
        let stderr = String::from_utf8_lossy(&stderr).trim().to_string();
        Err(classify_error(self.command.clone(), status, stderr))
    }
}

impl Drop for RecordReader {
    fn drop(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}
