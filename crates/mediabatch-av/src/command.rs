//! Builder for spawning external tools as scoped child processes.
//!
//! A spawned [`ToolProcess`] owns its child: stdout is handed to the caller
//! for incremental reads, stderr is drained in the background into a bounded
//! tail, and the child is killed if the handle is dropped before it exits.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;

/// Default idle timeout: 5 minutes without output.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Bytes of stderr kept for error messages.
const STDERR_TAIL: usize = 4096;

/// A builder for constructing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use mediabatch_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> mediabatch_common::Result<()> {
/// let mut process = ToolCommand::new(PathBuf::from("ffmpeg"))
///     .args(["-hide_banner", "-i", "/path/to/clip.mp4"])
///     .args(["-f", "image2pipe", "pipe:1"])
///     .spawn()?;
/// let mut buf = vec![0u8; 8192];
/// while process.read(&mut buf).await? > 0 {}
/// let (status, stderr) = process.wait().await?;
/// println!("{status}: {stderr}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum time a single read may wait for output.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// The arguments collected so far.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Spawn the command with stdin closed and stdout/stderr piped.
    ///
    /// # Errors
    ///
    /// Returns [`mediabatch_common::Error::Tool`] if spawning fails.
    pub fn spawn(&self) -> mediabatch_common::Result<ToolProcess> {
        let name = self.program_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            mediabatch_common::Error::tool(name.clone(), format!("failed to spawn: {e}"))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| mediabatch_common::Error::tool(name.clone(), "stdout not piped"))?;
        let stderr = child.stderr.take().map(|pipe| tokio::spawn(drain_tail(pipe)));

        tracing::debug!(tool = %name, pid = ?child.id(), "Spawned tool process");

        Ok(ToolProcess {
            name,
            child,
            stdout,
            stderr,
            timeout: self.timeout,
        })
    }
}

/// Read a pipe to the end, keeping only the last [`STDERR_TAIL`] bytes.
async fn drain_tail(mut pipe: impl AsyncRead + Unpin) -> String {
    let mut tail: Vec<u8> = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&buf[..n]);
                if tail.len() > STDERR_TAIL {
                    let excess = tail.len() - STDERR_TAIL;
                    tail.drain(..excess);
                }
            }
        }
    }
    String::from_utf8_lossy(&tail).trim().to_string()
}

/// A running external tool. Killed on drop unless it already exited.
#[derive(Debug)]
pub struct ToolProcess {
    name: String,
    child: Child,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
    timeout: Duration,
}

impl ToolProcess {
    /// Tool name, for logging.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read the next chunk of stdout. `Ok(0)` means end of output.
    ///
    /// # Errors
    ///
    /// Returns [`mediabatch_common::Error::Tool`] if no output arrives within
    /// the idle timeout; the child is killed in that case.
    pub async fn read(&mut self, buf: &mut [u8]) -> mediabatch_common::Result<usize> {
        match tokio::time::timeout(self.timeout, self.stdout.read(buf)).await {
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => Err(mediabatch_common::Error::tool(
                self.name.clone(),
                format!("failed to read output: {e}"),
            )),
            Err(_elapsed) => {
                let _ = self.child.start_kill();
                Err(mediabatch_common::Error::tool(
                    self.name.clone(),
                    format!("timed out after {:?} without output", self.timeout),
                ))
            }
        }
    }

    /// Wait for the process to exit and return its status with the tail of
    /// its stderr.
    pub async fn wait(&mut self) -> mediabatch_common::Result<(ExitStatus, String)> {
        let status = self.child.wait().await.map_err(|e| {
            mediabatch_common::Error::tool(
                self.name.clone(),
                format!("I/O error waiting for process: {e}"),
            )
        })?;

        let stderr = match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };

        tracing::debug!(tool = %self.name, %status, "Tool process exited");
        Ok((status, stderr))
    }

    /// Ask the process to terminate without waiting for it.
    pub fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(tool = %self.name, error = %e, "Kill request failed");
        }
    }
}
