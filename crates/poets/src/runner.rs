//! Blocking front-end over `tokio::process` for external generators.
//!
//! Both stages shell out: the content generator on the producer side and
//! the media scripts on the consumer side. Each invocation gets a wall-clock
//! limit; when it elapses the child is killed (`kill_on_drop`) and the call
//! reports [`CommandError::TimedOut`] with whatever output arrived so far.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command as TokioCommand;
use tokio::runtime::{Builder, Runtime};

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' timed out after {}s", .timeout.as_secs())]
    TimedOut {
        program: String,
        timeout: Duration,
        /// Output read before the child was killed.
        stdout: String,
        stderr: String,
    },

    #[error("Failed to collect output of '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start process runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// One external command invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Runs commands to completion on a private single-threaded runtime.
pub struct CommandRunner {
    runtime: Runtime,
}

impl std::fmt::Debug for CommandRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRunner").finish_non_exhaustive()
    }
}

impl CommandRunner {
    pub fn new() -> Result<Self, CommandError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(CommandError::Runtime)?;
        Ok(Self { runtime })
    }

    /// Runs `spec` and waits for it to exit or time out.
    ///
    /// A non-zero exit is not an error here; callers inspect `status`.
    pub fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let mut cmd = TokioCommand::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }

        let started = Instant::now();
        self.runtime.block_on(async {
            let mut child = cmd.spawn().map_err(|e| CommandError::Spawn {
                program: spec.program.clone(),
                source: e,
            })?;
            let child_stdout = child.stdout.take();
            let child_stderr = child.stderr.take();

            // Output is drained as it arrives so a timeout still has it.
            // Dropping the future on timeout releases the buffers; the child
            // is killed when it goes out of scope.
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let finished = tokio::time::timeout(spec.timeout, async {
                let (status, out, err) = tokio::join!(
                    child.wait(),
                    drain(child_stdout, &mut stdout),
                    drain(child_stderr, &mut stderr),
                );
                out?;
                err?;
                status
            })
            .await;

            match finished {
                Ok(Ok(status)) => Ok(CommandOutput {
                    status,
                    stdout: String::from_utf8_lossy(&stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                    duration: started.elapsed(),
                }),
                Ok(Err(e)) => Err(CommandError::Wait {
                    program: spec.program.clone(),
                    source: e,
                }),
                Err(_) => Err(CommandError::TimedOut {
                    program: spec.program.clone(),
                    timeout: spec.timeout,
                    stdout: String::from_utf8_lossy(&stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                }),
            }
        })
    }
}

/// Appends everything `reader` yields to `sink` until EOF.
async fn drain<R>(reader: Option<R>, sink: &mut Vec<u8>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(());
    };
    let mut chunk = [0u8; 4096];
    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            return Ok(());
        }
        sink.extend_from_slice(&chunk[..read]);
    }
}
