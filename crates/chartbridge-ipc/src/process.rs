#![forbid(unsafe_code)]

//! Child-process transport.
//!
//! The renderer host runs as a separate executable speaking [`Frame`]s over
//! its stdin and stdout (stderr is inherited for its logs). A writer thread
//! drains the outbound queue into the child's stdin; a reader thread decodes
//! the child's stdout and feeds the controller's queues through a
//! [`LocalHostLink`]. When stdout reaches EOF the link is closed, which fails
//! pending evaluations and stops the dispatcher.

use std::ffi::OsString;
use std::fmt;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, ExitStatus, Stdio};
use std::sync::mpsc::Receiver;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chartbridge_core::{BridgeConfig, BridgeError, Reply, RequestId, Result, ScriptError};

use crate::channel::{controller_end, ControllerEnd, Envelope, HostLink, LocalHostLink};
use crate::frame::Frame;

const EXIT_POLL: Duration = Duration::from_millis(10);

/// How to launch the host executable.
#[derive(Debug, Clone)]
pub struct HostCommand {
    /// Host executable.
    pub program: PathBuf,
    /// Extra arguments.
    pub args: Vec<OsString>,
    /// Extra environment variables for the child.
    pub env: Vec<(String, String)>,
    /// Label used in log events.
    pub name: Option<String>,
}

impl HostCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            name: None,
        }
    }

    /// Launch `config.host_program`, forwarding the log filter.
    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        let program = config.host_program.clone().ok_or_else(|| {
            BridgeError::InvalidState("no host program configured (CHARTBRIDGE_HOST_BIN)".into())
        })?;
        let mut cmd = Self::new(program);
        if let Some(filter) = &config.log_filter {
            cmd = cmd.with_env("CHARTBRIDGE_LOG", filter.clone());
        }
        Ok(cmd)
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A running host child plus its pipe threads.
pub struct HostProcess {
    child: Child,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    name: String,
}

/// Launch the host and wire its pipes to a fresh controller end.
pub fn spawn_host(cmd: &HostCommand) -> Result<(ControllerEnd, HostProcess)> {
    let name = cmd
        .name
        .clone()
        .unwrap_or_else(|| cmd.program.display().to_string());
    let mut command = std::process::Command::new(&cmd.program);
    command
        .args(&cmd.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());
    for (k, v) in &cmd.env {
        command.env(k, v);
    }
    let mut child = command.spawn()?;
    let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
        (Some(stdin), Some(stdout)) => (stdin, stdout),
        _ => {
            let _ = child.kill();
            return Err(BridgeError::InvalidState("host pipes unavailable".into()));
        }
    };
    tracing::info!(host = %name, pid = child.id(), "host spawned");

    let (end, commands, link) = controller_end();
    let writer = thread::Builder::new()
        .name("chartbridge-host-writer".into())
        .spawn(move || write_commands(commands, stdin))?;
    let reader = thread::Builder::new()
        .name("chartbridge-host-reader".into())
        .spawn(move || read_frames(stdout, &link))?;

    Ok((
        end,
        HostProcess {
            child,
            writer: Some(writer),
            reader: Some(reader),
            name,
        },
    ))
}

fn write_commands(commands: Receiver<Envelope>, mut stdin: ChildStdin) {
    for envelope in commands {
        let line = match Frame::from(envelope).to_line() {
            Ok(line) => line,
            Err(err) => {
                tracing::error!(error = %err, "command frame serialization failed");
                continue;
            }
        };
        if let Err(err) = writeln!(stdin, "{line}").and_then(|()| stdin.flush()) {
            tracing::warn!(error = %err, "host stdin closed");
            break;
        }
    }
    tracing::debug!("command writer finished");
}

fn read_frames(stdout: ChildStdout, link: &LocalHostLink) {
    for line in BufReader::new(stdout).lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(error = %err, "host stdout read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match Frame::parse(&line) {
            Ok(frame) => route_frame(frame, link),
            Err(err) => tracing::warn!(error = %err, "malformed host frame"),
        }
    }
    tracing::debug!("host stdout reached EOF");
    link.closed();
}

fn route_frame(frame: Frame, link: &LocalHostLink) {
    match frame {
        Frame::Event { raw } => link.emit(raw),
        Frame::Reply { request, value } => link.reply(Reply {
            request: request.map(RequestId),
            value,
        }),
        Frame::Fault {
            request,
            script,
            message,
            line,
            column,
        } => link.fault(
            request.map(RequestId),
            ScriptError::at(script, message, line, column),
        ),
        Frame::Loaded => link.loaded(),
        Frame::Exited => link.exited(),
        Frame::Command { .. } => tracing::warn!("host sent a command frame"),
    }
}

impl HostProcess {
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// Wait up to `timeout` for the child to exit on its own.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<ExitStatus>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(Some(status));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            thread::sleep(EXIT_POLL.min(remaining));
        }
    }

    /// Wait for a graceful exit, killing the child if it overstays.
    pub fn shutdown(mut self, timeout: Duration) -> Result<ExitStatus> {
        let status = match self.wait_timeout(timeout)? {
            Some(status) => status,
            None => {
                tracing::warn!(host = %self.name, ?timeout, "host did not exit; killing");
                self.child.kill()?;
                self.child.wait()?
            }
        };
        self.join_threads();
        tracing::info!(host = %self.name, %status, "host stopped");
        Ok(status)
    }

    fn join_threads(&mut self) {
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        // The writer ends once every command sender is dropped; do not
        // block on it here.
        drop(self.writer.take());
    }
}

impl Drop for HostProcess {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
        self.join_threads();
    }
}

impl fmt::Debug for HostProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostProcess")
            .field("name", &self.name)
            .field("pid", &self.child.id())
            .finish_non_exhaustive()
    }
}
