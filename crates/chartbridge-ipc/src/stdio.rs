#![forbid(unsafe_code)]

//! Host side of the child-process transport: read command frames from an
//! input stream, write everything else to an output stream.

use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex};

use chartbridge_core::{Reply, RequestId, Result, ScriptError};

use crate::channel::{Envelope, HostLink};
use crate::frame::Frame;
use crate::host::{HostLoop, HostState, RenderSurface};

/// [`HostLink`] writing one frame per line.
pub struct StdioLink<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> StdioLink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    fn write(&self, frame: &Frame) {
        let line = match frame.to_line() {
            Ok(line) => line,
            Err(err) => {
                tracing::error!(error = %err, "frame serialization failed");
                return;
            }
        };
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(err) = writeln!(out, "{line}").and_then(|()| out.flush()) {
            tracing::warn!(error = %err, "controller pipe write failed");
        }
    }
}

impl<W: Write + Send> HostLink for StdioLink<W> {
    fn emit(&self, raw: String) {
        self.write(&Frame::Event { raw });
    }

    fn reply(&self, reply: Reply) {
        self.write(&Frame::reply(reply));
    }

    fn fault(&self, request: Option<RequestId>, error: ScriptError) {
        self.write(&Frame::fault(request, error));
    }

    fn loaded(&self) {
        self.write(&Frame::Loaded);
    }

    fn exited(&self) {
        self.write(&Frame::Exited);
    }
}

/// Command frames from `input`, in order. Malformed lines and frames of the
/// wrong kind are logged and skipped; the stream ends at EOF or a read error.
pub fn command_frames<R: BufRead>(input: R) -> impl Iterator<Item = Envelope> {
    input
        .lines()
        .map_while(|line| match line {
            Ok(line) => Some(line),
            Err(err) => {
                tracing::warn!(error = %err, "command pipe read failed");
                None
            }
        })
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match Frame::parse(&line).and_then(Envelope::try_from) {
            Ok(envelope) => Some(envelope),
            Err(err) => {
                tracing::warn!(error = %err, "malformed command frame");
                None
            }
        })
}

/// Run a host loop over a pair of byte streams.
pub fn serve<S, R, W>(surface: S, input: R, output: W) -> Result<HostState>
where
    S: RenderSurface,
    R: BufRead,
    W: Write + Send + 'static,
{
    let link = Arc::new(StdioLink::new(output));
    HostLoop::new(surface, link).run(command_frames(input))
}
