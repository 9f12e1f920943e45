#![forbid(unsafe_code)]

//! Error taxonomy for the bridge.
//!
//! Per-message failures ([`BridgeError::Decode`], [`BridgeError::MissingHandler`])
//! are logged by the dispatch loop and never unwind it. Call-site failures
//! ([`BridgeError::Script`], [`BridgeError::TransportClosed`],
//! [`BridgeError::Timeout`]) propagate to whoever issued the script or the
//! blocking wait.

use std::fmt;
use std::time::Duration;

use crate::wire::{DecodeError, EncodeError};

/// A fault raised by the render surface while evaluating an injected script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    /// The script text that was being evaluated.
    pub script: String,
    /// Engine-provided message.
    pub message: String,
    /// 1-based line inside `script`, when the engine reported one.
    pub line: Option<u32>,
    /// 1-based column, when the engine reported one.
    pub column: Option<u32>,
}

impl ScriptError {
    /// Build an error from an engine message, extracting location info.
    ///
    /// Understands `<anonymous>:3:14` style suffixes and
    /// `line 3 column 14` phrasing.
    pub fn from_engine(script: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let (line, column) = parse_location(&message);
        Self {
            script: script.into(),
            message,
            line,
            column,
        }
    }

    /// Build an error with an explicit location.
    pub fn at(
        script: impl Into<String>,
        message: impl Into<String>,
        line: Option<u32>,
        column: Option<u32>,
    ) -> Self {
        Self {
            script: script.into(),
            message: message.into(),
            line,
            column,
        }
    }

    /// The offending source line, if the location points inside `script`.
    #[must_use]
    pub fn excerpt(&self) -> Option<&str> {
        let line = self.line?;
        let idx = usize::try_from(line).ok()?.checked_sub(1)?;
        self.script.lines().nth(idx)
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(col)) => {
                write!(f, "script error at line {line}, column {col}: {}", self.message)?
            }
            (Some(line), None) => write!(f, "script error at line {line}: {}", self.message)?,
            _ => write!(f, "script error: {}", self.message)?,
        }
        if let Some(src) = self.excerpt() {
            write!(f, " (in `{}`)", src.trim())?;
        }
        Ok(())
    }
}

impl std::error::Error for ScriptError {}

fn parse_location(message: &str) -> (Option<u32>, Option<u32>) {
    // `<anonymous>:3:14`, `eval at foo (file.js:3:14)`: keep the last match.
    let mut found = None;
    for token in message.split(|c: char| c.is_whitespace() || c == '(' || c == ')') {
        let token = token.trim_end_matches([',', '.', ';']);
        let mut parts = token.rsplitn(3, ':');
        let (Some(col), Some(line), Some(rest)) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }
        if let (Ok(line), Ok(col)) = (line.parse::<u32>(), col.parse::<u32>()) {
            found = Some((line, col));
        }
    }
    if let Some((line, col)) = found {
        return (Some(line), Some(col));
    }

    let lower = message.to_ascii_lowercase();
    let line = number_after(&lower, "line ");
    let column = number_after(&lower, "column ");
    (line, line.and(column))
}

fn number_after(haystack: &str, marker: &str) -> Option<u32> {
    let start = haystack.find(marker)? + marker.len();
    let digits: String = haystack[start..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Errors produced by the bridge.
#[derive(Debug)]
pub enum BridgeError {
    /// A wire message could not be decoded.
    Decode(DecodeError),
    /// A message could not be encoded unambiguously.
    Encode(EncodeError),
    /// No handler registered under the key.
    MissingHandler(String),
    /// The render surface rejected a script.
    Script(ScriptError),
    /// The peer went away (process died, queue disconnected).
    TransportClosed,
    /// A blocking wait ran out of time.
    Timeout {
        waiting_for: &'static str,
        after: Duration,
    },
    /// The identifier generator could not find a fresh id.
    IdSpaceExhausted { attempts: u32 },
    /// A batch was started while another one was still open.
    BatchAlreadyActive,
    /// The operation needs a loaded render surface.
    NotLoaded,
    /// Operation not valid in the current lifecycle state.
    InvalidState(String),
    /// I/O failure on a process pipe or a drawings file.
    Io(std::io::Error),
    /// A transport frame or a structured payload could not be (de)serialized.
    Frame(String),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "decode error: {e}"),
            Self::Encode(e) => write!(f, "encode error: {e}"),
            Self::MissingHandler(key) => write!(f, "no handler registered for {key:?}"),
            Self::Script(e) => write!(f, "{e}"),
            Self::TransportClosed => write!(f, "transport closed"),
            Self::Timeout { waiting_for, after } => {
                write!(f, "timed out after {after:?} waiting for {waiting_for}")
            }
            Self::IdSpaceExhausted { attempts } => {
                write!(f, "no unused identifier found after {attempts} attempts")
            }
            Self::BatchAlreadyActive => write!(f, "a script batch is already active"),
            Self::NotLoaded => write!(f, "render surface has not finished loading"),
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Frame(msg) => write!(f, "frame error: {msg}"),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Script(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DecodeError> for BridgeError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

impl From<EncodeError> for BridgeError {
    fn from(e: EncodeError) -> Self {
        Self::Encode(e)
    }
}

impl From<ScriptError> for BridgeError {
    fn from(e: ScriptError) -> Self {
        Self::Script(e)
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Standard result type for bridge APIs.
pub type Result<T> = std::result::Result<T, BridgeError>;
