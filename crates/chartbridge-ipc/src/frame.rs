#![forbid(unsafe_code)]

//! Line-delimited JSON frames for the child-process transport.
//!
//! Each frame is one JSON object on its own line, tagged by `kind`. The
//! controller writes `command` frames to the host's stdin; the host writes
//! every other kind to its stdout.
//!
//! A command frame names its operation in `op`, so a script whose text
//! happens to be a lifecycle verb still arrives as a script.

use serde::{Deserialize, Serialize};

use chartbridge_core::{BridgeError, Command, Lifecycle, Reply, RequestId, Result, ScriptError};

use crate::channel::Envelope;

/// Operation carried by a command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOp {
    /// `text` is a lifecycle verb.
    Lifecycle,
    Script,
    /// `text` is evaluated and answered with a reply frame.
    Evaluate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    Command {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        op: CommandOp,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request: Option<u64>,
        text: String,
    },
    Event {
        raw: String,
    },
    Reply {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request: Option<u64>,
        value: String,
    },
    Fault {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request: Option<u64>,
        script: String,
        message: String,
        #[serde(default)]
        line: Option<u32>,
        #[serde(default)]
        column: Option<u32>,
    },
    Loaded,
    Exited,
}

impl Frame {
    /// Serialize to a single line, without the trailing newline.
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| BridgeError::Frame(e.to_string()))
    }

    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line.trim()).map_err(|e| BridgeError::Frame(e.to_string()))
    }

    pub fn reply(reply: Reply) -> Self {
        Self::Reply {
            request: reply.request.map(|id| id.0),
            value: reply.value,
        }
    }

    pub fn fault(request: Option<RequestId>, error: ScriptError) -> Self {
        Self::Fault {
            request: request.map(|id| id.0),
            script: error.script,
            message: error.message,
            line: error.line,
            column: error.column,
        }
    }
}

impl From<Envelope> for Frame {
    fn from(envelope: Envelope) -> Self {
        let (op, request, text) = match envelope.command {
            Command::Lifecycle(verb) => (CommandOp::Lifecycle, None, verb.as_str().to_string()),
            Command::Script(script) => (CommandOp::Script, None, script),
            Command::Evaluate { request, script } => {
                (CommandOp::Evaluate, request.map(|id| id.0), script)
            }
        };
        Self::Command {
            target: envelope.target,
            op,
            request,
            text,
        }
    }
}

impl TryFrom<Frame> for Envelope {
    type Error = BridgeError;

    fn try_from(frame: Frame) -> Result<Self> {
        let (target, op, request, text) = match frame {
            Frame::Command {
                target,
                op,
                request,
                text,
            } => (target, op, request, text),
            other => {
                return Err(BridgeError::Frame(format!(
                    "expected a command frame, got {other:?}"
                )));
            }
        };
        let command = match op {
            CommandOp::Lifecycle => Command::Lifecycle(
                Lifecycle::parse(&text)
                    .ok_or_else(|| BridgeError::Frame(format!("unknown lifecycle verb {text:?}")))?,
            ),
            CommandOp::Script => Command::Script(text),
            CommandOp::Evaluate => Command::Evaluate {
                request: request.map(RequestId),
                script: text,
            },
        };
        Ok(Envelope { target, command })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn shapes_on_the_wire() {
        assert_eq!(Frame::Loaded.to_line().unwrap(), r#"{"kind":"loaded"}"#);
        assert_eq!(
            Frame::from(Envelope::new(None, Command::Lifecycle(Lifecycle::Start)))
                .to_line()
                .unwrap(),
            r#"{"kind":"command","op":"lifecycle","text":"start"}"#
        );
        assert_eq!(
            Frame::from(Envelope::new(
                Some("w".into()),
                Command::Evaluate {
                    request: Some(RequestId(2)),
                    script: "f()".into()
                }
            ))
            .to_line()
            .unwrap(),
            r#"{"kind":"command","target":"w","op":"evaluate","request":2,"text":"f()"}"#
        );
        assert_eq!(
            Frame::reply(Reply {
                request: Some(RequestId(4)),
                value: "true".into()
            })
            .to_line()
            .unwrap(),
            r#"{"kind":"reply","request":4,"value":"true"}"#
        );
    }

    #[test]
    fn fault_keeps_location() {
        let err = ScriptError::at("a\nb()", "TypeError", Some(2), Some(3));
        let line = Frame::fault(Some(RequestId(9)), err).to_line().unwrap();
        assert_eq!(
            Frame::parse(&line).unwrap(),
            Frame::Fault {
                request: Some(9),
                script: "a\nb()".into(),
                message: "TypeError".into(),
                line: Some(2),
                column: Some(3),
            }
        );
    }

    #[test]
    fn verb_shaped_script_stays_a_script() {
        let line = Frame::from(Envelope::new(None, Command::Script("hide".into())))
            .to_line()
            .unwrap();
        let envelope = Envelope::try_from(Frame::parse(&line).unwrap()).unwrap();
        assert_eq!(envelope.command, Command::Script("hide".into()));
    }

    #[test]
    fn unknown_verb_and_wrong_kind_are_rejected() {
        let frame = Frame::parse(r#"{"kind":"command","op":"lifecycle","text":"fly"}"#).unwrap();
        assert!(matches!(Envelope::try_from(frame), Err(BridgeError::Frame(_))));
        assert!(matches!(
            Envelope::try_from(Frame::Loaded),
            Err(BridgeError::Frame(_))
        ));
    }

    #[test]
    fn garbage_is_a_frame_error() {
        assert!(matches!(Frame::parse("not json"), Err(BridgeError::Frame(_))));
        assert!(matches!(
            Frame::parse(r#"{"kind":"teleport"}"#),
            Err(BridgeError::Frame(_))
        ));
    }
}
