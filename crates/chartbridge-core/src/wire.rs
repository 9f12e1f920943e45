#![forbid(unsafe_code)]

//! Wire codec for the single string channel between controller and surface.
//!
//! # Format
//!
//! ```text
//! <name>_~_<chartId>_~_<arg1>;;;<arg2>;;;...   event with chart id
//! <name>_~_<arg1>;;;...                        event without chart id
//! _~_~RETURN~_~_<requestId>_~_<value>          reply to an evaluate request
//! _~_~RETURN~_~_<value>                        legacy uncorrelated reply
//! start | show | hide | exit | create_window   lifecycle verbs (outbound)
//! ```
//!
//! Multi-character delimiters are used because single characters collide
//! with legitimate JSON/JS content carried in argument values.

use std::fmt;

use crate::id::RequestId;

/// Separates `name`, `chartId` and the argument blob.
pub const FIELD_SEP: &str = "_~_";
/// Separates individual arguments inside the blob.
pub const ARG_SEP: &str = ";;;";
/// Marks a reply (inbound) or an evaluate request (outbound).
pub const RETURN_SENTINEL: &str = "_~_~RETURN~_~_";

/// Failure to decode a raw wire string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The input was empty.
    Empty,
    /// No `_~_` delimiter: not an event message.
    MissingDelimiter(String),
    /// The name field was empty.
    EmptyName(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty message"),
            Self::MissingDelimiter(raw) => {
                write!(f, "missing {FIELD_SEP:?} delimiter in {}", preview(raw))
            }
            Self::EmptyName(raw) => write!(f, "empty event name in {}", preview(raw)),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Failure to encode a message unambiguously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// The name was empty.
    EmptyName,
    /// A chart id was present but empty.
    EmptyChartId,
    /// A field contained one of the reserved delimiters.
    ContainsDelimiter {
        field: &'static str,
        delimiter: &'static str,
    },
    /// The encoding would decode to a different message.
    Ambiguous(String),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyName => write!(f, "event name is empty"),
            Self::EmptyChartId => write!(f, "chart id is present but empty"),
            Self::ContainsDelimiter { field, delimiter } => {
                write!(f, "{field} contains reserved delimiter {delimiter:?}")
            }
            Self::Ambiguous(raw) => write!(f, "encoding {} does not round-trip", preview(raw)),
        }
    }
}

impl std::error::Error for EncodeError {}

fn preview(raw: &str) -> String {
    const MAX: usize = 64;
    if raw.chars().count() <= MAX {
        format!("{raw:?}")
    } else {
        let head: String = raw.chars().take(MAX).collect();
        format!("{head:?}…")
    }
}

/// A decoded UI event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Handler key: a generated widget id or a symbolic event name.
    pub name: String,
    /// Chart the event came from; absent in single-chart configurations.
    pub chart_id: Option<String>,
    /// Positional arguments.
    pub args: Vec<String>,
}

impl Message {
    /// Create a message with no chart id and no args.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chart_id: None,
            args: Vec::new(),
        }
    }

    /// Attach a chart id.
    #[must_use]
    pub fn with_chart(mut self, chart_id: impl Into<String>) -> Self {
        self.chart_id = Some(chart_id.into());
        self
    }

    /// Replace the argument list.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Positional argument `idx`, if present.
    #[must_use]
    pub fn arg(&self, idx: usize) -> Option<&str> {
        self.args.get(idx).map(String::as_str)
    }

    /// Encode into the wire format.
    pub fn encode(&self) -> Result<String, EncodeError> {
        if self.name.is_empty() {
            return Err(EncodeError::EmptyName);
        }
        check_field("name", &self.name)?;
        if let Some(chart) = &self.chart_id {
            if chart.is_empty() {
                return Err(EncodeError::EmptyChartId);
            }
            check_field("chart_id", chart)?;
        }
        for arg in &self.args {
            check_field("arg", arg)?;
        }

        let mut out = String::with_capacity(
            self.name.len() + 2 * FIELD_SEP.len() + self.args.iter().map(String::len).sum::<usize>(),
        );
        out.push_str(&self.name);
        out.push_str(FIELD_SEP);
        if let Some(chart) = &self.chart_id {
            out.push_str(chart);
            out.push_str(FIELD_SEP);
        }
        out.push_str(&self.args.join(ARG_SEP));

        // Fields can be delimiter-free and still fuse into one at a boundary
        // (`"a_~"` followed by `"_~_"`), so verify the round trip.
        match decode(&out) {
            Ok(Inbound::Event(ref decoded)) if decoded == self => Ok(out),
            _ => Err(EncodeError::Ambiguous(out)),
        }
    }
}

fn check_field(field: &'static str, value: &str) -> Result<(), EncodeError> {
    for delimiter in [FIELD_SEP, ARG_SEP] {
        if value.contains(delimiter) {
            return Err(EncodeError::ContainsDelimiter { field, delimiter });
        }
    }
    Ok(())
}

/// The value of a synchronous reply, tagged with its request (if any).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Correlation id; `None` for legacy uncorrelated replies.
    pub request: Option<RequestId>,
    /// Raw evaluated result.
    pub value: String,
}

impl Reply {
    /// Encode for the wire.
    #[must_use]
    pub fn to_wire(&self) -> String {
        match self.request {
            Some(id) => format!("{RETURN_SENTINEL}{id}{FIELD_SEP}{}", self.value),
            None => format!("{RETURN_SENTINEL}{}", self.value),
        }
    }
}

/// Result of decoding an inbound wire string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A UI event for the handler registry.
    Event(Message),
    /// A reply for the return slots; never looked up in the registry.
    Return(Reply),
}

/// Decode an inbound wire string.
pub fn decode(raw: &str) -> Result<Inbound, DecodeError> {
    if raw.is_empty() {
        return Err(DecodeError::Empty);
    }
    if let Some(rest) = raw.strip_prefix(RETURN_SENTINEL) {
        let (request, value) = split_request(rest);
        return Ok(Inbound::Return(Reply {
            request,
            value: value.to_string(),
        }));
    }

    let Some((name, rest)) = raw.split_once(FIELD_SEP) else {
        return Err(DecodeError::MissingDelimiter(raw.to_string()));
    };
    if name.is_empty() {
        return Err(DecodeError::EmptyName(raw.to_string()));
    }
    let (chart_id, blob) = match rest.split_once(FIELD_SEP) {
        Some((chart, blob)) => ((!chart.is_empty()).then(|| chart.to_string()), blob),
        None => (None, rest),
    };
    let args = if blob.is_empty() {
        Vec::new()
    } else {
        blob.split(ARG_SEP).map(str::to_string).collect()
    };
    Ok(Inbound::Event(Message {
        name: name.to_string(),
        chart_id,
        args,
    }))
}

/// Split `"<digits>_~_<rest>"`; anything else is an uncorrelated payload.
fn split_request(rest: &str) -> (Option<RequestId>, &str) {
    if let Some((head, tail)) = rest.split_once(FIELD_SEP)
        && !head.is_empty()
        && head.bytes().all(|b| b.is_ascii_digit())
        && let Ok(id) = head.parse::<u64>()
    {
        return (Some(RequestId(id)), tail);
    }
    (None, rest)
}

/// Lifecycle verbs understood by the renderer host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Start the render surface (first show).
    Start,
    /// Show an already started surface.
    Show,
    /// Hide the surface.
    Hide,
    /// Tear down the surface and end the host loop.
    Exit,
    /// Create an additional window on the host.
    CreateWindow,
}

impl Lifecycle {
    /// All verbs.
    pub const ALL: [Lifecycle; 5] = [
        Lifecycle::Start,
        Lifecycle::Show,
        Lifecycle::Hide,
        Lifecycle::Exit,
        Lifecycle::CreateWindow,
    ];

    /// Wire verb.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Show => "show",
            Self::Hide => "hide",
            Self::Exit => "exit",
            Self::CreateWindow => "create_window",
        }
    }

    /// Parse a bare verb.
    #[must_use]
    pub fn parse(verb: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.as_str() == verb)
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outbound command for the renderer host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// A lifecycle verb.
    Lifecycle(Lifecycle),
    /// Fire-and-forget script.
    Script(String),
    /// Script whose evaluated result must come back as a [`Reply`].
    Evaluate {
        request: Option<RequestId>,
        script: String,
    },
}

impl Command {
    /// Encode for the wire.
    #[must_use]
    pub fn to_wire(&self) -> String {
        match self {
            Self::Lifecycle(verb) => verb.as_str().to_string(),
            Self::Script(script) => script.clone(),
            Self::Evaluate {
                request: Some(id),
                script,
            } => format!("{RETURN_SENTINEL}{id}{FIELD_SEP}{script}"),
            Self::Evaluate {
                request: None,
                script,
            } => format!("{RETURN_SENTINEL}{script}"),
        }
    }

    /// Classify a command line by its shape.
    ///
    /// A line that is exactly a lifecycle verb is always a lifecycle command.
    #[must_use]
    pub fn from_wire(line: &str) -> Self {
        if let Some(rest) = line.strip_prefix(RETURN_SENTINEL) {
            let (request, script) = split_request(rest);
            return Self::Evaluate {
                request,
                script: script.to_string(),
            };
        }
        match Lifecycle::parse(line.trim()) {
            Some(verb) => Self::Lifecycle(verb),
            None => Self::Script(line.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn event(raw: &str) -> Message {
        match decode(raw).unwrap() {
            Inbound::Event(m) => m,
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn decodes_three_field_message() {
        let m = event("switchA_~_chart1_~_opt2");
        assert_eq!(m, Message::new("switchA").with_chart("chart1").with_args(["opt2"]));
    }

    #[test]
    fn decodes_multiple_args() {
        let m = event("on_horizontal_line_move_~_c_~_abc;;;101.25000000");
        assert_eq!(m.args, vec!["abc", "101.25000000"]);
    }

    #[test]
    fn zero_args() {
        let m = event("button_~_chart1_~_");
        assert!(m.args.is_empty());
        assert_eq!(m.chart_id.as_deref(), Some("chart1"));
    }

    #[test]
    fn two_field_form_has_no_chart() {
        let m = event("searchabc_~_AAPL");
        assert_eq!(m.chart_id, None);
        assert_eq!(m.args, vec!["AAPL"]);
    }

    #[test]
    fn args_may_carry_json() {
        let m = event(r#"save_drawings_~_c_~_[{"type":"Box","points":[1,2]}]"#);
        assert_eq!(m.arg(0), Some(r#"[{"type":"Box","points":[1,2]}]"#));
    }

    #[test]
    fn missing_delimiter_is_error() {
        assert!(matches!(decode("garbage"), Err(DecodeError::MissingDelimiter(_))));
        assert_eq!(decode(""), Err(DecodeError::Empty));
        assert!(matches!(decode("_~_x"), Err(DecodeError::EmptyName(_))));
    }

    #[test]
    fn return_sentinel_is_reply() {
        assert_eq!(
            decode("_~_~RETURN~_~_17_~_true").unwrap(),
            Inbound::Return(Reply {
                request: Some(RequestId(17)),
                value: "true".into()
            })
        );
        assert_eq!(
            decode("_~_~RETURN~_~_data:image/png;base64,AAAA").unwrap(),
            Inbound::Return(Reply {
                request: None,
                value: "data:image/png;base64,AAAA".into()
            })
        );
    }

    #[test]
    fn reply_round_trip() {
        let reply = Reply {
            request: Some(RequestId(9)),
            value: "a_~_b".into(),
        };
        assert_eq!(decode(&reply.to_wire()).unwrap(), Inbound::Return(reply));
    }

    #[test]
    fn encode_rejects_delimiters() {
        let m = Message::new("x").with_args(["a;;;b"]);
        assert_eq!(
            m.encode(),
            Err(EncodeError::ContainsDelimiter {
                field: "arg",
                delimiter: ARG_SEP
            })
        );
        assert_eq!(Message::new("").encode(), Err(EncodeError::EmptyName));
    }

    #[test]
    fn encode_rejects_fused_delimiters() {
        let m = Message::new("n_~").with_args(["x"]);
        assert!(matches!(m.encode(), Err(EncodeError::Ambiguous(_))));
    }

    #[test]
    fn encode_shapes() {
        let m = Message::new("k").with_chart("c").with_args(["1", "2"]);
        assert_eq!(m.encode().unwrap(), "k_~_c_~_1;;;2");
        assert_eq!(Message::new("k").encode().unwrap(), "k_~_");
    }

    #[test]
    fn command_shapes() {
        assert_eq!(Command::from_wire("exit"), Command::Lifecycle(Lifecycle::Exit));
        assert_eq!(
            Command::from_wire("create_window"),
            Command::Lifecycle(Lifecycle::CreateWindow)
        );
        assert_eq!(
            Command::from_wire("chart.applyOptions({})"),
            Command::Script("chart.applyOptions({})".into())
        );
        let eval = Command::Evaluate {
            request: Some(RequestId(3)),
            script: "document.readyState == \"complete\"".into(),
        };
        assert_eq!(Command::from_wire(&eval.to_wire()), eval);
        assert_eq!(
            Command::from_wire("_~_~RETURN~_~_x.takeScreenshot()"),
            Command::Evaluate {
                request: None,
                script: "x.takeScreenshot()".into()
            }
        );
    }
}
