#![forbid(unsafe_code)]

//! chartbridge runtime
//!
//! Controller-side machinery for driving a render surface over a one-way
//! script channel and receiving its events.
//!
//! # Key Components
//!
//! - [`Window`] - Script submission, load handling, batching, evaluation
//! - [`ScriptQueue`] - Scripts deferred until the surface has loaded
//! - [`BatchAccumulator`] - Many scripts submitted as one
//! - [`ReturnSlots`] - Correlated replies for synchronous evaluation
//! - [`Dispatcher`] - Routes inbound messages to registered handlers
//! - [`ChartHandle`], [`TopBar`], [`HorizontalLine`], [`ToolBox`] - Objects whose
//!   construction registers callbacks
//!
//! # Role in chartbridge
//! `chartbridge-runtime` sits between the transport-agnostic pieces of
//! `chartbridge-core` and the transports in `chartbridge-ipc`. It only needs
//! a [`ScriptSink`] to push scripts into and a queue of [`HostEvent`]s to
//! read from.

pub mod batch;
pub mod chart;
pub mod dispatch;
pub mod returns;
pub mod script_queue;
pub mod sink;
pub mod widget;
pub mod window;

pub use batch::BatchAccumulator;
pub use chart::{ChartHandle, ChartLayout, Position, SubchartOptions, WeakChart};
pub use dispatch::{DispatchReport, Dispatcher, ExitReason, HostEvent, StopHandle};
pub use returns::{PendingReturn, ReturnSlots};
pub use script_queue::ScriptQueue;
pub use sink::{RecordingSink, ScriptSink};
pub use widget::{
    HorizontalLine, LineDash, LineHandler, LineStyle, Modifier, TextHandler, ToolBox, TopBar,
    Widget, WidgetHandler, WidgetKind,
};
pub use window::{BatchGuard, Window, WindowBuilder};
