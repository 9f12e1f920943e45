#![forbid(unsafe_code)]

//! chartbridge public facade crate.
//!
//! Re-exports the types most programs need from the internal crates and
//! offers a prelude. A typical session:
//!
//! ```no_run
//! use chartbridge::prelude::*;
//!
//! # fn main() -> chartbridge::Result<()> {
//! let mut ctl = chartbridge::headless(BridgeConfig::from_env())?;
//! let chart = ctl.create_chart(ChartLayout::default())?;
//! chart.topbar()?.switcher("tf", &["1m", "5m"], None, |c: &ChartHandle| {
//!     let _ = c.fit();
//! })?;
//! ctl.start()?;
//! let dispatch = ctl.spawn_dispatch()?;
//! ctl.exit()?;
//! dispatch.join()?;
//! # Ok(())
//! # }
//! ```

// --- Core re-exports -------------------------------------------------------

pub use chartbridge_core::{
    BridgeConfig, Command, Delivery, FlushMode, Handler, HandlerRegistry, IdGenerator, Inbound,
    Invocation, Latch, Lifecycle, LogConfig, Message, Reply, RequestId, ScriptError, ValueCell,
};

#[cfg(feature = "tracing-json")]
pub use chartbridge_core::init_tracing;

// --- Runtime re-exports ----------------------------------------------------

pub use chartbridge_runtime::{
    ChartHandle, ChartLayout, DispatchReport, Dispatcher, ExitReason, HorizontalLine, LineDash,
    LineHandler, LineStyle, Modifier, Position, ScriptSink, SubchartOptions, TextHandler, ToolBox,
    TopBar, Widget, WidgetHandler, WidgetKind, Window,
};

// --- IPC re-exports --------------------------------------------------------

#[cfg(feature = "ipc")]
pub use chartbridge_ipc::{
    Controller, ControllerState, DispatchThread, HeadlessSurface, HostCommand, RenderSurface,
};

// --- Errors ---------------------------------------------------------------

/// Top-level error type.
pub type Error = chartbridge_core::BridgeError;

/// Standard result type for chartbridge APIs.
pub type Result<T> = std::result::Result<T, Error>;

/// Controller over an in-process headless surface.
#[cfg(feature = "ipc")]
pub fn headless(config: BridgeConfig) -> Result<Controller> {
    Controller::in_process(HeadlessSurface::new(), config)
}

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        BridgeConfig, ChartHandle, ChartLayout, Error, Handler, LineStyle, Modifier, Position,
        Result, SubchartOptions, Window,
    };

    #[cfg(feature = "ipc")]
    pub use crate::{Controller, HeadlessSurface};

    pub use crate::{core, runtime};
    #[cfg(feature = "ipc")]
    pub use crate::ipc;
}

pub use chartbridge_core as core;
#[cfg(feature = "ipc")]
pub use chartbridge_ipc as ipc;
pub use chartbridge_runtime as runtime;
