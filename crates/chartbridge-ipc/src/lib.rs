#![forbid(unsafe_code)]

//! chartbridge IPC
//!
//! Transports and the renderer host.
//!
//! # Key Components
//!
//! - [`Controller`] - Starts, shows, hides and stops a host; owns the primary [`Window`](chartbridge_runtime::Window)
//! - [`HostLoop`] - Drains commands into a [`RenderSurface`]
//! - [`HeadlessSurface`] - Surface that records scripts instead of running them
//! - [`local_pair`] - In-process channel
//! - [`spawn_host`] - Child-process channel over line-delimited JSON [`Frame`]s
//! - [`serve`] - Host side of the child-process channel
//!
//! # Role in chartbridge
//! The runtime only knows how to push scripts into a
//! [`ScriptSink`](chartbridge_runtime::ScriptSink) and read
//! [`HostEvent`](chartbridge_runtime::HostEvent)s. This crate supplies both
//! ends of that conversation and the lifecycle around it.

pub mod channel;
pub mod controller;
pub mod frame;
pub mod headless;
pub mod host;
pub mod process;
pub mod stdio;

pub use channel::{
    CommandSender, ControllerEnd, Envelope, HostEnd, HostLink, HostSignals, LocalHostLink,
    local_pair,
};
pub use controller::{Controller, ControllerState, DispatchThread};
pub use frame::{CommandOp, Frame};
pub use headless::{HeadlessHandle, HeadlessSurface};
pub use host::{Emitter, HostLoop, HostState, RenderSurface};
pub use process::{HostCommand, HostProcess, spawn_host};
pub use stdio::{StdioLink, command_frames, serve};
