#![forbid(unsafe_code)]

//! Core: identifiers, handler registry, wire codec, signals, and errors.
//!
//! # Role in chartbridge
//! Everything in this crate is transport-agnostic. The runtime crate builds
//! the script queue and dispatch loop on top of these pieces, and the IPC
//! crate moves the wire strings defined here between processes.

pub mod config;
pub mod error;
pub mod id;
pub mod logging;
pub mod registry;
pub mod signal;
pub mod wire;

pub use config::{BridgeConfig, DEFAULT_READY_PROBE, FlushMode};
pub use error::{BridgeError, Result, ScriptError};
pub use id::{IdGenerator, RequestId};
pub use registry::{
    Callback, Delivery, Handler, HandlerRegistry, Invocation, Registration, ValueCell,
};
pub use logging::LogConfig;
#[cfg(feature = "tracing-json")]
pub use logging::init_tracing;
pub use signal::Latch;
pub use wire::{Command, DecodeError, EncodeError, Inbound, Lifecycle, Message, Reply};
