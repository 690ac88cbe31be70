//! Interface to the external codec driver.
//!
//! The bridge talks to hardware through three traits:
//!
//! - [`CodecDriver`]: the process-wide driver library (init, open, deinit)
//! - [`CodecComponent`]: one opened component; every call is asynchronous
//!   and confirmed later through callbacks
//! - [`ComponentCallbacks`]: what the driver calls back into, from a thread
//!   it owns
//!
//! Callback context is explicit: the driver receives an
//! `Arc<dyn ComponentCallbacks>` when the component is opened and hands it
//! back on every callback. Nothing is routed through global state, so any
//! number of component instances can coexist.

mod session;

pub use session::{DriverSession, SessionLease};

use crate::buffer::{BufferFlags, BufferHandle};
use crate::component::{ComponentState, PortDirection};
use crate::error::Result;
use std::fmt;
use std::sync::Arc;

/// Asynchronous command sent to a component.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Move the component to a state.
    StateSet(ComponentState),
    /// Flush a port, returning every buffer it holds.
    Flush(PortDirection),
    /// Disable a port, returning every buffer it holds.
    PortDisable(PortDirection),
    /// Enable a port.
    PortEnable(PortDirection),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StateSet(state) => write!(f, "StateSet({state})"),
            Self::Flush(port) => write!(f, "Flush({port})"),
            Self::PortDisable(port) => write!(f, "PortDisable({port})"),
            Self::PortEnable(port) => write!(f, "PortEnable({port})"),
        }
    }
}

/// Asynchronous event reported by a component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ComponentEvent {
    /// A previously sent command has completed.
    CommandComplete(Command),
    /// The component hit an error.
    Error {
        /// Driver-specific error code.
        code: u32,
    },
    /// A port's format changed; it must be reconfigured.
    PortSettingsChanged(PortDirection),
    /// A buffer carrying notable flags passed through a port.
    BufferFlag {
        /// Port the buffer passed through.
        port: PortDirection,
        /// Flags seen.
        flags: BufferFlags,
    },
    /// Any other driver event, forwarded to logging untouched.
    Other {
        /// Driver event kind.
        kind: u32,
        /// First event parameter.
        data1: u32,
        /// Second event parameter.
        data2: u32,
    },
}

/// Who allocates the memory behind a port's buffers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BufferAllocation {
    /// The component allocates and maps the memory.
    #[default]
    Component,
    /// A peer element allocated the memory; the component only uses it.
    Peer,
}

/// Entry points the driver calls from its own thread.
///
/// Implementations must return quickly: update shared state, signal, return.
/// An `Err` tells the driver the callback violated the buffer protocol.
pub trait ComponentCallbacks: Send + Sync {
    /// Report an asynchronous event.
    fn event(&self, event: ComponentEvent) -> Result<()>;

    /// The component has consumed an input buffer and hands it back.
    fn empty_buffer_done(&self, handle: BufferHandle) -> Result<()>;

    /// The component has filled an output buffer and hands it back.
    fn fill_buffer_done(&self, handle: BufferHandle) -> Result<()>;
}

/// One opened codec component.
///
/// Calls never wait for the component to act: completion is reported
/// through [`ComponentCallbacks`].
pub trait CodecComponent: Send + Sync {
    /// Send an asynchronous command.
    fn send_command(&self, command: Command) -> Result<()>;

    /// Hand a filled input buffer to the component.
    fn empty_this_buffer(&self, handle: &BufferHandle) -> Result<()>;

    /// Hand an empty output buffer to the component.
    fn fill_this_buffer(&self, handle: &BufferHandle) -> Result<()>;

    /// Set up `count` buffers of `size` bytes for a port and return their
    /// descriptors.
    ///
    /// Ids must be unique within the port.
    fn allocate_buffers(
        &self,
        port: PortDirection,
        count: usize,
        size: usize,
        allocation: BufferAllocation,
    ) -> Result<Vec<BufferHandle>>;

    /// Release a buffer set up by [`allocate_buffers`](Self::allocate_buffers).
    fn free_buffer(&self, port: PortDirection, handle: &BufferHandle) -> Result<()>;
}

/// The process-wide driver library.
pub trait CodecDriver: Send + Sync {
    /// Initialize the library. Called once before the first component opens.
    fn init(&self) -> Result<()>;

    /// Tear the library down. Called once after the last component closes.
    fn deinit(&self);

    /// Open a component, registering the callbacks it will use.
    fn open(
        &self,
        name: &str,
        callbacks: Arc<dyn ComponentCallbacks>,
    ) -> Result<Arc<dyn CodecComponent>>;
}
