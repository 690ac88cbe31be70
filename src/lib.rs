//! # hwbridge
//!
//! Bridges an asynchronous, callback-driven hardware codec component to a
//! synchronous, pull/push media pipeline.
//!
//! The component confirms every command later, from a thread it owns, and
//! hands buffers back the same way. hwbridge keeps buffer ownership
//! consistent between the pipeline's streaming thread, the driver callback
//! thread and an output delivery worker, and turns the asynchronous command
//! protocol into bounded, synchronous waits.
//!
//! ## Building blocks
//!
//! - **[`memory::BufferTable`]**: per-port ownership ledger with bounded
//!   waits for a free buffer
//! - **[`flow::TransferQueue`]**: FIFO of filled output buffers with a sticky
//!   release flag
//! - **[`component::StateController`]**: wait until the component confirms a
//!   state or port change
//! - **[`task::PushTask`]**: worker delivering output downstream
//! - **[`codec::HwCodec`]**: the facade a pipeline element uses
//!
//! No blocking operation waits without a deadline.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hwbridge::prelude::*;
//!
//! let session = DriverSession::new(driver);
//! let codec = HwCodec::new(&session, CodecConfig::new("h264dec0"))?;
//! codec.start(|frame: BufferHandle| {
//!     render(&frame);
//!     Ok(())
//! })?;
//!
//! for packet in packets {
//!     let mut input = codec.acquire_free_input_buffer()?;
//!     write_packet(&input, &packet);
//!     input.set_filled(packet.len());
//!     codec.submit_input_buffer(input)?;
//! }
//!
//! codec.stop()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod codec;
pub mod component;
pub mod config;
pub mod driver;
pub mod error;
pub mod flow;
pub mod memory;
pub mod observability;
pub mod task;
pub mod testing;

mod wait;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::buffer::{BackingAddr, BufferFlags, BufferHandle, BufferId};
    pub use crate::codec::{CodecStats, HwCodec};
    pub use crate::component::{ComponentState, PortDirection};
    pub use crate::config::CodecConfig;
    pub use crate::driver::{CodecComponent, CodecDriver, ComponentCallbacks, DriverSession};
    pub use crate::error::{Error, Result};
    pub use crate::task::{Deliver, DeliveryFailure};
}

pub use error::{Error, Result};
