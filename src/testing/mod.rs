//! Test support: an in-process codec driver.
//!
//! The loopback driver needs no hardware and is used by the crate's own
//! tests, integration tests and benches. It is also useful for exercising
//! pipeline code that embeds an [`HwCodec`](crate::codec::HwCodec).

mod loopback;

pub use loopback::{LoopbackComponent, LoopbackConfig, LoopbackDriver};
