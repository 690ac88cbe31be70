//! Cross-thread buffer handoff.
//!
//! - [`TransferQueue`]: FIFO from the driver callback thread to the push task,
//!   with sticky cooperative cancellation
//! - [`PopOutcome`]: distinguishes item, release and timeout on a blocking pop

mod transfer_queue;

pub use transfer_queue::{PopOutcome, QueueStats, TransferQueue};
