//! Background delivery of filled output buffers.

mod push_task;

pub use push_task::{
    DEFAULT_POLL_INTERVAL, Deliver, DeliveryFailure, PushTask, PushTaskStats, TaskState,
};
