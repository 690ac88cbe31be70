//! Codec instance configuration.

use crate::driver::BufferAllocation;
use crate::error::{Error, Result};
use std::time::Duration;

/// Default values.
pub mod defaults {
    use std::time::Duration;

    /// Buffers per port.
    pub const BUFFER_COUNT: usize = 8;
    /// Input buffer size in bytes.
    pub const INPUT_BUFFER_SIZE: usize = 1024 * 1024;
    /// Output buffer size in bytes (one 1080p NV12 frame).
    pub const OUTPUT_BUFFER_SIZE: usize = 1920 * 1088 * 3 / 2;
    /// Deadline for every bounded wait.
    pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
    /// Push task queue poll interval.
    pub const PUSH_POLL_INTERVAL: Duration = Duration::from_millis(100);
    /// Upper bound on buffers per port.
    pub const MAX_BUFFER_COUNT: usize = 64;
    /// Buffer ids at or above this are rejected; ids index a table arena.
    pub const MAX_BUFFER_ID: u32 = 1024;
}

/// Configuration for one [`HwCodec`](crate::codec::HwCodec) instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecConfig {
    /// Driver component name to open, also used as log and metrics label.
    pub component: String,
    /// Number of input buffers.
    pub input_buffers: usize,
    /// Number of output buffers.
    pub output_buffers: usize,
    /// Size of each input buffer in bytes.
    pub input_buffer_size: usize,
    /// Size of each output buffer in bytes.
    pub output_buffer_size: usize,
    /// Buffer memory is allocated by a peer instead of the component.
    pub peer_allocation: bool,
    /// Deadline for acquiring buffers and confirming commands.
    pub wait_timeout: Duration,
    /// How long the push task blocks on its queue per iteration.
    pub push_poll_interval: Duration,
}

impl CodecConfig {
    /// Default configuration for a named component.
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            input_buffers: defaults::BUFFER_COUNT,
            output_buffers: defaults::BUFFER_COUNT,
            input_buffer_size: defaults::INPUT_BUFFER_SIZE,
            output_buffer_size: defaults::OUTPUT_BUFFER_SIZE,
            peer_allocation: false,
            wait_timeout: defaults::WAIT_TIMEOUT,
            push_poll_interval: defaults::PUSH_POLL_INTERVAL,
        }
    }

    /// Few buffers and short deadlines, for live sources.
    pub fn low_latency(component: impl Into<String>) -> Self {
        Self::new(component)
            .buffers(4, 4)
            .wait_timeout(Duration::from_secs(1))
            .push_poll_interval(Duration::from_millis(20))
    }

    /// Set the number of buffers on each port.
    pub fn buffers(mut self, input: usize, output: usize) -> Self {
        self.input_buffers = input;
        self.output_buffers = output;
        self
    }

    /// Set the size of each buffer on each port.
    pub fn buffer_sizes(mut self, input: usize, output: usize) -> Self {
        self.input_buffer_size = input;
        self.output_buffer_size = output;
        self
    }

    /// Use peer-allocated buffer memory.
    pub fn peer_allocation(mut self, enabled: bool) -> Self {
        self.peer_allocation = enabled;
        self
    }

    /// Set the deadline for bounded waits.
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Set the push task poll interval.
    pub fn push_poll_interval(mut self, interval: Duration) -> Self {
        self.push_poll_interval = interval;
        self
    }

    /// Allocation mode passed to the driver.
    pub fn allocation(&self) -> BufferAllocation {
        if self.peer_allocation {
            BufferAllocation::Peer
        } else {
            BufferAllocation::Component
        }
    }

    /// Check the configuration for values the bridge cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.component.is_empty() {
            return Err(Error::Config("component name is empty".into()));
        }
        for (port, count) in [("input", self.input_buffers), ("output", self.output_buffers)] {
            if count == 0 || count > defaults::MAX_BUFFER_COUNT {
                return Err(Error::Config(format!(
                    "{port} buffer count {count} outside 1..={}",
                    defaults::MAX_BUFFER_COUNT
                )));
            }
        }
        if self.input_buffer_size == 0 || self.output_buffer_size == 0 {
            return Err(Error::Config("buffer size must be non-zero".into()));
        }
        if self.wait_timeout.is_zero() {
            return Err(Error::Config("wait timeout must be non-zero".into()));
        }
        if self.push_poll_interval.is_zero() {
            return Err(Error::Config("push poll interval must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self::new("hwbridge")
    }
}
