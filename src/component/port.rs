//! Component ports.

use std::fmt;

/// Direction of a component port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PortDirection {
    /// Receives data from the pipeline (compressed data for a decoder).
    Input,
    /// Produces data for the pipeline.
    Output,
}

impl PortDirection {
    /// Both directions, input first.
    pub const ALL: [PortDirection; 2] = [PortDirection::Input, PortDirection::Output];

    /// Index into per-port arrays.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Self::Input => 0,
            Self::Output => 1,
        }
    }

    /// Direction name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable status of one port.
///
/// `enabled` and `flushing` are cleared/set by the callback thread on command
/// completion; `flushing` and `disabling` are raised by the requesting thread
/// before it sends the command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortStatus {
    /// Port direction.
    pub direction: PortDirection,
    /// Configured number of buffers.
    pub buffer_count: usize,
    /// Whether the port is enabled.
    pub enabled: bool,
    /// A flush is in progress.
    pub flushing: bool,
    /// A disable is in progress.
    pub disabling: bool,
    /// The component reported new port settings that have not been handled.
    pub settings_changed: bool,
}

impl PortStatus {
    /// Status of a freshly opened, enabled port.
    pub fn new(direction: PortDirection, buffer_count: usize) -> Self {
        Self {
            direction,
            buffer_count,
            enabled: true,
            flushing: false,
            disabling: false,
            settings_changed: false,
        }
    }

    /// Whether the port currently exchanges buffers.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.flushing && !self.disabling
    }
}
