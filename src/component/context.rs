//! Per-instance state shared between the requesting threads and the driver
//! callback thread.
//!
//! A [`ComponentContext`] is what the driver receives when a component is
//! opened. It owns both port tables, the output transfer queue and the state
//! controller, and implements [`ComponentCallbacks`] so the driver can hand
//! buffers and events straight back into it.
//!
//! Every callback does three things: update shared state, signal, return.
//! Nothing here blocks on the driver.

use super::controller::StateController;
use super::port::PortDirection;
use crate::buffer::BufferHandle;
use crate::driver::{Command, ComponentCallbacks, ComponentEvent};
use crate::error::{Error, Result};
use crate::flow::TransferQueue;
use crate::memory::BufferTable;
use crate::observability::{
    record_busy_conflict, record_queue_depth, trace_buffer_returned, trace_eos, trace_error,
};

/// Tables, queue and controller for one component instance.
pub struct ComponentContext {
    name: String,
    input: BufferTable,
    output: BufferTable,
    queue: TransferQueue<BufferHandle>,
    controller: StateController,
}

impl ComponentContext {
    /// Create the context for a component with the given pool sizes.
    pub fn new(name: &str, input_buffers: usize, output_buffers: usize) -> Self {
        Self {
            name: name.to_string(),
            input: BufferTable::with_name(name, PortDirection::Input),
            output: BufferTable::with_name(name, PortDirection::Output),
            queue: TransferQueue::new(),
            controller: StateController::new(name, input_buffers, output_buffers),
        }
    }

    /// Component name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table for a port.
    pub fn table(&self, port: PortDirection) -> &BufferTable {
        match port {
            PortDirection::Input => &self.input,
            PortDirection::Output => &self.output,
        }
    }

    /// Input port table.
    pub fn input(&self) -> &BufferTable {
        &self.input
    }

    /// Output port table.
    pub fn output(&self) -> &BufferTable {
        &self.output
    }

    /// Queue of filled output buffers awaiting delivery.
    pub fn queue(&self) -> &TransferQueue<BufferHandle> {
        &self.queue
    }

    /// State controller.
    pub fn controller(&self) -> &StateController {
        &self.controller
    }

    fn command_complete(&self, command: Command) {
        tracing::debug!(component = %self.name, %command, "command complete");
        match command {
            Command::StateSet(state) => self.controller.set_state(state),
            Command::Flush(port) => self.controller.set_port_flushing(port, false),
            Command::PortDisable(port) => self.controller.set_port_enabled(port, false),
            Command::PortEnable(port) => self.controller.set_port_enabled(port, true),
        }
    }

    /// A completion arrived for a buffer we already considered returned.
    fn busy_conflict(&self, port: PortDirection, handle: &BufferHandle) {
        record_busy_conflict(&self.name, port);
        tracing::warn!(
            component = %self.name,
            port = %port,
            error = %Error::BusyConflict(handle.id),
            "completion for a buffer not held by the component"
        );
    }

    fn reject(&self, error: Error) -> Error {
        trace_error(&self.name, &error);
        error
    }
}

impl ComponentCallbacks for ComponentContext {
    fn event(&self, event: ComponentEvent) -> Result<()> {
        match event {
            ComponentEvent::CommandComplete(command) => self.command_complete(command),
            ComponentEvent::Error { code } => {
                tracing::error!(component = %self.name, code, "component error event");
                self.controller.set_error(code);
            }
            ComponentEvent::PortSettingsChanged(port) => {
                tracing::info!(component = %self.name, port = %port, "port settings changed");
                self.controller
                    .update(|status| status.port_mut(port).settings_changed = true);
            }
            ComponentEvent::BufferFlag { port, flags } => {
                if flags.eos {
                    trace_eos(&self.name);
                }
                tracing::debug!(component = %self.name, port = %port, ?flags, "buffer flag");
            }
            ComponentEvent::Other { kind, data1, data2 } => {
                tracing::debug!(component = %self.name, kind, data1, data2, "unhandled event");
            }
        }
        Ok(())
    }

    fn empty_buffer_done(&self, handle: BufferHandle) -> Result<()> {
        self.input.update(&handle).map_err(|e| self.reject(e))?;

        if self.input.mark_free(handle.id).map_err(|e| self.reject(e))? {
            trace_buffer_returned(&self.name, PortDirection::Input, handle.id);
        } else {
            self.busy_conflict(PortDirection::Input, &handle);
        }
        Ok(())
    }

    fn fill_buffer_done(&self, handle: BufferHandle) -> Result<()> {
        if !handle.is_valid() {
            return Err(self.reject(Error::InvalidInput(format!(
                "buffer {} fill {}+{} exceeds allocation {}",
                handle.id, handle.offset, handle.filled_len, handle.alloc_len
            ))));
        }

        self.output.update(&handle).map_err(|e| self.reject(e))?;

        // Newest notification wins: a buffer we thought free is taken back.
        if self.output.mark_used(handle.id).map_err(|e| self.reject(e))? {
            self.busy_conflict(PortDirection::Output, &handle);
        }

        let (filled, _) = self.output.find(handle.id)?;
        let eos = filled.is_eos();

        // Checked and pushed under the status lock so a flush that starts
        // concurrently always finds this buffer when it drains the queue.
        let queued = self.controller.read(|status| {
            if status.accepts_buffers(PortDirection::Output) {
                self.queue.push(filled);
                true
            } else {
                false
            }
        });

        if queued {
            record_queue_depth(&self.name, self.queue.len());
            if eos {
                trace_eos(&self.name);
            }
        } else {
            self.output.mark_free(handle.id)?;
            trace_buffer_returned(&self.name, PortDirection::Output, handle.id);
        }
        Ok(())
    }
}

impl std::fmt::Debug for ComponentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentContext")
            .field("name", &self.name)
            .field("input", &self.input)
            .field("output", &self.output)
            .field("queued", &self.queue.len())
            .field("state", &self.controller.state())
            .finish()
    }
}
