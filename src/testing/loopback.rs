//! Software loopback codec component.
//!
//! [`LoopbackComponent`] behaves like a hardware decoder whose "decode" is a
//! copy of the input descriptor: each submitted input buffer is paired with
//! a free output buffer, the output gets the input's fill length, timestamp
//! and flags, and both are handed back through the callbacks from a
//! dedicated callback thread.
//!
//! Commands complete asynchronously on the same thread, in submission
//! order. Buffers held by the component are returned when a port is flushed
//! or disabled and when the component leaves the processing states.
//!
//! Faults can be injected at runtime through [`LoopbackComponent`]:
//! stalled state commands, a per-command delay, a delay on the caller's
//! side of `fill_this_buffer` and error events.

use crate::buffer::{BackingAddr, BufferFlags, BufferHandle};
use crate::component::{ComponentState, PortDirection};
use crate::driver::{
    BufferAllocation, CodecComponent, CodecDriver, Command, ComponentCallbacks, ComponentEvent,
};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

/// Initial fault settings for components opened by a [`LoopbackDriver`].
#[derive(Debug, Clone, Default)]
pub struct LoopbackConfig {
    /// Never confirm state commands.
    pub stall_state_commands: bool,
    /// Delay before each command is confirmed.
    pub command_delay: Duration,
    /// Block the caller of `fill_this_buffer` this long before queueing.
    pub fill_delay: Duration,
    /// Fail every `open`.
    pub fail_open: bool,
}

/// Driver library handing out [`LoopbackComponent`]s.
#[derive(Default)]
pub struct LoopbackDriver {
    config: LoopbackConfig,
    inits: AtomicUsize,
    deinits: AtomicUsize,
    components: Mutex<Vec<Weak<LoopbackComponent>>>,
}

impl LoopbackDriver {
    /// Create a driver whose components start with `config`'s faults.
    pub fn new(config: LoopbackConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Times `init` was called.
    pub fn init_count(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    /// Times `deinit` was called.
    pub fn deinit_count(&self) -> usize {
        self.deinits.load(Ordering::SeqCst)
    }

    /// Most recently opened component that is still alive with this name.
    pub fn component(&self, name: &str) -> Option<Arc<LoopbackComponent>> {
        self.components
            .lock()
            .iter()
            .rev()
            .filter_map(Weak::upgrade)
            .find(|component| component.name == name)
    }
}

impl CodecDriver for LoopbackDriver {
    fn init(&self) -> Result<()> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn deinit(&self) {
        self.deinits.fetch_add(1, Ordering::SeqCst);
    }

    fn open(
        &self,
        name: &str,
        callbacks: Arc<dyn ComponentCallbacks>,
    ) -> Result<Arc<dyn CodecComponent>> {
        if self.config.fail_open {
            return Err(Error::ComponentLost(format!("cannot open {name}")));
        }

        let component = LoopbackComponent::spawn(name, callbacks, &self.config)?;
        let mut components = self.components.lock();
        components.retain(|weak| weak.strong_count() > 0);
        components.push(Arc::downgrade(&component));
        Ok(component)
    }
}

/// Runtime-adjustable faults.
#[derive(Default)]
struct Faults {
    stall_state_commands: AtomicBool,
    command_delay_us: AtomicU64,
    fill_delay_us: AtomicU64,
}

impl Faults {
    fn command_delay(&self) -> Duration {
        Duration::from_micros(self.command_delay_us.load(Ordering::SeqCst))
    }

    fn fill_delay(&self) -> Duration {
        Duration::from_micros(self.fill_delay_us.load(Ordering::SeqCst))
    }
}

enum Job {
    Command(Command),
    Empty(BufferHandle),
    Fill(BufferHandle),
    Event(ComponentEvent),
    Shutdown,
}

/// A loopback component instance.
pub struct LoopbackComponent {
    name: String,
    jobs: kanal::Sender<Job>,
    faults: Arc<Faults>,
    allocated: [AtomicUsize; 2],
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl LoopbackComponent {
    fn spawn(
        name: &str,
        callbacks: Arc<dyn ComponentCallbacks>,
        config: &LoopbackConfig,
    ) -> Result<Arc<Self>> {
        let (tx, rx) = kanal::unbounded();
        let faults = Arc::new(Faults::default());
        faults
            .stall_state_commands
            .store(config.stall_state_commands, Ordering::SeqCst);
        faults
            .command_delay_us
            .store(config.command_delay.as_micros() as u64, Ordering::SeqCst);
        faults
            .fill_delay_us
            .store(config.fill_delay.as_micros() as u64, Ordering::SeqCst);

        let mut worker = Worker {
            name: name.to_string(),
            callbacks,
            faults: Arc::clone(&faults),
            state: ComponentState::Loaded,
            enabled: [true; 2],
            input: VecDeque::new(),
            output: VecDeque::new(),
        };
        let thread = std::thread::Builder::new()
            .name(format!("{name}-loopback"))
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    if !worker.handle(job) {
                        break;
                    }
                }
            })?;

        Ok(Arc::new(Self {
            name: name.to_string(),
            jobs: tx,
            faults,
            allocated: [AtomicUsize::new(0), AtomicUsize::new(0)],
            thread: Mutex::new(Some(thread)),
        }))
    }

    /// Component name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop confirming state commands (or resume confirming new ones).
    pub fn set_stall_state_commands(&self, stall: bool) {
        self.faults.stall_state_commands.store(stall, Ordering::SeqCst);
    }

    /// Delay applied before confirming each command.
    pub fn set_command_delay(&self, delay: Duration) {
        self.faults
            .command_delay_us
            .store(delay.as_micros() as u64, Ordering::SeqCst);
    }

    /// Delay applied to the caller of each `fill_this_buffer`.
    pub fn set_fill_delay(&self, delay: Duration) {
        self.faults
            .fill_delay_us
            .store(delay.as_micros() as u64, Ordering::SeqCst);
    }

    /// Report an error event from the callback thread.
    pub fn inject_error(&self, code: u32) -> Result<()> {
        self.post(Job::Event(ComponentEvent::Error { code }))
    }

    /// Report an arbitrary event from the callback thread.
    pub fn emit(&self, event: ComponentEvent) -> Result<()> {
        self.post(Job::Event(event))
    }

    /// Buffers currently allocated on a port.
    pub fn allocated(&self, port: PortDirection) -> usize {
        self.allocated[port.index()].load(Ordering::SeqCst)
    }

    fn post(&self, job: Job) -> Result<()> {
        self.jobs
            .send(job)
            .map_err(|_| Error::ComponentLost(format!("{} callback thread exited", self.name)))
    }
}

impl CodecComponent for LoopbackComponent {
    fn send_command(&self, command: Command) -> Result<()> {
        self.post(Job::Command(command))
    }

    fn empty_this_buffer(&self, handle: &BufferHandle) -> Result<()> {
        self.post(Job::Empty(handle.clone()))
    }

    fn fill_this_buffer(&self, handle: &BufferHandle) -> Result<()> {
        let delay = self.faults.fill_delay();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.post(Job::Fill(handle.clone()))
    }

    fn allocate_buffers(
        &self,
        port: PortDirection,
        count: usize,
        size: usize,
        allocation: BufferAllocation,
    ) -> Result<Vec<BufferHandle>> {
        let base: u64 = match allocation {
            BufferAllocation::Component => 0x1000_0000,
            BufferAllocation::Peer => 0x8000_0000,
        };
        let base = base + 0x0100_0000 * port.index() as u64;

        let handles = (0..count)
            .map(|i| {
                let backing = BackingAddr(base + (i * size) as u64);
                BufferHandle::new(i as u32, backing, size)
            })
            .collect();
        self.allocated[port.index()].fetch_add(count, Ordering::SeqCst);
        Ok(handles)
    }

    fn free_buffer(&self, port: PortDirection, _handle: &BufferHandle) -> Result<()> {
        let counter = &self.allocated[port.index()];
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map(|_| ())
            .map_err(|_| Error::InvalidInput(format!("{port} port has no allocated buffers")))
    }
}

impl Drop for LoopbackComponent {
    fn drop(&mut self) {
        let _ = self.jobs.send(Job::Shutdown);
        if let Some(thread) = self.thread.lock().take() {
            if thread.thread().id() != std::thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}

impl std::fmt::Debug for LoopbackComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackComponent")
            .field("name", &self.name)
            .field("allocated_input", &self.allocated(PortDirection::Input))
            .field("allocated_output", &self.allocated(PortDirection::Output))
            .finish()
    }
}

/// State owned by the callback thread.
struct Worker {
    name: String,
    callbacks: Arc<dyn ComponentCallbacks>,
    faults: Arc<Faults>,
    state: ComponentState,
    enabled: [bool; 2],
    /// Submitted input waiting for an output buffer.
    input: VecDeque<BufferHandle>,
    /// Empty output buffers waiting for input.
    output: VecDeque<BufferHandle>,
}

impl Worker {
    /// Returns `false` when the thread should exit.
    fn handle(&mut self, job: Job) -> bool {
        match job {
            Job::Command(command) => self.command(command),
            Job::Empty(handle) => {
                self.input.push_back(handle);
                self.pump();
            }
            Job::Fill(handle) => {
                self.output.push_back(handle);
                self.pump();
            }
            Job::Event(event) => self.report(event),
            Job::Shutdown => return false,
        }
        true
    }

    fn command(&mut self, command: Command) {
        if let Command::StateSet(_) = command {
            if self.faults.stall_state_commands.load(Ordering::SeqCst) {
                tracing::debug!(component = %self.name, %command, "loopback stalling command");
                return;
            }
        }

        let delay = self.faults.command_delay();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        match command {
            Command::StateSet(state) => {
                if !state.can_process() {
                    self.return_all(PortDirection::Input);
                    self.return_all(PortDirection::Output);
                }
                self.state = state;
            }
            Command::Flush(port) => self.return_all(port),
            Command::PortDisable(port) => {
                self.return_all(port);
                self.enabled[port.index()] = false;
            }
            Command::PortEnable(port) => self.enabled[port.index()] = true,
        }

        self.report(ComponentEvent::CommandComplete(command));
        self.pump();
    }

    /// Pair queued input with free output while executing.
    fn pump(&mut self) {
        if self.state != ComponentState::Executing || !self.enabled.iter().all(|&e| e) {
            return;
        }

        while !self.input.is_empty() && !self.output.is_empty() {
            let (Some(input), Some(mut output)) = (self.input.pop_front(), self.output.pop_front())
            else {
                break;
            };

            output.offset = 0;
            output.filled_len = input.filled_len.min(output.alloc_len);
            output.pts = input.pts;
            output.flags = input.flags;
            let eos = input.is_eos();

            self.returned(self.callbacks.empty_buffer_done(input));
            if eos {
                self.report(ComponentEvent::BufferFlag {
                    port: PortDirection::Output,
                    flags: BufferFlags::eos(),
                });
            }
            self.returned(self.callbacks.fill_buffer_done(output));
        }
    }

    /// Hand back every buffer held on a port, unprocessed.
    fn return_all(&mut self, port: PortDirection) {
        match port {
            PortDirection::Input => {
                while let Some(handle) = self.input.pop_front() {
                    self.returned(self.callbacks.empty_buffer_done(handle));
                }
            }
            PortDirection::Output => {
                while let Some(mut handle) = self.output.pop_front() {
                    handle.filled_len = 0;
                    handle.offset = 0;
                    self.returned(self.callbacks.fill_buffer_done(handle));
                }
            }
        }
    }

    fn report(&self, event: ComponentEvent) {
        self.returned(self.callbacks.event(event));
    }

    fn returned(&self, result: Result<()>) {
        if let Err(err) = result {
            tracing::warn!(component = %self.name, error = %err, "callback rejected by bridge");
        }
    }
}
