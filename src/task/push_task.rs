//! Output delivery worker.
//!
//! The [`PushTask`] owns one thread that drains a [`TransferQueue`] and hands
//! each item to a [`Deliver`] sink. It can be started, paused, cleared and
//! stopped from any thread.
//!
//! # Pausing
//!
//! `pause` marks the task paused, then releases the queue so a worker
//! blocked in `pop` wakes up and parks. Items pushed while paused stay
//! queued until the next `start` or until [`PushTask::clear`] drains them.
//!
//! # Delivery failures
//!
//! A failed delivery pauses the task on its own, records the failure and
//! sends one [`DeliveryFailure`] on the notification channel. The task
//! refuses to restart until the failure is acknowledged with
//! [`PushTask::take_failure`].
//!
//! # Example
//!
//! ```rust,ignore
//! use hwbridge::task::PushTask;
//!
//! let mut task = PushTask::new("h264dec0", queue.clone(), |buffer| {
//!     sink.write(&buffer)?;
//!     Ok(())
//! });
//! task.start()?;
//! // ...
//! task.stop()?;
//! ```

use crate::buffer::BufferHandle;
use crate::error::{Error, Result};
use crate::flow::{PopOutcome, TransferQueue};
use crate::observability::{record_delivery_failure, span_push_task};
use crate::wait::deadline_after;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Default time the worker blocks on the queue before re-checking its state.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Downstream sink for delivered items.
pub trait Deliver<T = BufferHandle>: Send + 'static {
    /// Deliver one item. An error pauses the task.
    fn deliver(&mut self, item: T) -> Result<()>;
}

impl<T, F> Deliver<T> for F
where
    F: FnMut(T) -> Result<()> + Send + 'static,
{
    fn deliver(&mut self, item: T) -> Result<()> {
        self(item)
    }
}

/// Lifecycle state of a push task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// Created, never started.
    Created,
    /// Delivering items.
    Running,
    /// Suspended; queued items are kept.
    Paused,
    /// Worker has been told to exit.
    Stopped,
}

/// Notification of a failed delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryFailure {
    /// Error reported by the sink.
    pub message: String,
    /// Items delivered successfully before the failure.
    pub delivered: u64,
}

/// Counters for a push task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PushTaskStats {
    /// Items delivered successfully.
    pub delivered: u64,
    /// Deliveries that failed.
    pub failed: u64,
}

struct Control {
    state: TaskState,
    /// Worker is waiting at its checkpoint, not inside pop or deliver.
    parked: bool,
    /// Unacknowledged failure.
    failure: Option<DeliveryFailure>,
    stats: PushTaskStats,
}

struct Shared {
    name: String,
    control: Mutex<Control>,
    changed: Condvar,
    failures: kanal::Sender<DeliveryFailure>,
}

/// Worker thread that drains a queue into a sink.
pub struct PushTask<T: Send + 'static = BufferHandle> {
    shared: Arc<Shared>,
    queue: TransferQueue<T>,
    sink: Option<Box<dyn Deliver<T>>>,
    thread: Option<JoinHandle<()>>,
    failures: kanal::Receiver<DeliveryFailure>,
    poll_interval: Duration,
}

impl<T: Send + 'static> PushTask<T> {
    /// Create a task for `queue`. No thread runs until [`start`](Self::start).
    pub fn new(name: &str, queue: TransferQueue<T>, sink: impl Deliver<T>) -> Self {
        let (tx, rx) = kanal::unbounded();
        Self {
            shared: Arc::new(Shared {
                name: name.to_string(),
                control: Mutex::new(Control {
                    state: TaskState::Created,
                    parked: false,
                    failure: None,
                    stats: PushTaskStats::default(),
                }),
                changed: Condvar::new(),
                failures: tx,
            }),
            queue,
            sink: Some(Box::new(sink)),
            thread: None,
            failures: rx,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set how long the worker blocks on the queue per iteration.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Start or resume delivery.
    ///
    /// Resets the queue's release flag first, so a start after a pause
    /// delivers everything still queued. Fails while a delivery failure is
    /// unacknowledged or after [`stop`](Self::stop).
    pub fn start(&mut self) -> Result<()> {
        {
            let mut control = self.shared.control.lock();
            if let Some(failure) = &control.failure {
                return Err(Error::DeliveryFailed(failure.message.clone()));
            }
            match control.state {
                TaskState::Running => return Ok(()),
                TaskState::Stopped => {
                    return Err(Error::InvalidInput(format!(
                        "push task {} already stopped",
                        self.shared.name
                    )));
                }
                TaskState::Created | TaskState::Paused => {}
            }
            self.queue.reset();
            control.state = TaskState::Running;
        }
        self.shared.changed.notify_all();

        if self.thread.is_none() {
            self.spawn()?;
        }
        tracing::debug!(component = %self.shared.name, "push task started");
        Ok(())
    }

    fn spawn(&mut self) -> Result<()> {
        let Some(sink) = self.sink.take() else {
            return Err(Error::InvalidInput("push task sink already consumed".into()));
        };
        let shared = Arc::clone(&self.shared);
        let queue = self.queue.clone();
        let poll_interval = self.poll_interval;

        let spawned = std::thread::Builder::new()
            .name(format!("{}-push", self.shared.name))
            .spawn(move || run(shared, queue, sink, poll_interval));

        match spawned {
            Ok(thread) => {
                self.thread = Some(thread);
                Ok(())
            }
            Err(err) => {
                self.shared.control.lock().state = TaskState::Created;
                Err(err.into())
            }
        }
    }

    /// Suspend delivery. Returns without waiting for the worker.
    pub fn pause(&self) {
        {
            let mut control = self.shared.control.lock();
            if control.state == TaskState::Running {
                control.state = TaskState::Paused;
            }
            // start() resets under the same lock
            self.queue.release();
        }
        self.shared.changed.notify_all();
    }

    /// Suspend delivery and wait until the worker is no longer inside
    /// `deliver`.
    ///
    /// Must not be called from the sink itself.
    pub fn pause_and_wait(&self, timeout: Duration) -> Result<()> {
        self.pause();
        if self.thread.is_none() {
            return Ok(());
        }

        let deadline = deadline_after(timeout);
        let mut control = self.shared.control.lock();
        while !control.parked && control.state != TaskState::Running {
            if self
                .shared
                .changed
                .wait_until(&mut control, deadline)
                .timed_out()
            {
                if control.parked {
                    break;
                }
                return Err(Error::Timeout {
                    operation: "push task pause",
                    waited: timeout,
                });
            }
        }
        Ok(())
    }

    /// Remove and return everything still queued.
    pub fn clear(&self) -> Vec<T> {
        self.queue.drain()
    }

    /// Stop the worker and join it. Idempotent.
    pub fn stop(&mut self) -> Result<()> {
        {
            let mut control = self.shared.control.lock();
            control.state = TaskState::Stopped;
            self.queue.release();
        }
        self.shared.changed.notify_all();

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!(component = %self.shared.name, "push task panicked");
                return Err(Error::DeliveryFailed(format!(
                    "push task {} panicked",
                    self.shared.name
                )));
            }
            tracing::debug!(component = %self.shared.name, "push task stopped");
        }
        Ok(())
    }

    /// Current state.
    pub fn state(&self) -> TaskState {
        self.shared.control.lock().state
    }

    /// Whether the worker is delivering.
    pub fn is_running(&self) -> bool {
        self.state() == TaskState::Running
    }

    /// Acknowledge and return the pending delivery failure, if any.
    pub fn take_failure(&self) -> Option<DeliveryFailure> {
        self.shared.control.lock().failure.take()
    }

    /// Receiver for failure notifications, one per failed delivery.
    pub fn failures(&self) -> kanal::Receiver<DeliveryFailure> {
        self.failures.clone()
    }

    /// Delivery counters.
    pub fn stats(&self) -> PushTaskStats {
        self.shared.control.lock().stats
    }

    /// Queue this task drains.
    pub fn queue(&self) -> &TransferQueue<T> {
        &self.queue
    }
}

impl<T: Send + 'static> Drop for PushTask<T> {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

impl<T: Send + 'static> std::fmt::Debug for PushTask<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let control = self.shared.control.lock();
        f.debug_struct("PushTask")
            .field("name", &self.shared.name)
            .field("state", &control.state)
            .field("stats", &control.stats)
            .field("queued", &self.queue.len())
            .finish()
    }
}

/// Worker loop.
fn run<T: Send + 'static>(
    shared: Arc<Shared>,
    queue: TransferQueue<T>,
    mut sink: Box<dyn Deliver<T>>,
    poll_interval: Duration,
) {
    let _span = span_push_task(&shared.name).entered();

    loop {
        if !checkpoint(&shared, poll_interval) {
            return;
        }

        match queue.pop_blocking_or_released(poll_interval) {
            PopOutcome::Item(item) => match sink.deliver(item) {
                Ok(()) => shared.control.lock().stats.delivered += 1,
                Err(err) => fail(&shared, &queue, &err),
            },
            PopOutcome::Released => {
                // Released without a pause request: back off instead of spinning
                let mut control = shared.control.lock();
                if control.state == TaskState::Running {
                    shared.changed.wait_for(&mut control, poll_interval);
                }
            }
            PopOutcome::TimedOut => {}
        }
    }
}

/// Block while paused. Returns `false` once the task is stopped.
fn checkpoint(shared: &Shared, poll_interval: Duration) -> bool {
    let mut control = shared.control.lock();
    loop {
        match control.state {
            TaskState::Running => {
                control.parked = false;
                return true;
            }
            TaskState::Stopped => {
                control.parked = true;
                drop(control);
                shared.changed.notify_all();
                return false;
            }
            TaskState::Created | TaskState::Paused => {
                if !control.parked {
                    control.parked = true;
                    shared.changed.notify_all();
                }
                shared.changed.wait_for(&mut control, poll_interval);
            }
        }
    }
}

fn fail<T>(shared: &Shared, queue: &TransferQueue<T>, err: &Error) {
    record_delivery_failure(&shared.name);
    tracing::error!(component = %shared.name, error = %err, "delivery failed, pausing push task");

    let failure = {
        let mut control = shared.control.lock();
        control.stats.failed += 1;
        let failure = DeliveryFailure {
            message: err.to_string(),
            delivered: control.stats.delivered,
        };
        control.failure = Some(failure.clone());
        if control.state == TaskState::Running {
            control.state = TaskState::Paused;
        }
        // Released before the failure becomes visible to the owner
        queue.release();
        failure
    };
    shared.changed.notify_all();

    let _ = shared.failures.try_send(failure);
}
