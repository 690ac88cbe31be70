//! Per-port ownership ledger for a fixed pool of buffer handles.
//!
//! A [`BufferTable`] records, for every buffer of one port, whether some
//! party currently owns it for processing (busy) or whether it sits idle in
//! the pool (free). The producer thread, the driver callback thread and the
//! push task all flip these flags, so every operation runs under the table
//! mutex and every busy/free change broadcasts the table's condition
//! variable.
//!
//! # Design
//!
//! - Nodes live in an arena indexed by [`BufferId`], so lookups are O(1).
//! - Blocking operations capture their deadline once, then loop
//!   wait → re-check. A wake-up never implies the buffer that caused it is
//!   still free.
//! - No operation waits without a deadline.
//!
//! # Example
//!
//! ```rust,ignore
//! use hwbridge::memory::BufferTable;
//! use hwbridge::component::PortDirection;
//!
//! let table = BufferTable::new(PortDirection::Input);
//! table.add(handle)?;
//!
//! // Producer: claim a free buffer (blocks up to 5s)
//! let buffer = table.acquire(Duration::from_secs(5))?;
//!
//! // Callback thread: driver is done with it
//! table.mark_free(buffer.id)?;
//! ```

use crate::buffer::{BackingAddr, BufferHandle, BufferId};
use crate::component::PortDirection;
use crate::config::defaults::MAX_BUFFER_ID;
use crate::error::{Error, Result};
use crate::observability::{PortMetrics, record_wait_timeout};
use crate::wait::deadline_after;
use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Statistics about table usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableStats {
    /// Buffers registered in the table.
    pub capacity: usize,
    /// Buffers currently busy.
    pub in_use: usize,
    /// Buffers currently free.
    pub available: usize,
    /// Successful acquisitions.
    pub acquisitions: u64,
    /// Blocking calls that had to wait at least once.
    pub waits: u64,
    /// Blocking calls that hit their deadline.
    pub timeouts: u64,
}

/// One buffer's entry in the table.
#[derive(Debug)]
struct TableNode {
    handle: BufferHandle,
    busy: bool,
    backing: BackingAddr,
}

/// State protected by the table mutex.
#[derive(Debug, Default)]
struct TableState {
    /// Arena indexed by buffer id.
    slots: Vec<Option<TableNode>>,
    len: usize,
    used: usize,
    acquisitions: u64,
    waits: u64,
    timeouts: u64,
}

impl TableState {
    fn node(&self, id: BufferId) -> Option<&TableNode> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: BufferId) -> Option<&mut TableNode> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    fn first_free(&self) -> Option<&TableNode> {
        self.slots.iter().flatten().find(|node| !node.busy)
    }

    /// Mark the first free node busy and return its handle with the new
    /// used count.
    fn claim_first_free(&mut self) -> Option<(BufferHandle, usize)> {
        let node = self.slots.iter_mut().flatten().find(|node| !node.busy)?;
        node.busy = true;
        let handle = node.handle.clone();
        self.used += 1;
        self.acquisitions += 1;
        Some((handle, self.used))
    }
}

/// Ownership ledger for one port's buffers.
///
/// See the [module documentation](self) for the locking discipline.
pub struct BufferTable {
    /// Component name, used as a log and metrics label.
    name: String,
    port: PortDirection,
    state: Mutex<TableState>,
    /// Signaled on every busy/free transition and on add/remove.
    changed: Condvar,
    metrics: PortMetrics,
}

impl BufferTable {
    /// Create an empty table for a port.
    pub fn new(port: PortDirection) -> Self {
        Self::with_name("hwbridge", port)
    }

    /// Create an empty table labelled with a component name.
    pub fn with_name(name: &str, port: PortDirection) -> Self {
        Self {
            name: name.to_string(),
            port,
            state: Mutex::new(TableState::default()),
            changed: Condvar::new(),
            metrics: PortMetrics::new(name, port),
        }
    }

    /// Port this table belongs to.
    pub fn port(&self) -> PortDirection {
        self.port
    }

    /// Insert a new, free buffer.
    ///
    /// Fails with [`Error::InvalidInput`] if the id is already registered
    /// or not below [`MAX_BUFFER_ID`].
    pub fn add(&self, handle: BufferHandle) -> Result<()> {
        let id = handle.id;
        if id.0 >= MAX_BUFFER_ID {
            return Err(Error::InvalidInput(format!(
                "buffer {} on {} port exceeds id limit {}",
                id, self.port, MAX_BUFFER_ID
            )));
        }
        let mut state = self.state.lock();

        if state.node(id).is_some() {
            return Err(Error::InvalidInput(format!(
                "buffer {} already registered on {} port",
                id, self.port
            )));
        }

        let index = id.index();
        if state.slots.len() <= index {
            state.slots.resize_with(index + 1, || None);
        }
        state.slots[index] = Some(TableNode {
            backing: handle.backing,
            handle,
            busy: false,
        });
        state.len += 1;
        drop(state);

        self.changed.notify_all();
        Ok(())
    }

    /// Look up a buffer by id, returning its descriptor and busy flag.
    pub fn find(&self, id: BufferId) -> Result<(BufferHandle, bool)> {
        let state = self.state.lock();
        state
            .node(id)
            .map(|node| (node.handle.clone(), node.busy))
            .ok_or(Error::NotFound(id))
    }

    /// Whether a buffer is registered.
    pub fn contains(&self, id: BufferId) -> bool {
        self.state.lock().node(id).is_some()
    }

    /// Mark a buffer busy.
    ///
    /// Returns `false` if it was already busy (nothing changed, nobody woken).
    pub fn mark_used(&self, id: BufferId) -> Result<bool> {
        self.set_busy(id, true)
    }

    /// Mark a buffer free.
    ///
    /// Returns `false` if it was already free (nothing changed, nobody woken).
    pub fn mark_free(&self, id: BufferId) -> Result<bool> {
        self.set_busy(id, false)
    }

    fn set_busy(&self, id: BufferId, busy: bool) -> Result<bool> {
        let mut state = self.state.lock();
        let node = state.node_mut(id).ok_or(Error::NotFound(id))?;
        if node.busy == busy {
            return Ok(false);
        }
        node.busy = busy;

        if busy {
            state.used += 1;
        } else {
            state.used -= 1;
        }
        let in_use = state.used;
        drop(state);

        self.changed.notify_all();
        if busy {
            self.metrics.record_acquired(in_use);
        } else {
            self.metrics.record_returned(in_use);
        }
        Ok(true)
    }

    /// Copy fill state, timing and flags from a returned handle into the table.
    ///
    /// Ownership is left untouched. Fails if the id is unknown or the
    /// handle points at different backing memory than the registered one.
    pub fn update(&self, handle: &BufferHandle) -> Result<()> {
        let mut state = self.state.lock();
        let node = state.node_mut(handle.id).ok_or(Error::NotFound(handle.id))?;
        if node.backing != handle.backing {
            return Err(Error::InvalidInput(format!(
                "buffer {} backing {} does not match registered {}",
                handle.id, handle.backing, node.backing
            )));
        }
        node.handle.copy_fill_from(handle);
        Ok(())
    }

    /// Return the first free buffer without claiming it.
    ///
    /// Blocks until one is free or `timeout` expires.
    pub fn get_free(&self, timeout: Duration) -> Result<BufferHandle> {
        self.wait_locked("free buffer", timeout, |state| {
            state.first_free().map(|node| Ok(node.handle.clone()))
        })
    }

    /// Claim a free buffer: find and mark busy under a single lock hold.
    ///
    /// Blocks until one is free or `timeout` expires. Concurrent callers
    /// always receive distinct buffers.
    pub fn acquire(&self, timeout: Duration) -> Result<BufferHandle> {
        let (handle, in_use) = self.wait_locked("free buffer", timeout, |state| {
            state.claim_first_free().map(Ok)
        })?;
        self.after_claim(in_use);
        Ok(handle)
    }

    /// Claim a free buffer without blocking.
    pub fn try_acquire(&self) -> Option<BufferHandle> {
        let (handle, in_use) = self.state.lock().claim_first_free()?;
        self.after_claim(in_use);
        Some(handle)
    }

    fn after_claim(&self, in_use: usize) {
        self.changed.notify_all();
        self.metrics.record_acquired(in_use);
    }

    /// Remove a buffer once it is free.
    ///
    /// Blocks until the buffer is free or `timeout` expires. Used during
    /// port teardown; on timeout the caller decides between
    /// [`force_remove`](Self::force_remove) and aborting the teardown.
    pub fn remove(&self, id: BufferId, timeout: Duration) -> Result<BufferHandle> {
        let handle = self.wait_locked("buffer release", timeout, |state| {
            let busy = match state.node(id) {
                None => return Some(Err(Error::NotFound(id))),
                Some(node) => node.busy,
            };
            if busy {
                return None;
            }
            let node = state.slots[id.index()].take()?;
            state.len -= 1;
            Some(Ok(node.handle))
        })?;

        self.changed.notify_all();
        Ok(handle)
    }

    /// Remove a buffer regardless of its busy flag.
    pub fn force_remove(&self, id: BufferId) -> Result<BufferHandle> {
        let mut state = self.state.lock();
        let node = state
            .slots
            .get_mut(id.index())
            .and_then(Option::take)
            .ok_or(Error::NotFound(id))?;
        state.len -= 1;
        if node.busy {
            state.used -= 1;
            tracing::warn!(
                component = %self.name,
                port = %self.port,
                buffer = %id,
                "force-removed busy buffer"
            );
        }
        let in_use = state.used;
        drop(state);

        self.changed.notify_all();
        self.metrics.set_in_use(in_use);
        Ok(node.handle)
    }

    /// Block until no buffer is busy.
    ///
    /// Returns immediately if nothing is in use.
    pub fn wait_drained(&self, timeout: Duration) -> Result<()> {
        self.wait_locked("buffers drained", timeout, |state| {
            (state.used == 0).then_some(Ok(()))
        })
    }

    /// Shared wait loop.
    ///
    /// `poll` runs under the lock before the first wait and after every
    /// wake-up; `None` means keep waiting.
    fn wait_locked<T>(
        &self,
        operation: &'static str,
        timeout: Duration,
        mut poll: impl FnMut(&mut TableState) -> Option<Result<T>>,
    ) -> Result<T> {
        let deadline = deadline_after(timeout);
        let mut state = self.state.lock();
        let mut waited = false;

        loop {
            if let Some(result) = poll(&mut *state) {
                return result;
            }

            if !waited {
                state.waits += 1;
                waited = true;
            }

            if self.changed.wait_until(&mut state, deadline).timed_out() {
                // A notification may have raced with the deadline
                if let Some(result) = poll(&mut *state) {
                    return result;
                }
                state.timeouts += 1;
                drop(state);

                record_wait_timeout(&self.name, operation);
                tracing::debug!(
                    component = %self.name,
                    port = %self.port,
                    operation,
                    "buffer table wait timed out"
                );
                return Err(Error::Timeout {
                    operation,
                    waited: timeout,
                });
            }
        }
    }

    /// Number of registered buffers.
    pub fn len(&self) -> usize {
        self.state.lock().len
    }

    /// Whether no buffer is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of busy buffers.
    pub fn used_count(&self) -> usize {
        self.state.lock().used
    }

    /// Number of free buffers.
    pub fn free_count(&self) -> usize {
        let state = self.state.lock();
        state.len - state.used
    }

    /// Ids of all registered buffers, ascending.
    pub fn ids(&self) -> Vec<BufferId> {
        self.state
            .lock()
            .slots
            .iter()
            .flatten()
            .map(|node| node.handle.id)
            .collect()
    }

    /// Snapshot of table statistics.
    pub fn stats(&self) -> TableStats {
        let state = self.state.lock();
        TableStats {
            capacity: state.len,
            in_use: state.used,
            available: state.len - state.used,
            acquisitions: state.acquisitions,
            waits: state.waits,
            timeouts: state.timeouts,
        }
    }
}

impl std::fmt::Debug for BufferTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BufferTable")
            .field("name", &self.name)
            .field("port", &self.port)
            .field("len", &state.len)
            .field("used", &state.used)
            .finish()
    }
}

impl Drop for BufferTable {
    fn drop(&mut self) {
        self.changed.notify_all();
    }
}
