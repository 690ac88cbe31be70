//! Process-wide driver session.
//!
//! Driver libraries must be initialized before the first component is opened
//! and torn down after the last one closes. [`DriverSession`] makes that
//! lifecycle explicit: every opened component holds a [`SessionLease`]; the
//! first lease initializes the driver, dropping the last one deinitializes
//! it.
//!
//! The session lock only serializes init, open and deinit. Per-component
//! calls never touch it.

use super::{CodecComponent, CodecDriver, ComponentCallbacks};
use crate::error::Result;
use parking_lot::Mutex;
use std::sync::Arc;

/// Shared handle to a driver library and its open-component count.
///
/// Cloning is cheap and shares the same session.
#[derive(Clone)]
pub struct DriverSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    driver: Arc<dyn CodecDriver>,
    /// Number of live leases.
    leases: Mutex<usize>,
}

impl DriverSession {
    /// Create a session for a driver. Nothing is initialized yet.
    pub fn new(driver: Arc<dyn CodecDriver>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                driver,
                leases: Mutex::new(0),
            }),
        }
    }

    /// Open a component, initializing the driver if this is the first one.
    ///
    /// The returned lease must outlive the component.
    pub fn open_component(
        &self,
        name: &str,
        callbacks: Arc<dyn ComponentCallbacks>,
    ) -> Result<(Arc<dyn CodecComponent>, SessionLease)> {
        let mut leases = self.inner.leases.lock();

        if *leases == 0 {
            self.inner.driver.init()?;
            tracing::debug!("codec driver initialized");
        }

        match self.inner.driver.open(name, callbacks) {
            Ok(component) => {
                *leases += 1;
                Ok((
                    component,
                    SessionLease {
                        inner: Arc::clone(&self.inner),
                    },
                ))
            }
            Err(err) => {
                if *leases == 0 {
                    self.inner.driver.deinit();
                    tracing::debug!("codec driver deinitialized after failed open");
                }
                Err(err)
            }
        }
    }

    /// Number of components currently holding a lease.
    pub fn open_count(&self) -> usize {
        *self.inner.leases.lock()
    }

    /// Whether the driver is currently initialized.
    pub fn is_initialized(&self) -> bool {
        self.open_count() > 0
    }
}

impl std::fmt::Debug for DriverSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverSession")
            .field("open", &self.open_count())
            .finish()
    }
}

/// Keeps the driver initialized while a component is open.
pub struct SessionLease {
    inner: Arc<SessionInner>,
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        let mut leases = self.inner.leases.lock();
        *leases -= 1;
        if *leases == 0 {
            self.inner.driver.deinit();
            tracing::debug!("codec driver deinitialized");
        }
    }
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferHandle;
    use crate::component::PortDirection;
    use crate::driver::{BufferAllocation, Command, ComponentEvent};
    use crate::error::Error;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingDriver {
        inits: AtomicUsize,
        deinits: AtomicUsize,
        fail_open: AtomicBool,
    }

    struct NullComponent;

    impl CodecComponent for NullComponent {
        fn send_command(&self, _command: Command) -> Result<()> {
            Ok(())
        }
        fn empty_this_buffer(&self, _handle: &BufferHandle) -> Result<()> {
            Ok(())
        }
        fn fill_this_buffer(&self, _handle: &BufferHandle) -> Result<()> {
            Ok(())
        }
        fn allocate_buffers(
            &self,
            _port: PortDirection,
            _count: usize,
            _size: usize,
            _allocation: BufferAllocation,
        ) -> Result<Vec<BufferHandle>> {
            Ok(Vec::new())
        }
        fn free_buffer(&self, _port: PortDirection, _handle: &BufferHandle) -> Result<()> {
            Ok(())
        }
    }

    struct NullCallbacks;

    impl ComponentCallbacks for NullCallbacks {
        fn event(&self, _event: ComponentEvent) -> Result<()> {
            Ok(())
        }
        fn empty_buffer_done(&self, _handle: BufferHandle) -> Result<()> {
            Ok(())
        }
        fn fill_buffer_done(&self, _handle: BufferHandle) -> Result<()> {
            Ok(())
        }
    }

    impl CodecDriver for CountingDriver {
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
            _callbacks: Arc<dyn ComponentCallbacks>,
        ) -> Result<Arc<dyn CodecComponent>> {
            if self.fail_open.load(Ordering::SeqCst) {
                return Err(Error::ComponentLost(format!("no such component {name}")));
            }
            Ok(Arc::new(NullComponent))
        }
    }

    #[test]
    fn test_init_once_deinit_after_last() {
        let driver = Arc::new(CountingDriver::default());
        let session = DriverSession::new(driver.clone());
        assert!(!session.is_initialized());

        let (_a, lease_a) = session.open_component("a", Arc::new(NullCallbacks)).unwrap();
        let (_b, lease_b) = session.open_component("b", Arc::new(NullCallbacks)).unwrap();
        assert_eq!(driver.inits.load(Ordering::SeqCst), 1);
        assert_eq!(session.open_count(), 2);

        drop(lease_a);
        assert_eq!(driver.deinits.load(Ordering::SeqCst), 0);

        drop(lease_b);
        assert_eq!(driver.deinits.load(Ordering::SeqCst), 1);
        assert!(!session.is_initialized());

        let (_c, _lease_c) = session.open_component("c", Arc::new(NullCallbacks)).unwrap();
        assert_eq!(driver.inits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_first_open_deinitializes() {
        let driver = Arc::new(CountingDriver::default());
        driver.fail_open.store(true, Ordering::SeqCst);
        let session = DriverSession::new(driver.clone());

        assert!(session.open_component("x", Arc::new(NullCallbacks)).is_err());
        assert_eq!(driver.inits.load(Ordering::SeqCst), 1);
        assert_eq!(driver.deinits.load(Ordering::SeqCst), 1);
        assert_eq!(session.open_count(), 0);
    }
}
