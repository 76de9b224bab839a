//! GPU→GPU binary synchronization (`spec.md` §3 "Semaphore").

use crate::driver::{DriverError, GpuDriver, SemaphoreHandle};
use std::sync::Arc;

/// A binary semaphore, created fresh per synchronization edge per
/// `spec.md` §3.
pub struct Semaphore {
    driver: Arc<dyn GpuDriver>,
    handle: SemaphoreHandle,
}

impl Semaphore {
    /// Create a new semaphore.
    pub fn new(driver: Arc<dyn GpuDriver>) -> Result<Self, DriverError> {
        let handle = driver.create_semaphore()?;
        Ok(Self { driver, handle })
    }

    /// The underlying driver handle.
    #[must_use]
    pub const fn handle(&self) -> SemaphoreHandle {
        self.handle
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        self.driver.destroy_semaphore(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeDriver;

    #[test]
    fn creates_distinct_handles() {
        let driver: Arc<dyn GpuDriver> = Arc::new(FakeDriver::new());
        let a = Semaphore::new(driver.clone()).unwrap();
        let b = Semaphore::new(driver).unwrap();
        assert_ne!(a.handle(), b.handle());
    }
}
