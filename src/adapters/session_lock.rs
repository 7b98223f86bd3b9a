use parking_lot::{Condvar, Mutex};

use crate::error::{status, DriverError, DriverResult};

/// Non-reentrant lock over one key's session
///
/// Unlike a guard-based mutex it is taken and released by separate calls,
/// matching `lock_session`/`release_session`.
#[derive(Debug, Default)]
pub struct SessionLock {
    locked: Mutex<bool>,
    released: Condvar,
}

impl SessionLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the lock is free.
    pub fn lock(&self) {
        let mut locked = self.locked.lock();
        while *locked {
            self.released.wait(&mut locked);
        }
        *locked = true;
    }

    pub fn unlock(&self) -> DriverResult<()> {
        let mut locked = self.locked.lock();
        if !*locked {
            return Err(DriverError::new(
                status::CKR_GENERAL_ERROR,
                "session is not locked",
            ));
        }
        *locked = false;
        self.released.notify_one();
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        *self.locked.lock()
    }
}
