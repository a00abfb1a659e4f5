use crate::irq::InterruptGate;
use crate::process::{ProcessId, ProcessOracle};
use crate::resource_lock::{LockError, ResourceLock};
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use log::warn;

/// A value protected by a [`ResourceLock`].
///
/// Unlike the bare lock, locking here is not reentrant: handing out a second
/// guard to the holder would alias the protected value, so it fails with
/// [`LockError::Reentrant`] instead.
///
/// The lock may be taken over from a holder the oracle reports as sleeping,
/// stopped, finished or a zombie. That holder's guard then no longer grants
/// exclusive access, which is why [`lock`](Self::lock) is `unsafe`.
///
/// ```compile_fail
/// use kernel_sync::{NoInterruptGate, ProcessMutex, ProcessOracle};
///
/// fn bump<O: ProcessOracle>(m: &ProcessMutex<u32>, oracle: &O) {
///     // locking requires an `unsafe` block
///     *m.lock(oracle, &NoInterruptGate).unwrap() += 1;
/// }
/// ```
pub struct ProcessMutex<T> {
    lock: ResourceLock,
    cell: UnsafeCell<T>,
}

// Safety: access to `cell` is only granted through a guard. Guards are only
// created by the process that claimed `lock`, and the contract of `lock`
// rules out a reclaimed guard touching the value.
unsafe impl<T: Send> Sync for ProcessMutex<T> {}

impl<T> ProcessMutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            lock: ResourceLock::new(),
            cell: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock for the current process and returns a guard.
    ///
    /// # Safety
    /// If the lock is taken over from a holder in an abandoning state, that
    /// holder must not access the value through its guard again; dropping
    /// the guard is allowed. Callers uphold this by keeping guards within
    /// code that the holder cannot be stopped in and later resume, or by
    /// never resuming such a process.
    ///
    /// # Errors
    /// - [`LockError::NoProcess`] if the oracle cannot name the caller.
    /// - [`LockError::Reentrant`] if the caller already holds this mutex.
    /// - [`LockError::Busy`] if contended from an interrupt handler.
    pub unsafe fn lock<O, G>(
        &self,
        oracle: &O,
        gate: &G,
    ) -> Result<ProcessMutexGuard<'_, T>, LockError>
    where
        O: ProcessOracle + ?Sized,
        G: InterruptGate + ?Sized,
    {
        let me = oracle
            .current_process_id()
            .map_err(|_| LockError::NoProcess)?;
        if self.lock.holder() == Some(me) {
            return Err(LockError::Reentrant);
        }
        self.lock.acquire_as(me, oracle, gate)?;
        Ok(ProcessMutexGuard { m: self, owner: me })
    }

    /// The underlying lock, for holder inspection.
    #[inline]
    pub const fn raw(&self) -> &ResourceLock {
        &self.lock
    }

    /// Mutable access when you have `&mut self` (no contention possible).
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.cell.get_mut()
    }

    #[inline]
    pub fn into_inner(self) -> T {
        self.cell.into_inner()
    }
}

pub struct ProcessMutexGuard<'a, T> {
    m: &'a ProcessMutex<T>,
    owner: ProcessId,
}

impl<T> ProcessMutexGuard<'_, T> {
    /// The process that holds this guard.
    #[inline]
    #[must_use]
    pub const fn owner(&self) -> ProcessId {
        self.owner
    }

    /// Whether the lock still belongs to this guard's owner, i.e. it was not
    /// taken over since the guard was created.
    #[inline]
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.m.lock.holder() == Some(self.owner)
    }
}

impl<T> Deref for ProcessMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the guard's owner holds the lock; see `ProcessMutex::lock`.
        unsafe { &*self.m.cell.get() }
    }
}

impl<T> DerefMut for ProcessMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: as for `deref`, and `&mut self` makes it exclusive.
        unsafe { &mut *self.m.cell.get() }
    }
}

impl<T> Drop for ProcessMutexGuard<'_, T> {
    fn drop(&mut self) {
        if self.m.lock.release_as(self.owner).is_err() {
            // Someone decided we were dead and took the lock over.
            warn!("lock: {} lost its lock before releasing it", self.owner);
        }
    }
}
