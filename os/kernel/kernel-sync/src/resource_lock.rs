use crate::irq::{InterruptGate, IrqGuard};
use crate::process::{Priority, ProcessId, ProcessOracle};
use core::sync::atomic::{AtomicU32, Ordering};
use log::{trace, warn};

/// Value of the lock word while nobody holds the lock.
const UNLOCKED: u32 = 0;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("the caller is not a process")]
    NoProcess,
    #[error("the lock is not held by the caller")]
    NotLocked,
    #[error("the lock is contended and the caller is an interrupt handler")]
    Busy,
    #[error("the caller already holds the lock")]
    Reentrant,
}

/// A single-word lock owned by a process.
///
/// The word is `0` while unlocked and holds the owner's [`ProcessId`]
/// otherwise. Waiters busy-wait, yielding their timeslice on each failed
/// attempt, and apply a one-link priority inheritance to the holder.
///
/// A lock whose holder is gone (or is sleeping, stopped, finished or a zombie)
/// counts as abandoned and is taken over by the next waiter. This check has no
/// generation counter, so a recycled process id looks like the old holder.
///
/// # Examples
///
/// ```ignore
/// static TABLE_LOCK: ResourceLock = ResourceLock::new();
///
/// TABLE_LOCK.acquire(&oracle, &gate)?;
/// // ... touch the table ...
/// TABLE_LOCK.release(&oracle)?;
/// ```
#[derive(Debug, Default)]
pub struct ResourceLock {
    word: AtomicU32,
}

/// Priority boost applied to a holder on behalf of a waiter.
#[derive(Debug, Copy, Clone)]
struct Boost {
    holder: ProcessId,
    original: Priority,
}

impl Boost {
    /// Raises `holder` to the waiter's priority if the holder is less urgent.
    fn apply<O: ProcessOracle + ?Sized>(
        holder: ProcessId,
        waiter: ProcessId,
        oracle: &O,
    ) -> Option<Self> {
        let mine = oracle.priority(waiter).ok()?;
        let theirs = oracle.priority(holder).ok()?;
        if !mine.is_more_urgent_than(theirs) {
            return None;
        }
        oracle.set_priority(holder, mine).ok()?;
        trace!("lock: raised holder {holder} from priority {theirs} to {mine} for {waiter}");
        Some(Self {
            holder,
            original: theirs,
        })
    }

    fn restore<O: ProcessOracle + ?Sized>(self, oracle: &O) {
        if let Err(e) = oracle.set_priority(self.holder, self.original) {
            warn!(
                "lock: could not restore priority {} of {}: {e}",
                self.original, self.holder
            );
        }
    }
}

impl ResourceLock {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            word: AtomicU32::new(UNLOCKED),
        }
    }

    /// The process currently recorded as owner, if any.
    #[inline]
    #[must_use]
    pub fn holder(&self) -> Option<ProcessId> {
        ProcessId::new(self.word.load(Ordering::Acquire))
    }

    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.holder().is_some()
    }

    /// Acquires the lock for the current process, waiting as long as needed.
    ///
    /// Returns immediately if the caller already holds the lock; this is not
    /// counted, a single [`release`](Self::release) frees it.
    ///
    /// # Errors
    /// - [`LockError::NoProcess`] if the oracle cannot name the caller.
    /// - [`LockError::Busy`] if the lock is held and the caller is an interrupt handler.
    pub fn acquire<O, G>(&self, oracle: &O, gate: &G) -> Result<(), LockError>
    where
        O: ProcessOracle + ?Sized,
        G: InterruptGate + ?Sized,
    {
        let me = oracle
            .current_process_id()
            .map_err(|_| LockError::NoProcess)?;
        if self.holder() == Some(me) {
            return Ok(());
        }
        self.acquire_as(me, oracle, gate)
    }

    /// Releases the lock held by the current process.
    ///
    /// # Errors
    /// - [`LockError::NoProcess`] if the oracle cannot name the caller.
    /// - [`LockError::NotLocked`] if the caller is not the holder; the lock is left untouched.
    pub fn release<O: ProcessOracle + ?Sized>(&self, oracle: &O) -> Result<(), LockError> {
        let me = oracle
            .current_process_id()
            .map_err(|_| LockError::NoProcess)?;
        self.release_as(me)
    }

    /// Whether the lock is held by a process that is still able to release it.
    #[must_use]
    pub fn is_valid<O: ProcessOracle + ?Sized>(&self, oracle: &O) -> bool {
        self.holder()
            .is_some_and(|holder| Self::holder_is_viable(holder, oracle))
    }

    pub(crate) fn acquire_as<O, G>(&self, me: ProcessId, oracle: &O, gate: &G) -> Result<(), LockError>
    where
        O: ProcessOracle + ?Sized,
        G: InterruptGate + ?Sized,
    {
        let mut boost: Option<Boost> = None;

        loop {
            {
                let _irq = IrqGuard::new(gate);
                if self.try_claim(me) {
                    if let Some(boost) = boost.take() {
                        boost.restore(oracle);
                    }
                    return Ok(());
                }
            }

            // Released between the claim attempt and now; try again right away.
            let Some(holder) = self.holder() else {
                continue;
            };

            if !Self::holder_is_viable(holder, oracle) {
                warn!("lock: reclaiming lock abandoned by {holder} for {me}");
                self.reclaim(holder);
                continue;
            }

            if gate.in_interrupt_handler() {
                if let Some(boost) = boost.take() {
                    boost.restore(oracle);
                }
                return Err(LockError::Busy);
            }

            if boost.is_none() {
                boost = Boost::apply(holder, me, oracle);
            }

            trace!("lock: {me} waiting for {holder}");
            oracle.yield_now();
        }
    }

    pub(crate) fn release_as(&self, me: ProcessId) -> Result<(), LockError> {
        self.word
            .compare_exchange(me.as_u32(), UNLOCKED, Ordering::Release, Ordering::Relaxed)
            .map(|_| ())
            .map_err(|_| LockError::NotLocked)
    }

    #[inline]
    fn try_claim(&self, me: ProcessId) -> bool {
        self.word
            .compare_exchange(UNLOCKED, me.as_u32(), Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Clears the word if it still names `holder`.
    #[inline]
    fn reclaim(&self, holder: ProcessId) {
        let _ = self.word.compare_exchange(
            holder.as_u32(),
            UNLOCKED,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    fn holder_is_viable<O: ProcessOracle + ?Sized>(holder: ProcessId, oracle: &O) -> bool {
        oracle
            .state(holder)
            .is_ok_and(crate::process::ProcessState::may_hold_locks)
    }
}
