//! # Process Oracle
//!
//! The lock primitives do not own the process table. Everything they need to
//! know about processes (who is running, how urgent a process is, whether it
//! is still alive) is asked through the [`ProcessOracle`] trait, which the
//! multitasker implements.

use core::fmt;
use core::num::NonZeroU32;

/// Identifier of a schedulable process.
///
/// The value `0` is reserved: a [`ResourceLock`](crate::ResourceLock) stores
/// `0` to mean "unlocked", so no process may ever carry that id.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ProcessId(NonZeroU32);

impl ProcessId {
    /// Creates a process id, returning `None` for the reserved value `0`.
    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Option<Self> {
        match NonZeroU32::new(raw) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Debug for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pid({})", self.as_u32())
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// Scheduling priority of a process.
///
/// Lower numbers are more urgent: `0` is the highest priority and
/// [`Priority::LOWEST`] the lowest.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Priority(u8);

impl Priority {
    pub const HIGHEST: Self = Self(0);
    pub const LOWEST: Self = Self(7);

    #[inline]
    #[must_use]
    pub const fn new(level: u8) -> Self {
        Self(level)
    }

    #[inline]
    #[must_use]
    pub const fn level(self) -> u8 {
        self.0
    }

    /// Whether `self` should be scheduled ahead of `other`.
    #[inline]
    #[must_use]
    pub const fn is_more_urgent_than(self, other: Self) -> bool {
        self.0 < other.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a process as reported by the multitasker.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum ProcessState {
    Running = 0,
    Ready = 1,
    Waiting = 2,
    Sleeping = 3,
    Stopped = 4,
    Finished = 5,
    Zombie = 6,
}

impl ProcessState {
    /// Whether a process in this state may keep holding a lock.
    ///
    /// Sleeping and stopped processes are not going to release anything soon,
    /// and finished or zombie processes never will.
    #[inline]
    #[must_use]
    pub const fn may_hold_locks(self) -> bool {
        matches!(self, Self::Running | Self::Ready | Self::Waiting)
    }
}

impl TryFrom<u8> for ProcessState {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Running,
            1 => Self::Ready,
            2 => Self::Waiting,
            3 => Self::Sleeping,
            4 => Self::Stopped,
            5 => Self::Finished,
            6 => Self::Zombie,
            other => return Err(other),
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("there is no current process")]
    NoProcess,
    #[error("no such process: {0}")]
    NoSuchProcess(ProcessId),
}

/// Query/yield interface of the multitasker.
///
/// Implementations must be callable from any context that takes a lock,
/// including with interrupts masked.
pub trait ProcessOracle {
    /// The id of the process on whose behalf the caller runs.
    ///
    /// # Errors
    /// [`OracleError::NoProcess`] if the scheduler has no current process
    /// (e.g. before multitasking is initialized).
    fn current_process_id(&self) -> Result<ProcessId, OracleError>;

    /// # Errors
    /// [`OracleError::NoSuchProcess`] if `pid` does not exist.
    fn priority(&self, pid: ProcessId) -> Result<Priority, OracleError>;

    /// # Errors
    /// [`OracleError::NoSuchProcess`] if `pid` does not exist.
    fn set_priority(&self, pid: ProcessId, priority: Priority) -> Result<(), OracleError>;

    /// # Errors
    /// [`OracleError::NoSuchProcess`] if `pid` does not exist.
    fn state(&self, pid: ProcessId) -> Result<ProcessState, OracleError>;

    /// Gives up the remainder of the current timeslice.
    fn yield_now(&self);
}

impl<T: ProcessOracle + ?Sized> ProcessOracle for &T {
    #[inline]
    fn current_process_id(&self) -> Result<ProcessId, OracleError> {
        (**self).current_process_id()
    }

    #[inline]
    fn priority(&self, pid: ProcessId) -> Result<Priority, OracleError> {
        (**self).priority(pid)
    }

    #[inline]
    fn set_priority(&self, pid: ProcessId, priority: Priority) -> Result<(), OracleError> {
        (**self).set_priority(pid, priority)
    }

    #[inline]
    fn state(&self, pid: ProcessId) -> Result<ProcessState, OracleError> {
        (**self).state(pid)
    }

    #[inline]
    fn yield_now(&self) {
        (**self).yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_not_a_process_id() {
        assert!(ProcessId::new(0).is_none());
        assert_eq!(ProcessId::new(42).map(ProcessId::as_u32), Some(42));
    }

    #[test]
    fn lower_level_is_more_urgent() {
        assert!(Priority::HIGHEST.is_more_urgent_than(Priority::LOWEST));
        assert!(!Priority::new(3).is_more_urgent_than(Priority::new(3)));
        assert!(!Priority::LOWEST.is_more_urgent_than(Priority::new(2)));
    }

    #[test]
    fn only_live_states_may_hold_locks() {
        let live = [
            ProcessState::Running,
            ProcessState::Ready,
            ProcessState::Waiting,
        ];
        let dead = [
            ProcessState::Sleeping,
            ProcessState::Stopped,
            ProcessState::Finished,
            ProcessState::Zombie,
        ];
        assert!(live.iter().all(|s| s.may_hold_locks()));
        assert!(dead.iter().all(|s| !s.may_hold_locks()));
    }

    #[test]
    fn state_from_raw() {
        assert_eq!(ProcessState::try_from(5), Ok(ProcessState::Finished));
        assert_eq!(ProcessState::try_from(9), Err(9));
    }
}
