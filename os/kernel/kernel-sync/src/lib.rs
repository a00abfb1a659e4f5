//! # Kernel synchronization primitives
//!
//! Process-owned locks shared by the kernel and user space:
//!
//! - [`ResourceLock`]: a one-word lock holding the owner's process id, with
//!   priority inheritance and reclamation of abandoned locks. Exported for
//!   any subsystem that protects its own data.
//! - [`ProcessMutex`]: a [`ResourceLock`] bundled with the value it protects.
//! - [`InterruptGate`] / [`IrqGuard`]: interrupt masking around the lock's
//!   test-and-set.
//! - [`ProcessOracle`]: what the locks need to know about the scheduler.
//!
//! The design assumes a single, logically serialized core. The claim itself
//! is a compare-and-swap, so it stays correct when several hosted threads
//! race, but waiters are not queued and get no fairness guarantee.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
pub mod process;
mod process_mutex;
mod resource_lock;

#[cfg(target_arch = "x86_64")]
pub use irq::CpuInterruptGate;
pub use irq::{InterruptGate, InterruptState, IrqGuard, NoInterruptGate};
pub use process::{OracleError, Priority, ProcessId, ProcessOracle, ProcessState};
pub use process_mutex::{ProcessMutex, ProcessMutexGuard};
pub use resource_lock::{LockError, ResourceLock};
