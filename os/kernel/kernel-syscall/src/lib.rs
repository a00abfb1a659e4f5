//! # System call dispatch
//!
//! Decodes the memory and process system calls user heaps are built on and
//! forwards them to a [`SyscallHost`], the kernel's view of its own services.
//! Numbers and status words come from [`stdlib::syscall_abi`].

#![cfg_attr(not(any(test, doctest)), no_std)]

mod dispatch;

pub use dispatch::{SyscallHost, TrapFrame, dispatch, dispatch_frame};
pub use stdlib::syscall_abi::{Sysno, SyscallError};
