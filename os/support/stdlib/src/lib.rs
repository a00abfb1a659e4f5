//! # User-space support library
//!
//! - `syscall-abi`: system call numbers and status words, shared with the
//!   kernel's dispatcher.
//! - `syscall`: the raw `syscall` stubs.
//! - `stdlib`: a `log` backend writing through the debug system call.
//! - `heap`: the calling process's heap on top of the memory system calls.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![cfg_attr(not(feature = "syscall"), forbid(unsafe_code))]
#![cfg_attr(feature = "syscall", allow(unsafe_code))]

#[cfg(all(feature = "syscall", target_arch = "x86_64"))]
pub mod syscall;

#[cfg(feature = "syscall-abi")]
pub mod syscall_abi;

#[cfg(all(feature = "stdlib", target_arch = "x86_64"))]
mod logger;

#[cfg(all(feature = "stdlib", target_arch = "x86_64"))]
pub use logger::{SyscallLogger, SyscallSink};

#[cfg(all(feature = "heap", target_arch = "x86_64"))]
pub mod heap;

#[cfg(all(feature = "stdlib", target_os = "none"))]
mod panic {
    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo) -> ! {
        log::error!("{info}");
        loop {
            core::hint::spin_loop();
        }
    }
}
