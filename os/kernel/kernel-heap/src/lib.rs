//! # Kernel heap
//!
//! A first-fit, coalescing block allocator on top of page-granular backing
//! memory, used both by the kernel and (through system calls) by user
//! processes.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │        KernelHeap (ring 0 only) / UserHeap          │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │  Heap: ProcessMutex<index + counters + supplier>    │
//! │    • first fit, split, coalesce                     │
//! │    • zero on free, extent reclaim                   │
//! └─────────┬───────────────────────────┬───────────────┘
//!           │                           │
//! ┌─────────▼─────────────┐   ┌─────────▼───────────────┐
//! │ BlockIndex            │   │ PageSupplier            │
//! │  address-ordered      │   │  zeroed page multiples  │
//! │  chain over a         │   │  (kernel pages or the   │
//! │  DescriptorPool arena │   │   memory syscalls)      │
//! └───────────────────────┘   └─────────────────────────┘
//! ```
//!
//! ## Blocks and extents
//!
//! The heap asks its supplier for *extents*: runs of pages at least
//! [`HeapConfig::granularity`] bytes long. Each extent is tiled by blocks,
//! every block described by a [`BlockDescriptor`] that records whether it is
//! used, its range, its extent, and for used blocks the owning process and a
//! short tag. Freed blocks merge with free neighbours of the same extent; an
//! extent that becomes a single free block goes back to the supplier.
//!
//! Descriptors live in a [`DescriptorPool`] and link to each other by index.
//! The pool carves them from pages of the heap's own supplier, kept apart
//! from the extents, so the heap never calls a general purpose allocator
//! and can itself back one.
//!
//! ## Locking
//!
//! All state of one heap sits behind a single
//! [`ProcessMutex`](kernel_sync::ProcessMutex). Heaps are independent of each
//! other; the kernel typically owns one [`KernelHeap`] and every process one
//! [`UserHeap`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod address;
pub mod config;
mod context;
mod descriptor;
mod error;
mod heap;
mod index;
mod pool;
mod stats;
mod supplier;
mod tag;

pub use address::{VirtualAddress, align_up};
pub use config::HeapConfig;
#[cfg(target_arch = "x86_64")]
pub use context::CpuPrivilegeProbe;
pub use context::{HeapInterface, KernelHeap, PrivilegeProbe, Ring, UserHeap};
pub use descriptor::{BlockDescriptor, DescriptorId, HeapExtent};
pub use error::HeapError;
pub use heap::Heap;
pub use index::{BlockIndex, Blocks};
pub use pool::{DESCRIPTOR_POOL_TAG, DescriptorPool};
pub use stats::{BlockInfo, HeapStatistics};
pub use supplier::{PageSupplier, SupplierError};
pub use tag::AllocationTag;
