//! # Interrupt Gate
//!
//! Locks make their test-and-set atomic with respect to interrupt handlers on
//! the same core by masking interrupt delivery around it. The masking itself
//! is behind the [`InterruptGate`] trait: the kernel uses [`CpuInterruptGate`]
//! (`cli`/`sti`), unprivileged code and hosted tests use [`NoInterruptGate`].

/// Interrupt delivery state captured by [`InterruptGate::disable`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct InterruptState {
    /// Whether interrupts were enabled before masking.
    were_enabled: bool,
}

impl InterruptState {
    #[inline]
    #[must_use]
    pub const fn new(were_enabled: bool) -> Self {
        Self { were_enabled }
    }

    #[inline]
    #[must_use]
    pub const fn were_enabled(self) -> bool {
        self.were_enabled
    }
}

/// Enable/disable/query access to interrupt delivery.
pub trait InterruptGate {
    /// Masks interrupts and returns the state to hand back to [`restore`](Self::restore).
    fn disable(&self) -> InterruptState;

    /// Restores the delivery state captured by [`disable`](Self::disable).
    fn restore(&self, state: InterruptState);

    /// Whether the caller is an interrupt service routine.
    ///
    /// Interrupt handlers must never yield, so contended locks fail fast for them.
    fn in_interrupt_handler(&self) -> bool {
        false
    }
}

impl<T: InterruptGate + ?Sized> InterruptGate for &T {
    #[inline]
    fn disable(&self) -> InterruptState {
        (**self).disable()
    }

    #[inline]
    fn restore(&self, state: InterruptState) {
        (**self).restore(state);
    }

    #[inline]
    fn in_interrupt_handler(&self) -> bool {
        (**self).in_interrupt_handler()
    }
}

/// RAII guard that masks interrupts on creation and restores them on drop.
///
/// Interrupts are only re-enabled if they were enabled when the guard was
/// created, so guards nest.
///
/// # Examples
///
/// ```
/// use kernel_sync::{IrqGuard, NoInterruptGate};
///
/// let gate = NoInterruptGate;
/// {
///     let _g = IrqGuard::new(&gate);
///     // critical section
/// }
/// ```
pub struct IrqGuard<'g, G: InterruptGate + ?Sized> {
    gate: &'g G,
    state: InterruptState,
}

impl<'g, G: InterruptGate + ?Sized> IrqGuard<'g, G> {
    #[inline]
    #[must_use]
    pub fn new(gate: &'g G) -> Self {
        let state = gate.disable();
        Self { gate, state }
    }
}

impl<G: InterruptGate + ?Sized> Drop for IrqGuard<'_, G> {
    fn drop(&mut self) {
        self.gate.restore(self.state);
    }
}

/// Gate for contexts that cannot (or need not) mask interrupts.
///
/// Unprivileged code has no access to `cli`/`sti`; there the lock word's
/// compare-and-swap is the only thing making the claim atomic.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoInterruptGate;

impl InterruptGate for NoInterruptGate {
    #[inline]
    fn disable(&self) -> InterruptState {
        InterruptState::new(false)
    }

    #[inline]
    fn restore(&self, _state: InterruptState) {}
}

#[cfg(target_arch = "x86_64")]
pub use cpu::CpuInterruptGate;

#[cfg(target_arch = "x86_64")]
mod cpu {
    use super::{InterruptGate, InterruptState};
    use bitfield_struct::bitfield;
    use core::sync::atomic::{AtomicBool, Ordering};

    /// The part of `RFLAGS` we care about.
    #[bitfield(u64)]
    struct Rflags {
        #[bits(9)]
        __: u16,
        /// Interrupt Enable Flag (bit 9)
        if_interrupt_enable: bool,
        #[bits(54)]
        __: u64,
    }

    /// Interrupt gate backed by the CPU's `IF` flag.
    ///
    /// # Safety & Privilege
    ///
    /// `cli`/`sti` are only legal in ring 0. Using this gate from user mode
    /// raises `#GP`; unprivileged heaps use [`NoInterruptGate`](super::NoInterruptGate).
    pub struct CpuInterruptGate {
        /// Set by the interrupt entry stubs while a handler runs.
        processing_interrupt: &'static AtomicBool,
    }

    impl CpuInterruptGate {
        #[must_use]
        pub const fn new(processing_interrupt: &'static AtomicBool) -> Self {
            Self {
                processing_interrupt,
            }
        }
    }

    #[inline]
    fn rflags() -> Rflags {
        let r: u64;
        unsafe { core::arch::asm!("pushfq; pop {}", out(reg) r, options(nostack, preserves_flags)) }
        Rflags::from_bits(r)
    }

    impl InterruptGate for CpuInterruptGate {
        #[inline]
        fn disable(&self) -> InterruptState {
            let enabled = rflags().if_interrupt_enable();
            if enabled {
                unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
            }
            InterruptState::new(enabled)
        }

        #[inline]
        fn restore(&self, state: InterruptState) {
            if state.were_enabled() {
                unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
            }
        }

        #[inline]
        fn in_interrupt_handler(&self) -> bool {
            self.processing_interrupt.load(Ordering::Acquire)
        }
    }
}
