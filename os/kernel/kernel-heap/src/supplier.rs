use crate::address::VirtualAddress;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SupplierError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("no region starts at {0}")]
    NoSuchRegion(VirtualAddress),
}

/// Source of whole pages for a heap.
///
/// # Safety
/// Implementors guarantee that a region returned by [`acquire`](Self::acquire)
/// is `size` bytes of zeroed, writable memory aligned to the page size, that
/// nobody else uses it, and that it stays valid until it is passed back to
/// [`release`](Self::release). The heap writes to these regions directly.
pub unsafe trait PageSupplier {
    /// Obtains a zeroed region of `size` bytes (a page multiple).
    ///
    /// # Errors
    /// [`SupplierError::OutOfMemory`] if no region can be provided.
    fn acquire(&mut self, size: u64, tag: &str) -> Result<VirtualAddress, SupplierError>;

    /// Returns the region starting at `address`.
    ///
    /// # Errors
    /// [`SupplierError::NoSuchRegion`] if `address` was not handed out.
    fn release(&mut self, address: VirtualAddress) -> Result<(), SupplierError>;
}

unsafe impl<T> PageSupplier for &mut T
where
    T: PageSupplier + ?Sized,
{
    fn acquire(&mut self, size: u64, tag: &str) -> Result<VirtualAddress, SupplierError> {
        (**self).acquire(size, tag)
    }

    fn release(&mut self, address: VirtualAddress) -> Result<(), SupplierError> {
        (**self).release(address)
    }
}
