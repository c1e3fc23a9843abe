//! Narrow interfaces toward everything this driver treats as an external
//! collaborator: PCI, physical memory, DMA allocation, and logging. A host
//! kernel implements these against its own PCI stack, paging layer, and
//! serial console; tests implement them against plain heap buffers.

use core::fmt;

use crate::error::XhciError;

/// A bus physical address. Distinct from a pointer: the driver writes these
/// into MMIO registers and DMA descriptors, but never dereferences one
/// directly without first asking `PhysMemory` (or the allocator that handed
/// it out) for the matching virtual mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysAddr(pub u64);

impl PhysAddr {
    pub const NULL: PhysAddr = PhysAddr(0);

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub const fn offset(self, by: u64) -> PhysAddr {
        PhysAddr(self.0 + by)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Translates a driver-owned virtual address into the physical address the
/// controller should be told about. Identity-mapped kernels can implement
/// this as `PhysAddr(virt as u64)`; real ports must consult the page tables.
pub trait PhysMemory {
    fn phys_of(&self, virt: usize) -> PhysAddr;
}

/// DMA-capable memory allocation. `alloc_aligned` is the only operation the
/// core actually needs; `calloc_aligned` is a default built on top of it so
/// implementers only have one method to write.
pub trait DmaAlloc {
    /// Allocates `size` bytes aligned to `align`, guaranteeing the block
    /// never straddles a `boundary`-byte physical boundary (xHCI rings must
    /// not cross a 64 KiB boundary). Returns the virtual base and its
    /// physical address.
    fn alloc_aligned(
        &self,
        size: usize,
        align: usize,
        boundary: usize,
    ) -> Result<(usize, PhysAddr), XhciError>;

    fn calloc_aligned(
        &self,
        size: usize,
        align: usize,
        boundary: usize,
    ) -> Result<(usize, PhysAddr), XhciError> {
        let (virt, phys) = self.alloc_aligned(size, align, boundary)?;
        unsafe {
            core::ptr::write_bytes(virt as *mut u8, 0, size);
        }
        Ok((virt, phys))
    }
}

/// What the driver needs from the PCI layer: identification, the mapped
/// BAR0 window, and MSI-X wiring. PCI enumeration itself lives entirely
/// outside this crate.
pub trait PciDevice {
    /// (class, subclass, prog_if), read from the PCI header.
    fn class_triplet(&self) -> (u8, u8, u8);

    /// Virtual base and byte length of BAR0, already mapped by the caller.
    fn bar0(&self) -> (usize, usize);

    fn init_msix(&mut self) -> Result<(), XhciError>;
    fn set_msix_vector(
        &mut self,
        index: u16,
        irq_vector: u8,
        handler_data: u64,
    ) -> Result<(), XhciError>;
    fn enable_msix(&mut self) -> Result<(), XhciError>;
    fn default_msix_vector_data(&self, handler: u8, context: u64) -> u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Minimal logging sink. The crate's `debug!`/`info!`/`warn!`/`error!`
/// macros (see [`crate::logging`]) format through this; a host kernel wires
/// it to its serial console, tests wire it to a `Vec<String>` or `eprintln!`.
pub trait Log: Sync {
    fn log(&self, level: LogLevel, module: &str, args: fmt::Arguments);
}

/// A `Log` that discards everything. Used as the default when a caller
/// doesn't care about driver diagnostics.
pub struct NullLog;

impl Log for NullLog {
    fn log(&self, _level: LogLevel, _module: &str, _args: fmt::Arguments) {}
}

/// Mock HAL implementations backing the unit/integration test suite. Real
/// hardware is nowhere near these tests; a `Vec<u8>`-backed buffer stands
/// in for DMA-mapped physical memory the same way the rest of this driver
/// would see identity-mapped pages.
#[cfg(any(test, feature = "test-support"))]
pub mod tests_support {
    use super::*;
    use alloc::alloc::{alloc_zeroed, Layout};
    use spin::Mutex;

    /// Leaks zeroed, aligned allocations and reports their address as both
    /// virtual and physical (identity mapping, as `SPEC_FULL.md` §6 assumes
    /// for the reviewed platform). Good enough for exercising ring/context
    /// logic; it is not a real DMA allocator.
    pub struct VecDmaAlloc {
        allocations: Mutex<alloc::vec::Vec<usize>>,
    }

    impl VecDmaAlloc {
        pub fn new() -> Self {
            VecDmaAlloc {
                allocations: Mutex::new(alloc::vec::Vec::new()),
            }
        }
    }

    impl Default for VecDmaAlloc {
        fn default() -> Self {
            Self::new()
        }
    }

    impl DmaAlloc for VecDmaAlloc {
        fn alloc_aligned(
            &self,
            size: usize,
            align: usize,
            _boundary: usize,
        ) -> Result<(usize, PhysAddr), XhciError> {
            let layout = Layout::from_size_align(size.max(1), align).map_err(|_| XhciError::OutOfMemory)?;
            let ptr = unsafe { alloc_zeroed(layout) };
            if ptr.is_null() {
                return Err(XhciError::OutOfMemory);
            }
            self.allocations.lock().push(ptr as usize);
            Ok((ptr as usize, PhysAddr(ptr as u64)))
        }
    }

    pub struct VecLog;

    impl Log for VecLog {
        fn log(&self, _level: LogLevel, _module: &str, _args: fmt::Arguments) {}
    }

    pub struct NullPci {
        pub bar0_virt: usize,
        pub bar0_len: usize,
        pub class_triplet: (u8, u8, u8),
    }

    impl PciDevice for NullPci {
        fn class_triplet(&self) -> (u8, u8, u8) {
            self.class_triplet
        }

        fn bar0(&self) -> (usize, usize) {
            (self.bar0_virt, self.bar0_len)
        }

        fn init_msix(&mut self) -> Result<(), XhciError> {
            Ok(())
        }

        fn set_msix_vector(
            &mut self,
            _index: u16,
            _irq_vector: u8,
            _handler_data: u64,
        ) -> Result<(), XhciError> {
            Ok(())
        }

        fn enable_msix(&mut self) -> Result<(), XhciError> {
            Ok(())
        }

        fn default_msix_vector_data(&self, _handler: u8, _context: u64) -> u64 {
            0
        }
    }
}
