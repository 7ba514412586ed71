//! Register access.

use core::ptr::{self, NonNull};

/// A block of 32-bit memory-mapped registers, addressed by byte offset.
///
/// Drivers take a `RegisterBlock` instead of a raw base address so that they
/// can be exercised against fake registers.
pub trait RegisterBlock {
    fn read(&self, offset: usize) -> u32;
    fn write(&mut self, offset: usize, value: u32);
}

/// Real registers, accessed with volatile loads and stores.
#[derive(Debug)]
pub struct Mmio {
    base: NonNull<u32>,
}

impl Mmio {
    /// # Safety
    ///
    /// `base` must be the (suitably mapped) address of a register block that
    /// stays valid for the life of the returned value, and nothing else may
    /// be driving the same registers.
    pub const unsafe fn new(base: NonNull<u32>) -> Self {
        Self { base }
    }

    #[inline]
    fn reg(&self, offset: usize) -> *mut u32 {
        debug_assert_eq!(offset % 4, 0, "register offset {offset:#x} is not word aligned");
        unsafe { self.base.as_ptr().cast::<u8>().add(offset).cast() }
    }
}

impl RegisterBlock for Mmio {
    #[inline]
    fn read(&self, offset: usize) -> u32 {
        unsafe { ptr::read_volatile(self.reg(offset)) }
    }

    #[inline]
    fn write(&mut self, offset: usize, value: u32) {
        unsafe { ptr::write_volatile(self.reg(offset), value) }
    }
}

impl<R: RegisterBlock + ?Sized> RegisterBlock for &mut R {
    #[inline]
    fn read(&self, offset: usize) -> u32 {
        R::read(self, offset)
    }

    #[inline]
    fn write(&mut self, offset: usize, value: u32) {
        R::write(self, offset, value)
    }
}

// Safety: register blocks are not tied to a thread, and `Mmio` is not `Copy`,
// so there is only one owner at a time.
unsafe impl Send for Mmio {}
