//! Turning the host's device addresses into pointers the firmware can use.

use core::ptr::NonNull;

use crate::settings::FirmwareSettings;

/// Maps a device address, as found in the resource table and in vring
/// descriptors, to an address the firmware can dereference.
pub trait Translate {
    fn translate(&self, da: u64) -> usize;

    /// Returns [`None`] for addresses that translate to null.
    #[inline]
    fn ptr(&self, da: u64) -> Option<NonNull<u8>> {
        NonNull::new(self.translate(da) as *mut u8)
    }
}

/// MIPS32 kernel segments.
///
/// Physical memory is visible twice in the kernel address space: cached
/// through KSEG0 and uncached through KSEG1. Buffers shared with a host that
/// does not snoop the remote processor's caches must go through KSEG1.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Kseg {
    cached: bool,
}

/// No translation at all. Used when host and firmware share an address
/// space, as in a simulation.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Identity;

// === impl Kseg ===

impl Kseg {
    /// Sign-extended base of KSEG0.
    pub const KSEG0: u64 = 0xFFFF_FFFF_8000_0000;
    /// Sign-extended base of KSEG1.
    pub const KSEG1: u64 = 0xFFFF_FFFF_A000_0000;

    /// Cached addressing if DMA is coherent, uncached otherwise.
    #[must_use]
    pub const fn new(dma_coherent: bool) -> Self {
        Self {
            cached: dma_coherent,
        }
    }

    /// Addressing for the board's `dma_coherent` setting.
    #[must_use]
    pub const fn from_settings(settings: &FirmwareSettings) -> Self {
        Self::new(settings.dma_coherent)
    }

    #[must_use]
    pub const fn is_cached(&self) -> bool {
        self.cached
    }
}

impl Translate for Kseg {
    #[inline]
    fn translate(&self, da: u64) -> usize {
        let base = if self.cached { Self::KSEG0 } else { Self::KSEG1 };
        // Truncates to the 32-bit segment address on MIPS32.
        base.wrapping_add(da) as usize
    }
}

impl Translate for Identity {
    #[inline]
    fn translate(&self, da: u64) -> usize {
        da as usize
    }
}

impl<T: Translate + ?Sized> Translate for &T {
    #[inline]
    fn translate(&self, da: u64) -> usize {
        T::translate(self, da)
    }
}
