//! Records shared with the host.
//!
//! These types are `#[repr(C)]` so that their layout matches what a virtio
//! driver on the other side of the carveout expects. All fields are in the
//! byte order of the processors involved; remote processors sharing memory
//! with their host run the same endianness, so no conversion is done.

use core::mem;

/// One entry of the descriptor table.
///
/// A descriptor names a buffer in the host's address space. The host fills it
/// in before offering it through the available ring, and the device must not
/// rely on its contents after handing it back through the used ring.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct Descriptor {
    addr: u64,
    len: u32,
    flags: u16,
    next: u16,
}

/// One entry of the used ring.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct UsedElem {
    /// Index of the descriptor being returned.
    pub id: u32,
    /// Number of bytes the device wrote into (or consumed from) the buffer.
    pub len: u32,
}

mycelium_bitfield::bitfield! {
    /// Flags carried by each [`Descriptor`].
    #[derive(PartialEq, Eq)]
    pub struct DescFlags<u16> {
        /// The buffer continues in the descriptor named by `next`.
        pub const NEXT: bool;

        /// The buffer is write-only for the device. Otherwise it is read-only.
        pub const WRITE: bool;

        /// The buffer contains a table of indirect descriptors.
        pub const INDIRECT: bool;
    }
}

mycelium_bitfield::bitfield! {
    /// The `flags` field at the head of the available ring. Written by the
    /// host.
    #[derive(PartialEq, Eq)]
    pub struct AvailFlags<u16> {
        /// The host does not want to be interrupted when buffers are used.
        pub const NO_INTERRUPT: bool;
    }
}

mycelium_bitfield::bitfield! {
    /// The `flags` field at the head of the used ring. Written by the device.
    #[derive(PartialEq, Eq)]
    pub struct UsedFlags<u16> {
        /// The device does not need to be notified when buffers are made
        /// available.
        pub const NO_NOTIFY: bool;
    }
}

// === impl Descriptor ===

impl Descriptor {
    /// Size of a descriptor table entry, in bytes.
    pub const SIZE: usize = mem::size_of::<Self>();

    /// Required alignment of the descriptor table.
    pub const ALIGN: usize = 16;

    #[must_use]
    pub const fn new(addr: u64, len: u32, flags: DescFlags) -> Self {
        Self {
            addr,
            len,
            flags: flags.bits(),
            next: 0,
        }
    }

    /// Returns a copy of this descriptor chained to `next`.
    #[must_use]
    pub fn with_next(self, next: u16) -> Self {
        Self {
            flags: self.flags().with(DescFlags::NEXT, true).bits(),
            next,
            ..self
        }
    }

    #[inline]
    #[must_use]
    pub const fn addr(&self) -> u64 {
        self.addr
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    #[must_use]
    pub const fn flags(&self) -> DescFlags {
        DescFlags::from_bits(self.flags)
    }

    #[inline]
    #[must_use]
    pub const fn next(&self) -> u16 {
        self.next
    }
}

impl UsedElem {
    /// Size of a used ring entry, in bytes.
    pub const SIZE: usize = mem::size_of::<Self>();
}
