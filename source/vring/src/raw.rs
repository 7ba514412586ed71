//! Pointer views over the shared regions.
//!
//! Everything that touches shared memory goes through here. Ring slots and
//! descriptors are accessed with volatile reads and writes; the two `idx`
//! fields are accessed as atomics, since they carry the ordering between host
//! and device.

use core::ptr::{self, NonNull};

use portable_atomic::AtomicU16;

use crate::{
    desc::{Descriptor, UsedElem},
    errors::ConfigError,
    layout::Layout,
};

pub(crate) struct RawRing {
    desc: NonNull<Descriptor>,
    avail: NonNull<u16>,
    used: NonNull<u16>,
    layout: Layout,
}

impl RawRing {
    /// # Safety
    ///
    /// `base` must point to at least `layout.size()` bytes which remain valid
    /// for as long as the returned value exists. The memory may be concurrently
    /// written by a peer, but only according to the virtio single-writer rules.
    pub(crate) unsafe fn new(base: NonNull<u8>, layout: Layout) -> Result<Self, ConfigError> {
        let regions = layout.regions(base.as_ptr() as usize)?;
        let base = base.as_ptr();
        Ok(Self {
            desc: NonNull::new_unchecked(base.cast()),
            avail: NonNull::new_unchecked(base.add(regions.avail - regions.desc).cast()),
            used: NonNull::new_unchecked(base.add(regions.used - regions.desc).cast()),
            layout,
        })
    }

    #[inline]
    pub(crate) fn layout(&self) -> &Layout {
        &self.layout
    }

    #[inline]
    pub(crate) fn slot(&self, idx: u16) -> u16 {
        idx & self.layout.mask()
    }

    // === descriptor table ===

    #[inline]
    pub(crate) fn read_desc(&self, id: u16) -> Descriptor {
        debug_assert!(id < self.layout.num());
        unsafe { ptr::read_volatile(self.desc.as_ptr().add(id as usize)) }
    }

    #[inline]
    pub(crate) fn write_desc(&self, id: u16, desc: Descriptor) {
        debug_assert!(id < self.layout.num());
        unsafe { ptr::write_volatile(self.desc.as_ptr().add(id as usize), desc) }
    }

    // === available ring ===

    #[inline]
    pub(crate) fn avail_flags(&self) -> &AtomicU16 {
        unsafe { atomic_at(self.avail.as_ptr()) }
    }

    #[inline]
    pub(crate) fn avail_idx(&self) -> &AtomicU16 {
        unsafe { atomic_at(self.avail.as_ptr().add(1)) }
    }

    #[inline]
    pub(crate) fn read_avail_slot(&self, slot: u16) -> u16 {
        debug_assert!(slot < self.layout.num());
        unsafe { ptr::read_volatile(self.avail.as_ptr().add(2 + slot as usize)) }
    }

    #[inline]
    pub(crate) fn write_avail_slot(&self, slot: u16, id: u16) {
        debug_assert!(slot < self.layout.num());
        unsafe { ptr::write_volatile(self.avail.as_ptr().add(2 + slot as usize), id) }
    }

    // === used ring ===

    #[inline]
    pub(crate) fn used_flags(&self) -> &AtomicU16 {
        unsafe { atomic_at(self.used.as_ptr()) }
    }

    #[inline]
    pub(crate) fn used_idx(&self) -> &AtomicU16 {
        unsafe { atomic_at(self.used.as_ptr().add(1)) }
    }

    #[inline]
    fn used_elem(&self, slot: u16) -> *mut UsedElem {
        debug_assert!(slot < self.layout.num());
        unsafe { self.used.as_ptr().add(2).cast::<UsedElem>().add(slot as usize) }
    }

    #[inline]
    pub(crate) fn read_used_slot(&self, slot: u16) -> UsedElem {
        unsafe { ptr::read_volatile(self.used_elem(slot)) }
    }

    #[inline]
    pub(crate) fn write_used_slot(&self, slot: u16, elem: UsedElem) {
        unsafe { ptr::write_volatile(self.used_elem(slot), elem) }
    }
}

/// # Safety
///
/// `ptr` must be valid and 2-byte aligned for the lifetime `'a`.
#[inline]
unsafe fn atomic_at<'a>(ptr: *mut u16) -> &'a AtomicU16 {
    // `AtomicU16` has the same in-memory representation as `u16`.
    &*ptr.cast::<AtomicU16>()
}
