//! The driver (host) end of a vring.
//!
//! Firmware never needs this. It exists so that the host's half of the
//! protocol can be played by a simulator or a test, against exactly the same
//! memory layout and ordering rules as the device end.

use core::{fmt, ptr::NonNull};

use portable_atomic::Ordering;

use crate::{
    desc::{AvailFlags, DescFlags, Descriptor, UsedElem, UsedFlags},
    errors::{ConfigError, RingError},
    layout::Layout,
    raw::RawRing,
};

/// The driver end of a vring.
///
/// The driver owns the descriptor table and the available ring. It fills in
/// descriptors, offers them by index, and reaps them again once the device
/// has placed them on the used ring.
pub struct DriverRing {
    raw: RawRing,
    next_avail: u16,
    last_used: u16,
}

impl DriverRing {
    /// Set up a fresh vring at `base`, zeroing all of its memory.
    ///
    /// # Safety
    ///
    /// `base` must point to at least [`Layout::size`] writable bytes which
    /// stay valid for the life of the returned `DriverRing`, and the device
    /// end must not be running yet.
    pub unsafe fn new(base: NonNull<u8>, layout: Layout) -> Result<Self, ConfigError> {
        let raw = RawRing::new(base, layout)?;
        core::ptr::write_bytes(base.as_ptr(), 0, layout.size());
        Ok(Self {
            raw,
            next_avail: 0,
            last_used: 0,
        })
    }

    /// Take over the driver end of an existing vring at `base`, continuing
    /// from the indices currently published in it.
    ///
    /// # Safety
    ///
    /// As for [`DriverRing::new`], except that the device end may already be
    /// running. There must be no other driver end for this vring.
    pub unsafe fn attach(base: NonNull<u8>, layout: Layout) -> Result<Self, ConfigError> {
        let raw = RawRing::new(base, layout)?;
        let next_avail = raw.avail_idx().load(Ordering::Acquire);
        let last_used = raw.used_idx().load(Ordering::Acquire);
        Ok(Self {
            raw,
            next_avail,
            last_used,
        })
    }

    /// Fill in descriptor `id`.
    ///
    /// # Panics
    ///
    /// If `id` is not less than the ring's descriptor count.
    pub fn set_descriptor(&mut self, id: u16, addr: u64, len: u32, flags: DescFlags) {
        assert!(
            id < self.raw.layout().num(),
            "descriptor {id} out of range for a ring of {}",
            self.raw.layout().num()
        );
        self.raw.write_desc(id, Descriptor::new(addr, len, flags));
    }

    #[must_use]
    pub fn descriptor(&self, id: u16) -> Option<Descriptor> {
        (id < self.raw.layout().num()).then(|| self.raw.read_desc(id))
    }

    /// Make descriptor `id` available to the device.
    ///
    /// # Returns
    ///
    /// - [`Ok`]`(())` if the descriptor was published on the available ring.
    /// - [`Err`]`(`[`RingError::BadDescriptor`]`)` if `id` is out of range.
    /// - [`Err`]`(`[`RingError::Full`]`)` if as many buffers as the ring has
    ///   slots are already outstanding.
    pub fn offer(&mut self, id: u16) -> Result<(), RingError> {
        let slot = self.raw.slot(self.next_avail);
        if id >= self.raw.layout().num() {
            return Err(RingError::BadDescriptor { slot, id });
        }
        if self.outstanding() >= self.raw.layout().num() {
            return Err(RingError::Full);
        }

        self.raw.write_avail_slot(slot, id);
        self.next_avail = self.next_avail.wrapping_add(1);
        self.raw.avail_idx().store(self.next_avail, Ordering::Release);
        tracing::trace!(slot, desc = id, avail_idx = self.next_avail, "avail ring: offered");
        Ok(())
    }

    /// Fill in descriptor `id` and make it available to the device.
    pub fn add_buffer(
        &mut self,
        id: u16,
        addr: u64,
        len: u32,
        flags: DescFlags,
    ) -> Result<(), RingError> {
        if id >= self.raw.layout().num() {
            let slot = self.raw.slot(self.next_avail);
            return Err(RingError::BadDescriptor { slot, id });
        }
        self.set_descriptor(id, addr, len, flags);
        self.offer(id)
    }

    /// Reap the next buffer the device has returned.
    ///
    /// # Returns
    ///
    /// - [`Ok`]`(`[`Some`]`(`[`UsedElem`]`))` with the descriptor index and
    ///   used length, if the device has returned a buffer.
    /// - [`Ok`]`(`[`None`]`)` if nothing new was returned.
    /// - [`Err`]`(`[`RingError::BadDescriptor`]`)` if the device returned an
    ///   index that is out of range.
    pub fn take_used(&mut self) -> Result<Option<UsedElem>, RingError> {
        let published = self.raw.used_idx().load(Ordering::Acquire);
        if published == self.last_used {
            return Ok(None);
        }

        let slot = self.raw.slot(self.last_used);
        let elem = self.raw.read_used_slot(slot);
        if elem.id >= self.raw.layout().num() as u32 {
            return Err(RingError::BadDescriptor {
                slot,
                id: elem.id as u16,
            });
        }

        self.last_used = self.last_used.wrapping_add(1);
        tracing::trace!(slot, desc = elem.id, len = elem.len, "used ring: reaped");
        Ok(Some(elem))
    }

    /// Ask the device not to interrupt when it returns buffers.
    pub fn set_interrupt_suppressed(&mut self, suppressed: bool) {
        let flags = AvailFlags::new().with(AvailFlags::NO_INTERRUPT, suppressed);
        self.raw.avail_flags().store(flags.bits(), Ordering::Release);
    }

    /// Returns `true` if the device asked not to be notified of new buffers.
    #[must_use]
    pub fn notify_suppressed(&self) -> bool {
        UsedFlags::from_bits(self.raw.used_flags().load(Ordering::Acquire))
            .get(UsedFlags::NO_NOTIFY)
    }

    /// Number of buffers offered and not yet reaped.
    #[must_use]
    pub fn outstanding(&self) -> u16 {
        self.next_avail.wrapping_sub(self.last_used)
    }

    /// The next available index this end will publish.
    #[inline]
    #[must_use]
    pub fn avail_idx(&self) -> u16 {
        self.next_avail
    }

    /// How far this end has reaped the used ring.
    #[inline]
    #[must_use]
    pub fn used_idx(&self) -> u16 {
        self.last_used
    }

    #[inline]
    #[must_use]
    pub fn layout(&self) -> &Layout {
        self.raw.layout()
    }
}

impl fmt::Debug for DriverRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRing")
            .field("layout", self.raw.layout())
            .field("next_avail", &self.next_avail)
            .field("last_used", &self.last_used)
            .finish()
    }
}

// Safety: see `Vring`.
unsafe impl Send for DriverRing {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::Carveout;

    #[test]
    fn full_ring_refuses_offers() {
        let mem = Carveout::new(4, 0x1000);
        let mut host = mem.driver();
        for id in 0..4 {
            host.add_buffer(id, 0x1000 * id as u64, 0x100, DescFlags::new())
                .unwrap();
        }
        assert_eq!(host.outstanding(), 4);
        assert_eq!(host.offer(0), Err(RingError::Full));
        assert_eq!(mem.avail_idx(), 4);
    }

    #[test]
    fn out_of_range_descriptor() {
        let mem = Carveout::new(4, 0x1000);
        let mut host = mem.driver();
        assert_eq!(
            host.add_buffer(4, 0, 1, DescFlags::new()),
            Err(RingError::BadDescriptor { slot: 0, id: 4 })
        );
        assert_eq!(host.descriptor(4), None);
    }

    #[test]
    fn reaps_in_order() {
        let mem = Carveout::new(4, 0x1000);
        let mut host = mem.driver();
        let mut ring = mem.vring();

        host.add_buffer(1, 0x100, 16, DescFlags::new()).unwrap();
        host.add_buffer(3, 0x300, 16, DescFlags::new()).unwrap();
        assert_eq!(host.take_used(), Ok(None));

        let first = ring.get_buffer().unwrap().unwrap();
        let second = ring.get_buffer().unwrap().unwrap();
        ring.release(second, 2).unwrap();
        ring.release(first, 1).unwrap();

        assert_eq!(host.take_used(), Ok(Some(UsedElem { id: 3, len: 2 })));
        assert_eq!(host.take_used(), Ok(Some(UsedElem { id: 1, len: 1 })));
        assert_eq!(host.take_used(), Ok(None));
        assert_eq!(host.outstanding(), 0);
    }

    #[test]
    fn new_zeroes_the_ring() {
        let mem = Carveout::new(4, 0x1000);
        mem.set_avail_idx(7);
        mem.set_used_idx(3);

        let host = unsafe { DriverRing::new(mem.base(), *mem.layout()) }.unwrap();
        assert_eq!(mem.avail_idx(), 0);
        assert_eq!(mem.used_idx(), 0);
        assert_eq!(host.avail_idx(), 0);
        assert_eq!(host.descriptor(0), Some(Descriptor::new(0, 0, DescFlags::new())));
    }
}
