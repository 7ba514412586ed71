//! The device (firmware) end of a vring.

use core::{fmt, ptr::NonNull};

use portable_atomic::Ordering;

use crate::{
    desc::{AvailFlags, DescFlags, UsedElem, UsedFlags},
    errors::{ConfigError, RingError},
    layout::{Layout, MAX_DESCRIPTORS},
    raw::RawRing,
};

/// The device end of a vring.
///
/// A `Vring` overlays memory it does not own: the host placed the descriptor
/// table and both rings in a carveout and told the firmware where through the
/// resource table. The `Vring` only ever writes the used ring and its own
/// private bookkeeping:
///
/// * `last_avail`, how far into the available ring buffers have been taken,
/// * `used_idx`, how many buffers have been handed back, and
/// * the set of descriptors that have been taken but not handed back yet.
///
/// None of these are ever written to shared memory, other than publishing
/// `used_idx` as the used ring's index.
pub struct Vring {
    raw: RawRing,
    last_avail: u16,
    used_idx: u16,
    claims: Claims,
}

/// A buffer taken from the available ring with [`Vring::get_buffer`].
///
/// A `Buffer` is a receipt for a descriptor the device now holds. It is not
/// `Copy`: pass it back to [`Vring::release`] exactly once, or release the
/// descriptor by address with [`Vring::put_buffer`].
#[derive(Clone, PartialEq, Eq)]
#[must_use = "a buffer that is never released is never returned to the host"]
pub struct Buffer {
    id: u16,
    addr: u64,
    len: u32,
    flags: DescFlags,
}

/// Descriptors taken from the available ring and not yet returned.
#[derive(Clone, Default)]
struct Claims([u64; MAX_DESCRIPTORS as usize / 64]);

// === impl Vring ===

impl Vring {
    /// Overlay a vring on the memory at `base`.
    ///
    /// Both shadow indices start at zero. The host loader zeroes the vring
    /// memory before starting the firmware, so this matches a freshly set up
    /// ring.
    ///
    /// # Returns
    ///
    /// - [`Ok`]`(`[`Vring`]`)` if `base` is suitably aligned for `layout`.
    /// - [`Err`]`(`[`ConfigError::MisalignedBase`]`)` otherwise.
    ///
    /// # Safety
    ///
    /// `base` must point to at least [`Layout::size`] bytes which stay valid
    /// for the life of the returned `Vring`. Apart from the peer following the
    /// virtio rules, nothing else may write to that memory.
    pub unsafe fn new(base: NonNull<u8>, layout: Layout) -> Result<Self, ConfigError> {
        let raw = RawRing::new(base, layout)?;
        tracing::debug!(
            base = ?base,
            num = layout.num(),
            align = layout.align(),
            used = layout.used_offset(),
            "vring initialized",
        );
        Ok(Self {
            raw,
            last_avail: 0,
            used_idx: 0,
            claims: Claims::default(),
        })
    }

    /// Take the next buffer the host has made available.
    ///
    /// # Returns
    ///
    /// - [`Ok`]`(`[`Some`]`(`[`Buffer`]`))` if the host has published a buffer
    ///   that has not been taken yet.
    /// - [`Ok`]`(`[`None`]`)` if every published buffer has already been taken.
    /// - [`Err`]`(`[`RingError`]`)` if the host published something invalid: a
    ///   descriptor index past the end of the table
    ///   ([`RingError::BadDescriptor`]), a descriptor the device still holds
    ///   ([`RingError::AlreadyClaimed`]), or more buffers than the ring has
    ///   slots ([`RingError::AvailOverrun`]). Nothing is taken in that case.
    pub fn get_buffer(&mut self) -> Result<Option<Buffer>, RingError> {
        // Acquire pairs with the host's release of `avail.idx`: once we see the
        // new index, the slot and descriptor it covers are visible too.
        let published = self.raw.avail_idx().load(Ordering::Acquire);
        if published == self.last_avail {
            return Ok(None);
        }

        if published.wrapping_sub(self.last_avail) > self.raw.layout().num() {
            tracing::warn!(published, seen = self.last_avail, "available ring overrun");
            return Err(RingError::AvailOverrun {
                published,
                seen: self.last_avail,
            });
        }

        let slot = self.raw.slot(self.last_avail);
        let id = self.raw.read_avail_slot(slot);
        if id >= self.raw.layout().num() {
            tracing::warn!(slot, desc = id, "available ring names a bad descriptor");
            return Err(RingError::BadDescriptor { slot, id });
        }
        if self.claims.contains(id) {
            tracing::warn!(slot, desc = id, "descriptor made available twice");
            return Err(RingError::AlreadyClaimed { id });
        }

        let desc = self.raw.read_desc(id);
        self.claims.insert(id);
        self.last_avail = self.last_avail.wrapping_add(1);

        tracing::trace!(
            slot,
            desc = id,
            addr = desc.addr(),
            len = desc.len(),
            flags = desc.flags().bits(),
            "avail ring: descriptor available",
        );

        Ok(Some(Buffer {
            id,
            addr: desc.addr(),
            len: desc.len(),
            flags: desc.flags(),
        }))
    }

    /// Hand the claimed buffer at `addr` back to the host, recording that `len`
    /// bytes of it were used.
    ///
    /// Only descriptors taken with [`Vring::get_buffer`] and not yet returned
    /// are considered, so returning the same buffer twice fails the second
    /// time.
    ///
    /// # Returns
    ///
    /// - [`Ok`]`(())` if the buffer was published on the used ring.
    /// - [`Err`]`(`[`RingError::NotFound`]`)` if no claimed descriptor has this
    ///   address.
    /// - [`Err`]`(`[`RingError::TooLong`]`)` if `len` is larger than the
    ///   descriptor's buffer.
    ///
    /// Nothing is published when an error is returned.
    pub fn put_buffer(&mut self, addr: u64, len: u32) -> Result<(), RingError> {
        let id = self
            .claims
            .iter()
            .find(|&id| self.raw.read_desc(id).addr() == addr)
            .ok_or(RingError::NotFound { addr })?;
        self.publish_used(id, len)
    }

    /// Hand `buf` back to the host, recording that `len` bytes of it were used.
    ///
    /// This is [`Vring::put_buffer`] without the search for the descriptor.
    pub fn release(&mut self, buf: Buffer, len: u32) -> Result<(), RingError> {
        if !self.claims.contains(buf.id) {
            return Err(RingError::NotFound { addr: buf.addr });
        }
        self.publish_used(buf.id, len)
    }

    fn publish_used(&mut self, id: u16, len: u32) -> Result<(), RingError> {
        let capacity = self.raw.read_desc(id).len();
        if len > capacity {
            return Err(RingError::TooLong { id, len, capacity });
        }

        let slot = self.raw.slot(self.used_idx);
        self.raw.write_used_slot(
            slot,
            UsedElem {
                id: id as u32,
                len,
            },
        );
        self.claims.remove(id);
        self.used_idx = self.used_idx.wrapping_add(1);
        // Release: the used slot must be visible before the index that covers
        // it.
        self.raw.used_idx().store(self.used_idx, Ordering::Release);

        tracing::trace!(slot, desc = id, len, used_idx = self.used_idx, "used ring: descriptor used");
        Ok(())
    }

    /// Returns `true` if the host asked not to be interrupted when buffers are
    /// returned on this ring.
    #[must_use]
    pub fn interrupt_suppressed(&self) -> bool {
        AvailFlags::from_bits(self.raw.avail_flags().load(Ordering::Acquire))
            .get(AvailFlags::NO_INTERRUPT)
    }

    /// Tell the host whether the device wants to be notified when buffers are
    /// made available on this ring.
    pub fn set_notify_suppressed(&mut self, suppressed: bool) {
        let flags = UsedFlags::new().with(UsedFlags::NO_NOTIFY, suppressed);
        self.raw.used_flags().store(flags.bits(), Ordering::Release);
    }

    /// Number of buffers published by the host but not taken yet.
    #[must_use]
    pub fn pending(&self) -> u16 {
        self.raw
            .avail_idx()
            .load(Ordering::Acquire)
            .wrapping_sub(self.last_avail)
    }

    /// Number of buffers taken and not yet returned.
    #[must_use]
    pub fn outstanding(&self) -> u16 {
        self.claims.count()
    }

    /// The private shadow of the available index.
    #[inline]
    #[must_use]
    pub fn last_avail_idx(&self) -> u16 {
        self.last_avail
    }

    /// The private shadow of the used index. This is also the last value
    /// published to the used ring.
    #[inline]
    #[must_use]
    pub fn used_idx(&self) -> u16 {
        self.used_idx
    }

    #[inline]
    #[must_use]
    pub fn layout(&self) -> &Layout {
        self.raw.layout()
    }

    pub(crate) fn raw(&self) -> &RawRing {
        &self.raw
    }

    #[cfg(test)]
    pub(crate) fn with_shadows(self, last_avail: u16, used_idx: u16) -> Self {
        Self {
            last_avail,
            used_idx,
            ..self
        }
    }
}

impl fmt::Debug for Vring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vring")
            .field("layout", self.raw.layout())
            .field("last_avail", &self.last_avail)
            .field("used_idx", &self.used_idx)
            .field("outstanding", &self.claims.count())
            .finish()
    }
}

// Safety: the ring only refers to the shared carveout, which is not tied to
// any particular thread. Moving it to another thread moves the one device end.
unsafe impl Send for Vring {}

// === impl Buffer ===

impl Buffer {
    /// Index of the descriptor in the descriptor table.
    #[inline]
    #[must_use]
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Address of the buffer, in the host's view of memory.
    #[inline]
    #[must_use]
    pub fn addr(&self) -> u64 {
        self.addr
    }

    /// Length of the buffer, in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> u32 {
        self.len
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    #[must_use]
    pub fn flags(&self) -> DescFlags {
        self.flags
    }

    /// Returns `true` if the host marked this buffer as written by the device.
    #[inline]
    #[must_use]
    pub fn is_device_writable(&self) -> bool {
        self.flags.get(DescFlags::WRITE)
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("addr", &format_args!("{:#010x}", self.addr))
            .field("len", &self.len)
            .field("flags", &self.flags)
            .finish()
    }
}

// === impl Claims ===

impl Claims {
    #[inline]
    fn split(id: u16) -> (usize, u64) {
        ((id / 64) as usize, 1 << (id % 64))
    }

    fn contains(&self, id: u16) -> bool {
        let (word, bit) = Self::split(id);
        self.0[word] & bit != 0
    }

    fn insert(&mut self, id: u16) {
        let (word, bit) = Self::split(id);
        self.0[word] |= bit;
    }

    fn remove(&mut self, id: u16) {
        let (word, bit) = Self::split(id);
        self.0[word] &= !bit;
    }

    fn count(&self) -> u16 {
        self.0.iter().map(|w| w.count_ones() as u16).sum()
    }

    fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        (0..MAX_DESCRIPTORS).filter(move |&id| self.contains(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::Carveout;

    const A: u64 = 0x8000_4000;

    #[test]
    fn empty_ring_has_nothing() {
        let mem = Carveout::new(4, 0x1000);
        let mut ring = mem.vring();
        assert_eq!(ring.get_buffer(), Ok(None));
        assert_eq!(ring.pending(), 0);
        assert_eq!(ring.outstanding(), 0);
    }

    #[test]
    fn round_trip() {
        let mem = Carveout::new(4, 0x1000);
        let mut host = mem.driver();
        let mut ring = mem.vring();

        host.set_descriptor(2, A + 0x200, 64, DescFlags::new());
        host.offer(2).unwrap();
        assert_eq!(mem.avail_idx(), 1);

        let buf = ring.get_buffer().unwrap().expect("one buffer was published");
        assert_eq!(buf.id(), 2);
        assert_eq!(buf.addr(), A + 0x200);
        assert_eq!(buf.len(), 64);
        assert_eq!(ring.last_avail_idx(), 1);
        assert_eq!(ring.outstanding(), 1);

        ring.put_buffer(A + 0x200, 17).unwrap();
        assert_eq!(mem.used_slot(0), UsedElem { id: 2, len: 17 });
        assert_eq!(mem.used_idx(), 1);
        assert_eq!(ring.used_idx(), 1);
        assert_eq!(ring.outstanding(), 0);
    }

    #[test]
    fn acquire_past_published_returns_none() {
        let mem = Carveout::new(4, 0x1000);
        let mut host = mem.driver();
        let mut ring = mem.vring();

        for id in 0..3 {
            host.set_descriptor(id, A + id as u64 * 0x100, 0x100, DescFlags::new());
            host.offer(id).unwrap();
        }

        for id in 0..3 {
            assert_eq!(ring.get_buffer().unwrap().map(|b| b.id()), Some(id));
        }
        assert_eq!(ring.get_buffer(), Ok(None));
        assert_eq!(ring.last_avail_idx(), 3);
    }

    #[test]
    fn double_release_fails() {
        let mem = Carveout::new(4, 0x1000);
        let mut host = mem.driver();
        let mut ring = mem.vring();

        host.set_descriptor(0, A, 32, DescFlags::new());
        host.offer(0).unwrap();
        let _buf = ring.get_buffer().unwrap().unwrap();

        ring.put_buffer(A, 32).unwrap();
        assert_eq!(mem.used_idx(), 1);

        assert_eq!(ring.put_buffer(A, 32), Err(RingError::NotFound { addr: A }));
        assert_eq!(mem.used_idx(), 1);
        assert_eq!(ring.used_idx(), 1);
    }

    #[test]
    fn release_by_receipt() {
        let mem = Carveout::new(4, 0x1000);
        let mut host = mem.driver();
        let mut ring = mem.vring();

        host.set_descriptor(3, A, 32, DescFlags::new().with(DescFlags::WRITE, true));
        host.offer(3).unwrap();
        let buf = ring.get_buffer().unwrap().unwrap();
        assert!(buf.is_device_writable());

        let again = buf.clone();
        ring.release(buf, 5).unwrap();
        assert_eq!(mem.used_slot(0), UsedElem { id: 3, len: 5 });
        assert_eq!(ring.release(again, 5), Err(RingError::NotFound { addr: A }));
    }

    #[test]
    fn unclaimed_address_is_not_found() {
        let mem = Carveout::new(4, 0x1000);
        let mut host = mem.driver();
        let mut ring = mem.vring();

        // Present in the table, but never taken from the available ring.
        host.set_descriptor(1, A, 32, DescFlags::new());
        assert_eq!(ring.put_buffer(A, 1), Err(RingError::NotFound { addr: A }));
        assert_eq!(mem.used_idx(), 0);
    }

    #[test]
    fn too_long_is_rejected() {
        let mem = Carveout::new(4, 0x1000);
        let mut host = mem.driver();
        let mut ring = mem.vring();

        host.set_descriptor(0, A, 16, DescFlags::new());
        host.offer(0).unwrap();
        let _buf = ring.get_buffer().unwrap().unwrap();

        assert_eq!(
            ring.put_buffer(A, 17),
            Err(RingError::TooLong {
                id: 0,
                len: 17,
                capacity: 16
            })
        );
        assert_eq!(mem.used_idx(), 0);
        assert_eq!(ring.outstanding(), 1);
        ring.put_buffer(A, 16).unwrap();
    }

    #[test]
    fn wraparound_reuses_slots() {
        let mem = Carveout::new(4, 0x1000);
        let mut host = mem.driver();
        let mut ring = mem.vring();

        for id in 0..4 {
            host.set_descriptor(id, A + id as u64 * 0x100, 0x100, DescFlags::new());
        }

        for cycle in 0..5u16 {
            let id = cycle % 4;
            host.offer(id).unwrap();
            let buf = ring.get_buffer().unwrap().unwrap();
            assert_eq!(buf.id(), id);
            ring.put_buffer(buf.addr(), cycle as u32).unwrap();
            let used = host.take_used().unwrap().unwrap();
            assert_eq!(used, UsedElem { id: id as u32, len: cycle as u32 });
        }

        // The fifth cycle wrote slot 0 again.
        assert_eq!(mem.used_slot(0), UsedElem { id: 0, len: 4 });
        assert_eq!(mem.used_idx(), 5);
        assert_eq!(ring.last_avail_idx(), 5);
    }

    #[test]
    fn indices_wrap_at_u16() {
        let mem = Carveout::new(4, 0x1000);
        mem.set_avail_idx(u16::MAX - 1);
        mem.set_used_idx(u16::MAX - 1);
        let mut host = mem.driver();
        let mut ring = mem.vring_at(u16::MAX - 1, u16::MAX - 1);

        host.set_descriptor(0, A, 8, DescFlags::new());
        for n in 0..4u16 {
            host.offer(0).unwrap();
            let buf = ring.get_buffer().unwrap().unwrap();
            ring.release(buf, 8).unwrap();
            assert_eq!(host.take_used().unwrap().map(|u| u.id), Some(0));
            assert_eq!(ring.used_idx(), (u16::MAX - 1).wrapping_add(n + 1));
        }
        assert_eq!(mem.used_idx(), 2);
    }

    #[test]
    fn bad_descriptor_index() {
        let mem = Carveout::new(4, 0x1000);
        let mut ring = mem.vring();

        mem.set_avail_slot(0, 9);
        mem.set_avail_idx(1);
        assert_eq!(ring.get_buffer(), Err(RingError::BadDescriptor { slot: 0, id: 9 }));
        assert_eq!(ring.last_avail_idx(), 0);
    }

    #[test]
    fn descriptor_offered_twice() {
        let mem = Carveout::new(4, 0x1000);
        let mut ring = mem.vring();

        mem.set_avail_slot(0, 1);
        mem.set_avail_slot(1, 1);
        mem.set_avail_idx(2);
        assert!(ring.get_buffer().unwrap().is_some());
        assert_eq!(ring.get_buffer(), Err(RingError::AlreadyClaimed { id: 1 }));
        assert_eq!(ring.last_avail_idx(), 1);
    }

    #[test]
    fn overrun() {
        let mem = Carveout::new(4, 0x1000);
        let mut ring = mem.vring();

        mem.set_avail_idx(5);
        assert_eq!(
            ring.get_buffer(),
            Err(RingError::AvailOverrun {
                published: 5,
                seen: 0
            })
        );
    }

    #[test]
    fn suppression_flags() {
        let mem = Carveout::new(4, 0x1000);
        let mut host = mem.driver();
        let mut ring = mem.vring();

        assert!(!ring.interrupt_suppressed());
        host.set_interrupt_suppressed(true);
        assert!(ring.interrupt_suppressed());

        assert!(!host.notify_suppressed());
        ring.set_notify_suppressed(true);
        assert!(host.notify_suppressed());
    }

    #[test]
    fn scenario_a_10_returns_8() {
        let mem = Carveout::new(4, 0x1000);
        let mut host = mem.driver();
        let mut ring = mem.vring();

        host.set_descriptor(0, A, 10, DescFlags::new());
        host.offer(0).unwrap();

        let buf = ring.get_buffer().unwrap().unwrap();
        assert_eq!((buf.addr(), buf.len()), (A, 10));

        ring.put_buffer(A, 8).unwrap();
        assert_eq!(mem.used_slot(0), UsedElem { id: 0, len: 8 });
        assert_eq!(mem.used_idx(), 1);
    }

    #[test]
    fn claims_bitmap() {
        let mut claims = Claims::default();
        for id in [0, 63, 64, 255] {
            claims.insert(id);
        }
        assert_eq!(claims.count(), 4);
        assert!(claims.contains(64));
        assert!(!claims.contains(65));
        claims.remove(63);
        assert_eq!(claims.iter().collect::<Vec<_>>(), vec![0, 64, 255]);
    }
}
