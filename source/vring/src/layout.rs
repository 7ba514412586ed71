//! Where the three regions of a vring live.
//!
//! Host and device never exchange pointers to the individual regions. Each
//! side derives them from the base address, descriptor count and alignment
//! published in the resource table, so this arithmetic has to match the
//! standard virtio layout exactly:
//!
//! ```text
//! base                     avail                               used
//! | desc[0] .. desc[num-1] | flags idx ring[num] used_event | pad | flags idx ring[num] avail_event |
//!   16 * num bytes           4 + 2 * num + 2 bytes            ^ aligned to `align`
//! ```

use core::mem::size_of;

use crate::{
    desc::{Descriptor, UsedElem},
    errors::ConfigError,
};

/// Largest descriptor count accepted by [`Layout::new`].
///
/// The virtio layout allows up to 32768 descriptors, but remote processor
/// vrings are small (usually 4 to 256 entries) and the device end keeps a
/// fixed-size record of which descriptors it currently holds.
pub const MAX_DESCRIPTORS: u16 = 256;

/// The offsets of each region of a vring, relative to its base address.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Layout {
    num: u16,
    align: usize,
    avail: usize,
    used: usize,
    size: usize,
}

/// Absolute addresses of each region of a vring placed at some base address.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Regions {
    pub desc: usize,
    pub avail: usize,
    pub used: usize,
}

const IDX: usize = size_of::<u16>();
/// `flags` and `idx`.
const HEADER: usize = 2 * IDX;

impl Layout {
    /// Compute the layout of a vring with `num` descriptors whose used ring is
    /// aligned to `align` bytes.
    ///
    /// # Returns
    ///
    /// - [`Ok`]`(`[`Layout`]`)` if `num` is a non-zero power of two no larger
    ///   than [`MAX_DESCRIPTORS`] and `align` is a power of two of at least 4.
    /// - [`Err`]`(`[`ConfigError::NotPowerOfTwo`]`)` if `num` is zero or not a
    ///   power of two.
    /// - [`Err`]`(`[`ConfigError::TooManyDescriptors`]`)` if `num` is larger
    ///   than [`MAX_DESCRIPTORS`].
    /// - [`Err`]`(`[`ConfigError::BadAlign`]`)` if `align` is not a power of
    ///   two, or is smaller than the alignment of a used ring entry.
    pub fn new(num: u32, align: u32) -> Result<Self, ConfigError> {
        if !num.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo(num));
        }
        if num > MAX_DESCRIPTORS as u32 {
            return Err(ConfigError::TooManyDescriptors(num));
        }
        if !align.is_power_of_two() || (align as usize) < core::mem::align_of::<UsedElem>() {
            return Err(ConfigError::BadAlign(align));
        }

        let n = num as usize;
        let align = align as usize;
        let avail = n * Descriptor::SIZE;
        // header, one slot per descriptor, and the `used_event` slot.
        let avail_end = avail + HEADER + n * IDX + IDX;
        let used = align_up(avail_end, align);
        // header, one entry per descriptor, and the `avail_event` slot.
        let size = used + HEADER + n * UsedElem::SIZE + IDX;

        Ok(Self {
            num: num as u16,
            align,
            avail,
            used,
            size,
        })
    }

    /// Number of descriptors (and ring slots) in the vring.
    #[inline]
    #[must_use]
    pub const fn num(&self) -> u16 {
        self.num
    }

    /// Mask turning a free running ring index into a slot number.
    #[inline]
    #[must_use]
    pub const fn mask(&self) -> u16 {
        self.num - 1
    }

    #[inline]
    #[must_use]
    pub const fn align(&self) -> usize {
        self.align
    }

    /// Offset of the descriptor table. Always zero.
    #[inline]
    #[must_use]
    pub const fn desc_offset(&self) -> usize {
        0
    }

    /// Offset of the available ring header.
    #[inline]
    #[must_use]
    pub const fn avail_offset(&self) -> usize {
        self.avail
    }

    /// Offset of the first available ring slot.
    #[inline]
    #[must_use]
    pub const fn avail_ring_offset(&self) -> usize {
        self.avail + HEADER
    }

    /// Offset of the used ring header.
    #[inline]
    #[must_use]
    pub const fn used_offset(&self) -> usize {
        self.used
    }

    /// Offset of the first used ring entry.
    #[inline]
    #[must_use]
    pub const fn used_ring_offset(&self) -> usize {
        self.used + HEADER
    }

    /// Total number of bytes the vring spans.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Place this layout at `base`.
    ///
    /// The base address must be aligned to [`Layout::align`]: the used ring's
    /// position is defined by rounding an *absolute* address, so a vring at a
    /// less aligned base would be found at a different place by the host.
    pub fn regions(&self, base: usize) -> Result<Regions, ConfigError> {
        if base == 0 || base % self.align != 0 || base % Descriptor::ALIGN != 0 {
            return Err(ConfigError::MisalignedBase(base));
        }
        if base.checked_add(self.size).is_none() {
            return Err(ConfigError::MisalignedBase(base));
        }

        Ok(Regions {
            desc: base + self.desc_offset(),
            avail: base + self.avail,
            used: base + self.used,
        })
    }
}

#[inline]
const fn align_up(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::{prop_assert, prop_assert_eq, proptest};

    #[test]
    fn rproc_default_ring() {
        // The echo firmware's resource table: 4 descriptors, page aligned.
        let layout = Layout::new(4, 0x1000).unwrap();
        assert_eq!(layout.num(), 4);
        assert_eq!(layout.mask(), 3);
        assert_eq!(layout.desc_offset(), 0);
        assert_eq!(layout.avail_offset(), 64);
        assert_eq!(layout.avail_ring_offset(), 68);
        assert_eq!(layout.used_offset(), 0x1000);
        assert_eq!(layout.used_ring_offset(), 0x1004);
        assert_eq!(layout.size(), 0x1000 + 4 + 4 * 8 + 2);
    }

    #[test]
    fn linux_vring_size() {
        // `vring_size(256, 4096)` from the Linux virtio_ring header.
        let layout = Layout::new(256, 4096).unwrap();
        let linux = ((16 * 256 + 2 * (3 + 256) + 4095) & !4095) + 2 * 3 + 8 * 256;
        assert_eq!(layout.size(), linux);
    }

    #[test]
    fn rejects_bad_counts() {
        assert_eq!(Layout::new(0, 0x1000), Err(ConfigError::NotPowerOfTwo(0)));
        assert_eq!(Layout::new(6, 0x1000), Err(ConfigError::NotPowerOfTwo(6)));
        assert_eq!(
            Layout::new(512, 0x1000),
            Err(ConfigError::TooManyDescriptors(512))
        );
    }

    #[test]
    fn rejects_bad_alignment() {
        assert_eq!(Layout::new(4, 0), Err(ConfigError::BadAlign(0)));
        assert_eq!(Layout::new(4, 2), Err(ConfigError::BadAlign(2)));
        assert_eq!(Layout::new(4, 0x1800), Err(ConfigError::BadAlign(0x1800)));
    }

    #[test]
    fn rejects_misaligned_base() {
        let layout = Layout::new(4, 0x1000).unwrap();
        assert_eq!(layout.regions(0), Err(ConfigError::MisalignedBase(0)));
        assert_eq!(
            layout.regions(0x8000_0800),
            Err(ConfigError::MisalignedBase(0x8000_0800))
        );

        let regions = layout.regions(0x8000_1000).unwrap();
        assert_eq!(
            regions,
            Regions {
                desc: 0x8000_1000,
                avail: 0x8000_1040,
                used: 0x8000_2000,
            }
        );
    }

    proptest! {
        #[test]
        fn used_ring_follows_avail_ring(num_shift in 0u32..=8, align_shift in 2u32..=16) {
            let num = 1u32 << num_shift;
            let align = 1u32 << align_shift;
            let layout = Layout::new(num, align).unwrap();

            let avail_end = layout.avail_ring_offset() + 2 * num as usize + 2;
            prop_assert_eq!(layout.avail_offset(), 16 * num as usize);
            prop_assert_eq!(layout.used_offset() % align as usize, 0);
            prop_assert!(layout.used_offset() >= avail_end);
            prop_assert!(layout.used_offset() < avail_end + align as usize);
        }

        #[test]
        fn matches_legacy_rounding(num_shift in 0u32..=8, align_shift in 2u32..=16) {
            // Firmware historically rounded with `(end + align) & !(align - 1)`
            // on the end of the available ring *without* the `used_event`
            // slot. For even offsets that lands on the same address.
            let num = 1u32 << num_shift;
            let align = 1usize << align_shift;
            let layout = Layout::new(num, align as u32).unwrap();

            let end = layout.avail_ring_offset() + 2 * num as usize;
            prop_assert_eq!(layout.used_offset(), (end + align) & !(align - 1));
        }
    }
}
