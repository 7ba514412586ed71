use core::fmt;

use crate::layout::MAX_DESCRIPTORS;

/// Errors returned by [`Layout::new`](crate::Layout::new),
/// [`Layout::regions`](crate::Layout::regions) and the ring constructors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    /// The descriptor count was zero or not a power of two.
    NotPowerOfTwo(u32),
    /// The descriptor count was larger than [`MAX_DESCRIPTORS`].
    TooManyDescriptors(u32),
    /// The used ring alignment was not a power of two, or too small to hold
    /// used ring entries.
    BadAlign(u32),
    /// The base address was null, or not aligned to the ring's alignment.
    MisalignedBase(usize),
}

/// Errors returned by [`Vring`](crate::Vring) and
/// [`DriverRing`](crate::DriverRing) operations.
///
/// Apart from [`RingError::NotFound`] and [`RingError::TooLong`], which are
/// caused by the caller, these indicate that the peer wrote something to the
/// shared rings that cannot be correct. In every case the ring's own state is
/// left untouched.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RingError {
    /// No currently claimed descriptor has this address.
    NotFound { addr: u64 },
    /// An available ring slot named a descriptor past the end of the table.
    BadDescriptor { slot: u16, id: u16 },
    /// The peer made a descriptor available while it was still claimed.
    AlreadyClaimed { id: u16 },
    /// The peer's published index ran more than a full ring ahead of what has
    /// been consumed.
    AvailOverrun { published: u16, seen: u16 },
    /// The length being returned is larger than the descriptor's buffer.
    TooLong { id: u16, len: u32, capacity: u32 },
    /// Every descriptor is already outstanding.
    Full,
}

// === impl ConfigError ===

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NotPowerOfTwo(num) => {
                write!(f, "descriptor count {num} is not a non-zero power of two")
            }
            ConfigError::TooManyDescriptors(num) => write!(
                f,
                "descriptor count {num} is greater than `MAX_DESCRIPTORS` ({MAX_DESCRIPTORS})"
            ),
            ConfigError::BadAlign(align) => write!(
                f,
                "vring alignment {align:#x} is not a power of two of at least 4"
            ),
            ConfigError::MisalignedBase(base) => {
                write!(f, "vring base address {base:#x} is null or misaligned")
            }
        }
    }
}

// === impl RingError ===

impl fmt::Display for RingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RingError::NotFound { addr } => {
                write!(f, "no claimed descriptor has address {addr:#x}")
            }
            RingError::BadDescriptor { slot, id } => write!(
                f,
                "available ring slot {slot} names descriptor {id}, which does not exist"
            ),
            RingError::AlreadyClaimed { id } => {
                write!(f, "descriptor {id} was made available while still claimed")
            }
            RingError::AvailOverrun { published, seen } => write!(
                f,
                "available index {published} is more than a ring ahead of {seen}"
            ),
            RingError::TooLong { id, len, capacity } => write!(
                f,
                "length {len} does not fit in descriptor {id} ({capacity} bytes)"
            ),
            RingError::Full => f.write_str("every descriptor is outstanding"),
        }
    }
}
