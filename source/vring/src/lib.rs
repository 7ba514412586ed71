//! # Virtio rings for remote processors
//!
//! A vring is three regions laid out back to back in shared memory:
//!
//! * the **descriptor table**, `num` records of `{ addr, len, flags, next }`
//!   describing buffers owned by the host,
//! * the **available ring**, where the host announces descriptor indices it is
//!   offering, and
//! * the **used ring**, where the device hands descriptors back together with
//!   the number of bytes it actually used.
//!
//! Both rings are headed by a free running 16-bit index. The writer of a ring
//! fills in the slot at `index & (num - 1)` and only then publishes the
//! incremented index, so a reader that observes the new index also observes
//! the slot. Each side keeps a private shadow of how far it has read the
//! other side's ring; shadows are never written back to shared memory.
//!
//! ## Device side
//!
//! The firmware end is a [`Vring`]. It is created once over memory the
//! firmware does not own (the host loader set it up from the resource table)
//! and lives for the rest of the program:
//!
//! ```rust,ignore
//! let layout = Layout::new(rsc.num, rsc.align)?;
//! let mut ring = unsafe { Vring::new(base, layout)? };
//!
//! while let Some(buf) = ring.get_buffer()? {
//!     // ... read or fill `buf.len()` bytes at `buf.addr()` ...
//!     ring.put_buffer(buf.addr(), written)?;
//! }
//! ```
//!
//! ## Driver side
//!
//! [`DriverRing`] is the host's half of the same protocol. Firmware never
//! needs it, but simulators and tests use it to play the host.

#![cfg_attr(not(test), no_std)]
#![allow(clippy::missing_safety_doc)]

pub mod desc;
pub mod driver;
pub mod dump;
pub mod errors;
pub mod layout;
pub mod notify;
pub mod ring;

mod raw;

pub use self::{
    desc::{AvailFlags, DescFlags, Descriptor, UsedElem, UsedFlags},
    driver::DriverRing,
    dump::Snapshot,
    errors::{ConfigError, RingError},
    layout::{Layout, Regions, MAX_DESCRIPTORS},
    notify::Notify,
    ring::{Buffer, Vring},
};

#[cfg(test)]
pub(crate) mod test_util;
