//! Non-mutating views of a ring's state, for debugging.

use core::fmt;

use portable_atomic::Ordering;

use crate::{raw::RawRing, ring::Vring};

/// A view of everything in a [`Vring`]: the descriptor table, both rings and
/// both shadow indices.
///
/// Formatting a `Snapshot` reads the shared memory at that moment. Nothing is
/// written, so the host may be updating the rings while they are printed.
pub struct Snapshot<'ring> {
    raw: &'ring RawRing,
    last_avail: u16,
    used_idx: u16,
}

impl Vring {
    #[must_use]
    pub fn snapshot(&self) -> Snapshot<'_> {
        Snapshot {
            raw: self.raw(),
            last_avail: self.last_avail_idx(),
            used_idx: self.used_idx(),
        }
    }

    /// Emit the state of this ring as `DEBUG` events, one per record.
    pub fn dump(&self, name: &str) {
        if !tracing::enabled!(tracing::Level::DEBUG) {
            return;
        }

        let raw = self.raw();
        let num = raw.layout().num();
        tracing::debug!(
            ring = name,
            last_avail = self.last_avail_idx(),
            used_idx = self.used_idx(),
            outstanding = self.outstanding(),
            "vring",
        );
        for id in 0..num {
            let desc = raw.read_desc(id);
            tracing::debug!(
                ring = name,
                desc = id,
                addr = desc.addr(),
                len = desc.len(),
                flags = desc.flags().bits(),
                next = desc.next(),
                "descriptor",
            );
        }
        tracing::debug!(
            ring = name,
            flags = raw.avail_flags().load(Ordering::Relaxed),
            idx = raw.avail_idx().load(Ordering::Acquire),
            "avail",
        );
        for slot in 0..num {
            tracing::debug!(ring = name, slot, desc = raw.read_avail_slot(slot), "avail slot");
        }
        tracing::debug!(
            ring = name,
            flags = raw.used_flags().load(Ordering::Relaxed),
            idx = raw.used_idx().load(Ordering::Relaxed),
            "used",
        );
        for slot in 0..num {
            let elem = raw.read_used_slot(slot);
            tracing::debug!(ring = name, slot, desc = elem.id, len = elem.len, "used slot");
        }
    }
}

impl fmt::Display for Snapshot<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw = self.raw;
        let num = raw.layout().num();

        writeln!(f, "vring ({} descriptors)", num)?;
        writeln!(f, " avail_index: {}", self.last_avail)?;
        writeln!(f, " used_index: {}", self.used_idx)?;

        writeln!(f, "\n descriptors:")?;
        for id in 0..num {
            let desc = raw.read_desc(id);
            writeln!(f, "  desc {id}")?;
            writeln!(f, "   address: {:#010x}", desc.addr())?;
            writeln!(f, "   length: {:#x}", desc.len())?;
            writeln!(f, "   flags: {:#06x}", desc.flags().bits())?;
            writeln!(f, "   next: {:#06x}", desc.next())?;
        }

        writeln!(f, "\n avail (+{:#x})", raw.layout().avail_offset())?;
        writeln!(f, "  flags: {:#06x}", raw.avail_flags().load(Ordering::Relaxed))?;
        writeln!(f, "  index: {:#06x}", raw.avail_idx().load(Ordering::Acquire))?;
        for slot in 0..num {
            writeln!(f, "   {slot}: {:#x}", raw.read_avail_slot(slot))?;
        }

        writeln!(f, "\n used (+{:#x})", raw.layout().used_offset())?;
        writeln!(f, "  flags: {:#06x}", raw.used_flags().load(Ordering::Relaxed))?;
        writeln!(f, "  index: {:#06x}", raw.used_idx().load(Ordering::Relaxed))?;
        for slot in 0..num {
            let elem = raw.read_used_slot(slot);
            writeln!(f, "   {slot}: {:#x} ({} bytes)", elem.id, elem.len)?;
        }

        Ok(())
    }
}
