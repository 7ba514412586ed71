//! The remoteproc resource table.
//!
//! The host's remoteproc driver finds this table in the `.resource_table`
//! section of the firmware image before starting the remote processor. It
//! allocates what each entry asks for and writes the results (notably the
//! vrings' device addresses) back into the loaded copy of the table, so the
//! firmware must read it with volatile loads.
//!
//! Layouts match `include/linux/remoteproc.h`.

use core::ptr;

use vring::{ConfigError, Layout};

use crate::settings::{FirmwareSettings, VringSettings};

pub const RSC_CARVEOUT: u32 = 0;
pub const RSC_TRACE: u32 = 2;
pub const RSC_VDEV: u32 = 3;

/// Size of the virtio config space following the vdev's vrings.
pub const VDEV_CONFIG_LEN: usize = 0xc;

/// Length of the `name` field of carveout and trace entries.
pub const NAME_LEN: usize = 32;

/// The resource table of the echo firmware: a carveout for the image, a
/// trace buffer, and a virtio serial device with two vrings.
#[derive(Debug)]
#[repr(C)]
pub struct ResourceTable {
    pub header: Header,
    pub offset: [u32; 3],
    pub carveout: CarveoutEntry,
    pub trace: TraceEntry,
    pub vdev: VdevEntry,
}

#[derive(Debug)]
#[repr(C)]
pub struct Header {
    pub ver: u32,
    pub num: u32,
    pub reserved: [u32; 2],
}

#[derive(Debug)]
#[repr(C)]
pub struct FwRscHdr {
    pub kind: u32,
}

#[derive(Debug)]
#[repr(C)]
pub struct FwRscCarveout {
    pub da: u32,
    pub pa: u32,
    pub len: u32,
    pub flags: u32,
    pub reserved: u32,
    pub name: [u8; NAME_LEN],
}

#[derive(Debug)]
#[repr(C)]
pub struct FwRscTrace {
    pub da: u32,
    pub len: u32,
    pub reserved: u32,
    pub name: [u8; NAME_LEN],
}

#[derive(Debug)]
#[repr(C)]
pub struct FwRscVdev {
    pub id: u32,
    pub notifyid: u32,
    pub dfeatures: u32,
    pub gfeatures: u32,
    pub config_len: u32,
    pub status: u8,
    pub num_of_vrings: u8,
    pub reserved: [u8; 2],
}

/// A vring as described to (and filled in by) the host.
#[derive(Debug)]
#[repr(C)]
pub struct FwRscVdevVring {
    /// Device address of the vring. Written by the host.
    pub da: u32,
    pub align: u32,
    pub num: u32,
    pub notifyid: u32,
    pub reserved: u32,
}

#[derive(Debug)]
#[repr(C)]
pub struct CarveoutEntry {
    pub hdr: FwRscHdr,
    pub carveout: FwRscCarveout,
}

#[derive(Debug)]
#[repr(C)]
pub struct TraceEntry {
    pub hdr: FwRscHdr,
    pub trace: FwRscTrace,
}

#[derive(Debug)]
#[repr(C)]
pub struct VdevEntry {
    pub hdr: FwRscHdr,
    pub vdev: FwRscVdev,
    /// `vrings[0]` is the outgoing ring, `vrings[1]` the incoming one.
    pub vrings: [FwRscVdevVring; 2],
    pub config: [u8; VDEV_CONFIG_LEN],
}

// === impl ResourceTable ===

impl ResourceTable {
    /// Build the table for `settings`, with the firmware image loaded at
    /// `image_da` and the trace buffer at `trace_da`.
    pub const fn new(settings: &FirmwareSettings, image_da: u32, trace_da: u32) -> Self {
        Self {
            header: Header {
                ver: 1,
                num: 3,
                reserved: [0; 2],
            },
            offset: [
                core::mem::offset_of!(Self, carveout) as u32,
                core::mem::offset_of!(Self, trace) as u32,
                core::mem::offset_of!(Self, vdev) as u32,
            ],
            carveout: CarveoutEntry {
                hdr: FwRscHdr { kind: RSC_CARVEOUT },
                carveout: FwRscCarveout {
                    da: image_da,
                    pa: image_da,
                    len: settings.carveout.len,
                    flags: 0,
                    reserved: 0,
                    name: name("firmware"),
                },
            },
            trace: TraceEntry {
                hdr: FwRscHdr { kind: RSC_TRACE },
                trace: FwRscTrace {
                    da: trace_da,
                    len: settings.trace.len,
                    reserved: 0,
                    name: name("trace"),
                },
            },
            vdev: VdevEntry {
                hdr: FwRscHdr { kind: RSC_VDEV },
                vdev: FwRscVdev {
                    id: settings.vdev.id,
                    notifyid: settings.vdev.notify_id,
                    dfeatures: 0,
                    gfeatures: 0,
                    config_len: VDEV_CONFIG_LEN as u32,
                    status: 0,
                    num_of_vrings: 2,
                    reserved: [0; 2],
                },
                vrings: [
                    FwRscVdevVring::new(&settings.vdev.outgoing),
                    FwRscVdevVring::new(&settings.vdev.incoming),
                ],
                config: [0; VDEV_CONFIG_LEN],
            },
        }
    }
}

// === impl FwRscVdevVring ===

impl FwRscVdevVring {
    pub const fn new(settings: &VringSettings) -> Self {
        Self {
            da: 0,
            align: settings.align,
            num: settings.num,
            notifyid: settings.notify_id,
            reserved: 0,
        }
    }

    /// The device address the host placed this vring at.
    pub fn da(&self) -> u32 {
        // The host writes this after loading the image.
        unsafe { ptr::read_volatile(&self.da) }
    }

    pub fn layout(&self) -> Result<Layout, ConfigError> {
        let (num, align) = unsafe { (ptr::read_volatile(&self.num), ptr::read_volatile(&self.align)) };
        Layout::new(num, align)
    }
}

impl VdevEntry {
    #[inline]
    #[must_use]
    pub fn outgoing(&self) -> &FwRscVdevVring {
        &self.vrings[0]
    }

    #[inline]
    #[must_use]
    pub fn incoming(&self) -> &FwRscVdevVring {
        &self.vrings[1]
    }
}

/// Pad `s` with NULs to a resource name. Names longer than [`NAME_LEN`] - 1
/// bytes are truncated.
pub const fn name(s: &str) -> [u8; NAME_LEN] {
    let bytes = s.as_bytes();
    let mut out = [0u8; NAME_LEN];
    let mut i = 0;
    while i < bytes.len() && i < NAME_LEN - 1 {
        out[i] = bytes[i];
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{offset_of, size_of};

    #[test]
    fn entry_sizes_match_linux() {
        assert_eq!(size_of::<Header>(), 16);
        assert_eq!(size_of::<FwRscCarveout>(), 52);
        assert_eq!(size_of::<FwRscTrace>(), 44);
        assert_eq!(size_of::<FwRscVdev>(), 24);
        assert_eq!(size_of::<FwRscVdevVring>(), 20);
    }

    #[test]
    fn offsets_point_at_entries() {
        let table = ResourceTable::new(&FirmwareSettings::default(), 0x0f00_0000, 0x0f00_8000);
        assert_eq!(table.offset, [28, 84, 132]);
        assert_eq!(offset_of!(ResourceTable, vdev), 132);
        assert_eq!(size_of::<ResourceTable>(), 212);
    }

    #[test]
    fn echo_firmware_table() {
        let table = ResourceTable::new(&FirmwareSettings::default(), 0x0f00_0000, 0x0f00_8000);
        assert_eq!(table.header.ver, 1);
        assert_eq!(table.header.num, 3);

        assert_eq!(table.carveout.hdr.kind, RSC_CARVEOUT);
        assert_eq!(table.carveout.carveout.da, 0x0f00_0000);
        assert_eq!(table.carveout.carveout.len, 0x10000);
        assert_eq!(&table.carveout.carveout.name[..9], b"firmware\0");

        assert_eq!(table.trace.hdr.kind, RSC_TRACE);
        assert_eq!(table.trace.trace.da, 0x0f00_8000);
        assert_eq!(&table.trace.trace.name[..6], b"trace\0");

        let vdev = &table.vdev;
        assert_eq!(vdev.hdr.kind, RSC_VDEV);
        assert_eq!(vdev.vdev.id, 11);
        assert_eq!(vdev.vdev.notifyid, 4);
        assert_eq!(vdev.vdev.config_len, 0xc);
        assert_eq!(vdev.vdev.num_of_vrings, 2);
        assert_eq!((vdev.outgoing().num, vdev.outgoing().notifyid), (4, 1));
        assert_eq!((vdev.incoming().num, vdev.incoming().notifyid), (4, 0));
        assert_eq!(vdev.incoming().layout().unwrap().used_offset(), 0x1000);
        assert_eq!(vdev.outgoing().da(), 0);
    }

    #[test]
    fn long_names_keep_a_nul() {
        let n = name("a name that is far too long for a resource entry");
        assert_eq!(n[NAME_LEN - 1], 0);
        assert_eq!(n[0], b'a');
    }
}
