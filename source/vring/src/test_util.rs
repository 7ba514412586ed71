use std::{
    alloc::{self, Layout as AllocLayout},
    ptr::NonNull,
};

use crate::{desc::UsedElem, driver::DriverRing, layout::Layout, raw::RawRing, ring::Vring};

/// A zeroed, suitably aligned block of memory standing in for the shared
/// carveout, plus a peek/poke view for checking what each side wrote.
pub(crate) struct Carveout {
    base: NonNull<u8>,
    alloc: AllocLayout,
    layout: Layout,
    raw: RawRing,
}

impl Carveout {
    pub(crate) fn new(num: u32, align: u32) -> Self {
        trace_init();
        let layout = Layout::new(num, align).unwrap();
        let alloc = AllocLayout::from_size_align(layout.size(), layout.align().max(16)).unwrap();
        let base = NonNull::new(unsafe { alloc::alloc_zeroed(alloc) }).unwrap();
        let raw = unsafe { RawRing::new(base, layout) }.unwrap();
        Self {
            base,
            alloc,
            layout,
            raw,
        }
    }

    pub(crate) fn base(&self) -> NonNull<u8> {
        self.base
    }

    pub(crate) fn layout(&self) -> &Layout {
        &self.layout
    }

    pub(crate) fn vring(&self) -> Vring {
        unsafe { Vring::new(self.base, self.layout) }.unwrap()
    }

    pub(crate) fn vring_at(&self, last_avail: u16, used_idx: u16) -> Vring {
        self.vring().with_shadows(last_avail, used_idx)
    }

    /// A host end picking up wherever the indices currently are.
    pub(crate) fn driver(&self) -> DriverRing {
        unsafe { DriverRing::attach(self.base, self.layout) }.unwrap()
    }

    pub(crate) fn avail_idx(&self) -> u16 {
        self.raw.avail_idx().load(portable_atomic::Ordering::Acquire)
    }

    pub(crate) fn used_idx(&self) -> u16 {
        self.raw.used_idx().load(portable_atomic::Ordering::Acquire)
    }

    pub(crate) fn used_slot(&self, slot: u16) -> UsedElem {
        self.raw.read_used_slot(slot)
    }

    pub(crate) fn set_avail_idx(&self, idx: u16) {
        self.raw
            .avail_idx()
            .store(idx, portable_atomic::Ordering::Release)
    }

    pub(crate) fn set_used_idx(&self, idx: u16) {
        self.raw
            .used_idx()
            .store(idx, portable_atomic::Ordering::Release)
    }

    pub(crate) fn set_avail_slot(&self, slot: u16, id: u16) {
        self.raw.write_avail_slot(slot, id)
    }
}

impl Drop for Carveout {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.base.as_ptr(), self.alloc) }
    }
}

pub(crate) fn trace_init() {
    use tracing_subscriber::filter::{LevelFilter, Targets};
    use tracing_subscriber::prelude::*;

    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|env| env.parse::<Targets>().ok())
        .unwrap_or_else(|| Targets::new().with_target("vring", LevelFilter::TRACE));
    let _res = tracing_subscriber::fmt()
        .with_test_writer()
        .without_time()
        .finish()
        .with(filter)
        .try_init();
}
