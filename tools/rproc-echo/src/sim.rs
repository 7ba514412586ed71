//! The echo firmware's channel, served from a thread of this process.
//!
//! The carveout is a page-aligned heap allocation. Device addresses are plain
//! pointers, so the firmware side runs with [`Identity`] translation. The GIC
//! is replaced by a pair of flags, with thread parking standing in for the
//! wait-for-interrupt.

use std::{
    alloc::{self, Layout as AllocLayout},
    ops::ControlFlow,
    ptr::NonNull,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle, Thread},
    time::{Duration, Instant},
};

use firmware::{echo::CaseSwap, settings::FirmwareSettings, Channel, ChannelError, Identity, Mode};
use miette::IntoDiagnostic;
use vring::{DescFlags, DriverRing, Layout, Notify, UsedElem, Vring};

use crate::{Echo, MAX_MSG};

const TIMEOUT: Duration = Duration::from_secs(1);
const PAGE: usize = 0x1000;

pub struct Sim {
    to_device: DriverRing,
    from_device: DriverRing,
    bell: Arc<Doorbell>,
    firmware: Option<JoinHandle<Result<(), ChannelError>>>,
    seq: u16,
    mem: Carveout,
}

/// Shared memory for both rings and their buffers:
///
/// ```text
/// | incoming ring | outgoing ring | incoming buffers | outgoing buffers |
/// ```
struct Carveout {
    base: NonNull<u8>,
    layout: AllocLayout,
    incoming: usize,
    outgoing: usize,
    in_bufs: usize,
    out_bufs: usize,
}

#[derive(Debug)]
struct Doorbell {
    to_device: AtomicBool,
    to_host: AtomicBool,
    stop: AtomicBool,
    host: Thread,
}

/// The firmware's end of the [`Doorbell`].
struct Bridge(Arc<Doorbell>);

// === impl Sim ===

impl Sim {
    pub fn start(settings: &FirmwareSettings) -> miette::Result<Self> {
        let in_layout = settings.vdev.incoming.layout().map_err(config)?;
        let out_layout = settings.vdev.outgoing.layout().map_err(config)?;
        if settings.mode == Mode::Polled {
            tracing::info!("polled mode; the simulated firmware still waits for the doorbell");
        }

        let mem = Carveout::new(&in_layout, &out_layout)?;
        // Safety: the rings don't overlap, and `mem` outlives the firmware
        // thread, which is joined on drop.
        let (to_device, from_device, incoming, outgoing) = unsafe {
            let to_device = DriverRing::new(mem.at(mem.incoming), in_layout).map_err(config)?;
            let from_device = DriverRing::new(mem.at(mem.outgoing), out_layout).map_err(config)?;
            let incoming = Vring::new(mem.at(mem.incoming), in_layout).map_err(config)?;
            let outgoing = Vring::new(mem.at(mem.outgoing), out_layout).map_err(config)?;
            (to_device, from_device, incoming, outgoing)
        };

        let bell = Arc::new(Doorbell {
            to_device: AtomicBool::new(false),
            to_host: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            host: thread::current(),
        });

        let firmware = thread::Builder::new()
            .name("firmware".into())
            .spawn({
                let bell = bell.clone();
                move || {
                    let _span = tracing::info_span!("firmware").entered();
                    let mut channel = Channel::new(incoming, outgoing, Bridge(bell.clone()), Identity);
                    channel.run(Mode::Interrupt, &mut CaseSwap, || bell.wait())
                }
            })
            .into_diagnostic()?;

        tracing::info!(
            incoming = ?in_layout,
            outgoing = ?out_layout,
            "simulated firmware started",
        );
        Ok(Self {
            to_device,
            from_device,
            bell,
            firmware: Some(firmware),
            seq: 0,
            mem,
        })
    }

    fn ring(&self) {
        self.bell.to_device.store(true, Ordering::Release);
        if let Some(fw) = &self.firmware {
            fw.thread().unpark();
        }
    }

    /// Wait for the firmware to return descriptor `id` on `ring`.
    fn reap(ring: &mut DriverRing, id: u16, deadline: Instant) -> miette::Result<UsedElem> {
        loop {
            match ring.take_used() {
                Ok(Some(used)) if used.id as u16 == id => return Ok(used),
                Ok(Some(used)) => {
                    return Err(miette::miette!(
                        "firmware returned descriptor {} instead of {id}",
                        used.id
                    ))
                }
                Ok(None) => {}
                Err(e) => return Err(miette::miette!("host ring: {e}")),
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(miette::miette!("Timeout waiting for response"));
            }
            thread::park_timeout(deadline - now);
        }
    }
}

impl Echo for Sim {
    fn request(&mut self, msg: &[u8]) -> miette::Result<Vec<u8>> {
        let in_id = self.seq % self.to_device.layout().num();
        let out_id = self.seq % self.from_device.layout().num();
        self.seq = self.seq.wrapping_add(1);

        let input = self.mem.in_bufs + in_id as usize * MAX_MSG;
        let output = self.mem.out_bufs + out_id as usize * MAX_MSG;
        // Safety: neither descriptor is with the firmware until offered.
        unsafe {
            self.mem.slice(input, msg.len()).copy_from_slice(msg);
        }

        let host_err = |e: vring::RingError| miette::miette!("host ring: {e}");
        self.from_device
            .add_buffer(
                out_id,
                self.mem.addr(output),
                MAX_MSG as u32,
                DescFlags::new().with(DescFlags::WRITE, true),
            )
            .map_err(host_err)?;
        self.to_device
            .add_buffer(in_id, self.mem.addr(input), msg.len() as u32, DescFlags::new())
            .map_err(host_err)?;
        self.bell.to_host.store(false, Ordering::Release);
        self.ring();

        let deadline = Instant::now() + TIMEOUT;
        let reply = Self::reap(&mut self.from_device, out_id, deadline)?;
        let consumed = Self::reap(&mut self.to_device, in_id, deadline)?;
        tracing::debug!(?reply, ?consumed, "firmware answered");

        // Safety: the firmware has handed the buffer back.
        let reply = unsafe { self.mem.slice(output, reply.len as usize) }.to_vec();
        Ok(reply)
    }
}

impl Drop for Sim {
    fn drop(&mut self) {
        self.bell.stop.store(true, Ordering::Release);
        if let Some(fw) = self.firmware.take() {
            fw.thread().unpark();
            match fw.join() {
                Ok(Ok(())) => tracing::debug!("simulated firmware stopped"),
                Ok(Err(error)) => tracing::error!(%error, "simulated firmware failed"),
                Err(_) => tracing::error!("simulated firmware panicked"),
            }
        }
    }
}

fn config(error: vring::ConfigError) -> miette::Report {
    miette::miette!("invalid vring settings: {error}")
}

// === impl Carveout ===

impl Carveout {
    fn new(incoming: &Layout, outgoing: &Layout) -> miette::Result<Self> {
        let align = PAGE.max(incoming.align()).max(outgoing.align());
        let align_up = |n: usize| (n + align - 1) & !(align - 1);
        let outgoing_at = align_up(incoming.size());
        let in_bufs = align_up(outgoing_at + outgoing.size());
        let out_bufs = in_bufs + incoming.num() as usize * MAX_MSG;
        let len = out_bufs + outgoing.num() as usize * MAX_MSG;

        let layout = AllocLayout::from_size_align(len, align).into_diagnostic()?;
        // Safety: `len` is non-zero.
        let base = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })
            .ok_or_else(|| miette::miette!("failed to allocate {len} byte carveout"))?;
        Ok(Self {
            base,
            layout,
            incoming: 0,
            outgoing: outgoing_at,
            in_bufs,
            out_bufs,
        })
    }

    fn at(&self, offset: usize) -> NonNull<u8> {
        // Safety: offsets are all within the allocation.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) }
    }

    fn addr(&self, offset: usize) -> u64 {
        self.at(offset).as_ptr() as u64
    }

    /// # Safety
    ///
    /// The firmware must not be using these bytes.
    #[allow(clippy::mut_from_ref)]
    unsafe fn slice(&self, offset: usize, len: usize) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.at(offset).as_ptr(), len)
    }
}

impl Drop for Carveout {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) }
    }
}

// === impl Doorbell ===

impl Doorbell {
    /// Sleep until the host rings or asks the firmware to stop.
    fn wait(&self) -> ControlFlow<()> {
        loop {
            if self.stop.load(Ordering::Acquire) {
                return ControlFlow::Break(());
            }
            if self.to_device.load(Ordering::Acquire) {
                return ControlFlow::Continue(());
            }
            thread::park_timeout(TIMEOUT);
        }
    }
}

impl Notify for Bridge {
    fn take_pending(&mut self) -> bool {
        self.0.to_device.swap(false, Ordering::AcqRel)
    }

    fn signal(&mut self) {
        self.0.to_host.store(true, Ordering::Release);
        self.0.host.unpark();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echoes_through_simulated_firmware() {
        let mut sim = Sim::start(&FirmwareSettings::default()).unwrap();
        // More requests than descriptors, so every ring index wraps past its
        // slot count.
        for i in 0..20 {
            let msg = format!("Test {i}");
            let reply = sim.request(msg.as_bytes()).unwrap();
            assert_eq!(reply, crate::swapped(msg.as_bytes()));
        }
        assert!(sim.bell.to_host.load(Ordering::Acquire));
    }

    #[test]
    fn larger_rings() {
        let mut settings = FirmwareSettings::default();
        settings.vdev.incoming.num = 16;
        settings.vdev.outgoing.num = 8;
        settings.vdev.outgoing.align = 16;
        let mut sim = Sim::start(&settings).unwrap();
        let reply = sim.request(b"Hello, Ring!").unwrap();
        assert_eq!(reply, b"hELLO, rING!");
    }

    #[test]
    fn bad_ring_settings() {
        let mut settings = FirmwareSettings::default();
        settings.vdev.incoming.num = 3;
        assert!(Sim::start(&settings).is_err());
    }
}
