//! MIPS Global Interrupt Controller doorbells.
//!
//! The host and the remote processor signal each other with GIC
//! inter-processor interrupts. The host tells the firmware which two IPIs to
//! use when it starts it; those numbers count the GIC's local interrupts
//! first, so they are offset before use.

use core::fmt;

use vring::Notify;

use crate::{
    mmio::RegisterBlock,
    settings::{FirmwareSettings, Mode},
};

/// Per-interrupt set-mask registers, one bit per shared interrupt.
const SH_SMASK: usize = 0x0380;
/// Per-interrupt pending registers, one bit per shared interrupt.
const SH_PEND: usize = 0x0480;
/// Write an interrupt number (and [`Wedge::ASSERT`]) to raise or clear it.
const WEDGE: usize = 0x0280;
/// Core-local reset mask register.
const LOCAL_RMASK: usize = 0x8000 + 0x000c;
/// All seven local interrupts (watchdog, compare, timer, perf counters,
/// software interrupts, FDC).
const LOCAL_ALL: u32 = 0x7f;

/// Offset of the base address register in the Coherence Manager's global
/// control block.
pub const GCR_GIC_BASE: usize = 0x80;

mycelium_bitfield::bitfield! {
    /// The value written to the wedge register.
    #[derive(PartialEq, Eq)]
    pub struct Wedge<u32> {
        /// Shared interrupt number.
        pub const IRQ = 31;
        /// Raise the interrupt. Otherwise, clear it.
        pub const ASSERT: bool;
    }
}

/// Errors returned by [`Gic::new`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GicError {
    /// The host named an IPI that is one of the GIC's local interrupts.
    LocalIrq { irq: u32, local: u32 },
}

/// The GIC, as the doorbell of one vdev.
#[derive(Debug)]
pub struct Gic<R> {
    regs: R,
    from_host: u32,
    to_host: u32,
}

impl<R: RegisterBlock> Gic<R> {
    /// Set up the GIC for signalling with the host.
    ///
    /// All local interrupts are masked. In [`Mode::Interrupt`], the IPI from
    /// the host is unmasked; enabling interrupts at the CPU is left to the
    /// caller.
    pub fn new(
        mut regs: R,
        irq_from_host: u32,
        irq_to_host: u32,
        local_interrupts: u32,
        mode: Mode,
    ) -> Result<Self, GicError> {
        let shared = |irq: u32| {
            irq.checked_sub(local_interrupts).ok_or(GicError::LocalIrq {
                irq,
                local: local_interrupts,
            })
        };
        let from_host = shared(irq_from_host)?;
        let to_host = shared(irq_to_host)?;

        regs.write(LOCAL_RMASK, LOCAL_ALL);
        if mode == Mode::Interrupt {
            let (reg, bit) = Self::index(SH_SMASK, from_host);
            regs.write(reg, bit);
        }

        tracing::info!(from_host, to_host, ?mode, "GIC configured");
        Ok(Self {
            regs,
            from_host,
            to_host,
        })
    }

    /// Set up the GIC with the board's local interrupt count and mode.
    pub fn from_settings(
        regs: R,
        irq_from_host: u32,
        irq_to_host: u32,
        settings: &FirmwareSettings,
    ) -> Result<Self, GicError> {
        Self::new(
            regs,
            irq_from_host,
            irq_to_host,
            settings.gic_local_interrupts,
            settings.mode,
        )
    }

    /// The shared interrupt the host raises.
    #[must_use]
    pub fn irq_from_host(&self) -> u32 {
        self.from_host
    }

    /// The shared interrupt raised for the host.
    #[must_use]
    pub fn irq_to_host(&self) -> u32 {
        self.to_host
    }

    #[inline(always)]
    fn index(base: usize, irq: u32) -> (usize, u32) {
        (base + (irq as usize / 32) * 4, 1 << (irq % 32))
    }
}

impl<R: RegisterBlock> Notify for Gic<R> {
    fn take_pending(&mut self) -> bool {
        let (reg, bit) = Self::index(SH_PEND, self.from_host);
        if self.regs.read(reg) & bit == 0 {
            return false;
        }

        let ack = Wedge::new().with(Wedge::IRQ, self.from_host);
        self.regs.write(WEDGE, ack.bits());
        true
    }

    fn signal(&mut self) {
        tracing::trace!(irq = self.to_host, "asserting IRQ");
        let raise = Wedge::new()
            .with(Wedge::IRQ, self.to_host)
            .with(Wedge::ASSERT, true);
        self.regs.write(WEDGE, raise.bits());
    }
}

/// Find the GIC's physical base address from the Coherence Manager's
/// `GCR_GIC_BASE` register. Bit 0 is the GIC enable bit.
pub fn gic_base(gcr: &impl RegisterBlock) -> u64 {
    (gcr.read(GCR_GIC_BASE) & !1) as u64
}

impl fmt::Display for GicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GicError::LocalIrq { irq, local } => write!(
                f,
                "IRQ {irq} is one of the first {local} (local) GIC interrupts"
            ),
        }
    }
}
