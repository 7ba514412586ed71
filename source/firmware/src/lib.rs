//! # Remote processor firmware
//!
//! Everything a bare-metal remote processor needs to talk to a Linux host
//! over a remoteproc virtio device, apart from the boot code and linker
//! script of the particular board.
//!
//! A firmware image is put together like this:
//!
//! ```rust,ignore
//! const SETTINGS: FirmwareSettings = FirmwareSettings::new();
//!
//! #[link_section = ".resource_table"]
//! #[no_mangle]
//! static RESOURCE_TABLE: ResourceTable = ResourceTable::new(&SETTINGS, IMAGE_DA, TRACE_DA);
//!
//! static TRACE: TraceSubscriber = TraceSubscriber::from_settings(&SETTINGS.trace);
//!
//! fn main(irq_from_host: u32, irq_to_host: u32) -> ! {
//!     TRACE.attach(trace_buffer());
//!     TRACE.install().ok();
//!
//!     let gic = Gic::from_settings(gic_regs(), irq_from_host, irq_to_host, &SETTINGS)?;
//!     let translate = Kseg::from_settings(&SETTINGS);
//!     let mut channel = unsafe { Channel::from_resources(&RESOURCE_TABLE.vdev, gic, translate)? }
//!         .with_trace(&TRACE, &SETTINGS.trace);
//!
//!     let mut frame = [Rgb::default(); 144];
//!     let mut strip = SETTINGS.leds.as_ref().map(|leds| {
//!         Strip::from_settings(gpio_regs(leds.gpio_base), count_delay(), leds, &mut frame)
//!     });
//!     channel.run(SETTINGS.mode, &mut CaseSwap, || {
//!         if let Some(strip) = strip.as_mut() {
//!             strip.tick();
//!         }
//!         if SETTINGS.mode == Mode::Interrupt {
//!             wait();
//!         }
//!         ControlFlow::Continue(())
//!     })?;
//! }
//! ```

#![cfg_attr(not(test), no_std)]

pub mod channel;
pub mod echo;
pub mod gic;
pub mod leds;
pub mod mmio;
pub mod resource_table;
pub mod settings;
pub mod trace;
pub mod translate;
pub mod ws2812;

pub use vring;

pub use self::{
    channel::{Channel, ChannelError, Drain, Handler},
    echo::CaseSwap,
    gic::Gic,
    mmio::{Mmio, RegisterBlock},
    resource_table::ResourceTable,
    settings::{FirmwareSettings, Mode},
    trace::TraceSubscriber,
    translate::{Identity, Kseg, Translate},
};

#[cfg(test)]
pub(crate) mod test_util;
