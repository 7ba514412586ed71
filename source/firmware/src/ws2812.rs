//! Bit-banged WS2812 LED strips.
//!
//! A WS2812 strip is driven over a single data line. Each bit is a high pulse
//! followed by a low one, the ratio telling a 0 from a 1:
//!
//! | bit | high   | low    |
//! |-----|--------|--------|
//! | 0   | 350 ns | 800 ns |
//! | 1   | 700 ns | 450 ns |
//!
//! Each LED takes 24 bits, most significant first, in blue, green, red
//! order. The whole frame has to go out without interruption, so it is sent
//! inside a critical section.

use crate::{
    leds::{Pattern, Rgb},
    mmio::RegisterBlock,
    settings::LedSettings,
};

/// Pin-bank registers of the Ci40's GPIO controller. Each bank of 16 pins
/// has its own copy, `BANK_STRIDE` bytes apart.
const BIT_EN: usize = 0x00;
const OUTPUT_EN: usize = 0x04;
const OUTPUT: usize = 0x08;
const BANK_STRIDE: usize = 0x24;
const PINS_PER_BANK: u32 = 16;
/// Writes to bit `n` only take effect if bit `16 + n` is also set.
const WRITE_ENABLE: u32 = 0x1_0000;

const T0H_NS: u32 = 350;
const T0L_NS: u32 = 800;
const T1H_NS: u32 = 700;
const T1L_NS: u32 = 450;

/// A busy-wait delay.
pub trait Delay {
    fn delay_ns(&mut self, ns: u32);
}

/// A [`Delay`] spinning on a free running counter, such as the MIPS CP0
/// `Count` register.
#[derive(Debug)]
pub struct CounterDelay<F> {
    read: F,
    ns_per_tick: u32,
}

#[derive(Debug)]
pub struct Ws2812<R, D> {
    regs: R,
    gpio: u32,
    delay: D,
}

/// A strip showing a [`Pattern`], advanced from the channel's idle hook.
#[derive(Debug)]
pub struct Strip<'frame, R, D> {
    driver: Ws2812<R, D>,
    pattern: Pattern,
    frame: &'frame mut [Rgb],
    ticks_per_frame: u32,
    ticks: u32,
}

// === impl CounterDelay ===

impl<F: FnMut() -> u32> CounterDelay<F> {
    /// # Panics
    ///
    /// If `ns_per_tick` is zero.
    pub fn new(read: F, ns_per_tick: u32) -> Self {
        assert_ne!(ns_per_tick, 0, "counter must tick at most once per nanosecond");
        Self { read, ns_per_tick }
    }
}

impl<F: FnMut() -> u32> Delay for CounterDelay<F> {
    fn delay_ns(&mut self, ns: u32) {
        let ticks = ns / self.ns_per_tick;
        let start = (self.read)();
        while (self.read)().wrapping_sub(start) < ticks {
            core::hint::spin_loop();
        }
    }
}

// === impl Ws2812 ===

impl<R: RegisterBlock, D: Delay> Ws2812<R, D> {
    /// Take over `gpio` as a driven output, initially low.
    pub fn new(regs: R, gpio: u32, delay: D) -> Self {
        let mut this = Self { regs, gpio, delay };
        this.gpio_write(OUTPUT, 0);
        this.gpio_write(OUTPUT_EN, 1);
        this.gpio_write(BIT_EN, 1);
        this
    }

    /// Send a frame to the strip.
    pub fn write(&mut self, leds: &[Rgb]) {
        critical_section::with(|_| {
            for &Rgb { r, g, b } in leds {
                self.byte(b);
                self.byte(g);
                self.byte(r);
            }
        });
    }

    fn byte(&mut self, value: u8) {
        for bit in (0..8).rev() {
            self.bit(value & (1 << bit) != 0);
        }
    }

    fn bit(&mut self, one: bool) {
        let (high, low) = if one {
            (T1H_NS, T1L_NS)
        } else {
            (T0H_NS, T0L_NS)
        };
        self.gpio_write(OUTPUT, 1);
        self.delay.delay_ns(high);
        self.gpio_write(OUTPUT, 0);
        self.delay.delay_ns(low);
    }

    fn gpio_write(&mut self, reg: usize, value: u32) {
        let bank = (self.gpio / PINS_PER_BANK) as usize;
        let pin = self.gpio % PINS_PER_BANK;
        self.regs
            .write(bank * BANK_STRIDE + reg, (WRITE_ENABLE | value) << pin);
    }

    pub fn into_parts(self) -> (R, D) {
        (self.regs, self.delay)
    }
}

// === impl Strip ===

impl<'frame, R: RegisterBlock, D: Delay> Strip<'frame, R, D> {
    /// Drive the strip `settings` describes through `regs`, the GPIO block at
    /// `settings.gpio_base`.
    ///
    /// `frame` holds the colours between frames. Only the first
    /// `settings.count` LEDs are driven, or fewer if `frame` is shorter.
    pub fn from_settings(
        regs: R,
        delay: D,
        settings: &LedSettings,
        frame: &'frame mut [Rgb],
    ) -> Self {
        let len = frame.len().min(settings.count as usize);
        if len < settings.count as usize {
            tracing::warn!(count = settings.count, len, "frame buffer too short for strip");
        }
        Self {
            driver: Ws2812::new(regs, settings.gpio, delay),
            pattern: Pattern::new(),
            frame: &mut frame[..len],
            ticks_per_frame: settings.ticks_per_frame.max(1),
            ticks: 0,
        }
    }

    /// Count one idle call, sending the next frame every
    /// `ticks_per_frame` calls.
    pub fn tick(&mut self) {
        self.ticks += 1;
        if self.ticks < self.ticks_per_frame {
            return;
        }
        self.ticks = 0;
        self.pattern.next_frame(self.frame);
        self.driver.write(self.frame);
    }

    #[must_use]
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn into_driver(self) -> Ws2812<R, D> {
        self.driver
    }
}
