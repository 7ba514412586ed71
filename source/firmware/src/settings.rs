//! Board configuration.
//!
//! Settings are written as TOML and rendered to postcard at build time by
//! `rproc-config`. Every field has a default matching the Ci40 echo
//! firmware, so a config file only needs to name what differs.

use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareSettings {
    #[serde(default)]
    pub mode: Mode,
    /// Whether the host's buffers are coherent with the cached view of
    /// memory. Selects KSEG0 (cached) or KSEG1 (uncached) addressing.
    #[serde(default = "FirmwareSettings::default_dma_coherent")]
    pub dma_coherent: bool,
    /// Number of local interrupts ahead of the shared ones in the GIC. IPI
    /// numbers handed over by the host are offset by this much.
    #[serde(default = "FirmwareSettings::default_gic_local_interrupts")]
    pub gic_local_interrupts: u32,
    #[serde(default)]
    pub carveout: CarveoutSettings,
    #[serde(default)]
    pub trace: TraceSettings,
    #[serde(default)]
    pub vdev: VdevSettings,
    #[serde(default)]
    pub leds: Option<LedSettings>,
}

/// How the firmware waits for the host.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Unmask the incoming IPI and sleep between passes.
    #[default]
    Interrupt,
    /// Leave interrupts masked and check for the IPI in a tight loop.
    Polled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarveoutSettings {
    /// Size of the memory the firmware image is loaded into.
    #[serde(default = "CarveoutSettings::default_len")]
    pub len: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSettings {
    /// Size of the trace buffer the host can read back.
    #[serde(default = "TraceSettings::default_len")]
    pub len: u32,
    #[serde(default)]
    pub level: TraceLevel,
    /// Empty the trace buffer each time the host signals, so that it only
    /// ever holds the most recent pass.
    #[serde(default = "TraceSettings::default_clear_on_notify")]
    pub clear_on_notify: bool,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VdevSettings {
    /// Virtio device ID. 11 is `VIRTIO_ID_RPROC_SERIAL`.
    #[serde(default = "VdevSettings::default_id")]
    pub id: u32,
    #[serde(default = "VdevSettings::default_notify_id")]
    pub notify_id: u32,
    /// The ring the firmware fills and the host drains.
    #[serde(default = "VdevSettings::default_outgoing")]
    pub outgoing: VringSettings,
    /// The ring the host fills and the firmware drains.
    #[serde(default = "VdevSettings::default_incoming")]
    pub incoming: VringSettings,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VringSettings {
    pub num: u32,
    #[serde(default = "VringSettings::default_align")]
    pub align: u32,
    pub notify_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedSettings {
    #[serde(default = "LedSettings::default_count")]
    pub count: u16,
    /// GPIO driving the strip's data line.
    #[serde(default = "LedSettings::default_gpio")]
    pub gpio: u32,
    /// Physical address of the GPIO register block.
    #[serde(default = "LedSettings::default_gpio_base")]
    pub gpio_base: u64,
    /// Idle calls between two frames of the pattern.
    #[serde(default = "LedSettings::default_ticks_per_frame")]
    pub ticks_per_frame: u32,
}

// === impl FirmwareSettings ===

impl FirmwareSettings {
    const fn default_dma_coherent() -> bool {
        false
    }

    const fn default_gic_local_interrupts() -> u32 {
        7
    }

    #[must_use]
    pub const fn new() -> Self {
        Self {
            mode: Mode::Interrupt,
            dma_coherent: Self::default_dma_coherent(),
            gic_local_interrupts: Self::default_gic_local_interrupts(),
            carveout: CarveoutSettings::new(),
            trace: TraceSettings::new(),
            vdev: VdevSettings::new(),
            leds: None,
        }
    }
}

impl Default for FirmwareSettings {
    fn default() -> Self {
        Self::new()
    }
}

// === impl CarveoutSettings ===

impl CarveoutSettings {
    const fn default_len() -> u32 {
        0x10000
    }

    #[must_use]
    pub const fn new() -> Self {
        Self {
            len: Self::default_len(),
        }
    }
}

impl Default for CarveoutSettings {
    fn default() -> Self {
        Self::new()
    }
}

// === impl TraceSettings ===

impl TraceSettings {
    const fn default_len() -> u32 {
        0x1000
    }

    const fn default_clear_on_notify() -> bool {
        true
    }

    #[must_use]
    pub const fn new() -> Self {
        Self {
            len: Self::default_len(),
            level: TraceLevel::Info,
            clear_on_notify: Self::default_clear_on_notify(),
        }
    }
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self::new()
    }
}

// === impl TraceLevel ===

impl TraceLevel {
    #[must_use]
    pub const fn filter(self) -> LevelFilter {
        match self {
            TraceLevel::Off => LevelFilter::OFF,
            TraceLevel::Error => LevelFilter::ERROR,
            TraceLevel::Warn => LevelFilter::WARN,
            TraceLevel::Info => LevelFilter::INFO,
            TraceLevel::Debug => LevelFilter::DEBUG,
            TraceLevel::Trace => LevelFilter::TRACE,
        }
    }
}

impl From<TraceLevel> for LevelFilter {
    fn from(level: TraceLevel) -> Self {
        level.filter()
    }
}

// === impl VdevSettings ===

impl VdevSettings {
    const fn default_id() -> u32 {
        11
    }

    const fn default_notify_id() -> u32 {
        4
    }

    const fn default_outgoing() -> VringSettings {
        VringSettings {
            num: 4,
            align: VringSettings::default_align(),
            notify_id: 1,
        }
    }

    const fn default_incoming() -> VringSettings {
        VringSettings {
            num: 4,
            align: VringSettings::default_align(),
            notify_id: 0,
        }
    }

    #[must_use]
    pub const fn new() -> Self {
        Self {
            id: Self::default_id(),
            notify_id: Self::default_notify_id(),
            outgoing: Self::default_outgoing(),
            incoming: Self::default_incoming(),
        }
    }
}

impl Default for VdevSettings {
    fn default() -> Self {
        Self::new()
    }
}

// === impl VringSettings ===

impl VringSettings {
    const fn default_align() -> u32 {
        0x1000
    }

    /// Validate these settings as a vring layout.
    pub fn layout(&self) -> Result<vring::Layout, vring::ConfigError> {
        vring::Layout::new(self.num, self.align)
    }
}

// === impl LedSettings ===

impl LedSettings {
    const fn default_count() -> u16 {
        144
    }

    const fn default_gpio() -> u32 {
        14
    }

    const fn default_gpio_base() -> u64 {
        0x1810_1e00
    }

    const fn default_ticks_per_frame() -> u32 {
        4_000_000
    }

    #[must_use]
    pub const fn new() -> Self {
        Self {
            count: Self::default_count(),
            gpio: Self::default_gpio(),
            gpio_base: Self::default_gpio_base(),
            ticks_per_frame: Self::default_ticks_per_frame(),
        }
    }
}

impl Default for LedSettings {
    fn default() -> Self {
        Self::new()
    }
}
