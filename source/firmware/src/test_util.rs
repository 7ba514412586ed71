use std::collections::BTreeMap;

use crate::mmio::RegisterBlock;

/// Registers that remember every write and answer reads from a table.
#[derive(Debug)]
pub(crate) struct FakeRegisters {
    pub(crate) writes: Vec<(usize, u32)>,
    pub(crate) values: BTreeMap<usize, u32>,
}

impl Default for FakeRegisters {
    fn default() -> Self {
        trace_init();
        Self {
            writes: Vec::new(),
            values: BTreeMap::new(),
        }
    }
}

impl FakeRegisters {
    pub(crate) fn with_value(mut self, offset: usize, value: u32) -> Self {
        self.values.insert(offset, value);
        self
    }

    pub(crate) fn take_writes(&mut self) -> Vec<(usize, u32)> {
        std::mem::take(&mut self.writes)
    }
}

impl RegisterBlock for FakeRegisters {
    fn read(&self, offset: usize) -> u32 {
        self.values.get(&offset).copied().unwrap_or(0)
    }

    fn write(&mut self, offset: usize, value: u32) {
        self.writes.push((offset, value));
    }
}

pub(crate) fn trace_init() {
    use tracing_subscriber::filter::{LevelFilter, Targets};
    use tracing_subscriber::prelude::*;

    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|env| env.parse::<Targets>().ok())
        .unwrap_or_else(|| {
            Targets::new()
                .with_target("firmware", LevelFilter::TRACE)
                .with_target("vring", LevelFilter::DEBUG)
        });
    let _res = tracing_subscriber::fmt()
        .with_test_writer()
        .without_time()
        .finish()
        .with(filter)
        .try_init();
}
