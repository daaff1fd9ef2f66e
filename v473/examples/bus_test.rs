//! Bus self test: checks the data lines between the VME bus and the dual port buffer, then the
//! path from the buffer to the card's FPGA. Pass a UIO device path to test real hardware, otherwise
//! the simulated card is used.

use anyhow::ensure;
use tracing::{
    info,
    warn,
};
use tracing_subscriber::EnvFilter;
use v473::prelude::*;

const PATTERNS: [u16; 10] = [
    0x0000, 0xffff, 0x00ff, 0xff00, 0x0f0f, 0xf0f0, 0x3333, 0xcccc, 0x5555, 0xaaaa,
];

fn run<T: Transport + 'static>(transport: T) -> anyhow::Result<()> {
    let card = Card::new(transport, 0x40, Config::default())?;
    let s = card.lock();
    let mut failures = 0;

    info!("VME to dual port data bus");
    let buffer = s.data_buffer();
    for (i, &p) in PATTERNS.iter().enumerate() {
        buffer.write(i, p)?;
    }
    for (i, &p) in PATTERNS.iter().enumerate() {
        let read = buffer.read(i)?;
        if read != p {
            warn!(index = i, wrote = p, read, "Data bus mismatch");
            failures += 1;
        }
    }

    info!("Dual port to FPGA data bus");
    for &p in &PATTERNS {
        s.set_vme_data_bus_diag(p)?;
        // Clobber the buffer so the readback has to come from the FPGA
        buffer.write(0, !p)?;
        let mut read = [0];
        s.vme_data_bus_diag(&mut read)?;
        if read[0] != p {
            warn!(wrote = p, read = read[0], "Diagnostic mismatch");
            failures += 1;
        }
    }

    for channel in Channel::all() {
        let status = s.power_supply_status(channel.index())?;
        info!(%channel, ?status, "Power supply");
    }

    ensure!(failures == 0, "{failures} bus test failures");
    info!("Bus test passed");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    match std::env::args().nth(1) {
        Some(path) => run(Uio::open(path)?),
        None => run(Mock::new()),
    }
}
