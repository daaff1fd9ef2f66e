//! # V473
//!
//! A driver for the V473, a four channel VME waveform generator and power supply controller.
//! Every property of the card is reached through a mailbox in its register window: the driver
//! stages data in the card's buffer, names the property, and waits for the card's interrupt to
//! say the transaction is done.
//!
//! ```no_run
//! use v473::prelude::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let card = Card::new(Uio::open("/dev/uio0")?, 0x40, Config::default())?;
//! let s = card.lock();
//! s.waveform_enable(0, true)?;
//! println!("Firmware {}", s.firmware_version()?);
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod card;
pub mod config;
pub mod core;
pub mod playback;
pub mod prelude;
pub mod property_bus;
pub mod regs;
pub mod transport;

pub use crate::core::{
    Channel,
    Property,
};
pub use card::{
    Card,
    Error,
    Session,
};
