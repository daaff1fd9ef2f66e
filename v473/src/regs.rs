//! Register map of the V473. Offsets are bytes from the card's base address.

use crate::transport::{
    Deserialize,
    Serialize,
};
use packed_struct::prelude::*;
use v473_derive::{
    address,
    WordSerde,
};

/// Start of the dual-ported data buffer
pub const DATA_BUFFER: usize = 0x0000;
/// Size of the data buffer in 16-bit words
pub const DATA_BUFFER_WORDS: usize = 128;
/// Mailbox address of the transaction
pub const MAILBOX: usize = 0x7ffa;
/// Word count of the transaction
pub const COUNT: usize = 0x7ffc;
/// Direction of the transaction; writing it starts the transaction
pub const READ_WRITE: usize = 0x7ffe;
/// Interrupt generation enable
pub const IRQ_ENABLE: usize = 0x8000;
/// Pending interrupt sources (write one to clear)
pub const IRQ_SOURCE: usize = 0x8002;
/// Interrupt source mask
pub const IRQ_MASK: usize = 0x8004;
/// Interrupt status / vector register
pub const IRQ_STATUS: usize = 0x8006;
/// Board reset
pub const RESET: usize = 0xfffe;

/// Value of [`READ_WRITE`] that starts a read transaction
pub const DIR_READ: u16 = 0;
/// Value of [`READ_WRITE`] that starts a write transaction
pub const DIR_WRITE: u16 = 1;
/// Value the firmware leaves in [`READ_WRITE`] once it has serviced a transaction
pub const DIR_DONE: u16 = 2;

/// The interrupt sources the driver understands
pub const DEFAULT_IRQ_MASK: u16 = 0xd21f;
/// Value the module ID property reports
pub const MODULE_ID: u16 = 473;

/// Byte offset of data buffer word `index`
#[must_use]
pub const fn data_word(index: usize) -> usize {
    DATA_BUFFER + 2 * index
}

/// Register layouts that sit at a fixed offset
pub trait Address {
    fn addr() -> usize;
}

#[address(0x8002)]
#[derive(Debug, PackedStruct, WordSerde, Default, Copy, Clone, PartialEq, Eq)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "2")]
#[allow(clippy::struct_excessive_bools)]
/// The interrupt source register
pub struct IrqSource {
    #[packed_field(bits = "15")]
    /// The firmware rejected a mailbox command
    pub command_error: bool,
    #[packed_field(bits = "14")]
    /// A ramp calculation overflowed
    pub calculation_error: bool,
    #[packed_field(bits = "12")]
    /// The TCLK reference is missing
    pub missing_tclk: bool,
    #[packed_field(bits = "9")]
    /// A power supply isn't tracking its reference
    pub tracking_error: bool,
    #[packed_field(bits = "4")]
    /// The mailbox transaction finished
    pub done: bool,
    #[packed_field(bits = "3")]
    pub ps3_fault: bool,
    #[packed_field(bits = "2")]
    pub ps2_fault: bool,
    #[packed_field(bits = "1")]
    pub ps1_fault: bool,
    #[packed_field(bits = "0")]
    pub ps0_fault: bool,
}

impl IrqSource {
    /// Decodes the raw register value. Bits the driver doesn't know about are dropped.
    #[must_use]
    pub fn from_word(word: u16) -> Self {
        Self::deserialize(word.to_be_bytes()).unwrap_or_default()
    }

    #[must_use]
    pub fn to_word(&self) -> u16 {
        u16::from_be_bytes(self.serialize())
    }

    /// Power supply fault flags, indexed by channel
    #[must_use]
    pub fn ps_faults(&self) -> [bool; 4] {
        [self.ps0_fault, self.ps1_fault, self.ps2_fault, self.ps3_fault]
    }
}

#[derive(Debug, PackedStruct, WordSerde, Default, Copy, Clone, PartialEq, Eq)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "2")]
/// A channel's power supply status word
pub struct PowerSupplyStatus {
    #[packed_field(bits = "0..=7")]
    /// The discrete status inputs
    pub inputs: u8,
    #[packed_field(bits = "8")]
    /// The supply is mid-transition and won't accept a new DAC setting
    pub transitioning: bool,
    #[packed_field(bits = "10")]
    /// Readback of the enable output
    pub enabled: bool,
    #[packed_field(bits = "13")]
    /// Readback of the reset output
    pub resetting: bool,
}

impl PowerSupplyStatus {
    #[must_use]
    pub fn from_word(word: u16) -> Self {
        Self::deserialize(word.to_be_bytes()).unwrap_or_default()
    }
}

/// A firmware or FPGA revision word, `major` in the upper nibbles
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Revision(pub u16);

impl Revision {
    #[must_use]
    pub fn major(self) -> u16 {
        self.0 >> 4
    }

    #[must_use]
    pub fn minor(self) -> u16 {
        self.0 & 0xf
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}.{}", self.major(), self.minor())
    }
}
