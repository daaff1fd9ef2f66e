//! The core types for addressing V473 properties through the mailbox
use num_derive::FromPrimitive;
use std::fmt::{
    self,
    Display,
};
use thiserror::Error;

/// Number of output channels on a card
pub const CHANNELS: usize = 4;
/// Number of interrupt levels (and the size of an ordinary property bank)
pub const INTERRUPT_LEVELS: usize = 32;
/// Number of slots in the card-wide trigger map
pub const TRIGGER_SLOTS: usize = 256;
/// Trigger map slots owned by each interrupt level
pub const SLOTS_PER_LEVEL: usize = TRIGGER_SLOTS / INTERRUPT_LEVELS;
/// Ramp tables per channel
pub const RAMPS: usize = 16;
/// (value, duration) entries per ramp table
pub const RAMP_ENTRIES: usize = 64;
/// Trigger map sentinel meaning "no event assigned to this slot"
pub const NO_EVENT: u8 = 0xfe;

/// Which kind of argument an [`OutOfRange`] rejected
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Bound {
    /// A channel number
    Channel,
    /// An index or offset into a property, ramp or map
    Index,
    /// The length of a run of words
    Length,
}

/// A precondition failure, raised before any hardware is touched
#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
#[error("{what} {value} is out of range (must be less than {limit})")]
pub struct OutOfRange {
    pub kind: Bound,
    /// What was being indexed
    pub what: &'static str,
    /// The offending value
    pub value: usize,
    /// The exclusive upper bound
    pub limit: usize,
}

impl OutOfRange {
    /// Returns `Ok(value)` when `value < limit`
    /// # Errors
    /// Returns [`OutOfRange`] otherwise
    pub fn check(
        kind: Bound,
        what: &'static str,
        value: usize,
        limit: usize,
    ) -> Result<usize, Self> {
        if value < limit {
            Ok(value)
        } else {
            Err(Self {
                kind,
                what,
                value,
                limit,
            })
        }
    }

    /// [`OutOfRange::check`] for an index or offset
    /// # Errors
    /// Returns [`OutOfRange`] if `value >= limit`
    pub fn index(what: &'static str, value: usize, limit: usize) -> Result<usize, Self> {
        Self::check(Bound::Index, what, value, limit)
    }

    /// [`OutOfRange::check`] for the length of a run
    /// # Errors
    /// Returns [`OutOfRange`] if `value >= limit`
    pub fn length(what: &'static str, value: usize, limit: usize) -> Result<usize, Self> {
        Self::check(Bound::Length, what, value, limit)
    }
}

/// A validated channel number. If one of these exists, it holds a valid value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel(u8);

impl Channel {
    /// # Errors
    /// Returns an error if `v` is not a channel on the card
    pub fn new(v: usize) -> Result<Self, OutOfRange> {
        OutOfRange::check(Bound::Channel, "channel", v, CHANNELS).map(|v| Self(v as u8))
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.0.into()
    }

    /// Every channel on the card
    pub fn all() -> impl Iterator<Item = Self> {
        (0..CHANNELS as u8).map(Self)
    }
}

impl TryFrom<usize> for Channel {
    type Error = OutOfRange;

    fn try_from(v: usize) -> Result<Self, Self::Error> {
        Self::new(v)
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Addressable properties of the card. Most addresses in the V473 memory map share the same bit
/// layout, so each variant is the base of a property (or a bank of them) within a channel.
#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive)]
pub enum Property {
    RampMap = 0x800,
    ScaleFactorMap = 0x840,
    ScaleFactors = 0x860,
    OffsetMap = 0x880,
    Offsets = 0x8a0,
    Delays = 0x8e0,
    FrequencyMap = 0x900,
    Frequencies = 0x920,
    PhaseMap = 0x940,
    Phases = 0x960,
    WaveformEnable = 0xa00,
    SineWaveMode = 0xa01,
    PowerSupplyEnable = 0xa02,
    PowerSupplyReset = 0xa03,
    DacReadWrite = 0xa04,
    IncDecDac = 0xa05,
    DacUpdateRate = 0xa06,
    PsTrackingTolerance = 0xa10,
    ReadAdc = 0xa11,
    PsStatus = 0xa20,
    PsStatusNominal = 0xa21,
    PsStatusMask = 0xa22,
    PsStatusError = 0xa23,
    ActiveRampTable = 0xa30,
    ActiveScaleFactor = 0xa31,
    ActiveOffset = 0xa32,
    ActiveRampTableSegment = 0xa33,
    TimeRemaining = 0xa34,
    ActiveSineWaveFrequency = 0xa35,
    ActiveSineWavePhase = 0xa36,
    FinalSineWaveFrequency = 0xa37,
    FinalSineWavePhase = 0xa38,
    CalculationOverflow = 0xa39,
    TriggerMap = 0x4000,
    TclkInterruptEnable = 0x4200,
    ActiveInterruptLevel = 0x4210,
    LastTclkEvent = 0x4211,
    InterruptCounters = 0x4220,
    VmeDataBusDiag = 0x4484,
    ModuleId = 0xff00,
    FirmwareVersion = 0xff01,
    FpgaVersion = 0xff02,
}

impl Property {
    #[must_use]
    pub fn base(self) -> u16 {
        self as u16
    }

    /// Card-wide properties live in channel 0's address block only
    #[must_use]
    pub fn is_card_wide(self) -> bool {
        self.base() >= Property::TriggerMap.base()
    }

    /// Number of addressable sub-indices
    #[must_use]
    pub fn bank_len(self) -> usize {
        match self {
            Property::TriggerMap => TRIGGER_SLOTS,
            _ => INTERRUPT_LEVELS,
        }
    }
}

/// Computes the 16-bit mailbox address for `property` of `channel` at `sub_index`
/// # Errors
/// Returns an error if any component is out of the range allowed for `property`
pub fn encode_address(
    channel: usize,
    property: Property,
    sub_index: usize,
) -> Result<u16, OutOfRange> {
    let channel = Channel::new(channel)?;
    if property.is_card_wide() {
        OutOfRange::check(
            Bound::Channel,
            "channel of a card-wide property",
            channel.index(),
            1,
        )?;
    }
    let sub_index = OutOfRange::index("sub-index", sub_index, property.bank_len())?;
    Ok(0x1000 * channel.index() as u16 + property.base() + sub_index as u16)
}

/// Computes the mailbox address of `entry` within ramp table `ramp`. The ramp tables don't fit
/// the bank layout, so the ramp index is folded into the property base instead.
/// # Errors
/// Returns an error if any component is out of range
pub fn encode_ramp_address(channel: usize, ramp: usize, entry: usize) -> Result<u16, OutOfRange> {
    let channel = Channel::new(channel)?;
    let ramp = OutOfRange::index("ramp", ramp, RAMPS)?;
    let entry = OutOfRange::index("ramp entry", entry, RAMP_ENTRIES)?;
    Ok(0x1000 * channel.index() as u16 + ((ramp as u16) << 7) + 2 * entry as u16)
}

/// The first trigger map slot owned by interrupt level `level`
/// # Errors
/// Returns an error if `level` is not an interrupt level
pub fn trigger_slot(level: usize) -> Result<usize, OutOfRange> {
    OutOfRange::index("interrupt level", level, INTERRUPT_LEVELS).map(|l| l * SLOTS_PER_LEVEL)
}
