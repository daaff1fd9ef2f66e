//! Adapter from control-system property requests to card accessors
//!
//! A request names a channel, a subcode (which property), a word offset and length, and a
//! direction. Requests are checked against the property's extent here, before the accessor
//! checks them again, and every failure comes back as a [`Status`].

use crate::{
    card::{
        Card,
        Error,
        RampEntry,
        SineMode,
    },
    core::{
        Bound,
        Property,
        CHANNELS,
        RAMPS,
    },
    regs::DATA_BUFFER_WORDS,
    transport::Transport,
};
use num_traits::FromPrimitive;
use tracing::debug;

/// Subcode of the ramp tables. Every other subcode is the base address of its property.
pub const RAMP_SUBCODE: u16 = 0x0000;

/// Words per ramp table
const RAMP_WORDS: usize = 2 * crate::core::RAMP_ENTRIES;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Subcode {
    /// The ramp tables, addressed as one flat run of words: ramp `r` starts at word `128 * r`
    Ramp,
    Property(Property),
}

impl Subcode {
    #[must_use]
    pub fn decode(code: u16) -> Option<Self> {
        if code == RAMP_SUBCODE {
            Some(Subcode::Ramp)
        } else {
            Property::from_u16(code).map(Subcode::Property)
        }
    }

    fn is_card_wide(self) -> bool {
        match self {
            Subcode::Ramp => false,
            Subcode::Property(p) => p.is_card_wide(),
        }
    }

    /// Number of addressable words
    fn extent(self) -> usize {
        use Property::*;
        match self {
            Subcode::Ramp => RAMPS * RAMP_WORDS,
            Subcode::Property(p) => match p {
                RampMap | ScaleFactorMap | ScaleFactors | OffsetMap | Offsets | Delays
                | FrequencyMap | Frequencies | PhaseMap | Phases | TriggerMap
                | InterruptCounters => p.bank_len(),
                VmeDataBusDiag => DATA_BUFFER_WORDS,
                _ => 1,
            },
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Request {
    pub channel: u16,
    pub subcode: u16,
    /// Offset in words
    pub offset: u16,
    /// Length in words
    pub length: u16,
    pub direction: Direction,
}

/// Outcome of a request
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadChannel,
    BadLength,
    BadOffset,
    /// The card didn't answer
    Misboard,
    Unsupported,
    BadSetting,
    StillActive,
    DeviceError,
}

impl Status {
    #[must_use]
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

impl From<&Error> for Status {
    fn from(e: &Error) -> Self {
        match e {
            Error::OutOfRange(r) => match r.kind {
                Bound::Channel => Status::BadChannel,
                Bound::Length => Status::BadLength,
                Bound::Index => Status::BadOffset,
            },
            Error::Unresponsive { .. } => Status::Misboard,
            Error::BadSetting { .. } => Status::BadSetting,
            Error::StillActive { .. } => Status::StillActive,
            Error::NotPresent { .. }
            | Error::Unexpected { .. }
            | Error::InterruptAttach { .. }
            | Error::Transport(_) => Status::DeviceError,
        }
    }
}

fn check(request: &Request, subcode: Subcode, data: &[u16]) -> Result<(), Status> {
    let (channel, offset, length) = (
        usize::from(request.channel),
        usize::from(request.offset),
        usize::from(request.length),
    );
    if channel >= CHANNELS || (subcode.is_card_wide() && channel != 0) {
        return Err(Status::BadChannel);
    }
    if length == 0 || length > data.len() || length > DATA_BUFFER_WORDS {
        return Err(Status::BadLength);
    }
    let extent = subcode.extent();
    if offset >= extent {
        return Err(Status::BadOffset);
    }
    if offset + length > extent {
        return Err(Status::BadLength);
    }
    Ok(())
}

/// Carry out `request` on `card`. Reads fill the front of `data`, writes take their words from
/// it.
pub fn dispatch<T: Transport>(card: &Card<T>, request: &Request, data: &mut [u16]) -> Status {
    let Some(subcode) = Subcode::decode(request.subcode) else {
        return Status::Unsupported;
    };
    if let Err(status) = check(request, subcode, data) {
        debug!(?request, ?status, "Rejected property request");
        return status;
    }
    let data = &mut data[..usize::from(request.length)];
    match execute(card, request, subcode, data) {
        Ok(status) => status,
        Err(e) => {
            debug!(?request, %e, "Property request failed");
            Status::from(&e)
        }
    }
}

fn execute<T: Transport>(
    card: &Card<T>,
    request: &Request,
    subcode: Subcode,
    data: &mut [u16],
) -> Result<Status, Error> {
    use Direction::*;
    use Property::*;

    let channel = usize::from(request.channel);
    let offset = usize::from(request.offset);
    let s = card.lock();

    let property = match subcode {
        Subcode::Ramp => {
            let (ramp, word) = (offset / RAMP_WORDS, offset % RAMP_WORDS);
            if word % 2 != 0 {
                return Ok(Status::BadOffset);
            }
            if data.len() % 2 != 0 || word + data.len() > RAMP_WORDS {
                return Ok(Status::BadLength);
            }
            let mut entries: Vec<RampEntry> = data
                .chunks_exact(2)
                .map(|pair| RampEntry {
                    value: pair[0] as i16,
                    duration: pair[1],
                })
                .collect();
            match request.direction {
                Read => {
                    s.ramp(channel, ramp, word / 2, &mut entries)?;
                    for (pair, e) in data.chunks_exact_mut(2).zip(entries) {
                        pair[0] = e.value as u16;
                        pair[1] = e.duration;
                    }
                }
                Write => s.set_ramp(channel, ramp, word / 2, &entries)?,
            }
            return Ok(Status::Ok);
        }
        Subcode::Property(p) => p,
    };

    match (property, request.direction) {
        // Write only
        (PowerSupplyReset | IncDecDac, Read) => return Ok(Status::Unsupported),
        (PowerSupplyReset, Write) => s.reset_power_supply(channel)?,
        (IncDecDac, Write) => s.step_dac(channel, data[0] as i16)?,

        // Read only
        (
            ReadAdc | PsStatus | PsStatusError | ActiveRampTable | ActiveScaleFactor | ActiveOffset
            | ActiveRampTableSegment | TimeRemaining | ActiveSineWaveFrequency
            | ActiveSineWavePhase | FinalSineWaveFrequency | FinalSineWavePhase
            | CalculationOverflow | ActiveInterruptLevel | LastTclkEvent | InterruptCounters
            | ModuleId | FirmwareVersion | FpgaVersion,
            Write,
        ) => return Ok(Status::Unsupported),

        (ScaleFactors, Read) => s.scale_factors(channel, offset, data)?,
        (ScaleFactors, Write) => s.set_scale_factors(channel, offset, data)?,

        (TriggerMap, Read) => {
            let mut events = vec![0; data.len()];
            s.trigger_map(offset, &mut events)?;
            for (word, event) in data.iter_mut().zip(events) {
                *word = event.into();
            }
        }
        (TriggerMap, Write) => {
            let Ok(events) = data
                .iter()
                .map(|&w| u8::try_from(w))
                .collect::<Result<Vec<_>, _>>()
            else {
                return Ok(Status::BadSetting);
            };
            s.set_trigger_map(offset, &events)?;
        }

        (SineWaveMode, Write) => match SineMode::from_u16(data[0]) {
            Some(mode) => s.set_sine_wave_mode(channel, mode)?,
            None => return Ok(Status::BadSetting),
        },
        (DacReadWrite, Write) => s.set_dac(channel, data[0] as i16)?,

        (VmeDataBusDiag, Read) => s.vme_data_bus_diag(data)?,
        (VmeDataBusDiag, Write) => {
            if data.len() != 1 {
                return Ok(Status::BadLength);
            }
            s.set_vme_data_bus_diag(data[0])?;
        }

        (p, Read) => s.read_bank(channel, p, offset, data)?,
        (p, Write) => s.write_bank(channel, p, offset, data)?,
    }
    Ok(Status::Ok)
}
