//! Property accessors. Each one validates its indices, then runs one or more mailbox transactions.

use super::{
    Error,
    Session,
};
use crate::{
    core::{
        encode_address,
        encode_ramp_address,
        trigger_slot,
        Bound,
        Channel,
        OutOfRange,
        Property,
        INTERRUPT_LEVELS,
        NO_EVENT,
        RAMPS,
        RAMP_ENTRIES,
        SLOTS_PER_LEVEL,
        TRIGGER_SLOTS,
    },
    regs::{
        data_word,
        PowerSupplyStatus,
        Revision,
        DATA_BUFFER_WORDS,
        DIR_READ,
        RESET,
    },
    transport::Transport,
};
use fixed::types::I9F7;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use paste::paste;

/// One segment of a ramp table
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct RampEntry {
    /// Output value at the end of the segment
    pub value: i16,
    /// Length of the segment in ticks
    pub duration: u16,
}

/// Sine wave generator modes
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive)]
#[repr(u16)]
pub enum SineMode {
    Off = 0,
    Fixed = 1,
    Sweep = 3,
    FixedLoop = 5,
    SweepLoop = 7,
}

/// Everything that defines what a channel does when one interrupt level fires
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelSetup {
    /// Ramp table to play
    pub ramp: u16,
    /// Scale factor to apply
    pub scale_factor: u16,
    /// Offset to apply
    pub offset: u16,
    /// Delay before the ramp starts
    pub delay: u16,
    /// TCLK events that select this level. Empty leaves the trigger map alone.
    pub events: Vec<u8>,
}

/// Direct access to the dual-ported data buffer
#[derive(Debug)]
pub struct DataBuffer<'s, T> {
    bus: &'s T,
}

impl<T: Transport> DataBuffer<'_, T> {
    /// # Errors
    /// Returns an error if `index` is past the end of the buffer
    pub fn read(&self, index: usize) -> Result<u16, OutOfRange> {
        let index = OutOfRange::index("buffer index", index, DATA_BUFFER_WORDS)?;
        Ok(self.bus.read_word(data_word(index)))
    }

    /// # Errors
    /// Returns an error if `index` is past the end of the buffer
    pub fn write(&self, index: usize, value: u16) -> Result<(), OutOfRange> {
        let index = OutOfRange::index("buffer index", index, DATA_BUFFER_WORDS)?;
        self.bus.write_word(data_word(index), value);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        DATA_BUFFER_WORDS
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Address of the first word of a run of `len` words in `property`'s bank
fn bank_address(
    channel: usize,
    property: Property,
    start: usize,
    len: usize,
) -> Result<u16, OutOfRange> {
    let mailbox = encode_address(channel, property, start)?;
    OutOfRange::length("end of run", start + len, property.bank_len() + 1)?;
    Ok(mailbox)
}

/// Banks addressed by interrupt level
macro_rules! bank {
    ($name:ident, $property:ident, $what:literal) => {
        paste! {
            #[doc = concat!("Read the ", $what, " of `channel`, starting at interrupt level `start`")]
            /// # Errors
            /// Returns an error on out of range arguments or if the card doesn't respond
            pub fn $name(&self, channel: usize, start: usize, out: &mut [u16]) -> Result<(), Error> {
                self.read_bank(channel, Property::$property, start, out)
            }

            #[doc = concat!("Write the ", $what, " of `channel`, starting at interrupt level `start`")]
            /// # Errors
            /// Returns an error on out of range arguments or if the card doesn't respond
            pub fn [<set_ $name>](&self, channel: usize, start: usize, data: &[u16]) -> Result<(), Error> {
                self.write_bank(channel, Property::$property, start, data)
            }
        }
    };
}

/// Per-channel words that can be read back and written
macro_rules! word {
    ($name:ident, $property:ident) => {
        paste! {
            /// # Errors
            /// Returns an error on a bad channel or if the card doesn't respond
            pub fn $name(&self, channel: usize) -> Result<u16, Error> {
                self.read_one(channel, Property::$property)
            }

            /// # Errors
            /// Returns an error on a bad channel or if the card doesn't respond
            pub fn [<set_ $name>](&self, channel: usize, value: u16) -> Result<(), Error> {
                self.write_one(channel, Property::$property, value)
            }
        }
    };
}

/// Per-channel read-only words
macro_rules! readout {
    ($name:ident, $property:ident) => {
        /// # Errors
        /// Returns an error on a bad channel or if the card doesn't respond
        pub fn $name(&self, channel: usize) -> Result<u16, Error> {
            self.read_one(channel, Property::$property)
        }
    };
}

impl<T: Transport> Session<'_, T> {
    /// Read a run of `property`'s bank on `channel`
    /// # Errors
    /// Returns an error if the run doesn't fit the bank or if the card doesn't respond
    pub fn read_bank(
        &self,
        channel: usize,
        property: Property,
        start: usize,
        out: &mut [u16],
    ) -> Result<(), Error> {
        let mailbox = bank_address(channel, property, start, out.len())?;
        self.read_words(mailbox, out)
    }

    /// Write a run of `property`'s bank on `channel`
    /// # Errors
    /// Returns an error if the run doesn't fit the bank or if the card doesn't respond
    pub fn write_bank(
        &self,
        channel: usize,
        property: Property,
        start: usize,
        data: &[u16],
    ) -> Result<(), Error> {
        let mailbox = bank_address(channel, property, start, data.len())?;
        self.write_words(mailbox, data)
    }

    fn read_one(&self, channel: usize, property: Property) -> Result<u16, Error> {
        let mut word = [0];
        self.read_bank(channel, property, 0, &mut word)?;
        Ok(word[0])
    }

    fn write_one(&self, channel: usize, property: Property, value: u16) -> Result<(), Error> {
        self.write_bank(channel, property, 0, &[value])
    }

    // Ramps

    /// Read `out.len()` entries of ramp table `ramp` on `channel`, starting at entry `offset`
    /// # Errors
    /// Returns an error on out of range arguments or if the card doesn't respond
    pub fn ramp(
        &self,
        channel: usize,
        ramp: usize,
        offset: usize,
        out: &mut [RampEntry],
    ) -> Result<(), Error> {
        let mailbox = ramp_address(channel, ramp, offset, out.len())?;
        let mut words = vec![0; 2 * out.len()];
        self.read_words(mailbox, &mut words)?;
        for (entry, pair) in out.iter_mut().zip(words.chunks_exact(2)) {
            *entry = RampEntry {
                value: pair[0] as i16,
                duration: pair[1],
            };
        }
        Ok(())
    }

    /// Write `entries` into ramp table `ramp` on `channel`, starting at entry `offset`
    /// # Errors
    /// Returns an error on out of range arguments or if the card doesn't respond
    pub fn set_ramp(
        &self,
        channel: usize,
        ramp: usize,
        offset: usize,
        entries: &[RampEntry],
    ) -> Result<(), Error> {
        let mailbox = ramp_address(channel, ramp, offset, entries.len())?;
        let words: Vec<u16> = entries
            .iter()
            .flat_map(|e| [e.value as u16, e.duration])
            .collect();
        self.write_words(mailbox, &words)
    }

    // Per interrupt level banks

    bank!(ramp_map, RampMap, "ramp table selected by each interrupt level");
    bank!(scale_factor_map, ScaleFactorMap, "scale factor selected by each interrupt level");
    bank!(offset_map, OffsetMap, "offset selected by each interrupt level");
    bank!(offsets, Offsets, "offset table");
    bank!(delays, Delays, "start delay of each interrupt level");
    bank!(frequency_map, FrequencyMap, "sine frequency selected by each interrupt level");
    bank!(frequencies, Frequencies, "sine frequency table");
    bank!(phase_map, PhaseMap, "sine phase selected by each interrupt level");
    bank!(phases, Phases, "sine phase table");

    fn scale_factor_index(&self, level: usize) -> Result<usize, Error> {
        let level = OutOfRange::index("interrupt level", level, INTERRUPT_LEVELS)?;
        Ok(self.card.config.scale_factor_indexing.sub_index(level))
    }

    /// Read the raw scale factors of `channel` for the levels from `level` on. 128 is unity.
    /// # Errors
    /// Returns an error on out of range arguments or if the card doesn't respond
    pub fn scale_factors(&self, channel: usize, level: usize, out: &mut [u16]) -> Result<(), Error> {
        let start = self.scale_factor_index(level)?;
        self.read_bank(channel, Property::ScaleFactors, start, out)
    }

    /// Write raw scale factors of `channel` for the levels from `level` on
    /// # Errors
    /// Returns an error on out of range arguments or if the card doesn't respond
    pub fn set_scale_factors(&self, channel: usize, level: usize, data: &[u16]) -> Result<(), Error> {
        let start = self.scale_factor_index(level)?;
        self.write_bank(channel, Property::ScaleFactors, start, data)
    }

    /// # Errors
    /// Returns an error on out of range arguments or if the card doesn't respond
    pub fn scale_factor(&self, channel: usize, level: usize) -> Result<I9F7, Error> {
        let mut word = [0];
        self.scale_factors(channel, level, &mut word)?;
        Ok(I9F7::from_bits(word[0] as i16))
    }

    /// # Errors
    /// Returns an error on out of range arguments or if the card doesn't respond
    pub fn set_scale_factor(&self, channel: usize, level: usize, factor: I9F7) -> Result<(), Error> {
        self.set_scale_factors(channel, level, &[factor.to_bits() as u16])
    }

    /// Interrupt counters, starting at level `start`
    /// # Errors
    /// Returns an error on out of range arguments or if the card doesn't respond
    pub fn interrupt_counters(&self, start: usize, out: &mut [u16]) -> Result<(), Error> {
        self.read_bank(0, Property::InterruptCounters, start, out)
    }

    // Trigger map

    /// Read the trigger map from slot `start`
    /// # Errors
    /// Returns an error on out of range arguments or if the card doesn't respond
    pub fn trigger_map(&self, start: usize, out: &mut [u8]) -> Result<(), Error> {
        let mut words = vec![0; out.len()];
        self.read_bank(0, Property::TriggerMap, start, &mut words)?;
        for (event, word) in out.iter_mut().zip(words) {
            *event = word as u8;
        }
        Ok(())
    }

    fn full_trigger_map(&self) -> Result<[u8; TRIGGER_SLOTS], Error> {
        let mut map = [NO_EVENT; TRIGGER_SLOTS];
        let (low, high) = map.split_at_mut(DATA_BUFFER_WORDS);
        self.trigger_map(0, low)?;
        self.trigger_map(DATA_BUFFER_WORDS, high)?;
        Ok(map)
    }

    /// Write `events` into the trigger map from slot `start`. Unless disabled in the card's
    /// [`Config`](crate::config::Config), an event may only be assigned to one slot.
    /// # Errors
    /// Returns [`Error::BadSetting`] if an event would be assigned twice, or an error on out of
    /// range arguments or if the card doesn't respond
    pub fn set_trigger_map(&self, start: usize, events: &[u8]) -> Result<(), Error> {
        let mailbox = bank_address(0, Property::TriggerMap, start, events.len())?;
        OutOfRange::length("word count", events.len(), DATA_BUFFER_WORDS + 1)?;
        if self.card.config.unique_trigger_events {
            self.check_unique(start, events)?;
        }
        let words: Vec<u16> = events.iter().map(|&e| e.into()).collect();
        self.write_words(mailbox, &words)
    }

    fn check_unique(&self, start: usize, events: &[u8]) -> Result<(), Error> {
        if events.iter().all(|&e| e == NO_EVENT) {
            return Ok(());
        }
        let map = self.full_trigger_map()?;
        let run = start..start + events.len();
        for (i, &event) in events.iter().enumerate() {
            if event == NO_EVENT {
                continue;
            }
            if let Some(j) = events[..i].iter().position(|&e| e == event) {
                return Err(Error::BadSetting {
                    event,
                    slot: start + j,
                });
            }
            if let Some(slot) = (0..TRIGGER_SLOTS).find(|s| !run.contains(s) && map[*s] == event) {
                return Err(Error::BadSetting { event, slot });
            }
        }
        Ok(())
    }

    /// Assign up to eight `events` to interrupt `level`, clearing its other slots
    /// # Errors
    /// Returns an error on out of range arguments, on an event that's already assigned, or if
    /// the card doesn't respond
    pub fn set_trigger_events(&self, level: usize, events: &[u8]) -> Result<(), Error> {
        let start = trigger_slot(level)?;
        OutOfRange::length("events per level", events.len(), SLOTS_PER_LEVEL + 1)?;
        let mut slots = [NO_EVENT; SLOTS_PER_LEVEL];
        slots[..events.len()].copy_from_slice(events);
        self.set_trigger_map(start, &slots)
    }

    /// Move `event` from interrupt level `from` to `to` with a single write covering both levels'
    /// slots, so there is no moment where the event selects both or neither
    /// # Errors
    /// Returns an error if the levels are too far apart for one transaction, if `to` already has
    /// eight events, on an event that's assigned elsewhere, or if the card doesn't respond
    pub fn move_trigger_event(&self, event: u8, from: usize, to: usize) -> Result<(), Error> {
        let (from, to) = (trigger_slot(from)?, trigger_slot(to)?);
        let low = from.min(to);
        let len = from.max(to) + SLOTS_PER_LEVEL - low;
        OutOfRange::index("trigger map span", len, DATA_BUFFER_WORDS + 1)?;
        let mut span = vec![NO_EVENT; len];
        self.trigger_map(low, &mut span)?;
        for e in &mut span[from - low..from - low + SLOTS_PER_LEVEL] {
            if *e == event {
                *e = NO_EVENT;
            }
        }
        let dest = &mut span[to - low..to - low + SLOTS_PER_LEVEL];
        if !dest.contains(&event) {
            let Some(slot) = dest.iter().position(|&e| e == NO_EVENT) else {
                return Err(OutOfRange {
                    kind: Bound::Length,
                    what: "events per level",
                    value: SLOTS_PER_LEVEL + 1,
                    limit: SLOTS_PER_LEVEL + 1,
                }
                .into());
            };
            dest[slot] = event;
        }
        self.set_trigger_map(low, &span)
    }

    // Channel control

    /// # Errors
    /// Returns an error on a bad channel or if the card doesn't respond
    pub fn waveform_enabled(&self, channel: usize) -> Result<bool, Error> {
        Ok(self.read_one(channel, Property::WaveformEnable)? != 0)
    }

    /// # Errors
    /// Returns an error on a bad channel or if the card doesn't respond
    pub fn waveform_enable(&self, channel: usize, enable: bool) -> Result<(), Error> {
        self.write_one(channel, Property::WaveformEnable, enable.into())
    }

    /// # Errors
    /// Returns an error on a bad channel, a mode the driver doesn't know, or if the card doesn't
    /// respond
    pub fn sine_wave_mode(&self, channel: usize) -> Result<SineMode, Error> {
        let value = self.read_one(channel, Property::SineWaveMode)?;
        SineMode::from_u16(value).ok_or(Error::Unexpected {
            mailbox: encode_address(channel, Property::SineWaveMode, 0)?,
            value,
        })
    }

    /// # Errors
    /// Returns an error on a bad channel or if the card doesn't respond
    pub fn set_sine_wave_mode(&self, channel: usize, mode: SineMode) -> Result<(), Error> {
        self.write_one(channel, Property::SineWaveMode, mode as u16)
    }

    word!(dac_update_rate, DacUpdateRate);
    word!(ps_tracking_tolerance, PsTrackingTolerance);

    // Power supply

    /// # Errors
    /// Returns an error on a bad channel or if the card doesn't respond
    pub fn enable_power_supply(&self, channel: usize, enable: bool) -> Result<(), Error> {
        self.write_one(channel, Property::PowerSupplyEnable, enable.into())
    }

    /// Pulse the reset output of `channel`'s power supply
    /// # Errors
    /// Returns an error on a bad channel or if the card doesn't respond
    pub fn reset_power_supply(&self, channel: usize) -> Result<(), Error> {
        self.write_one(channel, Property::PowerSupplyReset, 1)?;
        self.write_one(channel, Property::PowerSupplyReset, 0)
    }

    /// # Errors
    /// Returns an error on a bad channel or if the card doesn't respond
    pub fn power_supply_status(&self, channel: usize) -> Result<PowerSupplyStatus, Error> {
        let mailbox = encode_address(channel, Property::PsStatus, 0)?;
        if !self.transact(mailbox, 1, DIR_READ) {
            return Err(Error::Unresponsive { mailbox });
        }
        Ok(self.bus().read::<PowerSupplyStatus>(data_word(0))?)
    }

    word!(power_supply_status_nominal, PsStatusNominal);
    word!(power_supply_status_mask, PsStatusMask);
    readout!(power_supply_status_error, PsStatusError);

    /// The DAC setting. `i16::MAX` is +10 V and `i16::MIN` is -10 V.
    /// # Errors
    /// Returns an error on a bad channel or if the card doesn't respond
    pub fn dac(&self, channel: usize) -> Result<i16, Error> {
        Ok(self.read_one(channel, Property::DacReadWrite)? as i16)
    }

    /// Set the DAC. Unless disabled in the card's [`Config`](crate::config::Config), this is
    /// refused while the supply is transitioning.
    /// # Errors
    /// Returns [`Error::StillActive`] if the supply is transitioning, or an error on a bad
    /// channel or if the card doesn't respond
    pub fn set_dac(&self, channel: usize, value: i16) -> Result<(), Error> {
        let channel = Channel::new(channel)?;
        if self.card.config.guard_dac_writes
            && self.power_supply_status(channel.index())?.transitioning
        {
            return Err(Error::StillActive { channel });
        }
        self.write_one(channel.index(), Property::DacReadWrite, value as u16)
    }

    /// Nudge the DAC by `delta`
    /// # Errors
    /// Returns an error on a bad channel or if the card doesn't respond
    pub fn step_dac(&self, channel: usize, delta: i16) -> Result<(), Error> {
        self.write_one(channel, Property::IncDecDac, delta as u16)
    }

    /// # Errors
    /// Returns an error on a bad channel or if the card doesn't respond
    pub fn adc(&self, channel: usize) -> Result<i16, Error> {
        Ok(self.read_one(channel, Property::ReadAdc)? as i16)
    }

    // What the channel is playing right now

    readout!(active_ramp_table, ActiveRampTable);
    readout!(active_scale_factor, ActiveScaleFactor);
    readout!(active_offset, ActiveOffset);
    readout!(active_ramp_segment, ActiveRampTableSegment);
    readout!(time_remaining, TimeRemaining);
    readout!(active_sine_frequency, ActiveSineWaveFrequency);
    readout!(active_sine_phase, ActiveSineWavePhase);
    readout!(final_sine_frequency, FinalSineWaveFrequency);
    readout!(final_sine_phase, FinalSineWavePhase);
    readout!(calculation_overflow, CalculationOverflow);

    // Card-wide

    /// # Errors
    /// Returns an error if the card doesn't respond
    pub fn tclk_interrupt_enable(&self) -> Result<bool, Error> {
        Ok(self.read_one(0, Property::TclkInterruptEnable)? != 0)
    }

    /// # Errors
    /// Returns an error if the card doesn't respond
    pub fn set_tclk_interrupt_enable(&self, enable: bool) -> Result<(), Error> {
        self.write_one(0, Property::TclkInterruptEnable, enable.into())
    }

    /// The interrupt level most recently triggered
    /// # Errors
    /// Returns an error if the card doesn't respond
    pub fn active_interrupt_level(&self) -> Result<u16, Error> {
        self.read_one(0, Property::ActiveInterruptLevel)
    }

    /// # Errors
    /// Returns an error if the card doesn't respond
    pub fn last_tclk_event(&self) -> Result<u8, Error> {
        Ok(self.read_one(0, Property::LastTclkEvent)? as u8)
    }

    /// Read `out.len()` words back from the VME data bus diagnostic
    /// # Errors
    /// Returns an error if `out` doesn't fit the data buffer or if the card doesn't respond
    pub fn vme_data_bus_diag(&self, out: &mut [u16]) -> Result<(), Error> {
        self.read_words(Property::VmeDataBusDiag.base(), out)
    }

    /// Prime the VME data bus diagnostic with `pattern`
    /// # Errors
    /// Returns an error if the card doesn't respond
    pub fn set_vme_data_bus_diag(&self, pattern: u16) -> Result<(), Error> {
        self.write_words(Property::VmeDataBusDiag.base(), &[pattern])
    }

    /// # Errors
    /// Returns an error if the card doesn't respond
    pub fn module_id(&self) -> Result<u16, Error> {
        self.read_one(0, Property::ModuleId)
    }

    /// # Errors
    /// Returns an error if the card doesn't respond
    pub fn firmware_version(&self) -> Result<Revision, Error> {
        self.read_one(0, Property::FirmwareVersion).map(Revision)
    }

    /// # Errors
    /// Returns an error if the card doesn't respond
    pub fn fpga_version(&self) -> Result<Revision, Error> {
        self.read_one(0, Property::FpgaVersion).map(Revision)
    }

    // Composites

    /// Program everything `channel` needs for interrupt `level`. All indices, and the trigger
    /// events' uniqueness, are checked before anything is written.
    /// # Errors
    /// Returns an error on out of range arguments, on an event that's already assigned, or if
    /// the card doesn't respond
    pub fn configure_level(
        &self,
        channel: usize,
        level: usize,
        setup: &LevelSetup,
    ) -> Result<(), Error> {
        encode_address(channel, Property::RampMap, level)?;
        OutOfRange::index("ramp", setup.ramp.into(), RAMPS)?;
        OutOfRange::index("scale factor", setup.scale_factor.into(), INTERRUPT_LEVELS)?;
        OutOfRange::index("offset", setup.offset.into(), INTERRUPT_LEVELS)?;
        OutOfRange::length("events per level", setup.events.len(), SLOTS_PER_LEVEL + 1)?;
        if !setup.events.is_empty() && self.card.config.unique_trigger_events {
            let mut slots = [NO_EVENT; SLOTS_PER_LEVEL];
            slots[..setup.events.len()].copy_from_slice(&setup.events);
            self.check_unique(trigger_slot(level)?, &slots)?;
        }

        self.set_ramp_map(channel, level, &[setup.ramp])?;
        self.set_scale_factor_map(channel, level, &[setup.scale_factor])?;
        self.set_offset_map(channel, level, &[setup.offset])?;
        self.set_delays(channel, level, &[setup.delay])?;
        if !setup.events.is_empty() {
            self.set_trigger_events(level, &setup.events)?;
        }
        Ok(())
    }

    /// Reset the whole board
    pub fn reset_card(&self) {
        self.bus().write_word(RESET, 1);
    }

    /// The raw data buffer, for bus diagnostics
    #[must_use]
    pub fn data_buffer(&self) -> DataBuffer<'_, T> {
        DataBuffer { bus: self.bus() }
    }
}

fn ramp_address(
    channel: usize,
    ramp: usize,
    offset: usize,
    len: usize,
) -> Result<u16, OutOfRange> {
    let mailbox = encode_ramp_address(channel, ramp, offset)?;
    OutOfRange::length("end of ramp", offset + len, RAMP_ENTRIES + 1)?;
    Ok(mailbox)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{
            Config,
            ScaleFactorIndexing,
        },
        regs::DIR_WRITE,
        transport::mock::Mock,
        Card,
    };

    fn card_with(config: Config) -> (Mock, Card<Mock>) {
        let mock = Mock::new();
        let card = Card::new(mock.clone(), 0x40, config).unwrap();
        mock.clear_log();
        (mock, card)
    }

    fn card() -> (Mock, Card<Mock>) {
        card_with(Config::default())
    }

    macro_rules! rejects_bad_arguments {
        ($($name:ident: $s:ident => $call:expr;)*) => {
            paste! {
                $(
                    #[test]
                    fn [<test_ $name _rejects_bad_arguments>]() {
                        let (mock, card) = card();
                        let writes = mock.register_writes();
                        let $s = card.lock();
                        let err = ($call).unwrap_err();
                        assert!(err.is_precondition(), "{err}");
                        assert_eq!(mock.register_writes(), writes);
                        assert!(mock.transactions().is_empty());
                    }
                )*
            }
        };
    }

    rejects_bad_arguments! {
        ramp_map: s => s.ramp_map(4, 0, &mut [0]);
        set_offsets: s => s.set_offsets(4, 0, &[0]);
        delays_past_bank: s => s.delays(0, 31, &mut [0, 0]);
        scale_factors: s => s.scale_factors(0, 31, &mut [0]);
        set_scale_factor: s => s.set_scale_factor(9, 0, I9F7::ONE);
        frequencies: s => s.frequencies(0, 32, &mut [0]);
        set_phases: s => s.set_phases(5, 0, &[0]);
        ramp: s => s.ramp(4, 0, 0, &mut [RampEntry::default()]);
        ramp_index: s => s.ramp(0, 16, 0, &mut [RampEntry::default()]);
        set_ramp_overrun: s => s.set_ramp(0, 0, 63, &[RampEntry::default(); 2]);
        trigger_map: s => s.trigger_map(256, &mut [0]);
        set_trigger_map: s => s.set_trigger_map(250, &[1; 8]);
        set_trigger_events: s => s.set_trigger_events(32, &[1]);
        too_many_events: s => s.set_trigger_events(0, &[1; 9]);
        move_trigger_event: s => s.move_trigger_event(1, 0, 31);
        waveform_enable: s => s.waveform_enable(4, true);
        sine_wave_mode: s => s.sine_wave_mode(4);
        dac: s => s.dac(4);
        set_dac: s => s.set_dac(4, 0);
        adc: s => s.adc(7);
        reset_power_supply: s => s.reset_power_supply(4);
        power_supply_status: s => s.power_supply_status(4);
        dac_update_rate: s => s.set_dac_update_rate(4, 1);
        active_offset: s => s.active_offset(4);
        interrupt_counters: s => s.interrupt_counters(30, &mut [0; 3]);
        vme_data_bus_diag: s => s.vme_data_bus_diag(&mut [0; 129]);
        card_wide_channel: s => s.read_bank(1, Property::ModuleId, 0, &mut [0]);
        configure_level: s => s.configure_level(0, 0, &LevelSetup { ramp: 16, ..LevelSetup::default() });
    }

    #[test]
    fn test_ramp_round_trip() {
        let (mock, card) = card();
        let s = card.lock();
        for n in [1, 32, 64] {
            let entries: Vec<_> = (0..n)
                .map(|i| RampEntry {
                    value: i as i16 * -100,
                    duration: i as u16 + 1,
                })
                .collect();
            s.set_ramp(2, 5, 0, &entries).unwrap();
            let mut back = vec![RampEntry::default(); n];
            s.ramp(2, 5, 0, &mut back).unwrap();
            assert_eq!(back, entries);
        }
        let last = mock.transactions().pop().unwrap();
        assert_eq!(last.mailbox, 0x2000 + (5 << 7));
        assert_eq!(last.count, 128);
    }

    #[test]
    fn test_bank_addressing() {
        let (mock, card) = card();
        let s = card.lock();
        s.set_offsets(3, 4, &[10, 11, 12]).unwrap();
        assert_eq!(mock.property(0x38a4), 10);
        assert_eq!(mock.property(0x38a6), 12);
        let mut out = [0; 3];
        s.offsets(3, 4, &mut out).unwrap();
        assert_eq!(out, [10, 11, 12]);
        // A run may end exactly at the end of the bank
        s.set_delays(0, 30, &[1, 2]).unwrap();
    }

    #[test]
    fn test_waveform_enable_idempotent() {
        let (mock, card) = card();
        let s = card.lock();
        s.waveform_enable(1, true).unwrap();
        assert_eq!(mock.property(0x1a00), 1);

        s.waveform_enable(1, false).unwrap();
        let once = (mock.property(0x1a00), mock.register(data_word(0)));
        assert_eq!(once, (0, 0));
        s.waveform_enable(1, false).unwrap();
        let twice = (mock.property(0x1a00), mock.register(data_word(0)));
        assert_eq!(once, twice);
        assert!(!s.waveform_enabled(1).unwrap());

        s.waveform_enable(1, true).unwrap();
        s.waveform_enable(1, true).unwrap();
        assert_eq!(mock.property(0x1a00), 1);
        assert!(s.waveform_enabled(1).unwrap());
    }

    #[test]
    fn test_sine_wave_mode() {
        let (mock, card) = card();
        let s = card.lock();
        s.set_sine_wave_mode(1, SineMode::SweepLoop).unwrap();
        assert_eq!(mock.property(0x1a01), 7);
        assert_eq!(s.sine_wave_mode(1).unwrap(), SineMode::SweepLoop);
        mock.set_property(0x1a01, 2);
        assert!(matches!(
            s.sine_wave_mode(1),
            Err(Error::Unexpected {
                mailbox: 0x1a01,
                value: 2
            })
        ));
    }

    #[test]
    fn test_scale_factor_indexing() {
        let (mock, card) = card();
        card.lock()
            .set_scale_factor(0, 0, I9F7::from_num(1.5))
            .unwrap();
        assert_eq!(mock.property(0x0861), 192);
        assert_eq!(card.lock().scale_factor(0, 0).unwrap(), I9F7::from_num(1.5));

        let (mock, card) = card_with(Config {
            scale_factor_indexing: ScaleFactorIndexing::Direct,
            ..Config::default()
        });
        card.lock().set_scale_factor(1, 0, I9F7::ONE).unwrap();
        assert_eq!(mock.property(0x1860), 128);
        // Level 31 only exists when indexing directly
        card.lock().set_scale_factor(1, 31, -I9F7::ONE).unwrap();
        assert_eq!(mock.property(0x187f) as i16, -128);
    }

    #[test]
    fn test_trigger_events_unique() {
        let (mock, card) = card();
        let s = card.lock();
        s.set_trigger_events(1, &[0x0f, 0x10]).unwrap();
        assert_eq!(mock.property(0x4008), 0x0f);
        assert_eq!(mock.property(0x4009), 0x10);
        assert_eq!(mock.property(0x400a), u16::from(NO_EVENT));
        // Rewriting the same level is fine
        s.set_trigger_events(1, &[0x10, 0x0f]).unwrap();

        mock.clear_log();
        let err = s.set_trigger_events(2, &[0x0f]).unwrap_err();
        assert!(matches!(
            err,
            Error::BadSetting {
                event: 0x0f,
                slot: 9
            }
        ));
        assert!(!err.is_precondition());
        // Only the two reads of the map happened
        assert!(mock
            .transactions()
            .iter()
            .all(|t| t.direction == DIR_READ));
        assert_eq!(mock.transactions().len(), 2);
    }

    #[test]
    fn test_trigger_duplicate_in_run() {
        let (_, card) = card();
        let s = card.lock();
        assert!(matches!(
            s.set_trigger_map(16, &[0x20, 0x21, 0x20]),
            Err(Error::BadSetting {
                event: 0x20,
                slot: 16
            })
        ));
        // Clearing never conflicts
        s.set_trigger_map(0, &[NO_EVENT; 128]).unwrap();
    }

    #[test]
    fn test_trigger_uniqueness_disabled() {
        let (mock, card) = card_with(Config {
            unique_trigger_events: false,
            ..Config::default()
        });
        let s = card.lock();
        s.set_trigger_events(0, &[3]).unwrap();
        s.set_trigger_events(1, &[3]).unwrap();
        assert_eq!(mock.property(0x4000), 3);
        assert_eq!(mock.property(0x4008), 3);
        assert_eq!(
            mock.transactions()
                .iter()
                .filter(|t| t.direction == DIR_READ)
                .count(),
            0
        );
    }

    #[test]
    fn test_move_trigger_event() {
        let (mock, card) = card();
        let s = card.lock();
        s.set_trigger_events(0, &[0x0f]).unwrap();
        mock.clear_log();
        s.move_trigger_event(0x0f, 0, 1).unwrap();
        assert_eq!(mock.property(0x4000), u16::from(NO_EVENT));
        assert_eq!(mock.property(0x4008), 0x0f);
        let writes: Vec<_> = mock
            .transactions()
            .into_iter()
            .filter(|t| t.direction == DIR_WRITE)
            .collect();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].mailbox, 0x4000);
        assert_eq!(writes[0].count, 16);
    }

    #[test]
    fn test_move_trigger_event_to_full_level() {
        let (mock, card) = card();
        let s = card.lock();
        s.set_trigger_events(0, &[0x0f]).unwrap();
        let full: Vec<u8> = (1..=8).collect();
        s.set_trigger_events(1, &full).unwrap();
        mock.clear_log();

        let err = s.move_trigger_event(0x0f, 0, 1).unwrap_err();
        assert!(matches!(
            err,
            Error::OutOfRange(OutOfRange {
                kind: Bound::Length,
                ..
            })
        ));
        assert!(mock
            .transactions()
            .iter()
            .all(|t| t.direction == DIR_READ));
        assert_eq!(mock.property(0x4000), 0x0f);
        let level: Vec<u16> = (0x4008..0x4010).map(|a| mock.property(a)).collect();
        assert_eq!(level, (1..=8).collect::<Vec<u16>>());

        // An event that's already on the full level stays put
        s.move_trigger_event(0x03, 1, 1).unwrap();
        assert_eq!(mock.property(0x400a), 0x03);
    }

    #[test]
    fn test_reset_power_supply_pulses() {
        let (mock, card) = card();
        card.lock().reset_power_supply(2).unwrap();
        let pulses: Vec<_> = mock
            .transactions()
            .iter()
            .map(|t| (t.mailbox, t.data.clone()))
            .collect();
        assert_eq!(pulses, [(0x2a03, vec![1]), (0x2a03, vec![0])]);
    }

    #[test]
    fn test_dac_guard() {
        let (mock, card) = card();
        let s = card.lock();
        mock.set_property(0x1a20, 0x0100);
        let err = s.set_dac(1, i16::MAX).unwrap_err();
        assert!(matches!(err, Error::StillActive { channel } if channel.index() == 1));
        let txs = mock.transactions();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].mailbox, 0x1a20);

        mock.set_property(0x1a20, 0x0400);
        s.set_dac(1, i16::MIN).unwrap();
        assert_eq!(mock.property(0x1a04), 0x8000);
        assert_eq!(s.dac(1).unwrap(), i16::MIN);
    }

    #[test]
    fn test_dac_guard_disabled() {
        let (mock, card) = card_with(Config {
            guard_dac_writes: false,
            ..Config::default()
        });
        mock.set_property(0x0a20, 0x0100);
        card.lock().set_dac(0, 0x7fff).unwrap();
        assert_eq!(mock.transactions().len(), 1);
        assert_eq!(mock.property(0x0a04), 0x7fff);
    }

    #[test]
    fn test_power_supply_status() {
        let (mock, card) = card();
        mock.set_property(0x3a20, 0x24ff);
        let sts = card.lock().power_supply_status(3).unwrap();
        assert!(sts.enabled);
        assert!(sts.resetting);
        assert_eq!(sts.inputs, 0xff);
    }

    #[test]
    fn test_card_wide_readouts() {
        let (mock, card) = card();
        let s = card.lock();
        assert_eq!(s.module_id().unwrap(), 473);
        assert_eq!(s.firmware_version().unwrap(), Revision(0x0012));
        assert_eq!(s.fpga_version().unwrap(), Revision(0x0021));
        mock.set_property(0x4211, 0x29);
        assert_eq!(s.last_tclk_event().unwrap(), 0x29);
        s.set_tclk_interrupt_enable(true).unwrap();
        assert!(s.tclk_interrupt_enable().unwrap());
        assert_eq!(mock.property(0x4200), 1);
    }

    #[test]
    fn test_configure_level() {
        let (mock, card) = card();
        let setup = LevelSetup {
            ramp: 3,
            scale_factor: 1,
            offset: 2,
            delay: 100,
            events: vec![0x0f],
        };
        card.lock().configure_level(1, 4, &setup).unwrap();
        assert_eq!(mock.property(0x1804), 3);
        assert_eq!(mock.property(0x1844), 1);
        assert_eq!(mock.property(0x1884), 2);
        assert_eq!(mock.property(0x18e4), 100);
        assert_eq!(mock.property(0x4020), 0x0f);
    }

    #[test]
    fn test_configure_level_conflict_writes_nothing() {
        let (mock, card) = card();
        let s = card.lock();
        s.set_trigger_events(0, &[0x0f]).unwrap();
        mock.clear_log();
        let setup = LevelSetup {
            ramp: 3,
            scale_factor: 1,
            offset: 2,
            delay: 100,
            events: vec![0x0f],
        };
        let err = s.configure_level(1, 4, &setup).unwrap_err();
        assert!(matches!(
            err,
            Error::BadSetting {
                event: 0x0f,
                slot: 0
            }
        ));
        assert!(mock
            .transactions()
            .iter()
            .all(|t| t.direction == DIR_READ));
        for addr in [0x1804, 0x1844, 0x1884, 0x18e4] {
            assert_eq!(mock.property(addr), 0, "{addr:#06x}");
        }
        assert_eq!(mock.property(0x4020), u16::from(NO_EVENT));
    }

    #[test]
    fn test_vme_data_bus_diag() {
        let (mock, card) = card();
        let s = card.lock();
        s.set_vme_data_bus_diag(0xa5a5).unwrap();
        let mut out = [0; 11];
        s.vme_data_bus_diag(&mut out).unwrap();
        assert_eq!(out[0], 0xa5a5);
        assert_eq!(mock.transactions()[1].count, 11);
    }

    #[test]
    fn test_data_buffer() {
        let (mock, card) = card();
        let s = card.lock();
        let buf = s.data_buffer();
        buf.write(127, 0x1234).unwrap();
        assert_eq!(buf.read(127).unwrap(), 0x1234);
        assert_eq!(mock.register(data_word(127)), 0x1234);
        assert!(buf.read(128).is_err());
    }

    #[test]
    fn test_reset_card() {
        let (mock, card) = card();
        card.lock().reset_card();
        assert_eq!(mock.register(RESET), 1);
    }

    #[test]
    fn test_unresponsive_accessor() {
        let (mock, card) = card_with(Config {
            transaction_timeout: std::time::Duration::from_millis(5),
            ..Config::default()
        });
        mock.set_responsive(false);
        assert!(matches!(
            card.lock().adc(2),
            Err(Error::Unresponsive { mailbox: 0x2a11 })
        ));
    }
}
