//! Double-buffered ramp playback
//!
//! Two interrupt levels take turns. While one level's ramp tables play, the next waveform is
//! written into the other level's tables, the TCLK event is handed over to it, and the player
//! waits until the card has actually switched before the now idle tables can be touched again.

use crate::{
    card::{
        Card,
        LevelSetup,
        RampEntry,
    },
    transport::Transport,
};
use anyhow::{
    bail,
    ensure,
};
use fixed::types::I9F7;
use std::time::{
    Duration,
    Instant,
};
use tracing::debug;

/// How a [`RampPlayer`] uses the card
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSetup {
    /// Channels that play, one waveform each
    pub channels: Vec<usize>,
    /// The TCLK event that starts a ramp
    pub event: u8,
    /// The two interrupt levels that take turns
    pub levels: [usize; 2],
    /// The ramp table each level plays
    pub ramps: [usize; 2],
    /// How long the card may take to pick up a new level
    pub switch_timeout: Duration,
}

impl Default for PlayerSetup {
    fn default() -> Self {
        Self {
            channels: vec![0, 1],
            event: 0x0f,
            levels: [0, 1],
            ramps: [1, 2],
            switch_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug)]
pub struct RampPlayer<'c, T: Transport> {
    card: &'c Card<T>,
    setup: PlayerSetup,
    /// Which of the two levels is currently selected by the event
    playing: usize,
}

impl<'c, T: Transport> RampPlayer<'c, T> {
    /// Program both levels on every channel, hand the event to the first level and start the
    /// channels
    /// # Errors
    /// Returns an error on a bad setup or if the card doesn't respond
    pub fn new(card: &'c Card<T>, setup: PlayerSetup) -> anyhow::Result<Self> {
        ensure!(!setup.channels.is_empty(), "No channels to play on");
        ensure!(
            setup.levels[0] != setup.levels[1],
            "The two interrupt levels must differ"
        );
        ensure!(
            setup.ramps[0] != setup.ramps[1],
            "The two ramp tables must differ"
        );

        let unity = card.config().scale_factor_indexing.sub_index(0);
        let s = card.lock();
        s.set_tclk_interrupt_enable(true)?;
        for &ch in &setup.channels {
            s.waveform_enable(ch, false)?;
            s.set_scale_factor(ch, 0, I9F7::ONE)?;
            for (&level, &ramp) in setup.levels.iter().zip(&setup.ramps) {
                let level_setup = LevelSetup {
                    ramp: ramp.try_into()?,
                    scale_factor: unity.try_into()?,
                    ..LevelSetup::default()
                };
                s.configure_level(ch, level, &level_setup)?;
            }
        }
        s.set_trigger_events(setup.levels[0], &[setup.event])?;
        for &ch in &setup.channels {
            s.waveform_enable(ch, true)?;
        }
        Ok(Self {
            card,
            setup,
            playing: 0,
        })
    }

    /// The interrupt level the event currently selects
    #[must_use]
    pub fn playing_level(&self) -> usize {
        self.setup.levels[self.playing]
    }

    /// Load one waveform per channel into the idle level, switch to it, and wait until the card
    /// has switched
    /// # Errors
    /// Returns an error on a bad waveform, if the card doesn't respond or doesn't switch in time
    pub fn play(&mut self, waveforms: &[&[RampEntry]]) -> anyhow::Result<()> {
        ensure!(
            waveforms.len() == self.setup.channels.len(),
            "Expected {} waveforms, got {}",
            self.setup.channels.len(),
            waveforms.len()
        );
        let idle = 1 - self.playing;
        let vacated = self.setup.levels[self.playing];
        {
            let s = self.card.lock();
            for (&ch, waveform) in self.setup.channels.iter().zip(waveforms) {
                s.set_ramp(ch, self.setup.ramps[idle], 0, waveform)?;
            }
            s.move_trigger_event(self.setup.event, vacated, self.setup.levels[idle])?;
        }
        self.playing = idle;
        self.wait_for_switch(vacated)
    }

    /// Poll the active level until it's no longer `vacated`. The card is unlocked between polls.
    fn wait_for_switch(&self, vacated: usize) -> anyhow::Result<()> {
        let start = Instant::now();
        loop {
            let active = usize::from(self.card.lock().active_interrupt_level()?);
            if active != vacated {
                debug!(
                    active,
                    elapsed_us = start.elapsed().as_micros() as u64,
                    "Ramp switched"
                );
                return Ok(());
            }
            if start.elapsed() >= self.setup.switch_timeout {
                bail!("The card is still playing interrupt level {vacated}");
            }
            self.card.delay(self.card.config().poll_interval);
        }
    }

    /// Stop the channels and release the event
    /// # Errors
    /// Returns an error if the card doesn't respond
    pub fn stop(self) -> anyhow::Result<()> {
        let s = self.card.lock();
        for &ch in &self.setup.channels {
            s.waveform_enable(ch, false)?;
        }
        s.set_trigger_events(self.playing_level(), &[])?;
        Ok(())
    }
}
