//! Per-card tunables. Everything a card needs is handed to it at construction.

use crate::regs::DEFAULT_IRQ_MASK;
use std::time::Duration;

const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_millis(40);
const DEFAULT_DETECT_TIMEOUT: Duration = Duration::from_millis(40);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// What the interrupt handler does with source bits that are still set after it clears them
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResidualPolicy {
    /// Log the residual bits and leave them for the next interrupt
    Report,
    /// Keep writing the residual bits back until they stay clear, at most `max_passes` times.
    /// The residual bits are not dispatched a second time.
    Reclear { max_passes: usize },
}

/// Which sub-index holds the scale factor for an interrupt level. Firmware revisions disagree.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScaleFactorIndexing {
    /// Scale factor 0 is reserved as unity, level `n` lives at sub-index `n + 1`
    ReservedUnity,
    /// Level `n` lives at sub-index `n`
    Direct,
}

impl ScaleFactorIndexing {
    #[must_use]
    pub fn sub_index(self, level: usize) -> usize {
        match self {
            ScaleFactorIndexing::ReservedUnity => level + 1,
            ScaleFactorIndexing::Direct => level,
        }
    }
}

/// Card configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// How long a transaction may wait for its completion interrupt
    pub transaction_timeout: Duration,
    /// How long the polled identification transactions may take during construction
    pub detect_timeout: Duration,
    /// Interval for polled waits
    pub poll_interval: Duration,
    /// Interrupt sources to unmask
    pub irq_mask: u16,
    /// Handling of bits that re-assert while the interrupt handler clears them
    pub residual: ResidualPolicy,
    /// Scale factor layout of the targeted firmware
    pub scale_factor_indexing: ScaleFactorIndexing,
    /// Refuse trigger map writes that would assign an event to two slots
    pub unique_trigger_events: bool,
    /// Refuse DAC writes while the power supply is transitioning
    pub guard_dac_writes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
            detect_timeout: DEFAULT_DETECT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            irq_mask: DEFAULT_IRQ_MASK,
            residual: ResidualPolicy::Report,
            scale_factor_indexing: ScaleFactorIndexing::ReservedUnity,
            unique_trigger_events: true,
            guard_dac_writes: true,
        }
    }
}
