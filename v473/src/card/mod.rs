//! The card object: lifecycle, the mailbox transaction engine and the lock that serialises it
//!
//! Every property of the V473 is reached through its mailbox. A transaction writes the property
//! address, the word count and the direction, then waits for the firmware to raise the "done"
//! interrupt. Only one transaction may be in flight, so property access goes through a
//! [`Session`], which holds the card's lock for as long as it lives.

pub mod interrupt;
mod properties;
mod signal;

pub use interrupt::{
    FaultHandler,
    LogFaults,
};
pub use properties::{
    DataBuffer,
    LevelSetup,
    RampEntry,
    SineMode,
};

use crate::{
    config::{
        Config,
        ResidualPolicy,
    },
    core::{
        Channel,
        OutOfRange,
        Property,
    },
    regs::{
        data_word,
        Revision,
        COUNT,
        DATA_BUFFER_WORDS,
        DIR_DONE,
        DIR_READ,
        DIR_WRITE,
        IRQ_ENABLE,
        IRQ_MASK,
        IRQ_SOURCE,
        IRQ_STATUS,
        MAILBOX,
        MODULE_ID,
        READ_WRITE,
    },
    transport::{
        self,
        InterruptHandler,
        Transport,
    },
};
use signal::Completion;
use std::{
    fmt,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
    time::{
        Duration,
        Instant,
    },
};
use thiserror::Error;
use tracing::{
    info,
    trace,
    warn,
};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    OutOfRange(#[from] OutOfRange),
    #[error("The card didn't complete the transaction at mailbox {mailbox:#06x}")]
    Unresponsive { mailbox: u16 },
    #[error("TCLK event {event:#04x} is already assigned to trigger slot {slot}")]
    BadSetting { event: u8, slot: usize },
    #[error("The power supply on channel {channel} is still transitioning")]
    StillActive { channel: Channel },
    #[error("No V473 answered the identification transaction (module ID {module_id:?})")]
    NotPresent { module_id: Option<u16> },
    #[error("Mailbox {mailbox:#06x} returned {value:#06x}, which isn't a valid setting")]
    Unexpected { mailbox: u16, value: u16 },
    #[error("Couldn't attach to interrupt vector {vector}")]
    InterruptAttach {
        vector: u8,
        #[source]
        source: transport::Error,
    },
    #[error(transparent)]
    Transport(#[from] transport::Error),
}

impl Error {
    /// Whether this error was raised by argument validation, before any hardware was touched
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(self, Error::OutOfRange(_))
    }
}

/// State shared between the card and its interrupt handler
pub(crate) struct Shared<T> {
    transport: T,
    done: Completion,
    faults: Box<dyn FaultHandler>,
    residual: ResidualPolicy,
}

/// A V473 at one VME address
pub struct Card<T: Transport> {
    shared: Arc<Shared<T>>,
    lock: Mutex<()>,
    vector: u8,
    config: Config,
}

impl<T: Transport> fmt::Debug for Card<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Card")
            .field("vector", &self.vector)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T: Transport + 'static> Card<T> {
    /// Identify the card behind `transport` and attach it to interrupt `vector`, logging faults
    /// with [`LogFaults`]
    /// # Errors
    /// Returns an error if no V473 answers or the interrupt can't be attached
    pub fn new(transport: T, vector: u8, config: Config) -> Result<Self, Error> {
        Self::with_fault_handler(transport, vector, config, LogFaults)
    }

    /// Like [`Card::new`], reporting faults to `faults`
    /// # Errors
    /// Returns an error if no V473 answers or the interrupt can't be attached
    pub fn with_fault_handler(
        transport: T,
        vector: u8,
        config: Config,
        faults: impl FaultHandler + 'static,
    ) -> Result<Self, Error> {
        let shared = Arc::new(Shared {
            transport,
            done: Completion::default(),
            faults: Box::new(faults),
            residual: config.residual,
        });
        let bus = &shared.transport;

        // Interrupts aren't set up yet, so identification is polled
        let module_id = polled_read(bus, Property::ModuleId, &config);
        if module_id != Some(MODULE_ID) {
            return Err(Error::NotPresent { module_id });
        }
        let firmware = polled_read(bus, Property::FirmwareVersion, &config)
            .ok_or(Error::NotPresent { module_id })?;
        let fpga = polled_read(bus, Property::FpgaVersion, &config)
            .ok_or(Error::NotPresent { module_id })?;
        info!(
            firmware = %Revision(firmware),
            fpga = %Revision(fpga),
            vector,
            "Found V473"
        );

        // The handler only holds a weak reference, the transport owning it would otherwise keep
        // the shared state alive forever
        let weak = Arc::downgrade(&shared);
        let handler: InterruptHandler = Arc::new(move || {
            if let Some(shared) = weak.upgrade() {
                interrupt::service(&shared);
            }
        });
        bus.connect_interrupt(vector, handler)
            .map_err(|source| Error::InterruptAttach { vector, source })?;

        // Nothing below can fail, so there's no partially constructed card to detach
        bus.write_word(IRQ_STATUS, vector.into());
        bus.write_word(IRQ_SOURCE, 0xffff);
        bus.write_word(IRQ_MASK, config.irq_mask);
        bus.write_word(IRQ_ENABLE, 1);

        Ok(Self {
            shared,
            lock: Mutex::new(()),
            vector,
            config,
        })
    }
}

/// Runs a single-word read transaction without interrupts, polling the direction register
fn polled_read<T: Transport>(bus: &T, property: Property, config: &Config) -> Option<u16> {
    let mailbox = property.base();
    bus.write_word(MAILBOX, mailbox);
    bus.write_word(COUNT, 1);
    bus.write_word(READ_WRITE, DIR_READ);
    let start = Instant::now();
    while bus.read_word(READ_WRITE) != DIR_DONE {
        if start.elapsed() >= config.detect_timeout {
            warn!(
                mailbox = format_args!("{mailbox:#06x}"),
                "Polled transaction timed out"
            );
            return None;
        }
        bus.delay(config.poll_interval);
    }
    if bus.read_word(COUNT) != 1 {
        return None;
    }
    Some(bus.read_word(data_word(0)))
}

impl<T: Transport> Card<T> {
    /// Acquire the card's lock. Property accessors live on the returned [`Session`].
    pub fn lock(&self) -> Session<'_, T> {
        Session {
            card: self,
            _guard: self.lock.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Enable or disable interrupt generation
    pub fn generate_interrupts(&self, enable: bool) {
        self.bus().write_word(IRQ_ENABLE, enable.into());
    }

    /// The raw interrupt source register
    #[must_use]
    pub fn irq_source(&self) -> u16 {
        self.bus().read_word(IRQ_SOURCE)
    }

    #[must_use]
    pub fn vector(&self) -> u8 {
        self.vector
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Block for `duration` using the transport's delay
    pub fn delay(&self, duration: Duration) {
        self.bus().delay(duration);
    }

    fn bus(&self) -> &T {
        &self.shared.transport
    }
}

impl<T: Transport> Drop for Card<T> {
    fn drop(&mut self) {
        self.generate_interrupts(false);
        if let Err(e) = self.bus().disconnect_interrupt(self.vector) {
            warn!(%e, vector = self.vector, "Failed to detach the interrupt handler");
        }
    }
}

/// Exclusive access to a card. Holding one proves no other transaction is in flight.
pub struct Session<'a, T: Transport> {
    card: &'a Card<T>,
    _guard: MutexGuard<'a, ()>,
}

impl<T: Transport> fmt::Debug for Session<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("card", self.card).finish()
    }
}

impl<'a, T: Transport> Session<'a, T> {
    /// The card this session locks
    #[must_use]
    pub fn card(&self) -> &'a Card<T> {
        self.card
    }

    fn bus(&self) -> &T {
        self.card.bus()
    }

    /// Run one mailbox transaction, returning whether the card signalled completion in time
    fn transact(&self, mailbox: u16, count: usize, direction: u16) -> bool {
        let bus = self.bus();
        let done = &self.card.shared.done;
        done.reset();
        bus.write_word(MAILBOX, mailbox);
        bus.write_word(COUNT, count as u16);
        let start = Instant::now();
        bus.write_word(READ_WRITE, direction);
        let ok = done.wait(self.card.config.transaction_timeout);
        trace!(
            mailbox = format_args!("{mailbox:#06x}"),
            count,
            direction,
            elapsed_us = start.elapsed().as_micros() as u64,
            ok,
            "Transaction"
        );
        ok
    }

    /// Read `out.len()` words starting at `mailbox` into `out`
    fn read_words(&self, mailbox: u16, out: &mut [u16]) -> Result<(), Error> {
        OutOfRange::length("word count", out.len(), DATA_BUFFER_WORDS + 1)?;
        if out.is_empty() {
            return Ok(());
        }
        if !self.transact(mailbox, out.len(), DIR_READ) {
            return Err(Error::Unresponsive { mailbox });
        }
        let bus = self.bus();
        for (i, word) in out.iter_mut().enumerate() {
            *word = bus.read_word(data_word(i));
        }
        Ok(())
    }

    /// Stage `data` in the buffer and write it starting at `mailbox`
    fn write_words(&self, mailbox: u16, data: &[u16]) -> Result<(), Error> {
        OutOfRange::length("word count", data.len(), DATA_BUFFER_WORDS + 1)?;
        if data.is_empty() {
            return Ok(());
        }
        let bus = self.bus();
        for (i, &word) in data.iter().enumerate() {
            bus.write_word(data_word(i), word);
        }
        if self.transact(mailbox, data.len(), DIR_WRITE) {
            Ok(())
        } else {
            Err(Error::Unresponsive { mailbox })
        }
    }
}
