//! Mock transport that simulates a V473, useful for testing the driver without hardware

use super::{
    Error,
    InterruptHandler,
    Transport,
};
use crate::{
    core::{
        NO_EVENT,
        SLOTS_PER_LEVEL,
        TRIGGER_SLOTS,
    },
    regs::{
        data_word,
        COUNT,
        DIR_DONE,
        DIR_READ,
        DIR_WRITE,
        IRQ_ENABLE,
        IRQ_MASK,
        IRQ_SOURCE,
        MAILBOX,
        MODULE_ID,
        READ_WRITE,
    },
    Property,
};
use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
};

const DONE: u16 = 0x0010;
const COMMAND_ERROR: u16 = 0x8000;

/// One mailbox transaction as the simulated firmware saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub mailbox: u16,
    pub count: u16,
    /// The value written to the direction register
    pub direction: u16,
    /// The words that moved through the data buffer
    pub data: Vec<u16>,
}

#[derive(Debug)]
struct State {
    registers: HashMap<usize, u16>,
    properties: HashMap<u16, u16>,
    transactions: Vec<Transaction>,
    register_writes: usize,
    responsive: bool,
    sticky_clears: usize,
    tclk_event: Option<u8>,
    refuse_connect: bool,
}

impl Default for State {
    fn default() -> Self {
        let mut properties = HashMap::from([
            (Property::ModuleId.base(), MODULE_ID),
            (Property::FirmwareVersion.base(), 0x0012),
            (Property::FpgaVersion.base(), 0x0021),
        ]);
        for slot in 0..TRIGGER_SLOTS {
            properties.insert(Property::TriggerMap.base() + slot as u16, NO_EVENT.into());
        }
        Self {
            registers: HashMap::default(),
            properties,
            transactions: vec![],
            register_writes: 0,
            responsive: true,
            sticky_clears: 0,
            tclk_event: None,
            refuse_connect: false,
        }
    }
}

impl State {
    fn register(&self, offset: usize) -> u16 {
        self.registers.get(&offset).copied().unwrap_or_default()
    }

    fn property(&mut self, addr: u16) -> u16 {
        if addr == Property::ActiveInterruptLevel.base() {
            self.play_tclk();
        }
        self.properties.get(&addr).copied().unwrap_or_default()
    }

    /// The interrupt level whose trigger slots hold the simulated event becomes the active one
    fn play_tclk(&mut self) {
        let Some(event) = self.tclk_event else {
            return;
        };
        let base = Property::TriggerMap.base();
        let slot = (0..TRIGGER_SLOTS as u16)
            .find(|s| self.properties.get(&(base + s)).copied() == Some(event.into()));
        if let Some(slot) = slot {
            self.properties.insert(
                Property::ActiveInterruptLevel.base(),
                slot / SLOTS_PER_LEVEL as u16,
            );
        }
    }

    fn irq_pending(&self) -> bool {
        self.register(IRQ_ENABLE) == 1 && self.register(IRQ_SOURCE) & self.register(IRQ_MASK) != 0
    }

    fn raise(&mut self, bits: u16) -> bool {
        let sts = self.register(IRQ_SOURCE) | bits;
        self.registers.insert(IRQ_SOURCE, sts);
        self.irq_pending()
    }

    /// Services the transaction that was just started, returns true if an interrupt should fire
    fn execute(&mut self, direction: u16) -> bool {
        if !self.responsive {
            return false;
        }
        if direction != DIR_READ && direction != DIR_WRITE {
            return self.raise(COMMAND_ERROR);
        }
        let mailbox = self.register(MAILBOX);
        let count = self.register(COUNT);
        let mut data = Vec::with_capacity(count.into());
        for i in 0..count {
            let addr = mailbox.wrapping_add(i);
            let offset = data_word(i.into());
            if direction == DIR_WRITE {
                let word = self.register(offset);
                self.properties.insert(addr, word);
                data.push(word);
            } else {
                let word = self.property(addr);
                self.registers.insert(offset, word);
                data.push(word);
            }
        }
        self.transactions.push(Transaction {
            mailbox,
            count,
            direction,
            data,
        });
        self.registers.insert(READ_WRITE, DIR_DONE);
        self.raise(DONE)
    }
}

/// A simulated card. Clones share the same simulated hardware, so a test can keep one while
/// handing another to the driver.
#[derive(Clone, Default)]
pub struct Mock {
    state: Arc<Mutex<State>>,
    handler: Arc<Mutex<Option<(u8, InterruptHandler)>>>,
}

impl fmt::Debug for Mock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mock")
            .field("state", &self.state)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Mock {
    /// Construct a new simulated card that identifies itself as a V473
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs the attached interrupt handler, if any. The handler lock is released first because
    /// the handler itself accesses registers.
    fn interrupt(&self) {
        let handler = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(_, h)| h.clone());
        if let Some(handler) = handler {
            handler();
        }
    }

    /// When false, the firmware ignores transactions and never raises the done interrupt
    pub fn set_responsive(&self, responsive: bool) {
        self.state().responsive = responsive;
    }

    /// Sets a property word directly in the simulated firmware
    pub fn set_property(&self, addr: u16, value: u16) {
        self.state().properties.insert(addr, value);
    }

    /// Reads a property word directly from the simulated firmware
    #[must_use]
    pub fn property(&self, addr: u16) -> u16 {
        self.state().property(addr)
    }

    /// Reads a register without counting as a bus cycle
    #[must_use]
    pub fn register(&self, offset: usize) -> u16 {
        self.state().register(offset)
    }

    /// Every transaction serviced so far
    #[must_use]
    pub fn transactions(&self) -> Vec<Transaction> {
        self.state().transactions.clone()
    }

    /// Number of register writes the driver has made
    #[must_use]
    pub fn register_writes(&self) -> usize {
        self.state().register_writes
    }

    /// Forget the transaction log
    pub fn clear_log(&self) {
        self.state().transactions.clear();
    }

    /// Latch interrupt source `bits`, interrupting if they're enabled
    pub fn raise(&self, bits: u16) {
        let fire = self.state().raise(bits);
        if fire {
            self.interrupt();
        }
    }

    /// The next `n` writes to the interrupt source register won't clear anything
    pub fn set_sticky_clears(&self, n: usize) {
        self.state().sticky_clears = n;
    }

    /// Simulate a TCLK stream of `event`: the active interrupt level follows whichever level the
    /// trigger map assigns it to
    pub fn simulate_tclk(&self, event: Option<u8>) {
        self.state().tclk_event = event;
    }

    /// Make interrupt attachment fail
    pub fn refuse_connect(&self, refuse: bool) {
        self.state().refuse_connect = refuse;
    }

    /// Whether an interrupt handler is attached
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Transport for Mock {
    fn read_word(&self, offset: usize) -> u16 {
        self.state().register(offset)
    }

    fn write_word(&self, offset: usize, value: u16) {
        let fire = {
            let mut state = self.state();
            state.register_writes += 1;
            match offset {
                IRQ_SOURCE => {
                    if state.sticky_clears > 0 {
                        state.sticky_clears -= 1;
                    } else {
                        let sts = state.register(IRQ_SOURCE) & !value;
                        state.registers.insert(IRQ_SOURCE, sts);
                    }
                    false
                }
                READ_WRITE => {
                    state.registers.insert(READ_WRITE, value);
                    state.execute(value)
                }
                IRQ_ENABLE => {
                    state.registers.insert(IRQ_ENABLE, value);
                    state.irq_pending()
                }
                _ => {
                    state.registers.insert(offset, value);
                    false
                }
            }
        };
        if fire {
            self.interrupt();
        }
    }

    fn connect_interrupt(&self, vector: u8, handler: InterruptHandler) -> Result<(), Error> {
        if self.state().refuse_connect {
            return Err(Error::VectorInUse(vector));
        }
        let mut slot = self.handler.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(Error::VectorInUse(vector));
        }
        *slot = Some((vector, handler));
        Ok(())
    }

    fn disconnect_interrupt(&self, vector: u8) -> Result<(), Error> {
        let mut slot = self.handler.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some((v, _)) if *v == vector => {
                *slot = None;
                Ok(())
            }
            _ => Err(Error::VectorNotConnected(vector)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{
        AtomicUsize,
        Ordering,
    };

    fn start(mock: &Mock, mailbox: u16, count: u16, direction: u16) {
        mock.write_word(MAILBOX, mailbox);
        mock.write_word(COUNT, count);
        mock.write_word(READ_WRITE, direction);
    }

    #[test]
    fn test_identify() {
        let mock = Mock::new();
        start(&mock, 0xff00, 1, DIR_READ);
        assert_eq!(mock.read_word(READ_WRITE), DIR_DONE);
        assert_eq!(mock.read_word(data_word(0)), MODULE_ID);
    }

    #[test]
    fn test_write_read() {
        let mock = Mock::new();
        mock.write_word(data_word(0), 7);
        mock.write_word(data_word(1), 8);
        start(&mock, 0x0800, 2, DIR_WRITE);
        assert_eq!(mock.property(0x0801), 8);
        mock.write_word(data_word(0), 0);
        mock.write_word(data_word(1), 0);
        start(&mock, 0x0800, 2, DIR_READ);
        assert_eq!(mock.read_word(data_word(0)), 7);
        assert_eq!(mock.read_word(data_word(1)), 8);
        assert_eq!(mock.transactions().len(), 2);
    }

    #[test]
    fn test_unresponsive() {
        let mock = Mock::new();
        mock.set_responsive(false);
        start(&mock, 0xff00, 1, DIR_READ);
        assert_eq!(mock.read_word(READ_WRITE), DIR_READ);
        assert!(mock.transactions().is_empty());
    }

    #[test]
    fn test_interrupt_delivery() {
        let mock = Mock::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        mock.connect_interrupt(
            0x40,
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
        // Masked off, nothing happens
        start(&mock, 0xff00, 1, DIR_READ);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        mock.write_word(IRQ_MASK, 0xd21f);
        mock.write_word(IRQ_ENABLE, 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        mock.write_word(IRQ_SOURCE, 0xffff);
        assert_eq!(mock.register(IRQ_SOURCE), 0);
        mock.raise(0x0001);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_sticky_clears() {
        let mock = Mock::new();
        mock.raise(0x0010);
        mock.set_sticky_clears(1);
        mock.write_word(IRQ_SOURCE, 0x0010);
        assert_eq!(mock.register(IRQ_SOURCE), 0x0010);
        mock.write_word(IRQ_SOURCE, 0x0010);
        assert_eq!(mock.register(IRQ_SOURCE), 0);
    }

    #[test]
    fn test_vectors() {
        let mock = Mock::new();
        assert!(mock.disconnect_interrupt(1).is_err());
        mock.connect_interrupt(1, Arc::new(|| {})).unwrap();
        assert!(mock.connect_interrupt(1, Arc::new(|| {})).is_err());
        assert!(mock.disconnect_interrupt(2).is_err());
        mock.disconnect_interrupt(1).unwrap();
        assert!(!mock.is_connected());
    }

    #[test]
    fn test_tclk_follows_trigger_map() {
        let mock = Mock::new();
        mock.simulate_tclk(Some(0x0f));
        mock.set_property(0x4000 + 8, 0x0f);
        assert_eq!(mock.property(0x4210), 1);
        mock.set_property(0x4000 + 8, NO_EVENT.into());
        mock.set_property(0x4000, 0x0f);
        assert_eq!(mock.property(0x4210), 0);
    }
}
