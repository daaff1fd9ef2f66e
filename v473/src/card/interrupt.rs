//! The card's interrupt service routine and the hooks it reports faults through

use super::Shared;
use crate::{
    config::ResidualPolicy,
    core::Channel,
    regs::{
        Address,
        IrqSource,
    },
    transport::Transport,
};
use tracing::{
    debug,
    warn,
};

/// Receives the fault conditions the card reports through its interrupt. Every method defaults to
/// logging the condition, so implementors only override what they act on.
///
/// These run in interrupt context, so they must not block or start a transaction.
pub trait FaultHandler: Send + Sync {
    fn on_command_error(&self) {
        warn!("The card rejected a mailbox command");
    }

    fn on_calculation_error(&self) {
        warn!("Ramp calculation overflow");
    }

    fn on_missing_tclk(&self) {
        warn!("TCLK is missing");
    }

    fn on_tracking_error(&self) {
        warn!("Power supply tracking error");
    }

    fn on_power_supply_fault(&self, channel: Channel) {
        warn!(%channel, "Power supply fault");
    }
}

/// The default [`FaultHandler`], which only logs
#[derive(Debug, Default, Copy, Clone)]
pub struct LogFaults;

impl FaultHandler for LogFaults {}

/// Acknowledge every source that's set, then dispatch them. The acknowledge happens first so a
/// source that re-asserts during dispatch latches again instead of being lost.
pub(super) fn service<T: Transport>(shared: &Shared<T>) {
    let bus = &shared.transport;
    let source = IrqSource::addr();
    let raw = bus.read_word(source);
    let sts = IrqSource::from_word(raw);
    let handled = sts.to_word();
    debug!(status = format_args!("{raw:#06x}"), "Interrupt");
    bus.write_word(source, handled);

    let faults = &shared.faults;
    if sts.command_error {
        faults.on_command_error();
    }
    if sts.calculation_error {
        faults.on_calculation_error();
    }
    if sts.missing_tclk {
        faults.on_missing_tclk();
    }
    if sts.tracking_error {
        faults.on_tracking_error();
    }
    if sts.done {
        shared.done.raise();
    }
    for (ch, &fault) in sts.ps_faults().iter().enumerate().rev() {
        if fault {
            if let Ok(channel) = Channel::new(ch) {
                faults.on_power_supply_fault(channel);
            }
        }
    }

    let mut residual = handled & bus.read_word(source);
    if residual == 0 {
        return;
    }
    match shared.residual {
        ResidualPolicy::Report => {
            debug!(
                residual = format_args!("{residual:#06x}"),
                "Sources still set leaving the interrupt handler"
            );
        }
        ResidualPolicy::Reclear { max_passes } => {
            let mut passes = 0;
            while residual != 0 && passes < max_passes {
                bus.write_word(source, residual);
                residual &= bus.read_word(source);
                passes += 1;
            }
            if residual != 0 {
                warn!(
                    residual = format_args!("{residual:#06x}"),
                    passes, "Interrupt sources won't clear"
                );
            }
        }
    }
}
