//! One-shot completion signal shared between a waiting transaction and the interrupt handler

use std::{
    sync::{
        Condvar,
        Mutex,
        MutexGuard,
        PoisonError,
    },
    time::Duration,
};

#[derive(Debug, Default)]
pub(crate) struct Completion {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Completion {
    fn flag(&self) -> MutexGuard<'_, bool> {
        self.done.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Arm the signal. Must happen before the transaction is started so a fast card can't be
    /// missed.
    pub(crate) fn reset(&self) {
        *self.flag() = false;
    }

    pub(crate) fn raise(&self) {
        *self.flag() = true;
        self.cond.notify_one();
    }

    /// Wait at most `timeout` for [`Completion::raise`], returns whether it was raised
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        let (done, _) = self
            .cond
            .wait_timeout_while(self.flag(), timeout, |done| !*done)
            .unwrap_or_else(PoisonError::into_inner);
        *done
    }
}
