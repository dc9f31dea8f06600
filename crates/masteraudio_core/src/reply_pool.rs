//! Reusable reply slots for synchronous calls
//!
//! One slot per in-flight call. A slot is a bounded(1) channel pair; the
//! worker gets a clone of the sender inside the message and the caller waits
//! on the receiver. Slots go back to the pool after a successful wait. A slot
//! whose wait timed out is dropped, since a late reply could still land in it.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::time::Duration;

use crate::message::Reply;

pub(crate) struct ReplySlot {
    tx: Sender<Reply>,
    rx: Receiver<Reply>,
}

impl ReplySlot {
    fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(1);
        Self { tx, rx }
    }

    pub(crate) fn sender(&self) -> Sender<Reply> {
        self.tx.clone()
    }

    pub(crate) fn wait(&self, timeout: Duration) -> Result<Reply, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

pub(crate) struct ReplyPool {
    slots: Mutex<Vec<ReplySlot>>,
    retain: usize,
}

impl ReplyPool {
    pub(crate) fn new(retain: usize) -> Self {
        Self {
            slots: Mutex::new((0..retain).map(|_| ReplySlot::new()).collect()),
            retain,
        }
    }

    pub(crate) fn acquire(&self) -> ReplySlot {
        self.slots.lock().pop().unwrap_or_else(ReplySlot::new)
    }

    /// Return a slot whose reply has been consumed
    pub(crate) fn release(&self, slot: ReplySlot) {
        while slot.rx.try_recv().is_ok() {}
        let mut slots = self.slots.lock();
        if slots.len() < self.retain {
            slots.push(slot);
        }
    }

    #[cfg(test)]
    pub(crate) fn available(&self) -> usize {
        self.slots.lock().len()
    }

    /// Drop every retained slot
    pub(crate) fn clear(&self) {
        self.slots.lock().clear();
    }
}
