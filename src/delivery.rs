use core::cell::Cell;

use critical_section::{CriticalSection, Mutex};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};

/// Invoked from interrupt context with every received byte.
pub type Callback = fn(u8);

/// Routes received bytes either to a callback or to a queue for polling
/// readers, never both.
pub struct Delivery<const QSIZE: usize> {
    callback: Mutex<Cell<Option<Callback>>>,
    enabled: Mutex<Cell<bool>>,
    queue: Channel<CriticalSectionRawMutex, u8, QSIZE>,
}

impl<const QSIZE: usize> Delivery<QSIZE> {
    pub const fn new() -> Self {
        Self {
            callback: Mutex::new(Cell::new(None)),
            enabled: Mutex::new(Cell::new(false)),
            queue: Channel::new(),
        }
    }

    pub fn deliver(&self, cs: CriticalSection, byte: u8) {
        match self.callback.borrow(cs).get() {
            Some(callback) if self.enabled.borrow(cs).get() => callback(byte),
            _ => self.push(byte),
        }
    }

    fn push(&self, byte: u8) {
        if self.queue.try_send(byte).is_err() {
            // Keep the freshest data.
            let _ = self.queue.try_receive();
            warn!("Receive queue full, dropping oldest byte");
            let _ = self.queue.try_send(byte);
        }
    }

    pub fn set_callback(&self, cs: CriticalSection, callback: Callback) {
        self.callback.borrow(cs).set(Some(callback));
    }

    pub fn enable(&self, cs: CriticalSection) {
        self.enabled.borrow(cs).set(true);
        self.drain();
    }

    pub fn disable(&self, cs: CriticalSection) {
        self.drain();
        self.enabled.borrow(cs).set(false);
    }

    fn drain(&self) {
        while self.queue.try_receive().is_ok() {}
    }

    pub async fn receive(&self) -> u8 {
        self.queue.receive().await
    }

    pub fn try_receive(&self) -> Option<u8> {
        self.queue.try_receive().ok()
    }
}
