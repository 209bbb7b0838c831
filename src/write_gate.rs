use core::cell::RefCell;
use core::future::poll_fn;
use core::task::Poll;

use critical_section::{CriticalSection, Mutex};
use embassy_sync::waitqueue::MultiWakerRegistration;

use crate::WriteStatus;

/// Finished transactions whose outcome is still kept for a late waiter.
const OUTCOMES: usize = 4;
const WAITERS: usize = 4;

/// One write transaction, from admission to release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WriteTicket(u32);

struct GateState {
    busy: bool,
    issued: u32,
    finished: u32,
    outcomes: [WriteStatus; OUTCOMES],
    waiters: MultiWakerRegistration<WAITERS>,
}

impl GateState {
    /// `None` while the transaction runs.
    fn outcome(&self, ticket: WriteTicket) -> Option<WriteStatus> {
        let behind = self.finished.wrapping_sub(ticket.0);
        if (behind as i32) < 0 {
            None
        } else if (behind as usize) < OUTCOMES {
            Some(self.outcomes[ticket.0 as usize % OUTCOMES])
        } else {
            // Overwritten by later transactions.
            Some(WriteStatus::Inactive)
        }
    }
}

/// Single slot admission for host-to-device writes.
///
/// Taken when a write is initiated and given back exactly once when the
/// transaction ends. Each admission hands out a [`WriteTicket`], and the
/// outcome recorded on release stays tied to that ticket, so a later write
/// taking the slot cannot hide it from the earlier writer.
pub struct WriteGate {
    state: Mutex<RefCell<GateState>>,
}

impl WriteGate {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(GateState {
                busy: false,
                issued: 0,
                finished: 0,
                outcomes: [WriteStatus::Inactive; OUTCOMES],
                waiters: MultiWakerRegistration::new(),
            })),
        }
    }

    pub fn try_acquire(&self, cs: CriticalSection) -> Option<WriteTicket> {
        let mut s = self.state.borrow_ref_mut(cs);
        if s.busy {
            return None;
        }

        s.busy = true;
        s.issued = s.issued.wrapping_add(1);
        Some(WriteTicket(s.issued))
    }

    pub fn release(&self, cs: CriticalSection, status: WriteStatus) {
        let mut s = self.state.borrow_ref_mut(cs);
        if !s.busy {
            return;
        }

        s.busy = false;
        s.finished = s.issued;
        let slot = s.finished as usize % OUTCOMES;
        s.outcomes[slot] = status;
        s.waiters.wake();
    }

    pub fn is_available(&self, cs: CriticalSection) -> bool {
        !self.state.borrow_ref(cs).busy
    }

    /// Outcome of the transaction `ticket` was issued for.
    pub async fn wait_outcome(&self, ticket: WriteTicket) -> WriteStatus {
        poll_fn(|cx| {
            critical_section::with(|cs| {
                let mut s = self.state.borrow_ref_mut(cs);
                match s.outcome(ticket) {
                    Some(status) => Poll::Ready(status),
                    None => {
                        s.waiters.register(cx.waker());
                        Poll::Pending
                    }
                }
            })
        })
        .await
    }

    pub async fn wait_available(&self) {
        poll_fn(|cx| {
            critical_section::with(|cs| {
                let mut s = self.state.borrow_ref_mut(cs);
                if !s.busy {
                    return Poll::Ready(());
                }

                s.waiters.register(cx.waker());
                Poll::Pending
            })
        })
        .await
    }
}
