use core::cell::{Ref, RefCell, RefMut};

use atomic::{Atomic, Ordering};
use critical_section::{CriticalSection, Mutex};
use heapless::Deque;

use crate::{receive::Receiver, transmit::Transmitter, Mode};

/// Which direction owns the clock edges, along with that direction's
/// progress through the frame.
#[derive(Debug, Clone, Copy)]
pub enum Link {
    Receiving(Receiver),
    Transmitting(Transmitter),
}

impl Link {
    pub const fn idle() -> Self {
        Link::Receiving(Receiver::new())
    }

    pub fn mode(&self) -> Mode {
        match self {
            Link::Receiving(_) => Mode::Read,
            Link::Transmitting(_) => Mode::Write,
        }
    }
}

pub struct StateHolder<const HISTORY_SIZE: usize> {
    link: Mutex<RefCell<Link>>,
    history: Mutex<RefCell<Deque<Mode, HISTORY_SIZE>>>,
    mode: Atomic<Mode>,
}

impl<const HISTORY_SIZE: usize> StateHolder<HISTORY_SIZE> {
    pub const fn new() -> Self {
        Self {
            link: Mutex::new(RefCell::new(Link::idle())),
            history: Mutex::new(RefCell::new(Deque::new())),
            mode: Atomic::new(Mode::Read),
        }
    }

    pub fn set_link(&self, cs: CriticalSection, link: Link) {
        let mode = link.mode();
        *self.link.borrow_ref_mut(cs) = link;

        if self.get_mode() != mode {
            self.add_mode_in_history(cs, mode);
        }
        self.mode.store(mode, Ordering::SeqCst);
    }

    pub fn link<'cs>(&'cs self, cs: CriticalSection<'cs>) -> RefMut<'cs, Link> {
        self.link.borrow_ref_mut(cs)
    }

    pub fn get_mode(&self) -> Mode {
        self.mode.load(Ordering::SeqCst)
    }

    #[allow(dead_code)]
    pub fn get_history<'cs>(
        &'cs self,
        cs: CriticalSection<'cs>,
    ) -> Ref<'cs, Deque<Mode, HISTORY_SIZE>> {
        self.history.borrow_ref(cs)
    }

    fn add_mode_in_history(&self, cs: CriticalSection, mode: Mode) {
        let mut h = self.history.borrow_ref_mut(cs);
        if h.is_full() {
            h.pop_front();
        }
        let _ = h.push_back(mode);
    }
}
