use core::cell::{RefCell, RefMut};

use atomic::{Atomic, Ordering};
use critical_section::{CriticalSection, Mutex};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use heapless::Deque;

use super::{
    delivery::{Callback, Delivery},
    device::Ps2Bridge,
    interrupts::InterruptBridge,
    lines::{Direction, Edge, Level, Line, Lines},
    state_holder::{Link, StateHolder},
    transmit::Transmitter,
    write_gate::{WriteGate, WriteTicket},
    Command, Error, FrameError, Mode, Reason, WriteStatus,
};

pub const MODES_HISTORY_SIZE: usize = 5;
pub const FRAME_ERRORS_HISTORY_SIZE: usize = 5;

#[cfg(feature = "dump")]
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StateDump {
    pub mode_history: [Mode; MODES_HISTORY_SIZE],
    pub current_mode: Mode,
    pub frame_errors: [Option<FrameError>; FRAME_ERRORS_HISTORY_SIZE],
    pub read_cursor: Option<u8>,
    pub write_cursor: Option<u8>,
    pub write_status: WriteStatus,
}

/// Everything shared between the clock interrupt and the driver handle.
///
/// Meant to live in a `static`, with the interrupt vector calling
/// [`handle_clock_interrupt`](crate::handle_clock_interrupt) on it.
pub struct Bridge<L: Lines, const QSIZE: usize> {
    lines: Mutex<RefCell<Option<L>>>,

    state_holder: StateHolder<MODES_HISTORY_SIZE>,
    write_gate: WriteGate,
    write_status: Atomic<WriteStatus>,

    delivery: Delivery<QSIZE>,
    outbound: Signal<CriticalSectionRawMutex, Command>,

    frame_errors: Mutex<RefCell<Deque<FrameError, FRAME_ERRORS_HISTORY_SIZE>>>,
}

#[cfg(feature = "dump")]
fn deque_into_array<T: Copy, const N: usize>(d: &Deque<T, N>, arr: &mut [T; N]) {
    let n = d.len();
    let (a, b) = d.as_slices();
    let s = N - n;

    arr[s..s + a.len()].copy_from_slice(a);
    arr[s + a.len()..].copy_from_slice(b);
}

/// Both lines released high, falling clock edges raising the interrupt.
fn configure_idle<L: Lines>(lines: &mut L) -> Result<(), L::Error> {
    lines.set_level(Line::Clock, Level::High)?;
    lines.set_level(Line::Data, Level::High)?;
    lines.set_direction(Line::Clock, Direction::Input)?;
    lines.set_direction(Line::Data, Direction::Input)?;
    lines.enable_edge_interrupt(Line::Clock, Edge::Falling)
}

impl<L: Lines, const QSIZE: usize> Bridge<L, QSIZE> {
    pub const fn new() -> Self {
        Self {
            lines: Mutex::new(RefCell::new(None)),
            state_holder: StateHolder::new(),
            write_gate: WriteGate::new(),
            write_status: Atomic::new(WriteStatus::Inactive),
            delivery: Delivery::new(),
            outbound: Signal::new(),
            frame_errors: Mutex::new(RefCell::new(Deque::new())),
        }
    }

    fn with_lines<R>(
        &self,
        cs: CriticalSection,
        f: impl FnOnce(&mut L) -> Result<R, L::Error>,
    ) -> Result<R, ()> {
        match self.lines.borrow_ref_mut(cs).as_mut() {
            Some(lines) => f(lines).map_err(|_| ()),
            None => Err(()),
        }
    }

    fn release_lines(&self, cs: CriticalSection) {
        let released = self.with_lines(cs, |l| {
            l.set_level(Line::Clock, Level::High)?;
            l.set_direction(Line::Clock, Direction::Input)?;
            l.set_level(Line::Data, Level::High)?;
            l.set_direction(Line::Data, Direction::Input)
        });

        if released.is_err() {
            error!("Failed to release PS/2 lines");
        }
    }

    fn complete_write(&self, cs: CriticalSection, status: WriteStatus) {
        self.write_status.store(status, Ordering::SeqCst);
        self.state_holder.set_link(cs, Link::idle());
        self.write_gate.release(cs, status);
    }

    fn abandon_write(&self, cs: CriticalSection) {
        if self.write_gate.is_available(cs) {
            return;
        }

        warn!("Abandoning write");
        self.release_lines(cs);
        self.complete_write(cs, WriteStatus::Failure);
    }

    #[cfg(feature = "dump")]
    pub fn dump_state(&self) -> StateDump {
        let mut modes = [Mode::Read; MODES_HISTORY_SIZE];
        let mut frame_errors = [None; FRAME_ERRORS_HISTORY_SIZE];

        let (read_cursor, write_cursor) = critical_section::with(|cs| {
            deque_into_array(&self.state_holder.get_history(cs), &mut modes);

            let errors = self.frame_errors.borrow_ref(cs);
            for (slot, err) in frame_errors.iter_mut().rev().zip(errors.iter().rev()) {
                *slot = Some(*err);
            }

            let cursors = match &*self.state_holder.link(cs) {
                Link::Receiving(rx) => (Some(rx.cursor()), None),
                Link::Transmitting(tx) => (None, Some(tx.cursor())),
            };
            cursors
        });

        StateDump {
            mode_history: modes,
            current_mode: self.state_holder.get_mode(),
            frame_errors,
            read_cursor,
            write_cursor,
            write_status: self.write_status.load(Ordering::SeqCst),
        }
    }
}

impl<L: Lines, const QSIZE: usize> Ps2Bridge<L> for Bridge<L, QSIZE> {
    fn attach(&self, mut lines: L) -> Result<(), Error> {
        if configure_idle(&mut lines).is_err() {
            error!("Failed to configure PS/2 lines");
            return Err(self.error(Reason::Line));
        }

        critical_section::with(|cs| {
            *self.lines.borrow_ref_mut(cs) = Some(lines);
            self.state_holder.set_link(cs, Link::idle());
        });

        Ok(())
    }

    fn request_bus(&self, byte: u8) -> Result<WriteTicket, Error> {
        critical_section::with(|cs| {
            let Some(ticket) = self.write_gate.try_acquire(cs) else {
                warn!("Write of {:#x} rejected, another write is active", byte);
                return Err(self.error(Reason::AlreadyActive));
            };

            // Supersedes any frame the device was sending.
            self.state_holder
                .set_link(cs, Link::Transmitting(Transmitter::new(byte)));
            self.write_status.store(WriteStatus::Active, Ordering::SeqCst);

            let inhibited = self.with_lines(cs, |l| {
                l.set_level(Line::Clock, Level::Low)?;
                l.set_direction(Line::Clock, Direction::Output)
            });

            if inhibited.is_err() {
                error!("Failed to pull clock low");
                self.abandon_write(cs);
                return Err(self.error(Reason::Line));
            }

            Ok(ticket)
        })
    }

    fn start_frame(&self) -> Result<(), Error> {
        critical_section::with(|cs| {
            let start_bit = self.with_lines(cs, |l| {
                l.set_level(Line::Data, Level::Low)?;
                l.set_direction(Line::Data, Direction::Output)
            });

            if start_bit.is_err() {
                error!("Failed to drive start bit");
                self.abandon_write(cs);
                return Err(self.error(Reason::Line));
            }

            let started = match &mut *self.state_holder.link(cs) {
                Link::Transmitting(tx) => {
                    tx.start_sent();
                    true
                }
                Link::Receiving(_) => false,
            };

            if !started {
                let status = self.write_status.load(Ordering::SeqCst);
                return Err(self.error(Reason::Failed(status)));
            }

            // The device drives the clock from here on.
            let released = self.with_lines(cs, |l| {
                l.set_level(Line::Clock, Level::High)?;
                l.set_direction(Line::Clock, Direction::Input)
            });

            if released.is_err() {
                error!("Failed to release clock");
                self.abandon_write(cs);
                return Err(self.error(Reason::Line));
            }

            Ok(())
        })
    }

    fn abort_write(&self) {
        critical_section::with(|cs| self.abandon_write(cs))
    }

    async fn write_done(&self, ticket: WriteTicket) -> WriteStatus {
        self.write_gate.wait_outcome(ticket).await
    }

    async fn write_idle(&self) {
        self.write_gate.wait_available().await
    }

    fn consume_status(&self, seen: WriteStatus) {
        let _ = self.write_status.compare_exchange(
            seen,
            WriteStatus::Inactive,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    fn write_status(&self) -> WriteStatus {
        self.write_status.load(Ordering::SeqCst)
    }

    fn mode(&self) -> Mode {
        self.state_holder.get_mode()
    }

    async fn receive(&self) -> u8 {
        self.delivery.receive().await
    }

    fn try_receive(&self) -> Option<u8> {
        self.delivery.try_receive()
    }

    fn set_callback(&self, callback: Callback) {
        critical_section::with(|cs| {
            self.delivery.set_callback(cs, callback);
            self.delivery.enable(cs);
        })
    }

    fn enable_callback(&self) {
        critical_section::with(|cs| self.delivery.enable(cs))
    }

    fn disable_callback(&self) {
        critical_section::with(|cs| self.delivery.disable(cs))
    }

    async fn command(&self) -> Command {
        self.outbound.wait().await
    }

    fn command_pending(&self) -> bool {
        self.outbound.signaled()
    }

    fn error(&self, reason: Reason) -> Error {
        Error {
            #[cfg(feature = "dump")]
            dump: self.dump_state(),
            reason,
        }
    }
}

impl<L: Lines, const QSIZE: usize> InterruptBridge<L> for Bridge<L, QSIZE> {
    fn lines<'cs>(&'cs self, cs: CriticalSection<'cs>) -> RefMut<'cs, Option<L>> {
        self.lines.borrow_ref_mut(cs)
    }

    fn link<'cs>(&'cs self, cs: CriticalSection<'cs>) -> RefMut<'cs, Link> {
        self.state_holder.link(cs)
    }

    fn deliver(&self, cs: CriticalSection, byte: u8) {
        self.delivery.deliver(cs, byte)
    }

    fn frame_error(&self, cs: CriticalSection, err: FrameError) {
        let mut h = self.frame_errors.borrow_ref_mut(cs);
        if h.is_full() {
            h.pop_front();
        }
        let _ = h.push_back(err);

        self.outbound.signal(Command::Resend);
    }

    fn finish_write(&self, cs: CriticalSection, status: WriteStatus) {
        self.complete_write(cs, status)
    }

    fn fail_write(&self, cs: CriticalSection) {
        self.abandon_write(cs)
    }
}
