use core::cell::RefMut;

use critical_section::CriticalSection;

use super::{
    lines::{Direction, Level, Line, Lines},
    receive::Received,
    state_holder::Link,
    transmit::{TxAction, Transmitter},
    FrameError, WriteStatus,
};

pub trait InterruptBridge<L: Lines> {
    fn lines<'cs>(&'cs self, cs: CriticalSection<'cs>) -> RefMut<'cs, Option<L>>;

    fn link<'cs>(&'cs self, cs: CriticalSection<'cs>) -> RefMut<'cs, Link>;

    fn deliver(&self, cs: CriticalSection, byte: u8);

    fn frame_error(&self, cs: CriticalSection, err: FrameError);

    fn finish_write(&self, cs: CriticalSection, status: WriteStatus);

    fn fail_write(&self, cs: CriticalSection);
}

enum Outcome {
    Nothing,
    Deliver(u8),
    Abort(FrameError),
    Finish(WriteStatus),
    LineFailure,
}

/// To be called on every falling edge of the clock line.
pub fn handle_clock_interrupt<L: Lines, B: InterruptBridge<L>>(bridge: &B) {
    critical_section::with(|cs| {
        let outcome = {
            let mut lines = bridge.lines(cs);
            let Some(lines) = lines.as_mut() else {
                return;
            };
            lines.acknowledge_edge(Line::Clock);

            match &mut *bridge.link(cs) {
                Link::Receiving(rx) => match lines.level(Line::Data) {
                    Ok(level) => match rx.step(level.into()) {
                        Received::Pending => Outcome::Nothing,
                        Received::Byte(byte) => Outcome::Deliver(byte),
                        Received::Abort(err) => Outcome::Abort(err),
                    },
                    Err(_) => {
                        error!("Failed to sample data line");
                        rx.reset();
                        Outcome::Nothing
                    }
                },
                Link::Transmitting(tx) => transmit_edge(lines, tx),
            }
        };

        // Borrows are released here: delivery and write completion touch
        // the link and may run user code.
        match outcome {
            Outcome::Nothing => {}
            Outcome::Deliver(byte) => {
                debug!("Received {:#x}", byte);
                bridge.deliver(cs, byte);
            }
            Outcome::Abort(err) => {
                warn!("Dropping frame: {}, requesting resend", err);
                bridge.frame_error(cs, err);
            }
            Outcome::Finish(status) => {
                debug!("Write finished: {}", status);
                bridge.finish_write(cs, status);
            }
            Outcome::LineFailure => bridge.fail_write(cs),
        }
    })
}

fn transmit_edge<L: Lines>(lines: &mut L, tx: &mut Transmitter) -> Outcome {
    match tx.step() {
        TxAction::Ignore => {
            trace!("Ignoring clock edge before start bit");
            Outcome::Nothing
        }
        TxAction::Send(bit) => match lines.set_level(Line::Data, bit.into()) {
            Ok(()) => Outcome::Nothing,
            Err(_) => {
                error!("Failed to drive data bit {}", tx.cursor() - 1);
                Outcome::LineFailure
            }
        },
        TxAction::SendStop => {
            let sent = lines
                .set_level(Line::Data, Level::High)
                .and_then(|()| lines.set_direction(Line::Data, Direction::Input));

            match sent {
                Ok(()) => Outcome::Nothing,
                Err(_) => {
                    error!("Failed to hand data line back after stop bit");
                    Outcome::LineFailure
                }
            }
        }
        TxAction::CheckAck => match lines.level(Line::Data) {
            Ok(Level::Low) => Outcome::Finish(WriteStatus::Success),
            Ok(Level::High) => Outcome::Finish(WriteStatus::Failure),
            Err(_) => {
                error!("Failed to sample acknowledge bit");
                Outcome::LineFailure
            }
        },
    }
}
