use crate::frame;

/// What to do with the data line on the current clock edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxAction {
    /// The start bit is presented before the device starts clocking.
    Ignore,
    Send(bool),
    /// Drive the stop bit, then hand the data line to the device.
    SendStop,
    CheckAck,
}

/// Host-to-device frame being clocked out by the device.
#[derive(Debug, Clone, Copy)]
pub struct Transmitter {
    frame: u16,
    cursor: u8,
}

impl Transmitter {
    pub const fn new(byte: u8) -> Self {
        Self {
            frame: frame::pack(byte),
            cursor: frame::START,
        }
    }

    /// Called once the start bit is on the data line.
    pub fn start_sent(&mut self) {
        self.cursor = frame::START + 1;
    }

    pub fn step(&mut self) -> TxAction {
        let action = match self.cursor {
            frame::START => return TxAction::Ignore,
            frame::STOP => TxAction::SendStop,
            pos if pos < frame::STOP => TxAction::Send(frame::bit(self.frame, pos)),
            _ => return TxAction::CheckAck,
        };

        self.cursor += 1;
        action
    }

    pub fn cursor(&self) -> u8 {
        self.cursor
    }
}
