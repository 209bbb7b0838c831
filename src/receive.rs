use crate::{frame, FrameError};

/// Outcome of one received clock edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    Pending,
    Byte(u8),
    /// The frame is dropped and the device must be asked to resend it.
    Abort(FrameError),
}

/// Assembles a device-to-host frame one bit per falling edge.
#[derive(Debug, Clone, Copy)]
pub struct Receiver {
    cursor: u8,
    byte: u8,
}

impl Receiver {
    pub const fn new() -> Self {
        Self { cursor: 0, byte: 0 }
    }

    pub fn step(&mut self, bit: bool) -> Received {
        match self.cursor {
            frame::START => {
                if bit {
                    return self.abort(FrameError::StartBit);
                }
            }
            frame::PARITY => {
                if !frame::validate_parity(self.byte, bit) {
                    return self.abort(FrameError::Parity);
                }
            }
            frame::STOP => {
                if !bit {
                    return self.abort(FrameError::StopBit);
                }

                let byte = self.byte;
                self.reset();
                return Received::Byte(byte);
            }
            pos => {
                if bit {
                    self.byte |= 1 << (pos - 1);
                }
            }
        }

        self.cursor += 1;
        Received::Pending
    }

    pub fn reset(&mut self) {
        self.cursor = frame::START;
        self.byte = 0;
    }

    #[allow(dead_code)]
    pub fn cursor(&self) -> u8 {
        self.cursor
    }

    fn abort(&mut self, err: FrameError) -> Received {
        self.reset();
        Received::Abort(err)
    }
}
