#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

mod bridge;
mod delivery;
mod device;
pub mod frame;
mod interrupts;
mod lines;
mod receive;
mod state_holder;
#[cfg(feature = "stm32")]
pub mod stm32;
mod transmit;
mod write_gate;

pub use bridge::Bridge;
pub use delivery::Callback;
pub use device::{Config, Ps2Bridge, Ps2Gpio};
pub use interrupts::handle_clock_interrupt;
pub use lines::{Direction, Edge, Level, Line, Lines};
pub use write_gate::WriteTicket;

#[cfg(feature = "dump")]
pub use bridge::StateDump;

/// Which side is currently clocking a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::NoUninit)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Mode {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::NoUninit)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum WriteStatus {
    Inactive,
    Active,
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    StartBit,
    Parity,
    StopBit,
}

/// Commands the driver sends on its own behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    Resend,
}

impl Command {
    pub const fn byte(self) -> u8 {
        match self {
            Command::Resend => frame::RESEND,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reason {
    /// Another write is still in flight.
    AlreadyActive,
    Line,
    /// The device did not acknowledge the byte.
    Failed(WriteStatus),
    WriteTimeout,
    ReadTimeout,
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Error {
    #[cfg(feature = "dump")]
    pub dump: StateDump,
    pub reason: Reason,
}
