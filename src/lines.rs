/// One of the two PS/2 signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Line {
    Clock,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Level {
    Low,
    High,
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl From<Level> for bool {
    fn from(level: Level) -> Self {
        matches!(level, Level::High)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Edge {
    Falling,
    Both,
}

/// Access to the clock and data GPIOs.
///
/// Every method is called with interrupts masked and must not block.
pub trait Lines {
    type Error;

    fn level(&mut self, line: Line) -> Result<Level, Self::Error>;

    fn set_level(&mut self, line: Line, level: Level) -> Result<(), Self::Error>;

    fn set_direction(&mut self, line: Line, direction: Direction) -> Result<(), Self::Error>;

    fn enable_edge_interrupt(&mut self, line: Line, edge: Edge) -> Result<(), Self::Error>;

    /// Clears the pending edge flag, if the hardware needs it done by hand.
    fn acknowledge_edge(&mut self, _line: Line) {}
}
