//! [`Lines`] on two STM32 GPIOs, with the clock edge routed through EXTI.
//!
//! The EXTI line of the clock pin is programmed directly, so the `exti`
//! feature of `embassy-stm32` must stay off and the board has to bind the
//! matching `EXTIn` vector to [`handle_clock_interrupt`](crate::handle_clock_interrupt).

use core::convert::Infallible;

use embassy_stm32::{
    gpio::{Flex, Pin, Pull, Speed},
    pac, Peripheral,
};

use crate::lines::{Direction, Edge, Level, Line, Lines};

pub struct FlexLines<'d, C: Pin, D: Pin> {
    clock: Flex<'d, C>,
    data: Flex<'d, D>,
    clock_pin: usize,
    clock_port: u8,
}

impl<'d, C: Pin, D: Pin> FlexLines<'d, C, D> {
    pub fn new(
        clock: impl Peripheral<P = C> + 'd,
        data: impl Peripheral<P = D> + 'd,
    ) -> Self {
        let clock = clock.into_ref();
        let clock_pin = clock.pin() as usize;
        let clock_port = clock.port();

        Self {
            clock: Flex::new(clock),
            data: Flex::new(data),
            clock_pin,
            clock_port,
        }
    }

    fn route_clock_exti(&self, edge: Edge) {
        let pin = self.clock_pin;

        critical_section::with(|_| {
            pac::RCC.apb2enr().modify(|w| w.set_afioen(true));
            pac::AFIO
                .exticr(pin / 4)
                .modify(|w| w.set_exti(pin % 4, self.clock_port));

            pac::EXTI
                .rtsr(0)
                .modify(|w| w.set_line(pin, matches!(edge, Edge::Both)));
            pac::EXTI.ftsr(0).modify(|w| w.set_line(pin, true));
            pac::EXTI.pr(0).write(|w| w.set_line(pin, true));
            pac::EXTI.imr(0).modify(|w| w.set_line(pin, true));
        });
    }
}

impl<'d, C: Pin, D: Pin> Lines for FlexLines<'d, C, D> {
    type Error = Infallible;

    fn level(&mut self, line: Line) -> Result<Level, Self::Error> {
        let high = match line {
            Line::Clock => self.clock.is_high(),
            Line::Data => self.data.is_high(),
        };
        Ok(high.into())
    }

    fn set_level(&mut self, line: Line, level: Level) -> Result<(), Self::Error> {
        match (line, level) {
            (Line::Clock, Level::High) => self.clock.set_high(),
            (Line::Clock, Level::Low) => self.clock.set_low(),
            (Line::Data, Level::High) => self.data.set_high(),
            (Line::Data, Level::Low) => self.data.set_low(),
        }
        Ok(())
    }

    fn set_direction(&mut self, line: Line, direction: Direction) -> Result<(), Self::Error> {
        match (line, direction) {
            (Line::Clock, Direction::Input) => self.clock.set_as_input(Pull::Up),
            (Line::Clock, Direction::Output) => self.clock.set_as_output(Speed::Low),
            (Line::Data, Direction::Input) => self.data.set_as_input(Pull::Up),
            (Line::Data, Direction::Output) => self.data.set_as_output(Speed::Low),
        }
        Ok(())
    }

    fn enable_edge_interrupt(&mut self, line: Line, edge: Edge) -> Result<(), Self::Error> {
        // Only the clock line raises interrupts.
        if line == Line::Clock {
            self.route_clock_exti(edge);
        }
        Ok(())
    }

    fn acknowledge_edge(&mut self, line: Line) {
        if line == Line::Clock {
            pac::EXTI.pr(0).write(|w| w.set_line(self.clock_pin, true));
        }
    }
}
