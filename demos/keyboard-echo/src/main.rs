#![no_main]
#![no_std]

use cortex_m::peripheral::NVIC;

use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_futures::join::join;
use embassy_stm32::{
    self as _, interrupt,
    peripherals::{PB6, PB7},
};
use embassy_time::{Delay, Timer};
use panic_probe as _;
use ps2_gpio::{handle_clock_interrupt, stm32::FlexLines, Bridge, Config, Ps2Gpio, Reason};

static PS2_BRIDGE: Bridge<FlexLines<'static, PB6, PB7>, 16> = Bridge::new();

#[interrupt]
#[allow(non_snake_case)]
fn EXTI9_5() {
    handle_clock_interrupt(&PS2_BRIDGE);
}

const CMD_RESET: u8 = 0xFF;
const CMD_SET_LEDS: u8 = 0xED;
const CMD_ENABLE_SCANNING: u8 = 0xF4;
const SELF_TEST_PASSED: u8 = 0xAA;

#[embassy_executor::main]
async fn main_task(_spawner: Spawner) {
    defmt::info!("Start!");

    let peripherals = embassy_stm32::init(Default::default());

    let lines = FlexLines::new(peripherals.PB6, peripherals.PB7);
    let ps2 = match Ps2Gpio::new(&PS2_BRIDGE, lines, Delay, Config::default()) {
        Ok(ps2) => ps2,
        Err(e) => defmt::panic!("Init failed: {}", e),
    };

    unsafe {
        NVIC::unmask(interrupt::EXTI9_5);
    }

    let echo = async {
        if let Err(e) = ps2.write(CMD_RESET).await {
            defmt::warn!("Reset not acknowledged: {}", e);
        }

        match ps2.read().await {
            Ok(SELF_TEST_PASSED) => defmt::info!("Keyboard self test passed"),
            Ok(other) => defmt::warn!("Unexpected self test reply: {:#x}", other),
            Err(e) => defmt::warn!("No self test reply: {}", e.reason),
        }

        for cmd in [CMD_SET_LEDS, 0b111, CMD_ENABLE_SCANNING] {
            if let Err(e) = ps2.write(cmd).await {
                defmt::error!("Command {:#x} failed: {}", cmd, e);
            }
            Timer::after_millis(10).await;
        }

        loop {
            match ps2.read().await {
                Ok(byte) => defmt::info!("Received: {:#x}", byte),
                Err(e) if e.reason == Reason::ReadTimeout => {}
                Err(e) => defmt::error!("Fail: {}", e),
            }
        }
    };

    join(ps2.run(), echo).await;
}
