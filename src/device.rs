use core::{cell::RefCell, marker::PhantomData};

use embassy_time::{with_timeout, Duration};
use embedded_hal_async::delay::DelayNs;

use super::{
    delivery::Callback, lines::Lines, write_gate::WriteTicket, Command, Error, Mode, Reason,
    WriteStatus,
};

#[allow(async_fn_in_trait)]
pub trait Ps2Bridge<L: Lines> {
    fn attach(&self, lines: L) -> Result<(), Error>;

    /// Takes the write slot and inhibits the bus by holding the clock low.
    fn request_bus(&self, byte: u8) -> Result<WriteTicket, Error>;

    /// Presents the start bit and gives the clock back to the device.
    fn start_frame(&self) -> Result<(), Error>;

    fn abort_write(&self);

    async fn write_done(&self, ticket: WriteTicket) -> WriteStatus;

    /// Resolves once no write holds the bus.
    async fn write_idle(&self);

    fn consume_status(&self, seen: WriteStatus);

    fn write_status(&self) -> WriteStatus;

    fn mode(&self) -> Mode;

    async fn receive(&self) -> u8;

    fn try_receive(&self) -> Option<u8>;

    fn set_callback(&self, callback: Callback);

    fn enable_callback(&self);

    fn disable_callback(&self);

    async fn command(&self) -> Command;

    fn command_pending(&self) -> bool;

    fn error(&self, reason: Reason) -> Error;
}

#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub read_timeout: Duration,
    /// How long a blocking write waits for the acknowledge bit.
    pub write_timeout: Duration,
    /// How long the clock is held low before the start bit.
    pub guard_interval_us: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_millis(500),
            guard_interval_us: 100,
        }
    }
}

/// Runs the abandon path unless defused.
struct AbandonOnDrop<'a, L: Lines, B: Ps2Bridge<L>> {
    bridge: &'a B,
    _marker: PhantomData<L>,
}

impl<'a, L: Lines, B: Ps2Bridge<L>> AbandonOnDrop<'a, L, B> {
    fn defuse(self) {
        core::mem::forget(self)
    }
}

impl<'a, L: Lines, B: Ps2Bridge<L>> Drop for AbandonOnDrop<'a, L, B> {
    fn drop(&mut self) {
        self.bridge.abort_write()
    }
}

pub struct Ps2Gpio<'d, L: Lines, B: Ps2Bridge<L>, D: DelayNs> {
    bridge: &'d B,
    /// Only borrowed by the holder of the write slot.
    delay: RefCell<D>,
    config: Config,
    _marker: PhantomData<L>,
}

impl<'d, L: Lines, B: Ps2Bridge<L>, D: DelayNs> Ps2Gpio<'d, L, B, D> {
    /// Releases both lines and enables the clock interrupt. The interrupt
    /// vector must call [`handle_clock_interrupt`](crate::handle_clock_interrupt)
    /// on `bridge`.
    pub fn new(bridge: &'d B, lines: L, delay: D, config: Config) -> Result<Self, Error> {
        bridge.attach(lines)?;
        info!("PS/2 GPIO driver ready");

        Ok(Self {
            bridge,
            delay: RefCell::new(delay),
            config,
            _marker: PhantomData,
        })
    }

    /// Starts sending `byte` and returns once the device clocks the frame.
    ///
    /// Fails with [`Reason::AlreadyActive`] while another write is in flight;
    /// writes are never queued.
    pub async fn write_async(&self, byte: u8) -> Result<(), Error> {
        self.begin_write(byte).await.map(|_| ())
    }

    async fn begin_write(&self, byte: u8) -> Result<WriteTicket, Error> {
        debug!("Writing {:#x}", byte);
        let ticket = self.bridge.request_bus(byte)?;

        let abandon = AbandonOnDrop {
            bridge: self.bridge,
            _marker: PhantomData,
        };
        match self.delay.try_borrow_mut() {
            Ok(mut delay) => delay.delay_us(self.config.guard_interval_us).await,
            Err(_) => return Err(self.bridge.error(Reason::AlreadyActive)),
        }
        abandon.defuse();

        self.bridge.start_frame()?;
        Ok(ticket)
    }

    /// Sends `byte` and waits for the device to acknowledge it.
    ///
    /// On [`Reason::WriteTimeout`] the transaction keeps going in the
    /// background and later writes are rejected until it ends.
    pub async fn write(&self, byte: u8) -> Result<(), Error> {
        let ticket = match self.begin_write(byte).await {
            Ok(ticket) => ticket,
            Err(e) => {
                error!("Could not initiate write of {:#x}", byte);
                return Err(e);
            }
        };

        let done = self.bridge.write_done(ticket);
        let status = match with_timeout(self.config.write_timeout, done).await {
            Ok(status) => status,
            Err(_) => {
                error!("No acknowledge for {:#x} in time", byte);
                return Err(self.bridge.error(Reason::WriteTimeout));
            }
        };

        self.bridge.consume_status(status);

        match status {
            WriteStatus::Success => {
                debug!("Write of {:#x} acknowledged", byte);
                Ok(())
            }
            status => {
                warn!("Write of {:#x} failed: {}", byte, status);
                Err(self.bridge.error(Reason::Failed(status)))
            }
        }
    }

    pub async fn read(&self) -> Result<u8, Error> {
        self.read_timeout(self.config.read_timeout).await
    }

    /// Next queued byte. Only sees bytes received while the callback is
    /// disabled.
    pub async fn read_timeout(&self, timeout: Duration) -> Result<u8, Error> {
        match with_timeout(timeout, self.bridge.receive()).await {
            Ok(byte) => Ok(byte),
            Err(_) => {
                debug!("Read timed out");
                Err(self.bridge.error(Reason::ReadTimeout))
            }
        }
    }

    pub fn try_read(&self) -> Option<u8> {
        self.bridge.try_receive()
    }

    /// Installs `callback` and enables it.
    pub fn configure(&self, callback: Callback) {
        self.bridge.set_callback(callback);
        info!("Installed PS/2 callback");
    }

    /// Drops anything queued so far; from now on bytes go to the callback.
    pub fn enable_callback(&self) {
        self.bridge.enable_callback();
        info!("Enabled PS/2 callback");
    }

    /// Drops anything queued so far; from now on bytes are queued.
    pub fn disable_callback(&self) {
        self.bridge.disable_callback();
        info!("Disabled PS/2 callback");
    }

    pub fn mode(&self) -> Mode {
        self.bridge.mode()
    }

    pub fn write_status(&self) -> WriteStatus {
        self.bridge.write_status()
    }

    pub fn command_pending(&self) -> bool {
        self.bridge.command_pending()
    }

    /// Waits for one command raised by the interrupt handler and sends it
    /// without waiting for the acknowledge. A write already holding the bus
    /// is let finish first.
    pub async fn service(&self) {
        let command = self.bridge.command().await;

        loop {
            match self.write_async(command.byte()).await {
                Ok(()) => {
                    debug!("Sent {}", command);
                    return;
                }
                Err(e) if e.reason == Reason::AlreadyActive => {
                    debug!("Holding {} until the bus is free", command);
                    self.bridge.write_idle().await;
                }
                Err(e) => {
                    warn!("Could not send {}: {}", command, e.reason);
                    return;
                }
            }
        }
    }

    pub async fn run(&self) -> ! {
        loop {
            self.service().await
        }
    }
}
