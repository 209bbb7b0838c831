use std::sync::{Arc, Mutex};

use embassy_futures::{
    block_on,
    join::join,
    select::{select, Either},
    yield_now,
};
use embassy_time::Duration;
use embedded_hal_async::delay::DelayNs;
use ps2_gpio::{
    frame, handle_clock_interrupt, Bridge, Config, Direction, Edge, Level, Line, Lines, Mode,
    Ps2Gpio, Reason, WriteStatus,
};

struct Wire {
    clock: (Direction, Level),
    data: (Direction, Level),
    /// What the device puts on the data line while we don't drive it.
    device_data: Level,
    /// Data levels set while we drive the data line.
    driven: Vec<Level>,
    edge: Option<Edge>,
    fail_clock_output: bool,
}

#[derive(Clone)]
struct MockLines(Arc<Mutex<Wire>>);

impl MockLines {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(Wire {
            clock: (Direction::Output, Level::Low),
            data: (Direction::Input, Level::Low),
            device_data: Level::High,
            driven: Vec::new(),
            edge: None,
            fail_clock_output: false,
        })))
    }

    fn set_device_data(&self, high: bool) {
        self.0.lock().unwrap().device_data = high.into();
    }

    fn direction(&self, line: Line) -> Direction {
        let w = self.0.lock().unwrap();
        match line {
            Line::Clock => w.clock.0,
            Line::Data => w.data.0,
        }
    }

    fn take_driven(&self) -> Vec<bool> {
        let mut w = self.0.lock().unwrap();
        w.driven.drain(..).map(bool::from).collect()
    }

    fn fail_clock_output(&self, fail: bool) {
        self.0.lock().unwrap().fail_clock_output = fail;
    }
}

impl Lines for MockLines {
    type Error = ();

    fn level(&mut self, line: Line) -> Result<Level, ()> {
        let w = self.0.lock().unwrap();
        Ok(match line {
            Line::Clock if w.clock.0 == Direction::Output => w.clock.1,
            Line::Clock => Level::High,
            Line::Data if w.data.0 == Direction::Output => w.data.1,
            Line::Data => w.device_data,
        })
    }

    fn set_level(&mut self, line: Line, level: Level) -> Result<(), ()> {
        let mut w = self.0.lock().unwrap();
        match line {
            Line::Clock => w.clock.1 = level,
            Line::Data => {
                w.data.1 = level;
                if w.data.0 == Direction::Output {
                    w.driven.push(level);
                }
            }
        }
        Ok(())
    }

    fn set_direction(&mut self, line: Line, direction: Direction) -> Result<(), ()> {
        let mut w = self.0.lock().unwrap();
        match line {
            Line::Clock => {
                if direction == Direction::Output && w.fail_clock_output {
                    return Err(());
                }
                w.clock.0 = direction;
            }
            Line::Data => w.data.0 = direction,
        }
        Ok(())
    }

    fn enable_edge_interrupt(&mut self, line: Line, edge: Edge) -> Result<(), ()> {
        assert_eq!(line, Line::Clock);
        self.0.lock().unwrap().edge = Some(edge);
        Ok(())
    }
}

type TestBridge = Bridge<MockLines, 8>;

struct NoDelay;

impl DelayNs for NoDelay {
    async fn delay_ns(&mut self, _ns: u32) {}
}

/// Our own clock pull produces a falling edge while the bus is inhibited.
struct EdgeDuringGuard<'a>(&'a TestBridge);

impl DelayNs for EdgeDuringGuard<'_> {
    async fn delay_ns(&mut self, _ns: u32) {
        handle_clock_interrupt(self.0);
    }
}

struct Forever;

impl DelayNs for Forever {
    async fn delay_ns(&mut self, _ns: u32) {
        core::future::pending::<()>().await
    }
}

/// Gives other futures one chance to run during the guard interval.
struct YieldOnce;

impl DelayNs for YieldOnce {
    async fn delay_ns(&mut self, _ns: u32) {
        yield_now().await
    }
}

fn device_frame(byte: u8, parity: bool) -> [bool; 11] {
    let mut bits = [false; 11];
    for i in 0..8 {
        bits[i + 1] = (byte >> i) & 1 == 1;
    }
    bits[frame::PARITY as usize] = parity;
    bits[frame::STOP as usize] = true;
    bits
}

fn device_sends(bridge: &TestBridge, wire: &MockLines, bits: &[bool]) {
    for &bit in bits {
        wire.set_device_data(bit);
        handle_clock_interrupt(bridge);
    }
}

fn device_sends_byte(bridge: &TestBridge, wire: &MockLines, byte: u8) {
    device_sends(bridge, wire, &device_frame(byte, frame::parity_of(byte)));
}

/// Clocks data bits, parity and stop out of the host, then answers with `ack`.
fn device_clocks_write(bridge: &TestBridge, wire: &MockLines, ack: bool) {
    for _ in 0..10 {
        handle_clock_interrupt(bridge);
    }
    wire.set_device_data(ack);
    handle_clock_interrupt(bridge);
}

fn expected_bits(byte: u8) -> Vec<bool> {
    let f = frame::pack(byte);
    (1..=frame::STOP).map(|pos| frame::bit(f, pos)).collect()
}

#[test]
fn init_releases_lines() {
    let bridge = TestBridge::new();
    let wire = MockLines::new();
    let ps2 = Ps2Gpio::new(&bridge, wire.clone(), NoDelay, Config::default()).unwrap();

    assert_eq!(wire.direction(Line::Clock), Direction::Input);
    assert_eq!(wire.direction(Line::Data), Direction::Input);
    assert_eq!(wire.0.lock().unwrap().edge, Some(Edge::Falling));
    assert_eq!(ps2.mode(), Mode::Read);
}

#[test]
fn receives_byte_into_queue() {
    let bridge = TestBridge::new();
    let wire = MockLines::new();
    let ps2 = Ps2Gpio::new(&bridge, wire.clone(), NoDelay, Config::default()).unwrap();

    device_sends_byte(&bridge, &wire, 0x45);

    assert_eq!(ps2.try_read(), Some(0x45));
    assert_eq!(ps2.try_read(), None);
    assert!(!ps2.command_pending());

    // Receiver is back at the start bit.
    device_sends_byte(&bridge, &wire, 0xAA);
    assert_eq!(ps2.try_read(), Some(0xAA));
}

#[test]
fn read_waits_for_byte() {
    let bridge = TestBridge::new();
    let wire = MockLines::new();
    let ps2 = Ps2Gpio::new(&bridge, wire.clone(), NoDelay, Config::default()).unwrap();

    let (read, ()) = block_on(join(ps2.read(), async {
        yield_now().await;
        device_sends_byte(&bridge, &wire, 0xFA);
    }));

    assert_eq!(read.unwrap(), 0xFA);
}

#[test]
fn read_times_out() {
    let bridge = TestBridge::new();
    let ps2 = Ps2Gpio::new(&bridge, MockLines::new(), NoDelay, Config::default()).unwrap();

    let err = block_on(ps2.read_timeout(Duration::from_millis(10))).unwrap_err();
    assert_eq!(err.reason, Reason::ReadTimeout);
}

#[test]
fn bad_start_bit_requests_resend() {
    let bridge = TestBridge::new();
    let wire = MockLines::new();
    let ps2 = Ps2Gpio::new(&bridge, wire.clone(), NoDelay, Config::default()).unwrap();

    device_sends(&bridge, &wire, &[true]);

    assert_eq!(ps2.try_read(), None);
    assert!(ps2.command_pending());

    block_on(ps2.service());
    assert_eq!(ps2.mode(), Mode::Write);
    assert!(!ps2.command_pending());

    device_clocks_write(&bridge, &wire, false);
    assert_eq!(wire.take_driven(), expected_bits(frame::RESEND));
    assert_eq!(ps2.mode(), Mode::Read);
    assert_eq!(ps2.write_status(), WriteStatus::Success);
}

#[test]
fn bad_parity_requests_resend() {
    let bridge = TestBridge::new();
    let wire = MockLines::new();
    let ps2 = Ps2Gpio::new(&bridge, wire.clone(), NoDelay, Config::default()).unwrap();

    let bits = device_frame(0x45, !frame::parity_of(0x45));
    device_sends(&bridge, &wire, &bits[..10]);

    assert_eq!(ps2.try_read(), None);
    assert!(ps2.command_pending());

    // A fresh frame is accepted before the resend is even issued.
    device_sends_byte(&bridge, &wire, 0x45);
    assert_eq!(ps2.try_read(), Some(0x45));
}

#[test]
fn bad_stop_bit_requests_resend() {
    let bridge = TestBridge::new();
    let wire = MockLines::new();
    let ps2 = Ps2Gpio::new(&bridge, wire.clone(), NoDelay, Config::default()).unwrap();

    let mut bits = device_frame(0x12, frame::parity_of(0x12));
    bits[frame::STOP as usize] = false;
    device_sends(&bridge, &wire, &bits);

    assert_eq!(ps2.try_read(), None);
    assert!(ps2.command_pending());
}

#[test]
fn blocking_write_acknowledged() {
    let bridge = TestBridge::new();
    let wire = MockLines::new();
    let ps2 = Ps2Gpio::new(
        &bridge,
        wire.clone(),
        EdgeDuringGuard(&bridge),
        Config::default(),
    )
    .unwrap();

    let (res, ()) = block_on(join(ps2.write(0x01), async {
        yield_now().await;
        assert_eq!(wire.direction(Line::Clock), Direction::Input);
        assert_eq!(wire.direction(Line::Data), Direction::Output);
        device_clocks_write(&bridge, &wire, false);
    }));

    assert!(res.is_ok());
    assert_eq!(wire.take_driven(), expected_bits(0x01));
    assert_eq!(wire.direction(Line::Data), Direction::Input);
    assert_eq!(ps2.mode(), Mode::Read);
    assert_eq!(ps2.write_status(), WriteStatus::Inactive);

    block_on(ps2.write_async(0x02)).unwrap();
}

#[test]
fn blocking_write_nacked() {
    let bridge = TestBridge::new();
    let wire = MockLines::new();
    let ps2 = Ps2Gpio::new(&bridge, wire.clone(), NoDelay, Config::default()).unwrap();

    let (res, ()) = block_on(join(ps2.write(0xED), async {
        yield_now().await;
        device_clocks_write(&bridge, &wire, true);
    }));

    assert_eq!(res.unwrap_err().reason, Reason::Failed(WriteStatus::Failure));
    assert_eq!(ps2.write_status(), WriteStatus::Inactive);
    assert_eq!(ps2.mode(), Mode::Read);

    // No deadlock: the slot was given back.
    block_on(ps2.write_async(0xED)).unwrap();
}

#[test]
fn second_async_write_is_rejected() {
    let bridge = TestBridge::new();
    let wire = MockLines::new();
    let ps2 = Ps2Gpio::new(&bridge, wire.clone(), YieldOnce, Config::default()).unwrap();

    let (first, second) = block_on(join(ps2.write_async(0x01), ps2.write_async(0x02)));
    first.unwrap();
    assert_eq!(second.unwrap_err().reason, Reason::AlreadyActive);

    device_clocks_write(&bridge, &wire, false);
    assert_eq!(wire.take_driven(), expected_bits(0x01));

    block_on(ps2.write_async(0x03)).unwrap();
}

#[test]
fn blocking_write_timeout_leaves_transaction_running() {
    let bridge = TestBridge::new();
    let wire = MockLines::new();
    let config = Config {
        write_timeout: Duration::from_millis(20),
        ..Config::default()
    };
    let ps2 = Ps2Gpio::new(&bridge, wire.clone(), NoDelay, config).unwrap();

    let err = block_on(ps2.write(0xF4)).unwrap_err();
    assert_eq!(err.reason, Reason::WriteTimeout);
    assert_eq!(ps2.write_status(), WriteStatus::Active);

    let err = block_on(ps2.write_async(0xF5)).unwrap_err();
    assert_eq!(err.reason, Reason::AlreadyActive);

    device_clocks_write(&bridge, &wire, false);
    assert_eq!(wire.take_driven(), expected_bits(0xF4));
    assert_eq!(ps2.write_status(), WriteStatus::Success);

    block_on(ps2.write_async(0xF5)).unwrap();
}

#[test]
fn acknowledged_write_survives_following_resend() {
    let bridge = TestBridge::new();
    let wire = MockLines::new();
    let config = Config {
        write_timeout: Duration::from_millis(50),
        ..Config::default()
    };
    let ps2 = Ps2Gpio::new(&bridge, wire.clone(), NoDelay, config).unwrap();

    let (res, ()) = block_on(join(ps2.write(0x01), async {
        yield_now().await;
        device_clocks_write(&bridge, &wire, false);
        // Garbled reply, answered with a resend before the writer wakes up.
        device_sends(&bridge, &wire, &[true]);
        ps2.service().await;
    }));

    assert!(res.is_ok());
    assert_eq!(wire.take_driven(), expected_bits(0x01));
    assert_eq!(ps2.mode(), Mode::Write);
    assert_eq!(ps2.write_status(), WriteStatus::Active);

    device_clocks_write(&bridge, &wire, false);
    assert_eq!(wire.take_driven(), expected_bits(frame::RESEND));
    assert_eq!(ps2.write_status(), WriteStatus::Success);
}

#[test]
fn resend_waits_for_active_write() {
    let bridge = TestBridge::new();
    let wire = MockLines::new();
    let ps2 = Ps2Gpio::new(&bridge, wire.clone(), NoDelay, Config::default()).unwrap();

    device_sends(&bridge, &wire, &[true]);
    assert!(ps2.command_pending());
    block_on(ps2.write_async(0x01)).unwrap();

    block_on(join(ps2.service(), async {
        yield_now().await;
        assert!(wire.take_driven().is_empty());
        device_clocks_write(&bridge, &wire, false);
    }));

    assert_eq!(wire.take_driven(), expected_bits(0x01));
    assert!(!ps2.command_pending());
    assert_eq!(ps2.mode(), Mode::Write);

    device_clocks_write(&bridge, &wire, false);
    assert_eq!(wire.take_driven(), expected_bits(frame::RESEND));
    assert_eq!(ps2.mode(), Mode::Read);
}

#[test]
fn write_supersedes_partial_read() {
    let bridge = TestBridge::new();
    let wire = MockLines::new();
    let ps2 = Ps2Gpio::new(&bridge, wire.clone(), NoDelay, Config::default()).unwrap();

    let bits = device_frame(0x5A, frame::parity_of(0x5A));
    device_sends(&bridge, &wire, &bits[..4]);

    block_on(ps2.write_async(0xFF)).unwrap();
    device_clocks_write(&bridge, &wire, false);
    assert_eq!(wire.take_driven(), expected_bits(0xFF));

    device_sends_byte(&bridge, &wire, 0xAA);
    assert_eq!(ps2.try_read(), Some(0xAA));
    assert!(!ps2.command_pending());
}

#[test]
fn line_failure_during_setup_restores_read_mode() {
    let bridge = TestBridge::new();
    let wire = MockLines::new();
    let ps2 = Ps2Gpio::new(&bridge, wire.clone(), NoDelay, Config::default()).unwrap();

    wire.fail_clock_output(true);
    let err = block_on(ps2.write_async(0x01)).unwrap_err();
    assert_eq!(err.reason, Reason::Line);
    assert_eq!(ps2.mode(), Mode::Read);
    assert_eq!(ps2.write_status(), WriteStatus::Failure);

    wire.fail_clock_output(false);
    block_on(ps2.write_async(0x01)).unwrap();
    assert_eq!(ps2.mode(), Mode::Write);
}

#[test]
fn dropped_write_releases_bus() {
    let bridge = TestBridge::new();
    let wire = MockLines::new();
    let ps2 = Ps2Gpio::new(&bridge, wire.clone(), Forever, Config::default()).unwrap();

    let res = block_on(select(ps2.write_async(0x01), core::future::ready(())));
    assert!(matches!(res, Either::Second(())));

    assert_eq!(ps2.mode(), Mode::Read);
    assert_eq!(ps2.write_status(), WriteStatus::Failure);
    assert_eq!(wire.direction(Line::Clock), Direction::Input);
    assert_eq!(wire.direction(Line::Data), Direction::Input);

    device_sends_byte(&bridge, &wire, 0x33);
    assert_eq!(ps2.try_read(), Some(0x33));
}

static CALLBACK_BYTES: Mutex<Vec<u8>> = Mutex::new(Vec::new());

fn record(byte: u8) {
    CALLBACK_BYTES.lock().unwrap().push(byte);
}

#[test]
fn callback_and_queue_are_exclusive() {
    let bridge = TestBridge::new();
    let wire = MockLines::new();
    let ps2 = Ps2Gpio::new(&bridge, wire.clone(), NoDelay, Config::default()).unwrap();

    device_sends_byte(&bridge, &wire, 0x11);

    // Enabling throws away what was queued before.
    ps2.configure(record);
    assert_eq!(ps2.try_read(), None);

    device_sends_byte(&bridge, &wire, 0x22);
    assert_eq!(ps2.try_read(), None);
    assert_eq!(*CALLBACK_BYTES.lock().unwrap(), [0x22]);

    ps2.disable_callback();
    device_sends_byte(&bridge, &wire, 0x33);
    assert_eq!(ps2.try_read(), Some(0x33));
    assert_eq!(*CALLBACK_BYTES.lock().unwrap(), [0x22]);

    device_sends_byte(&bridge, &wire, 0x44);
    ps2.enable_callback();
    assert_eq!(ps2.try_read(), None);
    device_sends_byte(&bridge, &wire, 0x55);
    assert_eq!(*CALLBACK_BYTES.lock().unwrap(), [0x22, 0x55]);
}

#[test]
fn full_queue_keeps_newest_bytes() {
    let bridge = TestBridge::new();
    let wire = MockLines::new();
    let ps2 = Ps2Gpio::new(&bridge, wire.clone(), NoDelay, Config::default()).unwrap();

    for byte in 0..10u8 {
        device_sends_byte(&bridge, &wire, byte);
    }

    let queued: Vec<u8> = core::iter::from_fn(|| ps2.try_read()).collect();
    assert_eq!(queued, (2..10).collect::<Vec<u8>>());
}
