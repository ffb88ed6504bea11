//! End-to-end scenarios, network transport mocked at the message seam.

use phasedim::arbiter::{Mode, UDP_TIMEOUT_MS};
use phasedim::clock::{WallClock, TIME_VALID_EPOCH_MS};
use phasedim::engine::{
    Engine, FiringHw, MIN_FIRE_DELAY_US, OFF_DELAY_US,
};
use phasedim::net::fast::decode_datagram;
use phasedim::net::heartbeat::Heartbeat;
use phasedim::net::{Inbound, NodeConfig, MAX_MSG_BYTES};
use phasedim::node::Node;
use phasedim::priority;
use phasedim::schedule::{Schedule, ScheduleFull, CAPACITY};

struct Wall(u64);

impl WallClock for Wall {
    fn now_ms(&self) -> u64 {
        self.0
    }
}

fn msg(payload: &[u8]) -> Inbound {
    Inbound::Static(heapless::Vec::<u8, MAX_MSG_BYTES>::from_slice(payload).unwrap())
}

fn plan_msg(payload: &[u8]) -> Inbound {
    Inbound::Plan(heapless::Vec::<u8, MAX_MSG_BYTES>::from_slice(payload).unwrap())
}

fn isr() -> priority::Isr {
    unsafe { priority::Isr::new() }
}

/// Minimal firing-hardware stand-in: remembers pin states and the armed
/// timer.
#[derive(Default)]
struct Pins {
    high: [bool; 4],
    armed: Option<u32>,
    pulses: usize,
}

impl FiringHw for Pins {
    fn gate_high(&mut self, channel: usize) {
        self.high[channel] = true;
        self.pulses += 1;
    }
    fn all_gates_low(&mut self) {
        self.high = [false; 4];
    }
    fn arm_fire_timer(&mut self, delay_us: u32) {
        self.armed = Some(delay_us);
    }
    fn cancel_fire_timer(&mut self) {
        self.armed = None;
    }
    fn busy_wait_us(&mut self, _us: u32) {}
}

// Scenario 1: a static vector lands on the topic and maps straight into
// engine levels and delays.
#[test]
fn static_apply() {
    let engine = Engine::new();
    let mut node = Node::new(&engine, &NodeConfig::default());

    node.handle_inbound(msg(br#"{"values":[255,128,0,50]}"#), &Wall(0));

    assert_eq!(
        [
            engine.channel_level(0),
            engine.channel_level(1),
            engine.channel_level(2),
            engine.channel_level(3)
        ],
        [9, 4, 0, 1]
    );
    assert_eq!(engine.channel_delay_us(0), MIN_FIRE_DELAY_US);
    assert_eq!(engine.channel_delay_us(1), 5_350);
    assert_eq!(engine.channel_delay_us(2), OFF_DELAY_US);
    assert_eq!(engine.channel_delay_us(3), 8_500);
}

// Scenario 2: a V2 plan replays step-wise at its wall-clock timestamps,
// and the heartbeat reports planned mode.
#[test]
fn plan_v2_replay() {
    let engine = Engine::new();
    let mut node = Node::new(&engine, &NodeConfig::default());

    node.handle_inbound(
        plan_msg(
            br#"{"format_version":2,"steps":[{"ts_ms":1704067201000,"values":[0,0,0,0]},{"ts_ms":1704067201100,"values":[25,25,25,25]}]}"#,
        ),
        &Wall(1_704_067_200_500),
    );
    assert_eq!(node.arbiter.mode(), Mode::Planned);

    node.tick(0, &Wall(1_704_067_201_050));
    assert_eq!(node.arbiter.current_frame(), [0, 0, 0, 0]);

    node.tick(10, &Wall(1_704_067_201_150));
    assert_eq!(node.arbiter.current_frame(), [25, 25, 25, 25]);

    let hb = Heartbeat {
        device_id: "triac-dimmer",
        uptime: 1,
        firmware: "0.1.0",
        ip: "10.0.0.9",
        mode: node.mode_str(),
    };
    let json = hb.to_json().unwrap();
    assert!(std::str::from_utf8(&json).unwrap().contains(r#""mode":"PLANNED""#));
}

// Scenario 3: a fast datagram overrides static output; stream silence
// hands control back.
#[test]
fn fast_override_then_timeout() {
    let engine = Engine::new();
    let mut node = Node::new(&engine, &NodeConfig::default());

    node.handle_inbound(msg(br#"{"values":[10,10,10,10]}"#), &Wall(0));
    assert_eq!(node.arbiter.mode(), Mode::Static);

    let datagram = [0x4C, 0x45, 0x44, 0x01, 0x04, 0xFF, 0xFF, 0xFF, 0xFF];
    let frame = decode_datagram(&datagram).unwrap();
    node.handle_fast(frame, 1_000);
    assert_eq!(node.arbiter.mode(), Mode::Fast);
    assert_eq!(engine.channel_level(0), 9);

    node.tick(1_000 + UDP_TIMEOUT_MS + 1, &Wall(0));
    assert_eq!(node.arbiter.mode(), Mode::Static);
    assert_eq!(node.arbiter.current_frame(), [10, 10, 10, 10]);
    // 10/255 quantizes below the first level.
    assert_eq!(engine.channel_level(0), 0);
}

// Scenario 4: losing the zero-cross reference blacks out the outputs;
// the next edge plus one watchdog pass restores service.
#[test]
fn zero_cross_loss_and_recovery() {
    let engine = Engine::new();
    let mut pins = Pins::default();
    let thread = priority::Thread::new_checked().unwrap();
    engine.set_brightness(5);

    engine.on_zero_cross(1_000, &mut pins, isr());
    assert!(engine.zero_cross_healthy());
    assert!(pins.armed.is_some());

    // 150 ms of silence.
    engine.update(1_000 + 150_000, &mut pins, &thread);
    assert!(engine.is_shut_off());
    assert!(!engine.zero_cross_healthy());
    assert_eq!(pins.high, [false; 4]);
    assert!(pins.armed.is_none());

    // Signal returns: healthy within one accepted edge.
    engine.on_zero_cross(200_000, &mut pins, isr());
    assert!(engine.zero_cross_healthy());

    engine.update(201_000, &mut pins, &thread);
    assert!(!engine.is_shut_off());

    // Next half-cycle fires all four channels at the level-5 delay.
    engine.on_zero_cross(210_000, &mut pins, isr());
    assert_eq!(pins.armed, Some(engine.channel_delay_us(0)));
    engine.on_fire_timer(&mut pins, isr());
    assert_eq!(engine.last_fire_delay_us(), engine.channel_delay_us(0));
    assert_eq!(pins.pulses, 4);
}

// Scenario 5: a full schedule refuses new frames but keeps emitting the
// queued ones in order.
#[test]
fn schedule_capacity() {
    let mut schedule = Schedule::new();
    for i in 0..CAPACITY {
        schedule
            .insert(TIME_VALID_EPOCH_MS + i as u64, [i as u8; 4])
            .unwrap();
    }
    assert_eq!(
        schedule.insert(TIME_VALID_EPOCH_MS, [0xAA; 4]),
        Err(ScheduleFull)
    );

    let mut last_seen = None;
    let mut emitted = 0;
    for i in 0..CAPACITY {
        let now = TIME_VALID_EPOCH_MS + i as u64;
        let frame = schedule.current_frame(now).unwrap();
        if last_seen != Some(frame) {
            emitted += 1;
            last_seen = Some(frame);
        }
        assert_eq!(frame, [i as u8; 4]);
    }
    assert_eq!(emitted, CAPACITY);
    assert_eq!(schedule.pending(), 0);
}

// Scenario 6: magic failure rejects the LED frame; the raw fallback (on
// by default) reinterprets the bytes instead.
#[test]
fn malformed_datagram() {
    let payload = [b'X', b'Y', b'Z', 0x01, 0x04, 0xFF, 0xFF, 0xFF, 0xFF];
    #[cfg(feature = "raw-fast-fallback")]
    assert_eq!(decode_datagram(&payload), Some([88, 89, 90, 1]));
    #[cfg(not(feature = "raw-fast-fallback"))]
    assert_eq!(decode_datagram(&payload), None);
}
