//! Cooperative-loop orchestrator.
//!
//! # Theory of operation
//!
//! Board support runs one loop, roughly every 10 ms: poll the broker
//! session and hand any [`Inbound`] here; drain the fast receiver and
//! hand frames here; call [`Node::tick`]; call the engine watchdog; then
//! sleep. The interrupt side never appears in this file -- the node talks
//! to the engine exclusively through the arbiter's atomic brightness
//! writes.
//!
//! Two clocks thread through the loop and they are not interchangeable:
//! *monotonic* milliseconds since boot drive timeouts and cadence (they
//! never jump), while *wall-clock* milliseconds drive the schedule (they
//! are meaningless until SNTP lands, which the sync latch guards).

use crate::arbiter::{Arbiter, Mode};
use crate::clock::{SyncLatch, WallClock};
use crate::engine::Engine;
use crate::net::heartbeat::Cadence;
use crate::net::{parse_static_frame, Inbound, NodeConfig};
use crate::plan;
use crate::schedule::Schedule;
use crate::Frame;

/// What the board loop owes the outside world after a tick.
#[derive(Copy, Clone, Debug, Default)]
pub struct Tick {
    /// Publish a heartbeat now (cadence elapsed).
    pub heartbeat_due: bool,
}

pub struct Node<'e> {
    pub arbiter: Arbiter<'e>,
    pub schedule: Schedule,
    sync: SyncLatch,
    heartbeat: Cadence,
}

impl<'e> Node<'e> {
    pub fn new(engine: &'e Engine, config: &NodeConfig) -> Self {
        Node {
            arbiter: Arbiter::new(engine),
            schedule: Schedule::new(),
            sync: SyncLatch::new(),
            heartbeat: Cadence::new(config.heartbeat_period_ms),
        }
    }

    /// Routes one broker message. `wall` supplies the reference time for
    /// relative plan commands.
    pub fn handle_inbound(&mut self, message: Inbound, wall: &impl WallClock) {
        match message {
            Inbound::Static(payload) => match parse_static_frame(&payload) {
                Ok(frame) => self.arbiter.set_static(frame),
                Err(err) => log::warn!("static payload rejected: {:?}", err),
            },
            Inbound::Plan(payload) => {
                match plan::ingest(&payload, wall.now_ms(), &mut self.schedule) {
                    Ok(0) => {}
                    Ok(accepted) => {
                        log::info!("plan accepted: {} frames", accepted);
                        self.arbiter.force_mode(Mode::Planned);
                    }
                    Err(err) => log::warn!("plan rejected: {:?}", err),
                }
            }
        }
    }

    /// Routes one fast-stream frame. `now_mono_ms` feeds the stream-loss
    /// timeout.
    pub fn handle_fast(&mut self, frame: Frame, now_mono_ms: u64) {
        self.arbiter.set_fast(frame, now_mono_ms);
    }

    /// One cooperative tick: sync-latch check, plan drive, fast-timeout
    /// check, heartbeat cadence.
    pub fn tick(&mut self, now_mono_ms: u64, wall: &impl WallClock) -> Tick {
        let now_wall_ms = wall.now_ms();
        let synced = self.sync.check(now_wall_ms);

        plan::drive(&mut self.schedule, &mut self.arbiter, synced, now_wall_ms);
        self.arbiter.tick(now_mono_ms);

        Tick {
            heartbeat_due: self.heartbeat.due(now_mono_ms),
        }
    }

    /// Spelling of the active mode for the heartbeat payload.
    pub fn mode_str(&self) -> &'static str {
        self.arbiter.mode().as_str()
    }

    pub fn clock_synced(&self) -> bool {
        self.sync.is_synced()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TIME_VALID_EPOCH_MS;
    use crate::net::MAX_MSG_BYTES;
    use heapless::Vec;

    struct Wall(u64);
    impl WallClock for Wall {
        fn now_ms(&self) -> u64 {
            self.0
        }
    }

    fn msg(payload: &[u8]) -> Vec<u8, MAX_MSG_BYTES> {
        Vec::from_slice(payload).unwrap()
    }

    #[test]
    fn static_message_drives_the_engine() {
        let engine = Engine::new();
        let mut node = Node::new(&engine, &NodeConfig::default());
        node.handle_inbound(
            Inbound::Static(msg(br#"{"values":[255,128,0,50]}"#)),
            &Wall(0),
        );
        assert_eq!(node.arbiter.mode(), Mode::Static);
        assert_eq!(engine.channel_level(0), 9);
        assert_eq!(engine.channel_level(1), 4);
        assert_eq!(engine.channel_level(2), 0);
        assert_eq!(engine.channel_level(3), 1);
    }

    #[test]
    fn malformed_static_changes_nothing() {
        let engine = Engine::new();
        let mut node = Node::new(&engine, &NodeConfig::default());
        node.handle_inbound(Inbound::Static(msg(b"nonsense")), &Wall(0));
        assert_eq!(node.arbiter.mode(), Mode::Static);
        assert_eq!(engine.channel_level(0), 0);
    }

    #[test]
    fn plan_forces_planned_mode_and_replays_on_time() {
        let engine = Engine::new();
        let mut node = Node::new(&engine, &NodeConfig::default());
        let base = TIME_VALID_EPOCH_MS + 500;

        let payload = std::format!(
            r#"{{"format_version":2,"steps":[{{"ts_ms":{},"values":[0,0,0,0]}},{{"ts_ms":{},"values":[25,25,25,25]}}]}}"#,
            base + 500,
            base + 600,
        );
        node.handle_inbound(Inbound::Plan(msg(payload.as_bytes())), &Wall(base));
        assert_eq!(node.arbiter.mode(), Mode::Planned);

        // Before the first step: nothing to apply yet.
        node.tick(0, &Wall(base + 100));
        assert_eq!(engine.channel_level(0), 0);

        node.tick(10, &Wall(base + 550));
        assert_eq!(node.arbiter.current_frame(), [0, 0, 0, 0]);

        node.tick(20, &Wall(base + 650));
        assert_eq!(node.arbiter.current_frame(), [25, 25, 25, 25]);
        assert_eq!(node.mode_str(), "PLANNED");
    }

    #[test]
    fn plan_frames_wait_for_clock_sync() {
        let engine = Engine::new();
        let mut node = Node::new(&engine, &NodeConfig::default());

        // Wall clock reads pre-sentinel garbage: frames queue, none run.
        node.handle_inbound(
            Inbound::Plan(msg(br#"{"format_version":2,"steps":[{"ts_ms":5,"values":[255,255,255,255]}]}"#)),
            &Wall(1_000),
        );
        node.tick(0, &Wall(1_000));
        assert_eq!(node.schedule.pending(), 1);
        assert_eq!(engine.channel_level(0), 0);

        // Clock lands: the (long past) frame executes, coalesced.
        node.tick(10, &Wall(TIME_VALID_EPOCH_MS + 1));
        assert_eq!(node.schedule.pending(), 0);
        assert_eq!(engine.channel_level(0), 9);
    }

    #[test]
    fn fast_overrides_then_times_out_back_to_static() {
        let engine = Engine::new();
        let mut node = Node::new(&engine, &NodeConfig::default());
        node.handle_inbound(
            Inbound::Static(msg(br#"{"values":[10,10,10,10]}"#)),
            &Wall(0),
        );

        node.handle_fast([255, 255, 255, 255], 1_000);
        assert_eq!(node.arbiter.mode(), Mode::Fast);
        assert_eq!(engine.channel_level(0), 9);

        node.tick(1_000 + crate::arbiter::UDP_TIMEOUT_MS + 1, &Wall(0));
        assert_eq!(node.arbiter.mode(), Mode::Static);
        assert_eq!(engine.channel_level(0), 0);
        // 10 quantizes to level 0; the cache, not the levels, proves the
        // fallback picked static.
        assert_eq!(node.arbiter.current_frame(), [10, 10, 10, 10]);
    }

    #[test]
    fn heartbeat_cadence_is_monotonic_time() {
        let engine = Engine::new();
        let mut node = Node::new(&engine, &NodeConfig::default());
        // Wall clock unsynced the whole time; cadence must not care.
        assert!(node.tick(0, &Wall(0)).heartbeat_due);
        assert!(!node.tick(2_000, &Wall(0)).heartbeat_due);
        assert!(node.tick(5_000, &Wall(0)).heartbeat_due);
    }
}
