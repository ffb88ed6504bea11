//! Broker session supervisor.
//!
//! Owns the MQTT client and the subscription lifecycle: when the session
//! comes up, subscribe to the device's static and plan topics and ask for
//! an immediate heartbeat; when it drops, wait out the reconnect interval
//! before letting the client try again. Inbound messages are classified
//! by topic and copied out as [`Inbound`] values -- parsing happens in the
//! node, so a slow JSON payload can never stall the transport poll.
//!
//! The transport is MQTT by way of `minimq`, but nothing here relies on
//! more than an at-least-once topic bus.

use embedded_nal::{IpAddr, TcpClientStack};
use embedded_time::Clock;
use heapless::Vec;
use minimq::{Minimq, QoS, Retain};

use crate::net::{Inbound, NodeConfig, MAX_MSG_BYTES};

/// In-flight outbound message slots; one heartbeat at a time is plenty.
const MSG_SLOTS: usize = 1;

/// Classifies a broker message by topic. Unknown topics are dropped.
fn classify(
    topic: &str,
    payload: &[u8],
    static_topic: &str,
    plan_topic: &str,
) -> Option<Inbound> {
    let copy = || Vec::from_slice(payload).ok();
    if topic == static_topic {
        copy().map(Inbound::Static)
    } else if topic == plan_topic {
        copy().map(Inbound::Plan)
    } else {
        log::debug!("message on unexpected topic");
        None
    }
}

pub struct Session<S, C>
where
    S: TcpClientStack,
    C: Clock,
{
    mqtt: Minimq<S, C, MAX_MSG_BYTES, MSG_SLOTS>,
    static_topic: &'static str,
    plan_topic: &'static str,
    heartbeat_topic: &'static str,
    reconnect_interval_ms: u64,
    /// Connection state seen on the previous poll, for edge detection.
    was_connected: bool,
    subscribed: bool,
    /// Session-up heartbeat owed to the node.
    connect_heartbeat: bool,
    /// Polls are suppressed until this instant after a drop.
    next_attempt_ms: u64,
}

impl<S, C> Session<S, C>
where
    S: TcpClientStack,
    C: Clock,
{
    pub fn new(
        broker: IpAddr,
        stack: S,
        clock: C,
        config: &NodeConfig,
    ) -> Result<Self, minimq::Error<S::Error>> {
        let mqtt = Minimq::new(broker, config.device_id, stack, clock)?;
        Ok(Session {
            mqtt,
            static_topic: config.static_topic,
            plan_topic: config.plan_topic,
            heartbeat_topic: config.heartbeat_topic,
            reconnect_interval_ms: config.reconnect_interval_ms,
            was_connected: false,
            subscribed: false,
            connect_heartbeat: false,
            next_attempt_ms: 0,
        })
    }

    /// Runs one supervision step and returns an inbound message, if the
    /// broker delivered one. `now_ms` is monotonic milliseconds.
    pub fn poll(&mut self, now_ms: u64) -> Option<Inbound> {
        if now_ms < self.next_attempt_ms {
            return None;
        }

        let connected = self.mqtt.client.is_connected();
        if connected && !self.subscribed {
            match self.subscribe_all() {
                Ok(()) => {
                    log::info!("broker session up");
                    self.subscribed = true;
                    self.connect_heartbeat = true;
                }
                Err(_) => {
                    // Treat a refused subscription like a dead session:
                    // back off and come back for a fresh attempt.
                    log::warn!("subscription failed; retrying");
                    self.next_attempt_ms = now_ms + self.reconnect_interval_ms;
                    return None;
                }
            }
        } else if !connected && self.was_connected {
            log::warn!("broker session lost");
            self.subscribed = false;
            self.next_attempt_ms = now_ms + self.reconnect_interval_ms;
        }
        self.was_connected = connected;

        let static_topic = self.static_topic;
        let plan_topic = self.plan_topic;
        let mut inbound = None;
        match self.mqtt.poll(|_client, topic, payload, _properties| {
            if inbound.is_none() {
                inbound = classify(topic, payload, static_topic, plan_topic);
            }
        }) {
            Ok(()) => inbound,
            Err(minimq::Error::Network(_)) => {
                log::debug!("transport error during poll");
                None
            }
            Err(_) => None,
        }
    }

    /// True once per session establishment; the node answers with an
    /// immediate heartbeat.
    pub fn take_connect_heartbeat(&mut self) -> bool {
        core::mem::replace(&mut self.connect_heartbeat, false)
    }

    pub fn is_connected(&mut self) -> bool {
        self.mqtt.client.is_connected()
    }

    /// Publishes a heartbeat payload, best-effort.
    pub fn publish_heartbeat(&mut self, payload: &[u8]) {
        if !self.mqtt.client.is_connected() {
            return;
        }
        if self
            .mqtt
            .client
            .publish(self.heartbeat_topic, payload, QoS::AtMostOnce, Retain::NotRetained, &[])
            .is_err()
        {
            log::debug!("heartbeat publish failed");
        }
    }

    fn subscribe_all(&mut self) -> Result<(), minimq::Error<S::Error>> {
        self.mqtt.client.subscribe(self.static_topic, &[])?;
        self.mqtt.client.subscribe(self.plan_topic, &[])?;
        Ok(())
    }
}
