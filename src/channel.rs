//! State channel: the transport subscription and its background listener.
//!
//! One channel owns one pattern subscription covering every environment's
//! state topic. A single named listener thread decodes inbound payloads and
//! appends them to a lock-protected pending buffer; [`StateChannel::drain`]
//! swaps that buffer out atomically. Malformed payloads are counted, logged
//! at warn, and dropped without touching the buffer.
//!
//! # Fault latching
//!
//! The first transport failure the listener observes is stored once; every
//! later `drain` fails with a clone of it. A poisoned channel never heals.
//! The caller discards it and connects a new one, accepting the loss of any
//! in-flight trajectories.
//!
//! # Lifecycle
//!
//! [`StateChannel::close`] raises the stop flag and joins the listener;
//! messages already appended stay drainable, and failures observed during
//! shutdown are not latched. Dropping the channel closes it. One channel
//! never has more than one live listener.

use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::error::{Result, RolloutError};
use crate::transport::{Listener, TopicMessage, Transport};
use crate::wire::{self, EnvId, StateMessage};

/// State channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Topic namespace shared with the workers.
    pub prefix: String,
    /// Observation side length used to decode state payloads.
    pub obs_side: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            prefix: "rollout".to_string(),
            obs_side: 84,
        }
    }
}

impl ChannelConfig {
    /// Create config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the topic namespace.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the observation side length.
    pub fn with_obs_side(mut self, obs_side: usize) -> Self {
        self.obs_side = obs_side;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.prefix.is_empty() {
            return Err(RolloutError::InvalidConfig {
                field: "prefix",
                message: "must not be empty",
            });
        }
        if self.prefix.contains('*') || self.prefix.contains('?') {
            return Err(RolloutError::InvalidConfig {
                field: "prefix",
                message: "must not contain pattern characters",
            });
        }
        if self.obs_side == 0 {
            return Err(RolloutError::InvalidConfig {
                field: "obs_side",
                message: "must be > 0",
            });
        }
        Ok(())
    }
}

/// State shared between the channel and its listener thread.
struct ChannelShared {
    /// Decoded messages awaiting a drain, in arrival order.
    pending: Mutex<Vec<StateMessage>>,
    /// First transport failure observed by the listener.
    fault: Mutex<Option<RolloutError>>,
    /// Managed-stop signal for the listener.
    stop: AtomicBool,
    /// Messages received off the transport, well-formed or not.
    received: AtomicU64,
    /// Messages dropped for malformed topics or payloads.
    dropped: AtomicU64,
}

/// Pub/sub channel carrying states in and actions out.
pub struct StateChannel<T: Transport> {
    transport: T,
    prefix: String,
    shared: Arc<ChannelShared>,
    listener_thread: Option<JoinHandle<()>>,
}

impl<T: Transport> StateChannel<T> {
    /// Open the channel: verify transport liveness, subscribe to
    /// `{prefix}:state:*`, and start the listener thread.
    ///
    /// Fails fast with a connection error when the transport is
    /// unreachable.
    pub fn connect(mut transport: T, config: ChannelConfig) -> Result<Self> {
        config.validate()?;
        transport.ping()?;
        let listener = transport.listener(&wire::state_pattern(&config.prefix))?;

        let shared = Arc::new(ChannelShared {
            pending: Mutex::new(Vec::new()),
            fault: Mutex::new(None),
            stop: AtomicBool::new(false),
            received: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });

        let thread_shared = Arc::clone(&shared);
        let obs_side = config.obs_side;
        let listener_thread = std::thread::Builder::new()
            .name(format!("State-Listener-{}", config.prefix))
            .spawn(move || run_listener(listener, thread_shared, obs_side))
            .expect("Failed to spawn state listener thread");

        Ok(Self {
            transport,
            prefix: config.prefix,
            shared,
            listener_thread: Some(listener_thread),
        })
    }

    /// Take every pending state message, in arrival order.
    ///
    /// Once the listener has latched a transport fault this fails with that
    /// fault instead, on this and every subsequent call.
    pub fn drain(&self) -> Result<Vec<StateMessage>> {
        if let Some(fault) = self.shared.fault.lock().clone() {
            return Err(fault);
        }
        Ok(mem::take(&mut *self.shared.pending.lock()))
    }

    /// Publish one encoded action per pair to that environment's action
    /// topic. Fire and forget.
    pub fn send(&mut self, actions: &[(EnvId, Vec<bool>)]) -> Result<()> {
        for (env_id, action) in actions {
            let topic = wire::action_topic(&self.prefix, env_id);
            self.transport.publish(&topic, &wire::encode_action(action))?;
        }
        Ok(())
    }

    /// Stop the listener and wait for it to exit. Idempotent. Pending
    /// messages stay drainable.
    pub fn close(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.listener_thread.take() {
            let _ = handle.join();
        }
    }

    /// The transport fault poisoning this channel, if any.
    pub fn fault(&self) -> Option<RolloutError> {
        self.shared.fault.lock().clone()
    }

    /// Messages received off the transport, well-formed or not.
    pub fn messages_received(&self) -> u64 {
        self.shared.received.load(Ordering::Relaxed)
    }

    /// Messages dropped for malformed topics or payloads.
    pub fn messages_dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Topic namespace this channel operates in.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl<T: Transport> Drop for StateChannel<T> {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_listener<L: Listener>(listener: L, shared: Arc<ChannelShared>, obs_side: usize) {
    log::debug!("state listener started");
    let sink_shared = Arc::clone(&shared);
    let result = listener.pump(&shared.stop, move |msg| {
        ingest(&sink_shared, msg, obs_side);
    });
    match result {
        Ok(()) => log::debug!("state listener stopped"),
        Err(err) => {
            if shared.stop.load(Ordering::SeqCst) {
                // Raced a managed stop; not a channel fault.
                log::debug!("state listener stopped during shutdown: {}", err);
            } else {
                log::error!("state listener failed, poisoning channel: {}", err);
                *shared.fault.lock() = Some(err);
            }
        }
    }
}

fn ingest(shared: &ChannelShared, msg: TopicMessage, obs_side: usize) {
    shared.received.fetch_add(1, Ordering::Relaxed);
    let env_id = match wire::env_id_from_topic(&msg.topic) {
        Some(env_id) => env_id,
        None => {
            shared.dropped.fetch_add(1, Ordering::Relaxed);
            log::warn!("dropping state message with malformed topic '{}'", msg.topic);
            return;
        }
    };
    match StateMessage::decode(env_id, &msg.payload, obs_side) {
        Ok(state) => shared.pending.lock().push(state),
        Err(err) => {
            shared.dropped.fetch_add(1, Ordering::Relaxed);
            log::warn!("dropping state message from '{}': {}", msg.topic, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalBus;
    use std::thread;
    use std::time::Duration;

    fn make_channel(bus: &LocalBus, obs_side: usize) -> StateChannel<crate::transport::LocalTransport> {
        let config = ChannelConfig::new().with_prefix("ns").with_obs_side(obs_side);
        StateChannel::connect(bus.transport(), config).unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = ChannelConfig::new();
        assert_eq!(config.prefix, "rollout");
        assert_eq!(config.obs_side, 84);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_config() {
        assert!(ChannelConfig::new().with_prefix("").validate().is_err());
        assert!(ChannelConfig::new().with_prefix("a*b").validate().is_err());
        assert!(ChannelConfig::new().with_obs_side(0).validate().is_err());
    }

    #[test]
    fn test_connect_fails_fast_on_dead_bus() {
        let bus = LocalBus::new();
        bus.shutdown();
        let result = StateChannel::connect(bus.transport(), ChannelConfig::new());
        assert!(matches!(result, Err(RolloutError::Connection { .. })));
    }

    #[test]
    fn test_drain_returns_arrival_order_and_empties() {
        let bus = LocalBus::new();
        let channel = make_channel(&bus, 2);
        let mut publisher = bus.transport();

        let obs = vec![0u8; 12];
        publisher
            .publish("ns:state:a", &wire::encode_state(&obs, false, 1.0))
            .unwrap();
        publisher
            .publish("ns:state:b", &wire::encode_state(&obs, false, 2.0))
            .unwrap();

        let mut drained = Vec::new();
        for _ in 0..100 {
            drained.extend(channel.drain().unwrap());
            if drained.len() >= 2 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].env_id.as_str(), "a");
        assert_eq!(drained[1].env_id.as_str(), "b");
        assert!(channel.drain().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_payload_dropped_and_counted() {
        let bus = LocalBus::new();
        let channel = make_channel(&bus, 2);
        let mut publisher = bus.transport();

        // One byte short of the minimum.
        publisher.publish("ns:state:a", &[0u8; 13]).unwrap();

        for _ in 0..100 {
            if channel.messages_dropped() == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(channel.messages_dropped(), 1);
        assert_eq!(channel.messages_received(), 1);
        assert!(channel.drain().unwrap().is_empty());
    }

    #[test]
    fn test_close_joins_listener_without_leaking() {
        let bus = LocalBus::new();
        let mut channel = make_channel(&bus, 2);
        assert_eq!(bus.subscriber_count(), 1);

        channel.close();
        assert_eq!(bus.subscriber_count(), 0);
        channel.close();

        // Pending messages appended before the stop stay drainable.
        assert!(channel.drain().is_ok());
    }
}
