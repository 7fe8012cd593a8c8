//! Transport abstraction over the pub/sub bus.
//!
//! The channel talks to the bus through two seams: [`Transport`] for the
//! publishing side (liveness check, action publish, listener creation) and
//! [`Listener`] for the subscribing side. A listener is consumed by
//! [`Listener::pump`], which runs the receive loop on the caller's thread
//! until the stop flag is raised (clean return) or the transport fails
//! (error return). The channel runs `pump` on its background thread.
//!
//! Two implementations ship with the crate: [`RedisTransport`] for the real
//! bus and [`LocalBus`] for in-process wiring in tests and single-process
//! deployments.

use std::sync::atomic::AtomicBool;

use crate::error::Result;

pub mod local;
pub mod redis;

pub use self::local::{LocalBus, LocalListener, LocalTransport};
pub use self::redis::{RedisListener, RedisTransport};

/// One raw message received from the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicMessage {
    /// Full topic the message arrived on.
    pub topic: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

/// Publishing side of the bus.
pub trait Transport {
    /// Listener type produced by [`Transport::listener`].
    type Listener: Listener;

    /// Verify the connection is alive. Called once at channel construction
    /// so an unreachable bus fails fast instead of surfacing later as a
    /// latched fault.
    fn ping(&mut self) -> Result<()>;

    /// Publish one payload to one topic. Fire and forget: no ack, no retry.
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()>;

    /// Open a subscription matching `pattern` and return its listener.
    ///
    /// The subscription is live no later than the start of [`Listener::pump`];
    /// [`LocalBus`] registers it before this returns, so in-process tests
    /// cannot race the listener thread.
    fn listener(&mut self, pattern: &str) -> Result<Self::Listener>;
}

/// Subscribing side of the bus.
pub trait Listener: Send + 'static {
    /// Run the receive loop until `stop` is raised or the transport fails.
    ///
    /// Every received message is handed to `on_message` in arrival order.
    /// Returns `Ok(())` when stopped on request; returns the transport
    /// error otherwise. The stop flag is polled between receives, so a
    /// raised flag is honored within the implementation's receive timeout.
    fn pump<F>(self, stop: &AtomicBool, on_message: F) -> Result<()>
    where
        F: FnMut(TopicMessage);
}
