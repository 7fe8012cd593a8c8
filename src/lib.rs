//! # Remote Rollouts: trajectory aggregation over pub/sub
//!
//! Collects training rollouts from many remote, independently-stepping
//! simulation workers. Workers publish binary state frames onto a pub/sub
//! bus; this crate stitches that interleaved, out-of-order stream into
//! fixed-minimum-size trajectory batches for a training step, preserving
//! recurrent state and cumulative-reward continuity across batch
//! boundaries, evicting stale environments, and answering every state with
//! an action.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │  Worker 0       Worker 1       Worker N     (remote processes) │
//! │     │ state        │              │                            │
//! │     └──────────────┼──────────────┘                            │
//! │                    ▼                                           │
//! │   {prefix}:state:*      pub/sub bus      {prefix}:act:{env}    │
//! │                    │                            ▲              │
//! │            ┌───────▼────────┐                   │              │
//! │            │  StateChannel  │ listener thread   │              │
//! │            │  drain / send ─┼───────────────────┘              │
//! │            └───────┬────────┘                                  │
//! │                    │ StateMessage batches                      │
//! │            ┌───────▼────────┐       ┌──────────┐               │
//! │            │  RemoteRoller  │◀─────▶│  Policy  │               │
//! │            │ active/completed       └──────────┘               │
//! │            └───────┬────────┘                                  │
//! │                    │ rollouts()                                │
//! │                    ▼                                           │
//! │            Training driver (external)                          │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The loop is closed over the network: every drained state is answered
//! with one published action, and workers block on that action before
//! stepping again. Batch cadence is gated by `min_step_batch` (inference
//! batch size) and `min_rollouts`/`min_horizon` (trajectory batch size).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use remote_rollouts::{
//!     ChannelConfig, RedisTransport, RemoteRoller, RollerConfig, StateChannel,
//! };
//!
//! let transport = RedisTransport::connect("redis-host:6379")?;
//! let channel = StateChannel::connect(
//!     transport,
//!     ChannelConfig::new().with_prefix("walker").with_obs_side(84),
//! )?;
//! let mut roller = RemoteRoller::new(
//!     policy,
//!     channel,
//!     RollerConfig::new().with_min_rollouts(32).with_min_horizon(16),
//! )?;
//!
//! loop {
//!     let batch = roller.rollouts()?;
//!     learner.update(&batch);
//! }
//! ```

pub mod channel;
pub mod error;
pub mod policy;
pub mod roller;
pub mod rollout;
pub mod stats;
pub mod transport;
pub mod wire;


// Re-export commonly used types
pub use channel::{ChannelConfig, StateChannel};
pub use error::{Result, RolloutError};
pub use policy::{Policy, PolicyStep};
pub use roller::{RemoteRoller, RollerConfig};
pub use rollout::Rollout;
pub use stats::RollerStats;
pub use transport::{Listener, LocalBus, RedisTransport, TopicMessage, Transport};
pub use wire::{
    action_topic, encode_action, encode_state, env_id_from_topic, state_pattern, state_topic,
    DecodeError, EnvId, Observation, StateMessage,
};
