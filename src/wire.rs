//! Wire codec for state and action messages.
//!
//! State messages arrive as raw binary payloads published by remote workers:
//!
//! ```text
//! [3 * side^2 bytes observation][1 byte done flag][ASCII decimal reward]
//! ```
//!
//! The observation is row-major, one byte per channel per pixel, three
//! channels. The done flag marks an episode boundary: the worker sets it on
//! the first frame of a new episode, meaning the previous episode for this
//! environment just ended. The trailing bytes are the episode's cumulative
//! reward formatted as a decimal float, not a per-step reward.
//!
//! Action messages are one ASCII '0'/'1' character per action dimension,
//! no separators.
//!
//! Topic names follow the worker convention: states on
//! `{prefix}:state:{env_id}`, actions on `{prefix}:act:{env_id}`.

use std::fmt;

/// Opaque identifier for one remote environment instance.
///
/// Derived from the state topic suffix; workers pick their own ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnvId(String);

impl EnvId {
    /// View the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for EnvId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for EnvId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// One raw observation frame as received off the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Side length of the square frame.
    pub side: usize,
    /// Row-major RGB bytes, `3 * side * side` long.
    pub data: Vec<u8>,
}

impl Observation {
    /// Byte length of an encoded observation with the given side length.
    pub fn byte_len(side: usize) -> usize {
        3 * side * side
    }
}

/// A decoded state message from one environment.
#[derive(Debug, Clone, PartialEq)]
pub struct StateMessage {
    /// Which environment sent this state.
    pub env_id: EnvId,
    /// The observation frame.
    pub observation: Observation,
    /// Cumulative reward for the current episode (resets at boundaries).
    pub cumulative_reward: f64,
    /// True when the previous episode for this environment just ended.
    pub episode_start: bool,
}

/// Why a raw payload could not be decoded.
///
/// Decode failures are drop-and-log conditions; they never surface as
/// channel errors.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Payload shorter than the observation plus done byte plus one reward byte.
    TooShort {
        len: usize,
        min: usize,
    },
    /// Reward tail was not a parsable decimal float.
    BadReward {
        text: String,
    },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort { len, min } => {
                write!(f, "state payload too short: {} bytes, need at least {}", len, min)
            }
            Self::BadReward { text } => {
                write!(f, "unparsable reward field: '{}'", text)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl StateMessage {
    /// Decode a raw state payload for the given environment.
    ///
    /// `obs_side` is the configured frame side length; payloads shorter than
    /// `3 * obs_side^2 + 2` bytes are rejected.
    pub fn decode(env_id: EnvId, payload: &[u8], obs_side: usize) -> Result<Self, DecodeError> {
        let obs_len = Observation::byte_len(obs_side);
        let min = obs_len + 2;
        if payload.len() < min {
            return Err(DecodeError::TooShort {
                len: payload.len(),
                min,
            });
        }

        let data = payload[..obs_len].to_vec();
        let episode_start = payload[obs_len] != 0;
        let tail = &payload[obs_len + 1..];
        let text = match std::str::from_utf8(tail) {
            Ok(text) => text.trim(),
            Err(_) => {
                return Err(DecodeError::BadReward {
                    text: String::from_utf8_lossy(tail).into_owned(),
                })
            }
        };
        let cumulative_reward = text.parse::<f64>().map_err(|_| DecodeError::BadReward {
            text: text.to_string(),
        })?;

        Ok(Self {
            env_id,
            observation: Observation {
                side: obs_side,
                data,
            },
            cumulative_reward,
            episode_start,
        })
    }
}

/// Encode a state payload the way workers do.
///
/// The reward is formatted with six decimal places, matching the worker's
/// formatter, and round-trips through [`StateMessage::decode`].
pub fn encode_state(observation: &[u8], done: bool, cumulative_reward: f64) -> Vec<u8> {
    let reward = format!("{:.6}", cumulative_reward);
    let mut payload = Vec::with_capacity(observation.len() + 1 + reward.len());
    payload.extend_from_slice(observation);
    payload.push(u8::from(done));
    payload.extend_from_slice(reward.as_bytes());
    payload
}

/// Encode an action vector as one '0'/'1' byte per dimension.
pub fn encode_action(action: &[bool]) -> Vec<u8> {
    action
        .iter()
        .map(|&pressed| if pressed { b'1' } else { b'0' })
        .collect()
}

/// State topic for one environment.
pub fn state_topic(prefix: &str, env_id: &EnvId) -> String {
    format!("{}:state:{}", prefix, env_id)
}

/// Action topic for one environment.
pub fn action_topic(prefix: &str, env_id: &EnvId) -> String {
    format!("{}:act:{}", prefix, env_id)
}

/// Subscription pattern matching every environment's state topic.
pub fn state_pattern(prefix: &str) -> String {
    format!("{}:state:*", prefix)
}

/// Extract the environment id from a state topic name.
///
/// The id is the suffix after the last ':'. Returns `None` for topics with
/// an empty suffix.
pub fn env_id_from_topic(topic: &str) -> Option<EnvId> {
    match topic.rsplit(':').next() {
        Some(suffix) if !suffix.is_empty() => Some(EnvId::from(suffix)),
        _ => None,
    }
}
