//! Rollout accumulation loop.
//!
//! `RemoteRoller` drives the collection side of training: drain the state
//! channel, settle episode boundaries and telescoped rewards, step the
//! policy once per drained batch, answer every message with an action,
//! evict dead environments, and emit a batch once enough trajectories are
//! ready.
//!
//! Per-environment lifecycle:
//!
//! ```text
//! Absent  --first message-->  Active  --settled steps >= min_horizon-->  ReadyButOpen
//! Active | ReadyButOpen  --episode boundary-->  Completed (awaits extraction)
//! Active | ReadyButOpen  --timeout-->  Absent (discarded, nothing emitted)
//! ReadyButOpen  --extraction-->  emitted truncated; continuation stays Active
//! ```
//!
//! A live entry's newest recorded step is always in flight: its action has
//! been published but the state it produces has not come back. "Settled
//! steps" excludes it, so a trajectory reaches the horizon one message after
//! recording its `min_horizon`-th step, and a newborn continuation (one
//! carried step) is never ready without new input.
//!
//! Every phase keys trajectory state by environment id; a message's position
//! within the drained batch carries no meaning.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

use crate::channel::StateChannel;
use crate::error::{Result, RolloutError};
use crate::policy::Policy;
use crate::rollout::Rollout;
use crate::stats::RollerStats;
use crate::transport::Transport;
use crate::wire::{EnvId, StateMessage};

/// Roller configuration.
#[derive(Debug, Clone)]
pub struct RollerConfig {
    /// Minimum completed-or-ready trajectories before `rollouts()` returns.
    pub min_rollouts: usize,
    /// Settled step count at which an open trajectory becomes eligible for
    /// truncation-extraction. The newest recorded step is still in flight
    /// and does not count.
    pub min_horizon: usize,
    /// Minimum drained messages before the policy is stepped. Raising this
    /// trades latency for larger inference batches.
    pub min_step_batch: usize,
    /// Idle time after which an environment is evicted.
    pub env_timeout: Duration,
    /// Sleep between polls while waiting for `min_step_batch` messages.
    pub poll_interval: Duration,
}

impl Default for RollerConfig {
    fn default() -> Self {
        Self {
            min_rollouts: 64,
            min_horizon: 16,
            min_step_batch: 1,
            env_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_millis(1),
        }
    }
}

impl RollerConfig {
    /// Create config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum trajectories per emitted batch.
    pub fn with_min_rollouts(mut self, min_rollouts: usize) -> Self {
        self.min_rollouts = min_rollouts;
        self
    }

    /// Set the truncation-eligibility horizon.
    pub fn with_min_horizon(mut self, min_horizon: usize) -> Self {
        self.min_horizon = min_horizon;
        self
    }

    /// Set the minimum drained messages per policy step.
    pub fn with_min_step_batch(mut self, min_step_batch: usize) -> Self {
        self.min_step_batch = min_step_batch;
        self
    }

    /// Set the environment activity timeout.
    pub fn with_env_timeout(mut self, env_timeout: Duration) -> Self {
        self.env_timeout = env_timeout;
        self
    }

    /// Set the drain poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.min_rollouts == 0 {
            return Err(RolloutError::InvalidConfig {
                field: "min_rollouts",
                message: "must be > 0",
            });
        }
        if self.min_horizon == 0 {
            return Err(RolloutError::InvalidConfig {
                field: "min_horizon",
                message: "must be > 0",
            });
        }
        if self.min_step_batch == 0 {
            return Err(RolloutError::InvalidConfig {
                field: "min_step_batch",
                message: "must be > 0",
            });
        }
        if self.env_timeout.is_zero() {
            return Err(RolloutError::InvalidConfig {
                field: "env_timeout",
                message: "must be nonzero",
            });
        }
        Ok(())
    }
}

/// Stitches interleaved state streams into trajectory batches.
///
/// Single-threaded owner of all trajectory state; the only concurrency is
/// inside the [`StateChannel`] it drains.
pub struct RemoteRoller<P: Policy, T: Transport> {
    policy: P,
    channel: StateChannel<T>,
    config: RollerConfig,
    active: HashMap<EnvId, Rollout<P::State>>,
    completed: Vec<Rollout<P::State>>,
    stats: RollerStats,
}

impl<P: Policy, T: Transport> RemoteRoller<P, T> {
    /// Build a roller over a connected channel.
    pub fn new(policy: P, channel: StateChannel<T>, config: RollerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            policy,
            channel,
            config,
            active: HashMap::new(),
            completed: Vec::new(),
            stats: RollerStats::new(),
        })
    }

    /// Collect the next batch of trajectories.
    ///
    /// Blocks until at least `min_rollouts` trajectories are completed or
    /// hold `min_horizon` settled steps, then returns all completed
    /// trajectories plus a truncated copy of every horizon-ready open one
    /// (each replaced in place by its continuation). Only transport faults
    /// interrupt the wait; there is no internal timeout for the call
    /// itself.
    pub fn rollouts(&mut self) -> Result<Vec<Rollout<P::State>>> {
        while !self.has_enough() {
            let batch = self.next_batch()?;
            self.process_batch(batch)?;
            self.evict_stale();
        }
        Ok(self.extract())
    }

    /// Trajectories currently being accumulated.
    pub fn active_envs(&self) -> usize {
        self.active.len()
    }

    /// Completed trajectories awaiting the next extraction.
    pub fn completed_pending(&self) -> usize {
        self.completed.len()
    }

    /// Collection statistics.
    pub fn stats(&self) -> &RollerStats {
        &self.stats
    }

    /// The underlying channel (for its counters).
    pub fn channel(&self) -> &StateChannel<T> {
        &self.channel
    }

    /// Whether an open trajectory has `min_horizon` settled steps. The
    /// newest recorded step is excluded: its action is out but the state it
    /// produces has not arrived, and extraction carries it into the
    /// continuation.
    fn horizon_ready(&self, entry: &Rollout<P::State>) -> bool {
        entry.num_steps() > self.config.min_horizon
    }

    fn has_enough(&self) -> bool {
        let ready = self
            .active
            .values()
            .filter(|entry| self.horizon_ready(entry))
            .count();
        self.completed.len() + ready >= self.config.min_rollouts
    }

    /// Drain until at least `min_step_batch` messages are pending.
    fn next_batch(&self) -> Result<Vec<StateMessage>> {
        let mut pending = self.channel.drain()?;
        while pending.len() < self.config.min_step_batch {
            thread::sleep(self.config.poll_interval);
            pending.extend(self.channel.drain()?);
        }
        Ok(pending)
    }

    fn process_batch(&mut self, batch: Vec<StateMessage>) -> Result<()> {
        // Column-split the batch once; the phases below walk the columns in
        // arrival order.
        let mut env_ids = Vec::with_capacity(batch.len());
        let mut observations = Vec::with_capacity(batch.len());
        let mut cumulative_rewards = Vec::with_capacity(batch.len());
        let mut episode_starts = Vec::with_capacity(batch.len());
        for msg in batch {
            env_ids.push(msg.env_id);
            observations.push(msg.observation);
            cumulative_rewards.push(msg.cumulative_reward);
            episode_starts.push(msg.episode_start);
        }

        // Episode boundaries: retire the finished trajectory before anything
        // else touches its environment. The boundary message itself belongs
        // to the next episode and is recorded below like any first step.
        for (env_id, &episode_start) in env_ids.iter().zip(&episode_starts) {
            if !episode_start {
                continue;
            }
            if let Some(mut finished) = self.active.remove(env_id) {
                finished.close_episode();
                self.stats.record_episode(finished.total_reward());
                log::debug!(
                    "episode done for env {}: {} steps, reward {:.3}",
                    env_id,
                    finished.num_steps(),
                    finished.total_reward()
                );
                self.completed.push(finished);
            }
        }

        // Telescoped reward updates for entries that survived the boundary
        // pass.
        for (env_id, &cumulative) in env_ids.iter().zip(&cumulative_rewards) {
            if let Some(entry) = self.active.get_mut(env_id) {
                entry.record_cumulative(cumulative);
            }
        }

        // One recurrent state per message: the entry's carried state, or a
        // fresh one for an environment starting a trajectory.
        let states: Vec<P::State> = env_ids
            .iter()
            .map(|env_id| match self.active.get(env_id) {
                Some(entry) => entry.carried_state().clone(),
                None => self.policy.initial_state(),
            })
            .collect();

        let steps = self.policy.step(&observations, &states);
        assert_eq!(
            steps.len(),
            env_ids.len(),
            "policy returned {} steps for a batch of {}",
            steps.len(),
            env_ids.len()
        );

        // Snapshot the actions before the outputs move into trajectories.
        let actions: Vec<(EnvId, Vec<bool>)> = env_ids
            .iter()
            .cloned()
            .zip(steps.iter().map(|step| step.action.clone()))
            .collect();

        // Record each step on the trajectory matching its env id. A fresh
        // entry also records the message's own reward increment, seeded
        // against a zero total.
        for (i, (observation, step)) in observations.into_iter().zip(steps).enumerate() {
            match self.active.entry(env_ids[i].clone()) {
                Entry::Occupied(mut slot) => {
                    let entry = slot.get_mut();
                    entry.push_step(observation, step);
                    // A burst can land two messages for one environment in
                    // a single batch; the later one missed the reward pass
                    // above because its entry did not exist yet. Settle the
                    // increment here so rewards stay aligned with steps.
                    if entry.rewards().len() < entry.observations().len() {
                        entry.record_cumulative(cumulative_rewards[i]);
                    }
                }
                Entry::Vacant(slot) => {
                    let entry = slot.insert(Rollout::new(env_ids[i].clone(), states[i].clone()));
                    entry.push_step(observation, step);
                    entry.record_cumulative(cumulative_rewards[i]);
                }
            }
        }

        self.channel.send(&actions)
    }

    fn evict_stale(&mut self) {
        let timeout = self.config.env_timeout;
        let now = Instant::now();
        let stats = &mut self.stats;
        self.active.retain(|env_id, entry| {
            if entry.is_stale(timeout, now) {
                stats.evictions = stats.evictions.saturating_add(1);
                log::warn!(
                    "evicting env {}: no activity within {:?}, discarding {} buffered steps",
                    env_id,
                    timeout,
                    entry.num_steps()
                );
                false
            } else {
                true
            }
        });
    }

    /// Move out everything completed, truncate every horizon-ready open
    /// trajectory, and attach the per-step info slots.
    fn extract(&mut self) -> Vec<Rollout<P::State>> {
        let mut batch = std::mem::take(&mut self.completed);

        let ready: Vec<EnvId> = self
            .active
            .iter()
            .filter(|&(_, entry)| self.horizon_ready(entry))
            .map(|(env_id, _)| env_id.clone())
            .collect();
        for env_id in ready {
            if let Some(mut parent) = self.active.remove(&env_id) {
                let next = parent.continuation();
                parent.mark_truncated();
                self.active.insert(env_id, next);
                self.stats.truncations = self.stats.truncations.saturating_add(1);
                batch.push(parent);
            }
        }

        let mut steps = 0u64;
        let mut truncated = 0usize;
        for rollout in &mut batch {
            rollout.finalize_infos();
            steps += rollout.num_steps() as u64;
            if rollout.is_truncated() {
                truncated += 1;
            }
        }
        self.stats.add_steps(steps);
        log::debug!(
            "extracted {} rollouts covering {} steps ({} truncated)",
            batch.len(),
            steps,
            truncated
        );
        batch
    }
}
