//! Per-environment trajectory state.
//!
//! A `Rollout` accumulates one environment's trajectory between its creation
//! and either an episode boundary or a length-based truncation. Rewards are
//! stored as increments telescoped from the wire's cumulative counter: each
//! arriving message contributes `cumulative - total_reward()` alongside its
//! observation and model output, so a consumer that misses a message still
//! recovers the correct delta on the next one.
//!
//! Counts: an episode-terminated rollout carries one more reward than it has
//! observations (the synthetic terminal zero appended at the boundary); a
//! live or truncated rollout carries equal counts. `num_steps()` follows the
//! reward sequence.
//!
//! Truncation replaces the entry with a continuation seeded from the final
//! observation and model output, a zero placeholder reward, and carried
//! prefix totals chosen so `total_steps()` and `total_reward()` are exactly
//! preserved across the boundary.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::policy::PolicyStep;
use crate::wire::{EnvId, Observation};

/// One environment's accumulating trajectory.
#[derive(Debug)]
pub struct Rollout<S> {
    env_id: EnvId,
    start_state: S,
    observations: Vec<Observation>,
    model_outs: Vec<PolicyStep<S>>,
    rewards: Vec<f64>,
    reward_sum: f64,
    prev_steps: u64,
    prev_reward: f64,
    last_activity: Instant,
    truncated: bool,
    infos: Vec<HashMap<String, String>>,
}

impl<S> Rollout<S> {
    pub(crate) fn new(env_id: EnvId, start_state: S) -> Self {
        Self {
            env_id,
            start_state,
            observations: Vec::new(),
            model_outs: Vec::new(),
            rewards: Vec::new(),
            reward_sum: 0.0,
            prev_steps: 0,
            prev_reward: 0.0,
            last_activity: Instant::now(),
            truncated: false,
            infos: Vec::new(),
        }
    }

    /// The environment this trajectory belongs to.
    pub fn env_id(&self) -> &EnvId {
        &self.env_id
    }

    /// Recurrent state snapshot at trajectory start.
    pub fn start_state(&self) -> &S {
        &self.start_state
    }

    /// Observations in step order.
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Model outputs in step order, parallel to `observations`.
    pub fn model_outs(&self) -> &[PolicyStep<S>] {
        &self.model_outs
    }

    /// Incremental per-step rewards. One longer than `observations` after an
    /// episode boundary (trailing terminal zero), equal length otherwise.
    pub fn rewards(&self) -> &[f64] {
        &self.rewards
    }

    /// Per-step auxiliary metadata, attached at extraction. Empty maps; a
    /// hook for callers, never populated by this layer.
    pub fn infos(&self) -> &[HashMap<String, String>] {
        &self.infos
    }

    /// Step count of this segment.
    pub fn num_steps(&self) -> usize {
        self.rewards.len()
    }

    /// Step count including every earlier segment of this trajectory.
    pub fn total_steps(&self) -> u64 {
        self.prev_steps + self.rewards.len() as u64
    }

    /// Reward total including every earlier segment of this trajectory.
    /// Tracks the episode's cumulative counter while the episode is open.
    pub fn total_reward(&self) -> f64 {
        self.prev_reward + self.reward_sum
    }

    /// True when this segment was cut by the horizon rule rather than an
    /// episode boundary.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn push_increment(&mut self, increment: f64) {
        self.rewards.push(increment);
        self.reward_sum += increment;
        self.touch();
    }

    /// Record the increment telescoped from a cumulative reward reading.
    /// Returns the increment.
    pub(crate) fn record_cumulative(&mut self, cumulative: f64) -> f64 {
        let increment = cumulative - self.total_reward();
        self.push_increment(increment);
        increment
    }

    /// Append the terminal zero reward for an episode boundary. Nonzero
    /// terminal rewards are not supported by the wire protocol.
    pub(crate) fn close_episode(&mut self) {
        self.push_increment(0.0);
    }

    /// Append one step's observation and model output.
    pub(crate) fn push_step(&mut self, observation: Observation, model_out: PolicyStep<S>) {
        self.observations.push(observation);
        self.model_outs.push(model_out);
        self.touch();
    }

    /// Recurrent state to feed the policy for this environment's next
    /// observation: the last model output's state, else `start_state`.
    pub(crate) fn carried_state(&self) -> &S {
        match self.model_outs.last() {
            Some(out) => &out.state,
            None => &self.start_state,
        }
    }

    /// State that was fed into the final recorded step.
    fn state_before_last(&self) -> &S {
        let n = self.model_outs.len();
        if n >= 2 {
            &self.model_outs[n - 2].state
        } else {
            &self.start_state
        }
    }

    pub(crate) fn mark_truncated(&mut self) {
        self.truncated = true;
    }

    /// Whether the entry has gone `timeout` without any message activity.
    pub(crate) fn is_stale(&self, timeout: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity) > timeout
    }

    /// Attach one empty info slot per step. Called once at extraction.
    pub(crate) fn finalize_infos(&mut self) {
        self.infos = vec![HashMap::new(); self.rewards.len()];
    }
}

impl<S: Clone> Rollout<S> {
    /// Build the replacement entry for a truncated trajectory.
    ///
    /// Seeded with the final observation, the final model output, and a zero
    /// placeholder reward; the carried prefix is offset by that one re-counted
    /// step, so immediately after truncation
    /// `continuation.total_steps() == parent.total_steps()` and
    /// `continuation.total_reward() == parent.total_reward()`.
    pub(crate) fn continuation(&self) -> Self {
        let mut next = Rollout::new(self.env_id.clone(), self.state_before_last().clone());
        next.prev_steps = self.total_steps().saturating_sub(1);
        next.prev_reward = self.total_reward();
        if let (Some(observation), Some(model_out)) =
            (self.observations.last(), self.model_outs.last())
        {
            next.observations.push(observation.clone());
            next.model_outs.push(model_out.clone());
            next.push_increment(0.0);
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn make_obs(fill: u8) -> Observation {
        Observation {
            side: 2,
            data: vec![fill; 12],
        }
    }

    fn make_out(state: u32) -> PolicyStep<u32> {
        PolicyStep {
            action: vec![state % 2 == 0, true],
            state,
        }
    }

    /// Drive a rollout the way the roller does: one reward and one step per
    /// message.
    fn feed(rollout: &mut Rollout<u32>, cumulative: f64, obs_fill: u8, state: u32) {
        rollout.record_cumulative(cumulative);
        rollout.push_step(make_obs(obs_fill), make_out(state));
    }

    #[test]
    fn test_reward_telescoping() {
        let mut rollout = Rollout::new(EnvId::from("a"), 0u32);
        assert!((rollout.record_cumulative(1.0) - 1.0).abs() < 1e-9);
        rollout.push_step(make_obs(1), make_out(1));
        assert!((rollout.record_cumulative(3.0) - 2.0).abs() < 1e-9);
        rollout.push_step(make_obs(2), make_out(2));

        assert_eq!(rollout.rewards(), &[1.0, 2.0]);
        assert!((rollout.total_reward() - 3.0).abs() < 1e-9);
        assert_eq!(rollout.num_steps(), 2);
    }

    #[test]
    fn test_close_episode_appends_terminal_zero() {
        let mut rollout = Rollout::new(EnvId::from("a"), 0u32);
        feed(&mut rollout, 5.0, 1, 1);
        rollout.close_episode();

        assert_eq!(rollout.rewards(), &[5.0, 0.0]);
        assert_eq!(rollout.num_steps(), 2);
        assert_eq!(rollout.observations().len(), 1);
        assert!((rollout.total_reward() - 5.0).abs() < 1e-9);
        assert!(!rollout.is_truncated());
    }

    #[test]
    fn test_carried_state_falls_back_to_start_state() {
        let mut rollout = Rollout::new(EnvId::from("a"), 7u32);
        assert_eq!(*rollout.carried_state(), 7);
        rollout.push_step(make_obs(0), make_out(8));
        assert_eq!(*rollout.carried_state(), 8);
    }

    #[test]
    fn test_continuation_carries_tail_and_totals() {
        let mut parent = Rollout::new(EnvId::from("a"), 10u32);
        feed(&mut parent, 1.0, 1, 11);
        feed(&mut parent, 2.5, 2, 12);
        feed(&mut parent, 4.0, 3, 13);

        let next = parent.continuation();

        // Identity and recurrent chain continue from the parent's tail.
        assert_eq!(next.env_id(), parent.env_id());
        assert_eq!(*next.start_state(), 12);
        assert_eq!(*next.carried_state(), 13);
        assert_eq!(next.observations(), &parent.observations()[2..]);
        assert_eq!(next.model_outs(), &parent.model_outs()[2..]);

        // Totals are preserved exactly across the boundary.
        assert_eq!(next.total_steps(), parent.total_steps());
        assert!((next.total_reward() - parent.total_reward()).abs() < 1e-9);
        assert_eq!(next.rewards(), &[0.0]);
        assert_eq!(next.num_steps(), 1);
        assert!(!next.is_truncated());
    }

    #[test]
    fn test_continuation_of_single_step_uses_start_state() {
        let mut parent = Rollout::new(EnvId::from("a"), 10u32);
        feed(&mut parent, 1.0, 1, 11);

        let next = parent.continuation();
        assert_eq!(*next.start_state(), 10);
        assert_eq!(*next.carried_state(), 11);
        assert_eq!(next.total_steps(), 1);
    }

    #[test]
    fn test_continuation_telescoping_continues_from_carried_total() {
        let mut parent = Rollout::new(EnvId::from("a"), 0u32);
        feed(&mut parent, 4.0, 1, 1);
        let mut next = parent.continuation();

        // The next cumulative reading telescopes against the carried total,
        // not against zero.
        assert!((next.record_cumulative(6.5) - 2.5).abs() < 1e-9);
        assert!((next.total_reward() - 6.5).abs() < 1e-9);
    }

    #[test]
    fn test_staleness_clock() {
        let mut rollout = Rollout::new(EnvId::from("a"), 0u32);
        feed(&mut rollout, 0.0, 0, 1);

        assert!(!rollout.is_stale(Duration::from_secs(60), Instant::now()));
        thread::sleep(Duration::from_millis(15));
        assert!(rollout.is_stale(Duration::from_millis(5), Instant::now()));

        // Any touch resets the clock.
        rollout.record_cumulative(1.0);
        assert!(!rollout.is_stale(Duration::from_millis(5), Instant::now()));
    }

    #[test]
    fn test_finalize_infos_one_slot_per_step() {
        let mut rollout = Rollout::new(EnvId::from("a"), 0u32);
        feed(&mut rollout, 1.0, 1, 1);
        feed(&mut rollout, 2.0, 2, 2);
        rollout.close_episode();
        rollout.finalize_infos();

        assert_eq!(rollout.infos().len(), 3);
        assert!(rollout.infos().iter().all(HashMap::is_empty));
    }
}
