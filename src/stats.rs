//! Roller statistics.
//!
//! Averages filter non-finite values (NaN, Inf) so one corrupted reward off
//! the wire cannot poison the lifetime mean.

/// Counters and running averages maintained by the roller.
///
/// Uses numerically stable running averages so long collection runs do not
/// lose precision or overflow.
#[derive(Debug, Clone, Default)]
pub struct RollerStats {
    /// Steps contained in emitted rollouts.
    pub steps_emitted: u64,

    /// Episodes completed via an episode boundary (including those with
    /// non-finite rewards).
    pub episodes: u64,

    /// Episodes with finite rewards used in the average.
    pub valid_episodes: u64,

    /// Episodes with non-finite rewards filtered from the average.
    pub filtered_episodes: u64,

    /// Average episode reward (lifetime, valid episodes only).
    pub avg_episode_reward: f64,

    /// Most recent episode reward (may be non-finite, kept for diagnostics).
    pub recent_episode_reward: f64,

    /// Trajectories cut by the horizon rule.
    pub truncations: u64,

    /// Environments evicted by the activity timeout.
    pub evictions: u64,
}

impl RollerStats {
    /// Create zeroed stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed episode.
    ///
    /// Uses Welford's online algorithm for a numerically stable incremental
    /// mean. Non-finite rewards are counted but excluded from the average.
    pub fn record_episode(&mut self, reward: f64) {
        self.episodes = self.episodes.saturating_add(1);
        self.recent_episode_reward = reward;

        if !reward.is_finite() {
            self.filtered_episodes = self.filtered_episodes.saturating_add(1);
            return;
        }

        self.valid_episodes = self.valid_episodes.saturating_add(1);
        let delta = reward - self.avg_episode_reward;
        self.avg_episode_reward += delta / self.valid_episodes as f64;
    }

    /// Count steps contained in an emitted batch.
    pub fn add_steps(&mut self, n: u64) {
        self.steps_emitted = self.steps_emitted.saturating_add(n);
    }

    /// Whether any episode carried a non-finite reward.
    pub fn has_filtered_episodes(&self) -> bool {
        self.filtered_episodes > 0
    }
}
