//! Policy model interface.
//!
//! The roller treats the policy as a black box: a batch of observations plus
//! a batch of recurrent states in, one action and one new recurrent state per
//! observation out. Stateful models thread their state through `State`;
//! stateless models use `State = ()`.

use crate::wire::Observation;

/// One policy decision for one observation.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyStep<S> {
    /// Chosen action, one flag per action dimension.
    pub action: Vec<bool>,
    /// Recurrent state after consuming the observation.
    pub state: S,
}

/// A batched policy model.
///
/// `step` is invoked once per drained message batch. Slot `i` of the output
/// must correspond to slot `i` of the inputs; the roller keys everything
/// else by environment id.
pub trait Policy {
    /// Recurrent state carried between steps of one trajectory. Cloned when
    /// trajectories are seeded and truncated, so keep it cheap or shared.
    type State: Clone;

    /// State for an environment with no history (episode start).
    fn initial_state(&self) -> Self::State;

    /// Act on a batch. Must return exactly one step per observation.
    fn step(&mut self, observations: &[Observation], states: &[Self::State])
        -> Vec<PolicyStep<Self::State>>;
}
