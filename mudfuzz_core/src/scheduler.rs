use crate::command::FuzzCommand;
use crate::config::ConfigError;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand_core::RngCore;
use std::fmt;

/// A fuzz command bound to its identifier and selection weight.
///
/// Built once at startup and immutable for the rest of the session.
pub struct RegisteredAction {
    id: String,
    weight: f64,
    command: Box<dyn FuzzCommand>,
}

impl RegisteredAction {
    /// Rejects negative, NaN and infinite weights. Zero is allowed and means "never".
    pub fn new(
        id: impl Into<String>,
        weight: f64,
        command: Box<dyn FuzzCommand>,
    ) -> Result<Self, ConfigError> {
        let id = id.into();
        if !weight.is_finite() || weight < 0.0 {
            return Err(ConfigError::InvalidWeight {
                command: id,
                weight,
            });
        }
        Ok(Self {
            id,
            weight,
            command,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn command(&self) -> &dyn FuzzCommand {
        self.command.as_ref()
    }
}

impl fmt::Debug for RegisteredAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredAction")
            .field("id", &self.id)
            .field("weight", &self.weight)
            .field("command", &self.command.name())
            .finish()
    }
}

/// Picks the next fuzz action by weighted random selection over a fixed table.
///
/// The probability of an action is its weight divided by the sum of all weights.
/// A table that is empty or has only zero weights is legal; it never selects
/// anything, and the engine simply idles.
#[derive(Debug)]
pub struct ActionScheduler {
    actions: Vec<RegisteredAction>,
    distribution: Option<WeightedIndex<f64>>,
}

impl ActionScheduler {
    /// Builds the selection table. Fails if the weights sum past `f64::MAX`.
    pub fn new(actions: Vec<RegisteredAction>) -> Result<Self, ConfigError> {
        let total: f64 = actions.iter().map(|action| action.weight).sum();
        if !total.is_finite() {
            return Err(ConfigError::WeightOverflow { total });
        }
        let distribution = if total > 0.0 {
            Some(WeightedIndex::new(actions.iter().map(|action| action.weight))?)
        } else {
            None
        };
        Ok(Self {
            actions,
            distribution,
        })
    }

    /// Returns an index into [`ActionScheduler::actions`], or `None` if nothing can be selected.
    pub fn next_index(&self, rng: &mut dyn RngCore) -> Option<usize> {
        self.distribution
            .as_ref()
            .map(|distribution| distribution.sample(rng))
    }

    pub fn next(&self, rng: &mut dyn RngCore) -> Option<&RegisteredAction> {
        self.next_index(rng).map(|index| &self.actions[index])
    }

    pub fn actions(&self) -> &[RegisteredAction] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// `true` when at least one action has a positive weight.
    pub fn can_select(&self) -> bool {
        self.distribution.is_some()
    }
}

impl Default for ActionScheduler {
    fn default() -> Self {
        Self {
            actions: Vec::new(),
            distribution: None,
        }
    }
}
