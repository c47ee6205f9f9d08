use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::PhysiGymResult;

pub mod action;
pub mod config;
pub mod env;
pub mod space;

use action::Action;
use space::SpaceValue;

/// Scalar reward of a single step. By convention in `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Reward(pub f64);

impl From<f64> for Reward {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

impl From<Reward> for f64 {
    fn from(reward: Reward) -> Self {
        reward.0
    }
}

/// Auxiliary, advisory data returned next to every observation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Info(pub BTreeMap<String, serde_json::Value>);

impl Info {
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Step and episode counters owned by the environment core.
///
/// Policy callbacks receive a copy and only read it, for labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Counters {
    /// Steps taken since construction. Never reset.
    pub step_env: u64,
    /// Zero-based index of the current episode.
    pub episode: u32,
    /// Steps taken in the current episode. Reset to 0 by `reset()`.
    pub step_episode: u64,
}

/// Represents the lifecycle status of the environment.
///
/// # Lifecycle
///
/// ```md
/// Current State                                   | Action  | Next State  | Notes
/// ------------------------------------------------|---------|-------------|-------------------------------
/// `Running` (terminated or truncated)             | step()  | EpisodeDone | Episode ends
/// `Running`                                       | step()  | Running     | Continue within episode
/// `Ready` / `Running` / `EpisodeDone`             | reset() | Running     | Start the next episode
/// any                                             | close() | Closed      | Simulation stopped for good
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvStatus {
    /// Initial state. The environment is waiting for `reset()` to be called.
    Ready,

    /// An episode is active and the environment is ready for `step()` calls.
    Running,

    /// The active episode was terminated or truncated.
    ///
    /// A call to `reset()` is required to start the next episode.
    EpisodeDone,

    /// `close()` was called. No further `reset()` or `step()` is allowed.
    Closed,
}

impl EnvStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_episode_done(&self) -> bool {
        matches!(self, Self::EpisodeDone)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Result of a single `step()`.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub observation: SpaceValue,
    pub reward: Reward,
    /// Ended by a domain condition (e.g. the population died out).
    pub terminated: bool,
    /// Ended by an external limit (simulated time reached `max_time`).
    pub truncated: bool,
    pub info: Info,
}

impl Step {
    pub fn is_terminal(&self) -> bool {
        self.terminated || self.truncated
    }
}

pub trait Env {
    fn reset(&mut self, seed: Option<u64>) -> PhysiGymResult<(SpaceValue, Info)>;
    fn step(&mut self, action: Action) -> PhysiGymResult<Step>;
    fn close(&mut self) -> PhysiGymResult<()>;
}
