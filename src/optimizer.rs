//! Sleep-cycle hyperparameter self-optimiser (§4.9, C10).
//!
//! Modelled per §9's design note as a pure `(params, telemetry, storeStats)
//! -> decision` function plus a persistence step: [`SleepCycleOptimizer`]
//! holds the only mutable cell (`current_params`), and [`RagStore`] reads
//! a snapshot of it on every feedback update and consolidation cycle.
//!
//! [`RagStore`]: crate::store::RagStore

use std::collections::VecDeque;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::telemetry::TelemetryEvent;

/// Blob key the optimiser's state persists under (§6).
pub const OPTIMIZER_STATE_BLOB_KEY: &str = "sleep_cycle_optimizer_state";

/// Rolling telemetry window consulted each cycle (§4.9).
pub const TELEMETRY_WINDOW: usize = 500;

/// Minimum telemetry samples required before the optimiser will act (§4.9).
pub const MIN_TELEMETRY_SAMPLES: usize = 50;

/// Bound on the retained fitness history (§4.9 step 5).
const MAX_FITNESS_HISTORY: usize = 100;

/// Consecutive degradations before a hard reset to defaults (§4.9 step 3).
const DEGRADATIONS_BEFORE_RESET: u32 = 3;

/// Gaussian perturbation standard deviation (§4.9 step 4).
const PERTURBATION_STD_DEV: f64 = 0.1;

/// Clip applied to the sampled perturbation before it is used
/// multiplicatively (§4.9 step 4).
const PERTURBATION_CLIP: f64 = 0.2;

/// Tunable hyperparameters consumed by the chunk store, retrieval, and
/// consolidation subsystems (§3).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunableParams {
    /// TD learning rate applied by [`crate::chunk::Chunk::update_q_value`].
    pub learning_rate: f64,
    /// Q-value above which consolidation's strengthen phase fires.
    pub strengthen_threshold: f64,
    /// Q-value below which consolidation's weaken phase fires.
    pub consolidation_threshold: f64,
    /// Q-value below which consolidation's forget phase considers a chunk.
    pub forget_threshold: f64,
    /// Maximum chunks forgotten in one consolidation cycle.
    pub max_forget_per_cycle: u32,
    /// Minimum similarity for consolidation's connect phase.
    pub connection_similarity_threshold: f64,
}

impl TunableParams {
    const LEARNING_RATE_BOUNDS: (f64, f64) = (0.01, 0.5);
    const STRENGTHEN_BOUNDS: (f64, f64) = (0.5, 0.95);
    const CONSOLIDATION_BOUNDS: (f64, f64) = (0.15, 0.6);
    const FORGET_BOUNDS: (f64, f64) = (0.03, 0.3);
    const MAX_FORGET_BOUNDS: (u32, u32) = (1, 20);
    const CONNECTION_SIMILARITY_BOUNDS: (f64, f64) = (0.1, 0.7);

    /// Clamp every field to its per-parameter bounds (§3), then repair
    /// the ordering invariant (§4.9 step 4): `forget + 0.1 <=
    /// consolidation <= strengthen - 0.1`, adjusting in that order.
    fn clamped_and_repaired(mut self) -> Self {
        self.learning_rate = self.learning_rate.clamp(Self::LEARNING_RATE_BOUNDS.0, Self::LEARNING_RATE_BOUNDS.1);
        self.strengthen_threshold = self.strengthen_threshold.clamp(Self::STRENGTHEN_BOUNDS.0, Self::STRENGTHEN_BOUNDS.1);
        self.consolidation_threshold =
            self.consolidation_threshold.clamp(Self::CONSOLIDATION_BOUNDS.0, Self::CONSOLIDATION_BOUNDS.1);
        self.forget_threshold = self.forget_threshold.clamp(Self::FORGET_BOUNDS.0, Self::FORGET_BOUNDS.1);
        self.max_forget_per_cycle = self
            .max_forget_per_cycle
            .clamp(Self::MAX_FORGET_BOUNDS.0, Self::MAX_FORGET_BOUNDS.1);
        self.connection_similarity_threshold = self
            .connection_similarity_threshold
            .clamp(Self::CONNECTION_SIMILARITY_BOUNDS.0, Self::CONNECTION_SIMILARITY_BOUNDS.1);

        if self.consolidation_threshold < self.forget_threshold + 0.1 {
            self.consolidation_threshold = (self.forget_threshold + 0.1).clamp(Self::CONSOLIDATION_BOUNDS.0, Self::CONSOLIDATION_BOUNDS.1);
        }
        if self.strengthen_threshold < self.consolidation_threshold + 0.1 {
            self.strengthen_threshold =
                (self.consolidation_threshold + 0.1).clamp(Self::STRENGTHEN_BOUNDS.0, Self::STRENGTHEN_BOUNDS.1);
        }
        self
    }

    /// Whether the ordering invariant currently holds (§3, §8).
    #[must_use]
    pub fn ordering_is_valid(&self) -> bool {
        self.forget_threshold + 0.1 <= self.consolidation_threshold
            && self.consolidation_threshold <= self.strengthen_threshold - 0.1
    }
}

impl Default for TunableParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            strengthen_threshold: 0.8,
            consolidation_threshold: 0.35,
            forget_threshold: 0.1,
            max_forget_per_cycle: 5,
            connection_similarity_threshold: 0.3,
        }
    }
}

/// Store-side inputs the optimiser needs but does not compute itself
/// (§4.9 step 2: `qHealth = 0.6*avgQValue + 0.4*successRate`).
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreHealthSnapshot {
    /// Mean Q-value across the store.
    pub avg_q_value: f64,
    /// Aggregate success rate across the store.
    pub success_rate: f64,
}

/// Outcome of one optimiser step (§4.9).
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationResult {
    /// Whether a new parameter set was adopted this cycle.
    pub applied: bool,
    /// Reason the step declined to apply a change, if any.
    pub reason: Option<String>,
    /// Computed fitness for this cycle, if telemetry was sufficient.
    pub fitness: Option<f64>,
    /// Cycle counter after this step.
    pub cycle: u64,
}

/// Persisted optimiser state (§4.9 step 5, §6 key
/// `sleep_cycle_optimizer_state`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizerState {
    /// Parameters currently in effect.
    pub current_params: TunableParams,
    /// Parameters in effect before the most recent perturbation.
    pub previous_params: TunableParams,
    /// Fitness computed for `previous_params`, `None` before the first cycle.
    pub previous_fitness: Option<f64>,
    /// Number of completed cycles.
    pub cycle: u64,
    /// Consecutive degradations since the last improvement or reset.
    pub degradations: u32,
    /// Total cycles counted as an improvement.
    pub improvements: u64,
    /// Total cycles counted as a reversion.
    pub reversions: u64,
    /// Bounded history of computed fitness values, newest last.
    pub fitness_history: VecDeque<f64>,
}

impl Default for OptimizerState {
    fn default() -> Self {
        Self {
            current_params: TunableParams::default(),
            previous_params: TunableParams::default(),
            previous_fitness: None,
            cycle: 0,
            degradations: 0,
            improvements: 0,
            reversions: 0,
            fitness_history: VecDeque::new(),
        }
    }
}

/// Perturb-and-select tuner over the consolidation/learning
/// hyperparameters (§4.9, C10).
#[derive(Debug, Clone, Default)]
pub struct SleepCycleOptimizer {
    state: OptimizerState,
}

impl SleepCycleOptimizer {
    /// Construct an optimiser starting from default parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore an optimiser from a previously persisted state (§9: loaders
    /// replace, not append).
    #[must_use]
    pub fn from_state(state: OptimizerState) -> Self {
        Self { state }
    }

    /// Current snapshot of the optimiser's persisted state.
    #[must_use]
    pub fn state(&self) -> &OptimizerState {
        &self.state
    }

    /// Parameters currently in effect; read by `RagStore` on every
    /// feedback update and consolidation cycle.
    #[must_use]
    pub fn current_params(&self) -> TunableParams {
        self.state.current_params
    }

    fn fitness(events: &[TelemetryEvent], health: StoreHealthSnapshot) -> f64 {
        let n = events.len() as f64;
        let avg_top_score = (events.iter().map(|e| e.top_score).sum::<f64>() / n).clamp(0.0, 1.0);
        let empty_hit_rate = events.iter().filter(|e| e.result_count == 0).count() as f64 / n;
        let q_health = (0.6 * health.avg_q_value + 0.4 * health.success_rate).clamp(0.0, 1.0);
        let avg_latency_ms = events.iter().map(|e| e.latency_ms as f64).sum::<f64>() / n;
        let latency_score = (1.0 / (1.0 + avg_latency_ms / 1000.0)).clamp(0.0, 1.0);

        0.35 * avg_top_score + 0.25 * (1.0 - empty_hit_rate).clamp(0.0, 1.0) + 0.25 * q_health + 0.15 * latency_score
    }

    fn perturb(params: TunableParams, rng: &mut impl Rng) -> TunableParams {
        let mut sample = || -> f64 {
            // Box-Muller transform for N(0, PERTURBATION_STD_DEV).
            let u1: f64 = rng.random::<f64>().max(f64::EPSILON);
            let u2: f64 = rng.random::<f64>();
            let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
            (z0 * PERTURBATION_STD_DEV).clamp(-PERTURBATION_CLIP, PERTURBATION_CLIP)
        };

        let perturbed = TunableParams {
            learning_rate: params.learning_rate * (1.0 + sample()),
            strengthen_threshold: params.strengthen_threshold * (1.0 + sample()),
            consolidation_threshold: params.consolidation_threshold * (1.0 + sample()),
            forget_threshold: params.forget_threshold * (1.0 + sample()),
            max_forget_per_cycle: params.max_forget_per_cycle,
            connection_similarity_threshold: params.connection_similarity_threshold * (1.0 + sample()),
        };
        perturbed.clamped_and_repaired()
    }

    /// Run one optimiser step (§4.9). `telemetry_events` should be the
    /// sink's most recent [`TELEMETRY_WINDOW`] events.
    pub fn step(&mut self, telemetry_events: &[TelemetryEvent], health: StoreHealthSnapshot) -> OptimizationResult {
        self.step_with_rng(telemetry_events, health, &mut rand::rng())
    }

    fn step_with_rng(
        &mut self,
        telemetry_events: &[TelemetryEvent],
        health: StoreHealthSnapshot,
        rng: &mut impl Rng,
    ) -> OptimizationResult {
        let window_start = telemetry_events.len().saturating_sub(TELEMETRY_WINDOW);
        let window = &telemetry_events[window_start..];

        if window.len() < MIN_TELEMETRY_SAMPLES {
            return OptimizationResult {
                applied: false,
                reason: Some("insufficient_telemetry".to_string()),
                fitness: None,
                cycle: self.state.cycle,
            };
        }

        let fitness = Self::fitness(window, health);
        self.state.fitness_history.push_back(fitness);
        while self.state.fitness_history.len() > MAX_FITNESS_HISTORY {
            self.state.fitness_history.pop_front();
        }

        let mut applied = true;
        let mut reason = None;

        if let Some(previous_fitness) = self.state.previous_fitness {
            let delta = fitness - previous_fitness;
            if delta >= -0.005 {
                if delta > 0.005 {
                    self.state.improvements += 1;
                }
                self.state.degradations = 0;
            } else {
                self.state.current_params = self.state.previous_params;
                self.state.reversions += 1;
                self.state.degradations += 1;
                applied = false;
                reason = Some("degraded".to_string());

                if self.state.degradations >= DEGRADATIONS_BEFORE_RESET {
                    self.state.current_params = TunableParams::default();
                    self.state.degradations = 0;
                    reason = Some("reset_to_defaults".to_string());
                }
            }
        }

        self.state.previous_params = self.state.current_params;
        self.state.previous_fitness = Some(fitness);
        self.state.current_params = Self::perturb(self.state.current_params, rng);
        self.state.cycle += 1;

        OptimizationResult {
            applied,
            reason,
            fitness: Some(fitness),
            cycle: self.state.cycle,
        }
    }

    /// Serialise the optimiser's state for persistence under
    /// [`OPTIMIZER_STATE_BLOB_KEY`].
    ///
    /// # Errors
    /// Returns [`crate::error::StoreError::Serialization`] if encoding fails.
    pub fn to_bytes(&self) -> crate::error::Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.state)?)
    }

    /// Restore from persisted bytes, replacing any in-memory state.
    ///
    /// # Errors
    /// Returns [`crate::error::StoreError::CorruptStore`] if `bytes` does
    /// not parse.
    pub fn from_bytes(bytes: &[u8]) -> crate::error::Result<Self> {
        let state: OptimizerState =
            serde_json::from_slice(bytes).map_err(|e| crate::error::StoreError::CorruptStore {
                key: OPTIMIZER_STATE_BLOB_KEY.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self::from_state(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn event(top_score: f64, latency_ms: u64, result_count: usize) -> TelemetryEvent {
        TelemetryEvent {
            timestamp_ms: 0,
            ai_id: "agent".to_string(),
            strategy: "SEMANTIC".to_string(),
            latency_ms,
            result_count,
            top_k: 5,
            top_score,
            avg_score: top_score,
        }
    }

    #[test]
    fn fewer_than_min_samples_leaves_params_unchanged() {
        let mut optimizer = SleepCycleOptimizer::new();
        let before = optimizer.current_params();
        let events: Vec<_> = (0..10).map(|_| event(0.8, 10, 3)).collect();
        let result = optimizer.step(&events, StoreHealthSnapshot::default());
        assert!(!result.applied);
        assert_eq!(result.reason.as_deref(), Some("insufficient_telemetry"));
        assert_eq!(optimizer.current_params(), before);
    }

    #[test]
    fn first_cycle_with_enough_telemetry_accepts_and_perturbs() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut optimizer = SleepCycleOptimizer::new();
        let events: Vec<_> = (0..60).map(|_| event(0.8, 10, 3)).collect();
        let health = StoreHealthSnapshot { avg_q_value: 0.6, success_rate: 0.7 };
        let result = optimizer.step_with_rng(&events, health, &mut rng);
        assert!(result.applied);
        assert!(result.fitness.is_some());
        assert_eq!(optimizer.state().cycle, 1);
    }

    #[test]
    fn three_consecutive_degradations_reset_to_defaults() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut optimizer = SleepCycleOptimizer::new();
        let good_events: Vec<_> = (0..60).map(|_| event(0.9, 5, 5)).collect();
        let bad_events: Vec<_> = (0..60).map(|_| event(0.0, 5000, 0)).collect();
        let health = StoreHealthSnapshot { avg_q_value: 0.5, success_rate: 0.5 };

        optimizer.step_with_rng(&good_events, health, &mut rng);
        for _ in 0..3 {
            optimizer.step_with_rng(&bad_events, health, &mut rng);
        }
        assert_eq!(optimizer.state().degradations, 0);
        assert_eq!(optimizer.current_params(), TunableParams::default());
    }

    #[test]
    fn perturbed_params_always_satisfy_ordering_invariant() {
        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..200 {
            let perturbed = SleepCycleOptimizer::perturb(TunableParams::default(), &mut rng);
            assert!(perturbed.ordering_is_valid());
        }
    }

    #[test]
    fn roundtrips_through_bytes() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut optimizer = SleepCycleOptimizer::new();
        let events: Vec<_> = (0..60).map(|_| event(0.5, 20, 2)).collect();
        optimizer.step_with_rng(&events, StoreHealthSnapshot::default(), &mut rng);
        let bytes = optimizer.to_bytes().unwrap();
        let restored = SleepCycleOptimizer::from_bytes(&bytes).unwrap();
        assert_eq!(restored.state().cycle, optimizer.state().cycle);
    }
}
