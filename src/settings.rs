use std::time::Duration;

use crate::master_problem::rmp::SeedStrategy;
use crate::search::{KOrder, RankingPolicy};

#[derive(Clone, Debug, PartialEq)]
/// Settings for dual stabilization following Wentges' rule
pub struct StabilizationSettings {
    pub cross_iteration_memory: bool,
    pub initial_smoothing_alpha: f64,
    pub maximum_smoothing_alpha: f64,

    pub alpha_steps_up: f64,
    pub alpha_steps_down: f64,
}

impl StabilizationSettings {
    pub fn disabled() -> Self {
        StabilizationSettings {
            cross_iteration_memory: false,
            initial_smoothing_alpha: 0.0,
            maximum_smoothing_alpha: 0.0,
            alpha_steps_up: 0.0,
            alpha_steps_down: 0.0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.initial_smoothing_alpha > 0.0
    }
}

impl Default for StabilizationSettings {
    fn default() -> Self {
        StabilizationSettings::disabled()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PruningSettings {
    /// Relaxation solves a column may sit at zero before it is dropped.
    pub inactivity_window: Option<u32>,
}

impl Default for PruningSettings {
    fn default() -> Self {
        PruningSettings {
            inactivity_window: Some(5),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct WaveSettings {
    pub time_limit: Duration,
    /// Share of `time_limit` after which no new k is started.
    pub search_cutoff_fraction: f64,
    /// Each k gets at most this share of `time_limit`.
    pub k_budget_fraction: f64,
    /// Share of a k's slice after which no new pricing round starts.
    pub round_cutoff_fraction: f64,
    pub finalization_grace: Duration,
    /// Re-optimize the best wave with its aisles pinned.
    pub finalize: bool,

    pub k_order: KOrder,
    pub ranking: RankingPolicy,
    pub max_revisits: u32,

    pub seeding: SeedStrategy,
    pub pruning: PruningSettings,
    pub stabilization: StabilizationSettings,
    pub pricing_threads: usize,
}

impl Default for WaveSettings {
    fn default() -> Self {
        WaveSettings {
            time_limit: Duration::from_secs(30),
            search_cutoff_fraction: 0.9,
            k_budget_fraction: 0.25,
            round_cutoff_fraction: 0.8,
            finalization_grace: Duration::from_millis(100),
            finalize: true,
            k_order: KOrder::Ascending,
            ranking: RankingPolicy::Proximity,
            max_revisits: 1,
            seeding: SeedStrategy::GreedyUnits,
            pruning: PruningSettings::default(),
            stabilization: StabilizationSettings::disabled(),
            pricing_threads: 1,
        }
    }
}
