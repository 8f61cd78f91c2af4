#![warn(warnings)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(non_upper_case_globals)]
#![allow(clippy::needless_return)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::cast_precision_loss, clippy::module_name_repetitions)]

pub mod instance;
pub mod master_problem;
pub mod misc;
pub mod oracle;
pub mod pricing;
pub mod search;
pub mod settings;
pub mod solution;
pub mod solvers;
mod ui;

use std::time::{Duration, Instant};

pub use ui::*;

pub use instance::{Instance, InstanceError};
pub use master_problem::{ColGenResult, ColumnGeneration, KFailure};
pub use misc::Deadline;
pub use oracle::{Oracle, OracleError};
pub use pricing::{KnapsackPricer, PatternPricer};
pub use search::{KOrder, KSearch, RankingPolicy};
pub use settings::{PruningSettings, StabilizationSettings, WaveSettings};
pub use solution::{Rejection, SolutionExtractor, Wave};
pub use solvers::{OracleSettings, ScipOracle};

/// Summary of a full [`WavePicker::run`].
#[derive(Clone, Debug)]
pub struct WaveReport {
    pub best: Option<Wave>,
    pub visits: usize,
    pub time_limit_reached: bool,
    /// The pinned pass ran on the incumbent.
    pub finalized: bool,
    pub elapsed: Duration,
}

impl WaveReport {
    pub fn best_k(&self) -> Option<usize> {
        self.best.as_ref().map(|w| w.aisles.len())
    }
}

/// Searches the aisle count with the best wave density.
///
/// Every visited k runs column generation on its own cached master; the
/// incumbent is finally re-optimized with its aisles pinned.
pub struct WavePicker<'a> {
    instance: &'a Instance,
    oracle: &'a dyn Oracle,
    settings: WaveSettings,
    ui: UISender,
}

impl<'a> WavePicker<'a> {
    pub fn new(instance: &'a Instance, oracle: &'a dyn Oracle, settings: WaveSettings, ui: UISender) -> Self {
        WavePicker {
            instance,
            oracle,
            settings,
            ui,
        }
    }

    pub fn settings(&self) -> &WaveSettings {
        &self.settings
    }

    /// Best wave using exactly `k` aisles within the whole time limit.
    pub fn solve_for_k(&self, k: usize) -> Result<Option<Wave>, OracleError> {
        let pricer = KnapsackPricer::new(self.oracle);
        let mut cg = ColumnGeneration::new(self.instance, self.oracle, &pricer, self.settings.clone(), self.ui.clone());
        let result = cg.run_for_k(k, Deadline::after(self.settings.time_limit))?;
        Ok(result.wave)
    }

    /// Pinned re-optimization of `wave`. Returns the new wave only if it is
    /// at least as good, `wave` otherwise.
    pub fn finalize(&self, wave: Wave, deadline: Deadline) -> Result<Wave, OracleError> {
        let pricer = KnapsackPricer::new(self.oracle);
        let cg = ColumnGeneration::new(self.instance, self.oracle, &pricer, self.settings.clone(), self.ui.clone());
        let result = cg.run_pinned(&wave, deadline)?;

        match result.wave {
            Some(pinned) if !wave.is_better_than(&pinned) => {
                if pinned.is_better_than(&wave) {
                    self.ui.send(UIUserMessage::NewBest {
                        obj: pinned.objective,
                        k: pinned.aisles.len(),
                    });
                }
                Ok(pinned)
            }
            _ => Ok(wave),
        }
    }

    /// Full run: k search under the time limit, then pinned finalization.
    pub fn run(&self) -> Result<WaveReport, OracleError> {
        let start = Instant::now();
        let deadline = Deadline::after(self.settings.time_limit);
        let search_cutoff = deadline.fraction_from(start, self.settings.search_cutoff_fraction);
        let k_budget = self.settings.time_limit.mul_f64(self.settings.k_budget_fraction);

        #[cfg(feature = "validity_assertions")]
        self.ui.send(UIUserMessage::LogS("Validity Assertions Active"));

        let pricer = KnapsackPricer::new(self.oracle);
        let mut cg = ColumnGeneration::new(self.instance, self.oracle, &pricer, self.settings.clone(), self.ui.clone());
        let mut search = KSearch::new(
            self.instance.num_aisles(),
            self.settings.k_order,
            self.settings.ranking,
            self.settings.max_revisits,
        );

        let mut best: Option<Wave> = None;
        let mut visits = 0;
        let mut time_limit_reached = false;

        self.ui.send(UIUserMessage::StartPhase("k search", 0));
        loop {
            if search_cutoff.is_expired() {
                self.ui.send(UIUserMessage::TimeLimitReached);
                time_limit_reached = true;
                break;
            }
            let Some(k) = search.next() else {
                break;
            };

            let result = cg.run_for_k(k, search_cutoff.slice(k_budget))?;
            visits += 1;

            search.record(k, result.wave.as_ref().map(|w| w.objective), result.density_bound());

            let cut_short = (result.time_limit_reached && !result.converged)
                || result.failure == Some(KFailure::OracleTimeout);
            if cut_short && search.requeue(k) {
                self.ui.send(UIUserMessage::Log(format!("k={k} cut short, queued again")));
            }

            if let Some(wave) = result.wave {
                if best.as_ref().map_or(true, |b| wave.is_better_than(b)) {
                    self.ui.send(UIUserMessage::NewBest { obj: wave.objective, k });
                    search.set_incumbent(k, wave.objective);
                    best = Some(wave);
                }
            }
        }

        let mut finalized = false;
        if self.settings.finalize {
            if let Some(wave) = best.take() {
                self.ui.send(UIUserMessage::StartPhase("pinned finalization", 1));
                let wave = self.finalize(wave, deadline.at_least(self.settings.finalization_grace))?;
                best = Some(wave);
                finalized = true;
            }
        }

        Ok(WaveReport {
            best,
            visits,
            time_limit_reached,
            finalized,
            elapsed: start.elapsed(),
        })
    }
}
