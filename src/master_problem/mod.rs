//! Column generation over RMP(k).
//!
//! One [`ColumnGeneration`] owns the cache of restricted masters keyed by the
//! aisle count and drives each of them through
//! `Optimize -> Price -> ... -> Converged -> Integralize`.

use std::borrow::Cow;
use std::fmt::{Display, Formatter};
use std::time::Instant;

pub mod column_pool;
pub mod duals;
pub mod rmp;

use crate::instance::Instance;
use crate::misc::{Deadline, HashMap};
use crate::oracle::{Oracle, OracleError, SolveStatus};
use crate::pricing::{PatternPricer, PricedPattern, PricingResult, PricingWindow, RC_TOL};
use crate::settings::WaveSettings;
use crate::solution::{Rejection, SolutionExtractor, Wave};
use crate::ui::{
    KVisitUIState, LPSolveIterationUIState, PricingProblemUIState, UISender, UIUserMessage,
};

use column_pool::{ColumnId, Pattern};
use duals::MasterDuals;
use rmp::{seed_patterns, RestrictedMasterProblem};

/// Relative gap under which the LP value and the dual bound count as equal.
const BOUND_GAP_TOL: f64 = 1e-6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ColGenState {
    Optimize,
    Price,
    Converged,
    Integralize,
}

/// Why a k visit ended without a wave. Absorbed by the search, never fatal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KFailure {
    /// A solve ran out of its time slice before reaching optimality.
    OracleTimeout,
    OracleInfeasible,
    /// Only artificial columns could satisfy the master.
    DegenerateSolution,
}

impl KFailure {
    fn from_status(status: SolveStatus) -> Option<KFailure> {
        match status {
            SolveStatus::Optimal => None,
            SolveStatus::TimeLimit | SolveStatus::IterationLimit => Some(KFailure::OracleTimeout),
            SolveStatus::Infeasible | SolveStatus::Unbounded => Some(KFailure::OracleInfeasible),
        }
    }

    fn from_rejection(rejection: &Rejection) -> Option<KFailure> {
        match rejection {
            Rejection::NotOptimal(status) => KFailure::from_status(*status),
            Rejection::ArtificialActive { .. } => Some(KFailure::DegenerateSolution),
            _ => None,
        }
    }
}

impl Display for KFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            KFailure::OracleTimeout => write!(f, "oracle timeout"),
            KFailure::OracleInfeasible => write!(f, "oracle infeasible"),
            KFailure::DegenerateSolution => write!(f, "degenerate solution"),
        }
    }
}

/// Outcome of one pass of column generation for a fixed k.
#[derive(Clone, Debug)]
pub struct ColGenResult {
    pub k: usize,
    pub wave: Option<Wave>,
    pub rejection: Option<Rejection>,
    pub failure: Option<KFailure>,
    /// Last relaxation value, in units.
    pub lp_bound: Option<f64>,
    /// Tightest Lagrangian bound seen, in units.
    pub dual_bound: Option<f64>,
    pub rounds: usize,
    pub columns_added: usize,
    /// Pricing proved the relaxation optimal.
    pub converged: bool,
    pub time_limit_reached: bool,
}

impl ColGenResult {
    fn new(k: usize) -> Self {
        ColGenResult {
            k,
            wave: None,
            rejection: None,
            failure: None,
            lp_bound: None,
            dual_bound: None,
            rounds: 0,
            columns_added: 0,
            converged: false,
            time_limit_reached: false,
        }
    }

    /// Dual bound expressed as a density.
    pub fn density_bound(&self) -> Option<f64> {
        self.dual_bound.map(|b| b / self.k.max(1) as f64)
    }

    fn outcome(&self) -> String {
        match (&self.wave, self.failure, &self.rejection) {
            (Some(wave), _, _) => format!("wave {:.4}", wave.objective),
            (None, Some(failure), _) => failure.to_string(),
            (None, None, Some(rejection)) => rejection.to_string(),
            (None, None, None) => "no wave".to_string(),
        }
    }
}

pub struct ColumnGeneration<'a> {
    instance: &'a Instance,
    oracle: &'a dyn Oracle,
    pricer: &'a dyn PatternPricer,
    settings: WaveSettings,
    ui: UISender,
    masters: HashMap<usize, RestrictedMasterProblem>,
    visits: HashMap<usize, u32>,
    /// Columns of the last wave found per k, offered as MIP start.
    warm: HashMap<usize, Vec<ColumnId>>,
}

impl<'a> ColumnGeneration<'a> {
    pub fn new(
        instance: &'a Instance,
        oracle: &'a dyn Oracle,
        pricer: &'a dyn PatternPricer,
        settings: WaveSettings,
        ui: UISender,
    ) -> Self {
        ColumnGeneration {
            instance,
            oracle,
            pricer,
            settings,
            ui,
            masters: HashMap::default(),
            visits: HashMap::default(),
            warm: HashMap::default(),
        }
    }

    pub fn settings(&self) -> &WaveSettings {
        &self.settings
    }

    /// Cached master for `k`, if `k` was visited.
    pub fn master(&self, k: usize) -> Option<&RestrictedMasterProblem> {
        self.masters.get(&k)
    }

    pub fn visits(&self, k: usize) -> u32 {
        self.visits.get(&k).copied().unwrap_or(0)
    }

    /// Runs column generation for exactly `k` aisles, reusing the cached
    /// master of earlier visits.
    pub fn run_for_k(&mut self, k: usize, deadline: Deadline) -> Result<ColGenResult, OracleError> {
        if k == 0 || k > self.instance.num_aisles() {
            let mut result = ColGenResult::new(k);
            result.failure = Some(KFailure::OracleInfeasible);
            return Ok(result);
        }

        let visit = {
            let v = self.visits.entry(k).or_insert(0);
            *v += 1;
            *v
        };

        let mut rmp = match self.masters.remove(&k) {
            Some(rmp) => rmp,
            None => RestrictedMasterProblem::build(self.instance, k, self.settings.seeding, self.oracle, deadline)?,
        };

        self.ui.send(UIUserMessage::KVisitStart(KVisitUIState {
            k,
            visit,
            num_columns: rmp.pool().count(),
            rounds: 0,
            lp_bound: None,
            dual_bound: None,
            objective: None,
            outcome: None,
        }));

        let aisles = rmp.open_aisles();
        let window = PricingWindow::for_aisle_count(self.instance, k);
        let warm = self.warm.get(&k).cloned();
        let result = self.drive(&mut rmp, &aisles, window, deadline, warm.as_deref());

        if let Ok(res) = &result {
            if res.wave.is_some() {
                let selected = rmp.last_snapshot().map(|s| s.selected()).unwrap_or_default();
                self.warm.insert(k, selected);
            }
            self.ui.send(UIUserMessage::KVisitFinish(KVisitUIState {
                k,
                visit,
                num_columns: rmp.pool().count(),
                rounds: res.rounds,
                lp_bound: res.lp_bound,
                dual_bound: res.dual_bound,
                objective: res.wave.as_ref().map(|w| w.objective),
                outcome: Some(res.outcome()),
            }));
        }
        // the master stays cached even if the oracle failed
        self.masters.insert(k, rmp);
        result
    }

    /// Re-optimizes `wave` with its aisle set pinned on a fresh master
    /// without artificials. The wave's own patterns form the MIP start.
    pub fn run_pinned(&self, wave: &Wave, deadline: Deadline) -> Result<ColGenResult, OracleError> {
        let k = wave.aisles.len();
        let mut rmp = RestrictedMasterProblem::new(self.instance, k);
        rmp.pin_aisles(&wave.aisles);
        rmp.set_artificials(false);

        let mut warm = Vec::with_capacity(wave.picks.len());
        for pick in &wave.picks {
            let pattern = Pattern::new(self.instance, pick.aisle, pick.orders.iter().copied());
            let orders = pattern.orders.clone();
            rmp.add_pattern(self.instance, pattern);
            if let Some(id) = rmp.pool().find(pick.aisle, &orders) {
                warm.push(id);
            }
        }
        for &a in &wave.aisles {
            for pattern in seed_patterns(self.instance, a, self.settings.seeding, self.oracle, deadline)? {
                rmp.add_pattern(self.instance, pattern);
            }
        }

        let window = PricingWindow::for_aisle_count(self.instance, k);
        let result = self.drive(&mut rmp, &wave.aisles, window, deadline, Some(&warm))?;
        self.ui.send(UIUserMessage::Log(format!(
            "pinned aisles {:?}: {} after {} rounds",
            wave.aisles,
            result.outcome(),
            result.rounds
        )));
        Ok(result)
    }

    /// Prices every aisle in `aisles` against `duals`, on up to
    /// `pricing_threads` scoped threads. Results keep the order of `aisles`.
    fn price_aisles(
        &self,
        aisles: &[usize],
        duals: &MasterDuals,
        window: PricingWindow,
        deadline: Deadline,
    ) -> Result<Vec<PricingResult>, OracleError> {
        let instance = self.instance;
        let pricer = self.pricer;
        let threads = self.settings.pricing_threads.clamp(1, aisles.len().max(1));

        if threads == 1 {
            return aisles
                .iter()
                .map(|&a| pricer.price(instance, a, duals, window, deadline))
                .collect();
        }

        let chunk = aisles.len().div_ceil(threads);
        std::thread::scope(|s| -> Result<Vec<PricingResult>, OracleError> {
            let handles: Vec<_> = aisles
                .chunks(chunk)
                .map(|part| {
                    s.spawn(move || {
                        part.iter()
                            .map(|&a| pricer.price(instance, a, duals, window, deadline))
                            .collect::<Result<Vec<_>, _>>()
                    })
                })
                .collect();

            let mut results = Vec::with_capacity(aisles.len());
            for handle in handles {
                match handle.join() {
                    Ok(part) => results.extend(part?),
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            Ok(results)
        })
    }

    /// The column generation state machine for one master.
    fn drive(
        &self,
        rmp: &mut RestrictedMasterProblem,
        aisles: &[usize],
        window: PricingWindow,
        deadline: Deadline,
        warm: Option<&[ColumnId]>,
    ) -> Result<ColGenResult, OracleError> {
        let instance = self.instance;
        let stabilization = &self.settings.stabilization;
        let k = rmp.k();

        let start = Instant::now();
        let round_cutoff = deadline.fraction_from(start, self.settings.round_cutoff_fraction);

        let mut result = ColGenResult::new(k);
        let mut state = ColGenState::Optimize;

        let mut real_duals: Option<MasterDuals> = None;
        let mut lp_obj = f64::NEG_INFINITY;
        let mut previous_pricing_runtime = 0.0;
        let mut num_new_columns = 0;

        // tightest dual bound and the duals that produced it
        let mut center: Option<(f64, MasterDuals)> = None;
        let mut smoothing_alpha = stabilization.initial_smoothing_alpha;

        loop {
            match state {
                ColGenState::Optimize => {
                    let lp_start = Instant::now();
                    let (snap, duals) = rmp.solve_relaxation(instance, self.oracle, deadline)?;
                    let lp_runtime = lp_start.elapsed().as_secs_f64();

                    if let Some(failure) = KFailure::from_status(snap.status) {
                        self.ui.send(UIUserMessage::Log(format!(
                            "k={k}: relaxation ended {}, giving up on this visit",
                            snap.status
                        )));
                        result.failure = Some(failure);
                        result.time_limit_reached = snap.status.is_limit();
                        return Ok(result);
                    }

                    lp_obj = snap.objective;
                    result.lp_bound = Some(lp_obj);
                    real_duals = duals;

                    self.ui.send(UIUserMessage::LPSolveIterationFinish(LPSolveIterationUIState {
                        k,
                        obj: lp_obj,
                        best_dual_bound: center.as_ref().map(|(b, _)| *b),
                        lp_runtime,
                        num_columns: rmp.pool().count(),
                        num_new_columns,
                        previous_pricing_runtime,
                    }));

                    if let Some(window) = self.settings.pruning.inactivity_window {
                        let removed = rmp.prune(window).len();
                        if removed > 0 {
                            self.ui.send(UIUserMessage::ColumnsPruned { k, removed });
                        }
                    }

                    state = if round_cutoff.is_expired() {
                        self.ui.send(UIUserMessage::Log(format!("k={k}: round cutoff, stop pricing")));
                        result.time_limit_reached = true;
                        ColGenState::Integralize
                    } else {
                        ColGenState::Price
                    };
                }

                ColGenState::Price => {
                    let Some(real) = real_duals.as_ref() else {
                        state = ColGenState::Integralize;
                        continue;
                    };

                    if !stabilization.cross_iteration_memory {
                        smoothing_alpha = stabilization.initial_smoothing_alpha;
                    }

                    let pricing_start = Instant::now();
                    let (found, results, smoothed) = loop {
                        let duals: Cow<MasterDuals> = match &center {
                            Some((_, c)) if smoothing_alpha > 0.0 => c.linear_combination(smoothing_alpha, real),
                            _ => Cow::Borrowed(real),
                        };
                        let smoothed = matches!(duals, Cow::Owned(_));
                        let results = self.price_aisles(aisles, &duals, window, deadline)?;

                        // patterns found under smoothed duals must still improve under the real ones
                        let found: Vec<PricedPattern> = results
                            .iter()
                            .filter_map(PricingResult::improving)
                            .filter(|p| {
                                !smoothed || self.pricer.price_pattern_with_duals(instance, &p.pattern, real) > RC_TOL
                            })
                            .cloned()
                            .collect();

                        if smoothed {
                            if found.is_empty() {
                                self.ui.send(UIUserMessage::LogS("Misprice"));
                                smoothing_alpha = if stabilization.alpha_steps_down > 0.0 {
                                    (smoothing_alpha - stabilization.alpha_steps_down).max(0.0)
                                } else {
                                    0.0
                                };
                                continue;
                            }
                            if stabilization.alpha_steps_up > 0.0 {
                                smoothing_alpha = (smoothing_alpha + stabilization.alpha_steps_up)
                                    .min(stabilization.maximum_smoothing_alpha);
                            }
                        }
                        break (found, results, smoothed);
                    };
                    previous_pricing_runtime = pricing_start.elapsed().as_secs_f64();

                    // a bound needs every aisle priced exactly under the real duals
                    let dual_bound = if smoothed {
                        None
                    } else {
                        results
                            .iter()
                            .map(PricingResult::exact_bound)
                            .collect::<Option<Vec<f64>>>()
                            .map(|rcs| {
                                let best_rc = rcs.into_iter().fold(0.0, f64::max);
                                lp_obj + k as f64 * best_rc
                            })
                    };
                    if let Some(bound) = dual_bound {
                        if center.as_ref().map_or(true, |(b, _)| bound < *b) {
                            center = Some((bound, real.clone()));
                        }
                        result.dual_bound = Some(result.dual_bound.map_or(bound, |b: f64| b.min(bound)));
                    }

                    self.ui.send(UIUserMessage::PricingProblemFinish(PricingProblemUIState {
                        runtime: previous_pricing_runtime,
                        num_columns: found.len(),
                        smoothing_alpha,
                        dual_bound,
                    }));
                    result.rounds += 1;

                    let exhausted = results.iter().any(|r| r.status.is_limit());
                    if found.is_empty() {
                        if exhausted {
                            result.time_limit_reached = true;
                            state = ColGenState::Integralize;
                        } else {
                            state = ColGenState::Converged;
                        }
                        continue;
                    }

                    if !stabilization.is_enabled() {
                        if let Some(best) = result.dual_bound {
                            if best - lp_obj <= BOUND_GAP_TOL * (1.0 + lp_obj.abs()) {
                                self.ui.send(UIUserMessage::Log(format!(
                                    "k={k}: exit pricing due to primal/dual bound {best} / {lp_obj}"
                                )));
                                state = ColGenState::Converged;
                                continue;
                            }
                        }
                    }

                    num_new_columns = 0;
                    for priced in found {
                        if rmp.add_pattern(instance, priced.pattern).is_some() {
                            num_new_columns += 1;
                        }
                    }
                    result.columns_added += num_new_columns;

                    state = if num_new_columns == 0 {
                        ColGenState::Converged
                    } else {
                        ColGenState::Optimize
                    };
                }

                ColGenState::Converged => {
                    result.converged = true;
                    state = ColGenState::Integralize;
                }

                ColGenState::Integralize => {
                    let snap = rmp.solve_integral(instance, self.oracle, deadline, warm)?;
                    if snap.status.is_limit() {
                        result.time_limit_reached = true;
                    }
                    match SolutionExtractor::extract(instance, rmp) {
                        Ok(wave) => result.wave = Some(wave),
                        Err(rejection) => {
                            result.failure = KFailure::from_rejection(&rejection);
                            result.rejection = Some(rejection);
                        }
                    }
                    return Ok(result);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::KnapsackPricer;
    use crate::settings::StabilizationSettings;
    use crate::solvers::ScipOracle;

    fn split_instance() -> Instance {
        // each order needs one aisle; LB forces both
        Instance::new(
            vec![vec![4, 0], vec![0, 4]],
            vec![vec![4, 0], vec![0, 4]],
            8,
            8,
        )
        .unwrap()
    }

    #[test]
    fn single_aisle_cannot_reach_lower_bound() {
        let inst = split_instance();
        let oracle = ScipOracle::default();
        let pricer = KnapsackPricer::new(&oracle);
        let mut cg = ColumnGeneration::new(&inst, &oracle, &pricer, WaveSettings::default(), UISender::sink());

        let res = cg.run_for_k(1, Deadline::never()).unwrap();
        assert!(res.wave.is_none());
        assert_eq!(res.failure, Some(KFailure::DegenerateSolution));
        // no aisle has a pattern reaching LB, which still proves a bound
        assert!(res.dual_bound.is_some());

        let res = cg.run_for_k(2, Deadline::never()).unwrap();
        let wave = res.wave.unwrap();
        assert_eq!(wave.aisles, vec![0, 1]);
        assert_eq!(wave.orders, vec![0, 1]);
        assert_eq!(wave.units, 8);
        assert!(res.converged);
        assert_eq!(cg.visits(2), 1);
        assert!(cg.master(2).is_some());
    }

    #[test]
    fn revisits_reuse_cached_master() {
        let inst = split_instance();
        let oracle = ScipOracle::default();
        let pricer = KnapsackPricer::new(&oracle);
        let mut cg = ColumnGeneration::new(&inst, &oracle, &pricer, WaveSettings::default(), UISender::sink());

        let first = cg.run_for_k(2, Deadline::never()).unwrap();
        let columns = cg.master(2).unwrap().pool().count();
        let second = cg.run_for_k(2, Deadline::never()).unwrap();
        assert_eq!(cg.visits(2), 2);
        assert_eq!(second.columns_added, 0);
        assert!(cg.master(2).unwrap().pool().count() <= columns);
        assert_eq!(
            first.wave.map(|w| w.objective),
            second.wave.map(|w| w.objective)
        );
    }

    #[test]
    fn smoothing_reaches_the_same_wave() {
        let inst = Instance::new(
            vec![vec![2, 0, 1], vec![0, 3, 0], vec![1, 1, 1], vec![3, 0, 0]],
            vec![vec![3, 1, 1], vec![1, 3, 1], vec![2, 2, 2]],
            2,
            9,
        )
        .unwrap();
        let oracle = ScipOracle::default();
        let pricer = KnapsackPricer::new(&oracle);

        let plain = ColumnGeneration::new(&inst, &oracle, &pricer, WaveSettings::default(), UISender::sink())
            .run_for_k(2, Deadline::never())
            .unwrap();

        let settings = WaveSettings {
            stabilization: StabilizationSettings {
                cross_iteration_memory: true,
                initial_smoothing_alpha: 0.5,
                maximum_smoothing_alpha: 0.9,
                alpha_steps_up: 0.1,
                alpha_steps_down: 0.25,
            },
            ..WaveSettings::default()
        };
        let smooth = ColumnGeneration::new(&inst, &oracle, &pricer, settings, UISender::sink())
            .run_for_k(2, Deadline::never())
            .unwrap();

        assert!(plain.converged && smooth.converged);
        let (a, b) = (plain.lp_bound.unwrap(), smooth.lp_bound.unwrap());
        assert!((a - b).abs() < 1e-4, "{a} vs {b}");
    }

    #[test]
    fn dual_bound_never_below_lp_value() {
        let inst = split_instance();
        let oracle = ScipOracle::default();
        let pricer = KnapsackPricer::new(&oracle);
        let mut cg = ColumnGeneration::new(&inst, &oracle, &pricer, WaveSettings::default(), UISender::sink());
        let res = cg.run_for_k(2, Deadline::never()).unwrap();
        let (lp, bound) = (res.lp_bound.unwrap(), res.dual_bound.unwrap());
        assert!(bound >= lp - 1e-6);
        assert!((res.density_bound().unwrap() - bound / 2.0).abs() < 1e-12);
    }

    #[test]
    fn pinned_pass_is_idempotent() {
        let inst = split_instance();
        let oracle = ScipOracle::default();
        let pricer = KnapsackPricer::new(&oracle);
        let mut cg = ColumnGeneration::new(&inst, &oracle, &pricer, WaveSettings::default(), UISender::sink());
        let wave = cg.run_for_k(2, Deadline::never()).unwrap().wave.unwrap();

        let once = cg.run_pinned(&wave, Deadline::never()).unwrap().wave.unwrap();
        let twice = cg.run_pinned(&once, Deadline::never()).unwrap().wave.unwrap();
        assert_eq!(once.aisles, wave.aisles);
        assert!((once.objective - twice.objective).abs() < 1e-6);
    }

    #[test]
    fn parallel_pricing_matches_sequential() {
        let inst = Instance::new(
            vec![vec![1, 0, 0], vec![0, 2, 0], vec![0, 0, 3], vec![1, 1, 1]],
            vec![vec![1, 1, 1], vec![0, 2, 0], vec![0, 0, 3], vec![2, 2, 2]],
            1,
            10,
        )
        .unwrap();
        let oracle = ScipOracle::default();
        let pricer = KnapsackPricer::new(&oracle);

        let run = |threads: usize| {
            let settings = WaveSettings {
                pricing_threads: threads,
                ..WaveSettings::default()
            };
            ColumnGeneration::new(&inst, &oracle, &pricer, settings, UISender::sink())
                .run_for_k(2, Deadline::never())
                .unwrap()
        };
        let (seq, par) = (run(1), run(3));
        assert_eq!(seq.wave.map(|w| w.objective), par.wave.map(|w| w.objective));
        assert!((seq.lp_bound.unwrap() - par.lp_bound.unwrap()).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_k_is_infeasible() {
        let inst = split_instance();
        let oracle = ScipOracle::default();
        let pricer = KnapsackPricer::new(&oracle);
        let mut cg = ColumnGeneration::new(&inst, &oracle, &pricer, WaveSettings::default(), UISender::sink());
        assert_eq!(cg.run_for_k(0, Deadline::never()).unwrap().failure, Some(KFailure::OracleInfeasible));
        assert_eq!(cg.run_for_k(3, Deadline::never()).unwrap().failure, Some(KFailure::OracleInfeasible));
    }
}
