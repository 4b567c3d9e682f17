//! Walk-forward evaluation and parameter search.
//!
//! A trial replays the whole history once. Matches before the warm-up
//! boundary only train ratings, form and regression samples; the goal model is
//! fitted once at the boundary, and every later match is forecast from its
//! pre-match state before being absorbed.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{CalibrationError, ForgeError, Result, ValidationError};
use crate::models::{MatchHistory, Outcome, OutcomeProbabilities, ParameterSet};
use crate::services::elo_calculator::SeedPolicy;
use crate::services::goals_model::{FitConfig, GoalModel, GoalSample};
use crate::services::outcome_classifier::OutcomeClassifier;
use crate::services::predictor::ReplayState;
use crate::utils::calculate_prediction_accuracy;

/// Probabilities are clamped to `[PROB_EPSILON, 1 - PROB_EPSILON]` before scoring.
pub const PROB_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    #[default]
    LogLoss,
    Brier,
}

impl Objective {
    /// Loss of one forecast against the observed outcome; lower is better.
    pub fn score(self, probs: &OutcomeProbabilities, actual: Outcome) -> f64 {
        let clamp = |p: f64| p.clamp(PROB_EPSILON, 1.0 - PROB_EPSILON);
        match self {
            Objective::LogLoss => -clamp(probs.of(actual)).ln(),
            Objective::Brier => [Outcome::HomeWin, Outcome::Draw, Outcome::AwayWin]
                .into_iter()
                .map(|o| {
                    let y = if o == actual { 1.0 } else { 0.0 };
                    (clamp(probs.of(o)) - y).powi(2)
                })
                .sum(),
        }
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Objective::LogLoss => write!(f, "log_loss"),
            Objective::Brier => write!(f, "brier"),
        }
    }
}

impl FromStr for Objective {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "log_loss" | "logloss" => Ok(Objective::LogLoss),
            "brier" => Ok(Objective::Brier),
            other => Err(ValidationError::new(
                "objective",
                format!("'{}' is not one of log_loss, brier", other),
            )),
        }
    }
}

/// Cartesian grid over the five tunable parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterGrid {
    pub k_factor: Vec<f64>,
    pub home_advantage: Vec<f64>,
    pub poisson_base: Vec<f64>,
    pub decay_half_life: Vec<f64>,
    pub goal_diff_weight: Vec<f64>,
}

impl Default for ParameterGrid {
    fn default() -> Self {
        Self {
            k_factor: vec![10.0, 20.0, 30.0, 40.0],
            home_advantage: vec![0.0, 40.0, 80.0],
            poisson_base: vec![1.2, 1.4],
            decay_half_life: vec![3.0, 6.0, 10.0],
            goal_diff_weight: vec![1.0, 2.0],
        }
    }
}

impl ParameterGrid {
    pub fn single(params: ParameterSet) -> Self {
        Self {
            k_factor: vec![params.k_factor],
            home_advantage: vec![params.home_advantage],
            poisson_base: vec![params.poisson_base],
            decay_half_life: vec![params.decay_half_life],
            goal_diff_weight: vec![params.goal_diff_weight],
        }
    }

    pub fn len(&self) -> usize {
        self.k_factor.len()
            * self.home_advantage.len()
            * self.poisson_base.len()
            * self.decay_half_life.len()
            * self.goal_diff_weight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All combinations, k_factor outermost and goal_diff_weight innermost.
    pub fn candidates(&self) -> Result<Vec<ParameterSet>> {
        if self.is_empty() {
            return Err(CalibrationError::EmptyGrid.into());
        }

        let mut candidates = Vec::with_capacity(self.len());
        for &k in &self.k_factor {
            for &ha in &self.home_advantage {
                for &base in &self.poisson_base {
                    for &half_life in &self.decay_half_life {
                        for &weight in &self.goal_diff_weight {
                            candidates.push(ParameterSet::new(k, ha, base, half_life, weight)?);
                        }
                    }
                }
            }
        }
        Ok(candidates)
    }
}

/// Inclusive bounds for seeded random search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterRanges {
    pub k_factor: (f64, f64),
    pub home_advantage: (f64, f64),
    pub poisson_base: (f64, f64),
    pub decay_half_life: (f64, f64),
    pub goal_diff_weight: (f64, f64),
}

impl Default for ParameterRanges {
    fn default() -> Self {
        Self {
            k_factor: (5.0, 60.0),
            home_advantage: (0.0, 120.0),
            poisson_base: (1.0, 1.8),
            decay_half_life: (2.0, 12.0),
            goal_diff_weight: (1.0, 3.0),
        }
    }
}

impl ParameterRanges {
    /// `n` candidates drawn uniformly; the same seed yields the same list.
    pub fn sample(&self, n: usize, seed: u64) -> Result<Vec<ParameterSet>> {
        if n == 0 {
            return Err(CalibrationError::EmptyGrid.into());
        }
        for (field, (lo, hi)) in [
            ("k_factor", self.k_factor),
            ("home_advantage", self.home_advantage),
            ("poisson_base", self.poisson_base),
            ("decay_half_life", self.decay_half_life),
            ("goal_diff_weight", self.goal_diff_weight),
        ] {
            if !(lo.is_finite() && hi.is_finite() && lo <= hi) {
                return Err(ValidationError::new(field, format!("range [{}, {}] is empty", lo, hi)).into());
            }
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut draw = |(lo, hi): (f64, f64)| rng.gen_range(lo..=hi);
        let mut candidates = Vec::with_capacity(n);
        for _ in 0..n {
            let k = draw(self.k_factor);
            let ha = draw(self.home_advantage);
            let base = draw(self.poisson_base);
            let half_life = draw(self.decay_half_life);
            let weight = draw(self.goal_diff_weight);
            candidates.push(ParameterSet::new(k, ha, base, half_life, weight)?);
        }
        Ok(candidates)
    }
}

/// Cooperative cancellation flag shared by every trial of a search.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct CalibrationConfig {
    pub objective: Objective,
    /// Share of the history used only for training, in [0, 1).
    pub warmup_fraction: f64,
    pub seed_policy: SeedPolicy,
    pub fit: FitConfig,
    pub classifier: OutcomeClassifier,
    /// Worker threads; `None` uses the global rayon pool.
    pub workers: Option<usize>,
    pub time_budget: Option<Duration>,
    pub cancel: CancelToken,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            objective: Objective::LogLoss,
            warmup_fraction: 0.5,
            seed_policy: SeedPolicy::default(),
            fit: FitConfig::default(),
            classifier: OutcomeClassifier::default(),
            workers: None,
            time_budget: None,
            cancel: CancelToken::new(),
        }
    }
}

impl CalibrationConfig {
    /// Number of leading matches that are trained on but never scored.
    pub fn warmup_len(&self, history: &MatchHistory) -> Result<usize> {
        let fraction = self.warmup_fraction;
        if !(fraction.is_finite() && (0.0..1.0).contains(&fraction)) {
            return Err(CalibrationError::InvalidWarmup(fraction).into());
        }
        let warmup = (history.len() as f64 * fraction).floor() as usize;
        if warmup >= history.len() {
            return Err(CalibrationError::NoScoredMatches {
                matches: history.len(),
                warmup,
            }
            .into());
        }
        Ok(warmup)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredMatch {
    pub match_index: usize,
    pub probabilities: OutcomeProbabilities,
    pub outcome: Outcome,
}

/// Out-of-sample forecasts of one walk-forward pass.
#[derive(Debug, Clone)]
pub struct Backtest {
    pub params: ParameterSet,
    pub model: GoalModel,
    pub scored: Vec<ScoredMatch>,
}

impl Backtest {
    pub fn mean(&self, objective: Objective) -> f64 {
        if self.scored.is_empty() {
            return f64::NAN;
        }
        let total: f64 = self
            .scored
            .iter()
            .map(|s| objective.score(&s.probabilities, s.outcome))
            .sum();
        total / self.scored.len() as f64
    }

    pub fn accuracy(&self) -> f64 {
        let pairs: Vec<_> = self.scored.iter().map(|s| (s.probabilities, s.outcome)).collect();
        calculate_prediction_accuracy(&pairs)
    }
}

/// Walk-forward pass for a single parameter set.
pub fn backtest(history: &MatchHistory, params: &ParameterSet, config: &CalibrationConfig) -> Result<Backtest> {
    let warmup = config.warmup_len(history)?;
    let deadline = config.time_budget.map(|budget| Instant::now() + budget);
    walk_forward(history, params, config, warmup, deadline)
}

fn walk_forward(
    history: &MatchHistory,
    params: &ParameterSet,
    config: &CalibrationConfig,
    warmup: usize,
    deadline: Option<Instant>,
) -> Result<Backtest> {
    let mut state = ReplayState::new(params, config.seed_policy)?;
    let mut samples = Vec::with_capacity(warmup * 2);
    let mut model = GoalModel::baseline(params.poisson_base);
    let mut scored = Vec::with_capacity(history.len().saturating_sub(warmup));

    for (index, match_data) in history.matches().iter().enumerate() {
        if config.cancel.is_cancelled() || deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ForgeError::Cancelled);
        }

        let (home, away) = state.features_for(&match_data.home_team, &match_data.away_team);
        if index < warmup {
            samples.extend(GoalSample::pair(match_data, home, away));
        } else {
            if index == warmup {
                model = GoalModel::fit(&samples, params.poisson_base, &config.fit)?;
            }
            let (lambda_home, lambda_away) = model.predict_fixture(&home, &away);
            scored.push(ScoredMatch {
                match_index: index,
                probabilities: config.classifier.classify(lambda_home, lambda_away),
                outcome: match_data.outcome(),
            });
        }
        state.absorb(match_data)?;
    }

    Ok(Backtest {
        params: *params,
        model,
        scored,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrialStatus {
    Completed { objective: f64 },
    Failed { reason: String },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub index: usize,
    pub params: ParameterSet,
    pub status: TrialStatus,
    pub scored_matches: usize,
}

impl TrialResult {
    pub fn objective(&self) -> Option<f64> {
        match self.status {
            TrialStatus::Completed { objective } => Some(objective),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub best: ParameterSet,
    pub best_index: usize,
    pub best_objective: f64,
    pub objective: Objective,
    pub trials: Vec<TrialResult>,
}

fn run_trial(
    index: usize,
    history: &MatchHistory,
    params: &ParameterSet,
    config: &CalibrationConfig,
    warmup: usize,
    deadline: Option<Instant>,
) -> TrialResult {
    let outcome = walk_forward(history, params, config, warmup, deadline);
    let (status, scored_matches) = match outcome {
        Ok(pass) => {
            let value = pass.mean(config.objective);
            let status = if value.is_finite() {
                TrialStatus::Completed { objective: value }
            } else {
                TrialStatus::Failed {
                    reason: CalibrationError::UndefinedObjective {
                        index,
                        reason: format!("{} evaluated to {}", config.objective, value),
                    }
                    .to_string(),
                }
            };
            (status, pass.scored.len())
        }
        Err(ForgeError::Cancelled) => (TrialStatus::Cancelled, 0),
        Err(e) => (TrialStatus::Failed { reason: e.to_string() }, 0),
    };

    tracing::debug!("Trial {} {:?}: {:?}", index, params, status);

    TrialResult {
        index,
        params: *params,
        status,
        scored_matches,
    }
}

fn with_worker_pool<T>(workers: Option<usize>, action: impl FnOnce() -> T + Send) -> T
where
    T: Send,
{
    let Some(threads) = workers else {
        return action();
    };
    match rayon::ThreadPoolBuilder::new().num_threads(threads.max(1)).build() {
        Ok(pool) => pool.install(action),
        Err(e) => {
            tracing::warn!("Could not build a {}-thread pool ({}), using the global pool", threads, e);
            action()
        }
    }
}

/// Evaluate every candidate and keep the one with the lowest objective.
/// Ties go to the earliest candidate; cancelled or failed trials are reported
/// but never chosen.
pub fn calibrate(
    history: &MatchHistory,
    candidates: &[ParameterSet],
    config: &CalibrationConfig,
) -> Result<CalibrationReport> {
    if candidates.is_empty() {
        return Err(CalibrationError::EmptyGrid.into());
    }
    let warmup = config.warmup_len(history)?;
    let deadline = config.time_budget.map(|budget| Instant::now() + budget);

    tracing::info!(
        "Calibrating {} candidates on {} matches ({} warm-up, objective {})",
        candidates.len(),
        history.len(),
        warmup,
        config.objective
    );

    let trials: Vec<TrialResult> = with_worker_pool(config.workers, || {
        candidates
            .par_iter()
            .enumerate()
            .map(|(index, params)| run_trial(index, history, params, config, warmup, deadline))
            .collect()
    });

    let mut best: Option<(usize, f64)> = None;
    for trial in &trials {
        if let Some(value) = trial.objective() {
            if best.map_or(true, |(_, current)| value < current) {
                best = Some((trial.index, value));
            }
        }
    }

    let Some((best_index, best_objective)) = best else {
        let cancelled = trials.iter().filter(|t| t.status == TrialStatus::Cancelled).count();
        return Err(CalibrationError::NoCompletedTrials {
            cancelled,
            failed: trials.len() - cancelled,
        }
        .into());
    };

    let best_params = trials[best_index].params;
    tracing::info!(
        "Best candidate #{} ({} = {:.5}): K={}, HA={}, base={}, half-life={}, gd weight={}",
        best_index,
        config.objective,
        best_objective,
        best_params.k_factor,
        best_params.home_advantage,
        best_params.poisson_base,
        best_params.decay_half_life,
        best_params.goal_diff_weight
    );

    Ok(CalibrationReport {
        best: best_params,
        best_index,
        best_objective,
        objective: config.objective,
        trials,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HistoryOrder, Match};
    use chrono::NaiveDate;

    fn league(rounds: usize) -> MatchHistory {
        let teams = ["Flora", "Levadia", "Kalju", "Narva"];
        let start = NaiveDate::from_ymd_opt(2023, 3, 1).unwrap();
        let mut matches = Vec::new();
        for round in 0..rounds {
            for (i, home) in teams.iter().enumerate() {
                let away = teams[(i + 1 + round % 3) % teams.len()];
                // lower index is the stronger side
                let j = teams.iter().position(|t| *t == away).unwrap();
                let (hg, ag) = if i < j { (2, (round % 2) as u32) } else { ((round % 2) as u32, 1) };
                let seq = matches.len();
                matches.push(Match::new(*home, away, hg, ag, start + chrono::Days::new(seq as u64), seq).unwrap());
            }
        }
        MatchHistory::from_matches(matches, HistoryOrder::Strict).unwrap()
    }

    #[test]
    fn objective_scores() {
        let p = OutcomeProbabilities {
            home_win: 0.5,
            draw: 0.3,
            away_win: 0.2,
        };
        assert!((Objective::LogLoss.score(&p, Outcome::HomeWin) - 0.5_f64.ln().abs()).abs() < 1e-12);
        let brier = 0.25 + 0.09 + 0.04;
        assert!((Objective::Brier.score(&p, Outcome::HomeWin) - brier).abs() < 1e-12);

        let certain_miss = OutcomeProbabilities {
            home_win: 1.0,
            draw: 0.0,
            away_win: 0.0,
        };
        assert!(Objective::LogLoss.score(&certain_miss, Outcome::Draw).is_finite());
    }

    #[test]
    fn objective_parses() {
        assert_eq!("log-loss".parse::<Objective>().unwrap(), Objective::LogLoss);
        assert_eq!("Brier".parse::<Objective>().unwrap(), Objective::Brier);
        assert_eq!(Objective::LogLoss.to_string(), "log_loss");
        assert_eq!("rmse".parse::<Objective>().unwrap_err().field, "objective");
    }

    #[test]
    fn grid_enumerates_in_fixed_order() {
        let grid = ParameterGrid {
            k_factor: vec![10.0, 20.0],
            home_advantage: vec![0.0],
            poisson_base: vec![1.4],
            decay_half_life: vec![5.0],
            goal_diff_weight: vec![1.0, 2.0],
        };
        let candidates = grid.candidates().unwrap();
        assert_eq!(candidates.len(), 4);
        assert_eq!((candidates[0].k_factor, candidates[0].goal_diff_weight), (10.0, 1.0));
        assert_eq!((candidates[1].k_factor, candidates[1].goal_diff_weight), (10.0, 2.0));
        assert_eq!((candidates[2].k_factor, candidates[2].goal_diff_weight), (20.0, 1.0));
        assert_eq!(ParameterGrid::default().len(), 144);
    }

    #[test]
    fn empty_grid_is_rejected() {
        let mut grid = ParameterGrid::default();
        grid.home_advantage.clear();
        assert!(matches!(
            grid.candidates(),
            Err(ForgeError::Calibration(CalibrationError::EmptyGrid))
        ));
        assert!(matches!(
            calibrate(&league(4), &[], &CalibrationConfig::default()),
            Err(ForgeError::Calibration(CalibrationError::EmptyGrid))
        ));
    }

    #[test]
    fn out_of_range_grid_value_is_a_validation_error() {
        let mut grid = ParameterGrid::single(ParameterSet::default());
        grid.k_factor = vec![150.0];
        assert!(matches!(grid.candidates(), Err(ForgeError::Validation(e)) if e.field == "k_factor"));
    }

    #[test]
    fn random_search_is_seeded() {
        let ranges = ParameterRanges::default();
        let a = ranges.sample(8, 42).unwrap();
        let b = ranges.sample(8, 42).unwrap();
        assert_eq!(a, b);
        assert!(a.iter().all(|p| p.validate().is_ok()));
        assert_ne!(a, ranges.sample(8, 43).unwrap());
    }

    #[test]
    fn warmup_bounds() {
        let history = league(2);
        let mut config = CalibrationConfig::default();
        assert_eq!(config.warmup_len(&history).unwrap(), 4);

        config.warmup_fraction = 1.0;
        assert!(matches!(
            config.warmup_len(&history),
            Err(ForgeError::Calibration(CalibrationError::InvalidWarmup(_)))
        ));

        config.warmup_fraction = 0.5;
        let tiny = MatchHistory::default();
        assert!(matches!(
            config.warmup_len(&tiny),
            Err(ForgeError::Calibration(CalibrationError::NoScoredMatches { .. }))
        ));
    }

    #[test]
    fn backtest_scores_only_post_warmup_matches() {
        let history = league(6);
        let pass = backtest(&history, &ParameterSet::default(), &CalibrationConfig::default()).unwrap();
        assert_eq!(pass.scored.len(), history.len() - history.len() / 2);
        assert_eq!(pass.scored[0].match_index, history.len() / 2);
        assert!(pass.scored.iter().all(|s| (s.probabilities.sum() - 1.0).abs() < 1e-9));
        assert!(pass.mean(Objective::LogLoss).is_finite());
        assert!((0.0..=1.0).contains(&pass.accuracy()));
    }

    #[test]
    fn calibration_is_deterministic_and_picks_minimum() {
        let history = league(8);
        let candidates = ParameterGrid {
            k_factor: vec![10.0, 30.0],
            home_advantage: vec![0.0, 60.0],
            poisson_base: vec![1.4],
            decay_half_life: vec![5.0],
            goal_diff_weight: vec![1.0],
        }
        .candidates()
        .unwrap();

        let config = CalibrationConfig {
            workers: Some(2),
            ..CalibrationConfig::default()
        };
        let first = calibrate(&history, &candidates, &config).unwrap();
        let second = calibrate(&history, &candidates, &config).unwrap();
        assert_eq!(first.best, second.best);
        assert_eq!(first.trials, second.trials);

        let min = first
            .trials
            .iter()
            .filter_map(TrialResult::objective)
            .fold(f64::INFINITY, f64::min);
        assert_eq!(first.best_objective, min);
    }

    #[test]
    fn ties_go_to_the_first_candidate() {
        let history = league(4);
        let params = ParameterSet::default();
        let report = calibrate(&history, &[params, params, params], &CalibrationConfig::default()).unwrap();
        assert_eq!(report.best_index, 0);
        assert_eq!(report.trials.len(), 3);
    }

    #[test]
    fn cancelled_search_reports_no_completed_trials() {
        let config = CalibrationConfig::default();
        config.cancel.cancel();
        let result = calibrate(&league(4), &[ParameterSet::default()], &config);
        assert!(matches!(
            result,
            Err(ForgeError::Calibration(CalibrationError::NoCompletedTrials { cancelled: 1, failed: 0 }))
        ));
    }
}
