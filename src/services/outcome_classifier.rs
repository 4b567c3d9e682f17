use statrs::distribution::{Discrete, Poisson};

use crate::models::OutcomeProbabilities;

/// Scoreline grid covers 0..=MAX_GOALS goals per side.
pub const MAX_GOALS: u32 = 9;
const MIN_LAMBDA: f64 = 1e-9;
const MAX_LAMBDA: f64 = 50.0;

/// Turns a pair of expected-goal rates into win/draw/loss probabilities by
/// summing a truncated scoreline grid of two Poisson variables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutcomeClassifier {
    max_goals: u32,
    // Dixon-Coles rho; 0 keeps the two scores independent.
    rho: f64,
}

impl Default for OutcomeClassifier {
    fn default() -> Self {
        Self {
            max_goals: MAX_GOALS,
            rho: 0.0,
        }
    }
}

/// Renormalised probability mass per (home goals, away goals).
#[derive(Debug, Clone, PartialEq)]
pub struct ScorelineGrid {
    size: usize,
    cells: Vec<f64>,
}

impl ScorelineGrid {
    pub fn probability(&self, home_goals: u32, away_goals: u32) -> f64 {
        let (h, a) = (home_goals as usize, away_goals as usize);
        if h >= self.size || a >= self.size {
            return 0.0;
        }
        self.cells[h * self.size + a]
    }

    /// Most probable scoreline; ties keep the lowest-scoring cell.
    pub fn most_likely(&self) -> (u32, u32) {
        let mut best = (0usize, 0.0_f64);
        for (i, p) in self.cells.iter().enumerate() {
            if *p > best.1 {
                best = (i, *p);
            }
        }
        ((best.0 / self.size) as u32, (best.0 % self.size) as u32)
    }

    pub fn outcome_probabilities(&self) -> OutcomeProbabilities {
        let mut probs = OutcomeProbabilities {
            home_win: 0.0,
            draw: 0.0,
            away_win: 0.0,
        };
        for h in 0..self.size {
            for a in 0..self.size {
                let p = self.cells[h * self.size + a];
                match h.cmp(&a) {
                    std::cmp::Ordering::Greater => probs.home_win += p,
                    std::cmp::Ordering::Equal => probs.draw += p,
                    std::cmp::Ordering::Less => probs.away_win += p,
                }
            }
        }
        probs
    }
}

impl OutcomeClassifier {
    pub fn new(max_goals: u32) -> Self {
        Self {
            max_goals: max_goals.max(1),
            ..Self::default()
        }
    }

    /// Dixon-Coles adjustment of the 0-0, 1-0, 0-1 and 1-1 cells.
    pub fn with_low_score_correction(mut self, rho: f64) -> Self {
        self.rho = if rho.is_finite() { rho.clamp(-0.3, 0.3) } else { 0.0 };
        self
    }

    pub fn classify(&self, lambda_home: f64, lambda_away: f64) -> OutcomeProbabilities {
        self.scoreline_grid(lambda_home, lambda_away).outcome_probabilities()
    }

    pub fn scoreline_grid(&self, lambda_home: f64, lambda_away: f64) -> ScorelineGrid {
        let lambda_home = sanitize(lambda_home);
        let lambda_away = sanitize(lambda_away);
        let home = goal_pmf(lambda_home, self.max_goals);
        let away = goal_pmf(lambda_away, self.max_goals);

        let size = self.max_goals as usize + 1;
        let mut cells = Vec::with_capacity(size * size);
        for (h, ph) in home.iter().enumerate() {
            for (a, pa) in away.iter().enumerate() {
                let tau = dc_tau(h, a, lambda_home, lambda_away, self.rho);
                cells.push((ph * pa * tau).max(0.0));
            }
        }

        let total: f64 = cells.iter().sum();
        if total > 0.0 && total.is_finite() {
            for cell in &mut cells {
                *cell /= total;
            }
        } else {
            let uniform = 1.0 / cells.len() as f64;
            cells.iter_mut().for_each(|c| *c = uniform);
        }

        ScorelineGrid { size, cells }
    }
}

/// Outcome probabilities from independent Poisson scorelines on the default grid.
pub fn classify(lambda_home: f64, lambda_away: f64) -> OutcomeProbabilities {
    OutcomeClassifier::default().classify(lambda_home, lambda_away)
}

fn sanitize(lambda: f64) -> f64 {
    if lambda.is_finite() {
        lambda.clamp(MIN_LAMBDA, MAX_LAMBDA)
    } else {
        MAX_LAMBDA
    }
}

fn goal_pmf(lambda: f64, max_goals: u32) -> Vec<f64> {
    match Poisson::new(lambda) {
        Ok(law) => (0..=u64::from(max_goals)).map(|k| law.pmf(k)).collect(),
        Err(_) => {
            // sanitize() keeps lambda positive, so this is a zero-goal point mass
            let mut pmf = vec![0.0; max_goals as usize + 1];
            pmf[0] = 1.0;
            pmf
        }
    }
}

fn dc_tau(home_goals: usize, away_goals: usize, lambda_home: f64, lambda_away: f64, rho: f64) -> f64 {
    match (home_goals, away_goals) {
        (0, 0) => 1.0 - lambda_home * lambda_away * rho,
        (0, 1) => 1.0 + lambda_home * rho,
        (1, 0) => 1.0 + lambda_away * rho,
        (1, 1) => 1.0 - rho,
        _ => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_normalized(p: &OutcomeProbabilities) {
        assert!((p.sum() - 1.0).abs() < 1e-9, "sum was {}", p.sum());
        assert!(p.home_win >= 0.0 && p.draw >= 0.0 && p.away_win >= 0.0);
    }

    #[test]
    fn equal_rates_are_symmetric() {
        let p = classify(1.3, 1.3);
        assert_normalized(&p);
        assert!((p.home_win - p.away_win).abs() < 1e-12);
        assert!(p.draw > 0.2 && p.draw < 0.35);
    }

    #[test]
    fn stronger_attack_wins_more_often() {
        let p = classify(2.2, 0.8);
        assert_normalized(&p);
        assert!(p.home_win > p.draw && p.home_win > p.away_win);
    }

    #[test]
    fn known_values_for_independent_poisson() {
        // P(0-0) share of the truncated grid for λ = 1, 1
        let grid = OutcomeClassifier::default().scoreline_grid(1.0, 1.0);
        let truncated: f64 = (0..=MAX_GOALS)
            .map(|k| (-1.0_f64).exp() / (1..=k).map(f64::from).product::<f64>())
            .sum();
        let expected = (-2.0_f64).exp() / (truncated * truncated);
        assert!((grid.probability(0, 0) - expected).abs() < 1e-12);
        assert_eq!(grid.probability(12, 0), 0.0);
    }

    #[test]
    fn most_likely_scoreline_follows_rates() {
        let grid = OutcomeClassifier::default().scoreline_grid(2.6, 0.4);
        assert_eq!(grid.most_likely(), (2, 0));
    }

    #[test]
    fn degenerate_rates_still_normalize() {
        for (lh, la) in [(0.0, 0.0), (f64::NAN, 1.0), (f64::INFINITY, 0.5), (-3.0, 2.0), (40.0, 40.0)] {
            assert_normalized(&classify(lh, la));
        }
    }

    #[test]
    fn negative_rho_lifts_low_score_draws() {
        let plain = OutcomeClassifier::default().classify(1.2, 1.1);
        let adjusted = OutcomeClassifier::default()
            .with_low_score_correction(-0.1)
            .classify(1.2, 1.1);
        assert_normalized(&adjusted);
        assert!(adjusted.draw > plain.draw);
    }
}
