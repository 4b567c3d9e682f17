//! Poisson regression for expected goals.
//!
//! Each side of a fixture is one observation with
//! `log λ = β0 + β1·(rating_diff / 400) + β2·is_home + β3·form_diff`.
//! Fitting is a penalised Newton (IRLS) solve: slopes carry an L2 ridge and
//! the intercept is pulled towards `ln(poisson_base)`, so small or empty
//! training sets fall back to the baseline scoring rate.

use nalgebra::{Matrix4, Vector4};
use serde::{Deserialize, Serialize};
use statrs::function::factorial::ln_factorial;

use crate::error::{ForgeError, Result, ValidationError};
use crate::models::{FixtureFeatures, Match};
use crate::services::elo_calculator::ELO_SCALE;

pub const LAMBDA_MIN: f64 = 0.05;
pub const LAMBDA_MAX: f64 = 8.0;
const ETA_CAP: f64 = 20.0;
const MAX_HALVINGS: usize = 30;

/// One side of one match: the pre-match features and the goals it scored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoalSample {
    pub features: FixtureFeatures,
    pub goals: u32,
    pub weight: f64,
}

impl GoalSample {
    pub fn pair(match_data: &Match, home: FixtureFeatures, away: FixtureFeatures) -> [GoalSample; 2] {
        [
            GoalSample {
                features: home,
                goals: match_data.home_goals,
                weight: 1.0,
            },
            GoalSample {
                features: away,
                goals: match_data.away_goals,
                weight: 1.0,
            },
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitConfig {
    /// L2 penalty on the three slopes.
    pub ridge: f64,
    /// Pseudo-observation weight pulling the intercept towards `ln(poisson_base)`.
    pub prior_strength: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            ridge: 0.5,
            prior_strength: 2.0,
            max_iterations: 50,
            tolerance: 1e-9,
        }
    }
}

impl FitConfig {
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if !(self.ridge.is_finite() && self.ridge > 0.0) {
            return Err(ValidationError::new("ridge", format!("{} must be positive", self.ridge)));
        }
        if !(self.prior_strength.is_finite() && self.prior_strength >= 0.0) {
            return Err(ValidationError::new(
                "prior_strength",
                format!("{} must be non-negative", self.prior_strength),
            ));
        }
        if self.max_iterations == 0 {
            return Err(ValidationError::new("max_iterations", "must be at least 1"));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(ValidationError::new("tolerance", format!("{} must be positive", self.tolerance)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GoalModel {
    pub intercept: f64,
    pub rating_coef: f64,
    pub home_coef: f64,
    pub form_coef: f64,
    pub samples: usize,
    pub iterations: usize,
}

fn design(features: &FixtureFeatures) -> Vector4<f64> {
    Vector4::new(
        1.0,
        features.rating_diff / ELO_SCALE,
        if features.is_home { 1.0 } else { 0.0 },
        features.form_diff,
    )
}

fn rate(eta: f64) -> f64 {
    eta.min(ETA_CAP).exp()
}

impl GoalModel {
    /// Untrained model: every side is expected to score `poisson_base`.
    pub fn baseline(poisson_base: f64) -> Self {
        Self {
            intercept: poisson_base.ln(),
            rating_coef: 0.0,
            home_coef: 0.0,
            form_coef: 0.0,
            samples: 0,
            iterations: 0,
        }
    }

    fn coefficients(&self) -> Vector4<f64> {
        Vector4::new(self.intercept, self.rating_coef, self.home_coef, self.form_coef)
    }

    fn from_coefficients(beta: &Vector4<f64>, samples: usize, iterations: usize) -> Self {
        Self {
            intercept: beta[0],
            rating_coef: beta[1],
            home_coef: beta[2],
            form_coef: beta[3],
            samples,
            iterations,
        }
    }

    pub fn linear_predictor(&self, features: &FixtureFeatures) -> f64 {
        self.coefficients().dot(&design(features))
    }

    /// Expected goals for one side. Always positive.
    pub fn predict(&self, features: &FixtureFeatures) -> f64 {
        rate(self.linear_predictor(features)).clamp(LAMBDA_MIN, LAMBDA_MAX)
    }

    /// (λ_home, λ_away) for a fixture.
    pub fn predict_fixture(&self, home: &FixtureFeatures, away: &FixtureFeatures) -> (f64, f64) {
        (self.predict(home), self.predict(away))
    }

    /// Weighted Poisson negative log-likelihood of `samples` under this model.
    pub fn negative_log_likelihood(&self, samples: &[GoalSample]) -> f64 {
        samples
            .iter()
            .map(|s| {
                let lambda = self.predict(&s.features);
                let y = f64::from(s.goals);
                s.weight * (lambda - y * lambda.ln() + ln_factorial(u64::from(s.goals)))
            })
            .sum()
    }

    pub fn fit(samples: &[GoalSample], poisson_base: f64, config: &FitConfig) -> Result<Self> {
        config.validate()?;
        if !(poisson_base.is_finite() && poisson_base > 0.0) {
            return Err(ValidationError::new("poisson_base", format!("{} must be positive", poisson_base)).into());
        }
        if let Some(bad) = samples.iter().find(|s| !(s.weight.is_finite() && s.weight >= 0.0)) {
            return Err(ValidationError::new("weight", format!("{} is not a valid sample weight", bad.weight)).into());
        }
        if samples.is_empty() {
            return Ok(Self::baseline(poisson_base));
        }

        let rows: Vec<(Vector4<f64>, f64, f64)> = samples
            .iter()
            .map(|s| (design(&s.features), f64::from(s.goals), s.weight))
            .collect();

        let prior_mean = Vector4::new(poisson_base.ln(), 0.0, 0.0, 0.0);
        let penalty = Matrix4::from_diagonal(&Vector4::new(
            config.prior_strength,
            config.ridge,
            config.ridge,
            config.ridge,
        ));

        let objective = |beta: &Vector4<f64>| -> f64 {
            let data: f64 = rows
                .iter()
                .map(|(x, y, w)| {
                    let eta = x.dot(beta);
                    w * (rate(eta) - y * eta)
                })
                .sum();
            let offset = beta - prior_mean;
            data + 0.5 * offset.dot(&(penalty * offset))
        };

        let mut beta = prior_mean;
        let mut current = objective(&beta);

        for iteration in 1..=config.max_iterations {
            let mut gradient = penalty * (beta - prior_mean);
            let mut hessian = penalty;
            for (x, y, w) in &rows {
                let mu = rate(x.dot(&beta));
                gradient += x * (w * (mu - y));
                hessian += (x * x.transpose()) * (w * mu);
            }

            let step = hessian
                .cholesky()
                .ok_or_else(|| ForgeError::Model("Hessian is not positive definite".to_string()))?
                .solve(&gradient);

            let mut scale = 1.0;
            let mut candidate = beta - step;
            let mut value = objective(&candidate);
            let mut halvings = 0;
            while !(value <= current) && halvings < MAX_HALVINGS {
                scale *= 0.5;
                candidate = beta - step * scale;
                value = objective(&candidate);
                halvings += 1;
            }

            if !(value <= current) {
                // No descent left at floating-point resolution.
                tracing::debug!("Goal model settled after {} iterations", iteration);
                return Ok(Self::from_coefficients(&beta, samples.len(), iteration));
            }

            let moved = (step * scale).norm();
            beta = candidate;
            current = value;

            if moved < config.tolerance {
                tracing::debug!(
                    "Goal model converged after {} iterations on {} samples",
                    iteration,
                    samples.len()
                );
                return Ok(Self::from_coefficients(&beta, samples.len(), iteration));
            }
        }

        Err(ForgeError::Model(format!(
            "no convergence after {} iterations",
            config.max_iterations
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statrs::distribution::{Discrete, Poisson};

    fn features(rating_diff: f64, is_home: bool, form_diff: f64) -> FixtureFeatures {
        FixtureFeatures {
            rating_diff,
            is_home,
            form_diff,
        }
    }

    /// Samples whose weights follow an exact Poisson law, so the MLE is the truth.
    fn synthetic(truth: &GoalModel) -> Vec<GoalSample> {
        let mut samples = Vec::new();
        for rating_diff in [-200.0, 0.0, 200.0] {
            for is_home in [true, false] {
                for form_diff in [-0.5, 0.5] {
                    let f = features(rating_diff, is_home, form_diff);
                    let law = Poisson::new(truth.predict(&f)).unwrap();
                    for goals in 0..30u32 {
                        samples.push(GoalSample {
                            features: f,
                            goals,
                            weight: law.pmf(u64::from(goals)),
                        });
                    }
                }
            }
        }
        samples
    }

    #[test]
    fn empty_training_set_gives_baseline() {
        let model = GoalModel::fit(&[], 1.4, &FitConfig::default()).unwrap();
        assert_eq!(model, GoalModel::baseline(1.4));
        assert!((model.predict(&features(300.0, true, 1.0)) - 1.4).abs() < 1e-12);
    }

    #[test]
    fn recovers_known_coefficients() {
        let truth = GoalModel {
            intercept: 0.2,
            rating_coef: 0.5,
            home_coef: 0.25,
            form_coef: 0.3,
            samples: 0,
            iterations: 0,
        };
        let config = FitConfig {
            ridge: 1e-9,
            prior_strength: 0.0,
            ..FitConfig::default()
        };
        let fitted = GoalModel::fit(&synthetic(&truth), 1.4, &config).unwrap();
        assert!((fitted.intercept - 0.2).abs() < 1e-4);
        assert!((fitted.rating_coef - 0.5).abs() < 1e-4);
        assert!((fitted.home_coef - 0.25).abs() < 1e-4);
        assert!((fitted.form_coef - 0.3).abs() < 1e-4);
        assert!(fitted.iterations > 0);
    }

    #[test]
    fn strong_prior_holds_the_intercept() {
        let samples = vec![GoalSample {
            features: features(0.0, true, 0.0),
            goals: 6,
            weight: 1.0,
        }];
        let config = FitConfig {
            prior_strength: 1e6,
            ..FitConfig::default()
        };
        let model = GoalModel::fit(&samples, 1.2, &config).unwrap();
        assert!((model.intercept - 1.2_f64.ln()).abs() < 1e-3);
    }

    #[test]
    fn fitting_lowers_the_likelihood_cost() {
        let truth = GoalModel {
            intercept: 0.1,
            rating_coef: 0.8,
            home_coef: 0.3,
            form_coef: 0.0,
            samples: 0,
            iterations: 0,
        };
        let samples = synthetic(&truth);
        let fitted = GoalModel::fit(&samples, 1.4, &FitConfig::default()).unwrap();
        let baseline = GoalModel::baseline(1.4);
        assert!(fitted.negative_log_likelihood(&samples) < baseline.negative_log_likelihood(&samples));

        let (home, away) = FixtureFeatures::pair(1500.0, 1500.0, 0.0, 0.0);
        let (lh, la) = fitted.predict_fixture(&home, &away);
        assert!(lh > la);
    }

    #[test]
    fn rates_stay_positive_and_bounded() {
        let model = GoalModel {
            intercept: 0.0,
            rating_coef: 50.0,
            home_coef: 0.0,
            form_coef: 0.0,
            samples: 0,
            iterations: 0,
        };
        assert_eq!(model.predict(&features(1e6, true, 0.0)), LAMBDA_MAX);
        assert_eq!(model.predict(&features(-1e6, false, 0.0)), LAMBDA_MIN);
    }

    #[test]
    fn rejects_bad_inputs() {
        let sample = GoalSample {
            features: features(0.0, true, 0.0),
            goals: 1,
            weight: f64::NAN,
        };
        assert!(GoalModel::fit(&[sample], 1.4, &FitConfig::default()).is_err());
        assert!(GoalModel::fit(&[], 0.0, &FitConfig::default()).is_err());
        let config = FitConfig {
            ridge: 0.0,
            ..FitConfig::default()
        };
        assert!(GoalModel::fit(&[], 1.4, &config).is_err());
    }
}
