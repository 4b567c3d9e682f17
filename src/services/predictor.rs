use crate::error::{ForgeError, Result, ValidationError};
use crate::models::{
    Fixture, FixtureFeatures, Match, MatchHistory, ParameterSet, Prediction, RatingTable, Team,
};
use crate::services::elo_calculator::{EloCalculator, RatingChange, SeedPolicy};
use crate::services::form_decay::FormState;
use crate::services::goals_model::{FitConfig, GoalModel, GoalSample};
use crate::services::outcome_classifier::OutcomeClassifier;
use crate::utils::closest_team_name;

/// Rating table and form state of one chronological replay. Every replay
/// (a trained engine, a calibration trial) owns its own instance.
#[derive(Debug, Clone)]
pub struct ReplayState {
    elo: EloCalculator,
    ratings: RatingTable,
    form: FormState,
}

impl ReplayState {
    pub fn new(params: &ParameterSet, seed: SeedPolicy) -> Result<Self> {
        params.validate()?;
        seed.validate()?;
        Ok(Self {
            elo: EloCalculator::new(*params, seed),
            ratings: RatingTable::new(),
            form: FormState::new(params.decay_half_life)?,
        })
    }

    /// Pre-match features; teams not yet rated are read at their seed rating
    /// without being added to the table.
    pub fn features_for(&self, home_team: &str, away_team: &str) -> (FixtureFeatures, FixtureFeatures) {
        FixtureFeatures::pair(
            self.elo.rating_or_seed(&self.ratings, home_team),
            self.elo.rating_or_seed(&self.ratings, away_team),
            self.form.form(home_team),
            self.form.form(away_team),
        )
    }

    /// Fold a finished match into ratings and form.
    pub fn absorb(&mut self, match_data: &Match) -> Result<RatingChange> {
        let change = self.elo.apply_match(&mut self.ratings, match_data)?;
        self.form.record(match_data);
        Ok(change)
    }

    pub fn ratings(&self) -> &RatingTable {
        &self.ratings
    }

    pub fn form(&self, team: &str) -> f64 {
        self.form.form(team)
    }
}

/// Trained forecaster: ratings and form as of the end of the history plus a
/// goal model fitted once on every replayed match.
pub struct PredictionEngine {
    params: ParameterSet,
    state: ReplayState,
    model: GoalModel,
    classifier: OutcomeClassifier,
}

impl PredictionEngine {
    pub fn train(
        history: &MatchHistory,
        params: ParameterSet,
        seed: SeedPolicy,
        fit: &FitConfig,
    ) -> Result<Self> {
        let mut state = ReplayState::new(&params, seed)?;
        let mut samples = Vec::with_capacity(history.len() * 2);

        for match_data in history.matches() {
            let (home, away) = state.features_for(&match_data.home_team, &match_data.away_team);
            samples.extend(GoalSample::pair(match_data, home, away));
            state.absorb(match_data)?;
        }

        let model = GoalModel::fit(&samples, params.poisson_base, fit)?;

        tracing::info!(
            "Trained prediction engine on {} matches ({} teams): intercept {:.3}, rating {:.3}, home {:.3}, form {:.3}",
            history.len(),
            state.ratings().len(),
            model.intercept,
            model.rating_coef,
            model.home_coef,
            model.form_coef
        );

        Ok(Self {
            params,
            state,
            model,
            classifier: OutcomeClassifier::default(),
        })
    }

    pub fn with_classifier(mut self, classifier: OutcomeClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    pub fn model(&self) -> &GoalModel {
        &self.model
    }

    pub fn ratings(&self) -> &RatingTable {
        self.state.ratings()
    }

    pub fn form(&self, team: &str) -> f64 {
        self.state.form(team)
    }

    /// Rating table joined with form, highest rating first
    pub fn teams(&self) -> Vec<Team> {
        self.ratings()
            .ranked()
            .into_iter()
            .map(|(id, rating)| Team {
                form: self.form(&id),
                id,
                rating,
                league: None,
            })
            .collect()
    }

    fn ensure_known(&self, team: &str) -> Result<()> {
        if self.ratings().contains(team) {
            return Ok(());
        }
        Err(ForgeError::UnknownTeam {
            team: team.to_string(),
            suggestion: closest_team_name(team, self.ratings().teams()),
        })
    }

    /// Predict one fixture. Teams without a rating are rejected rather than seeded.
    pub fn predict(&self, home_team: &str, away_team: &str) -> Result<Prediction> {
        self.ensure_known(home_team)?;
        self.ensure_known(away_team)?;
        if home_team == away_team {
            return Err(ValidationError::new(
                "away_team",
                format!("'{}' cannot play itself", home_team),
            )
            .into());
        }

        let (home, away) = self.state.features_for(home_team, away_team);
        let (lambda_home, lambda_away) = self.model.predict_fixture(&home, &away);
        let grid = self.classifier.scoreline_grid(lambda_home, lambda_away);
        let probs = grid.outcome_probabilities();

        Ok(Prediction {
            home_team: home_team.to_string(),
            away_team: away_team.to_string(),
            expected_goals_home: lambda_home,
            expected_goals_away: lambda_away,
            home_win_probability: probs.home_win,
            draw_probability: probs.draw,
            away_win_probability: probs.away_win,
            likely_score: grid.most_likely(),
        })
    }

    /// Generate predictions for a list of upcoming fixtures
    pub fn predict_fixtures(&self, fixtures: &[Fixture]) -> Result<Vec<Prediction>> {
        let mut predictions = Vec::with_capacity(fixtures.len());
        for fixture in fixtures {
            let prediction = self.predict(&fixture.home_team, &fixture.away_team)?;

            tracing::info!(
                "Generated prediction for {} vs {}: Home {:.2}%, Draw {:.2}%, Away {:.2}%",
                fixture.home_team,
                fixture.away_team,
                prediction.home_win_probability * 100.0,
                prediction.draw_probability * 100.0,
                prediction.away_win_probability * 100.0
            );

            predictions.push(prediction);
        }
        Ok(predictions)
    }
}
