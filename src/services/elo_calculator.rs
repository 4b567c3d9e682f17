use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, ValidationError};
use crate::models::{Match, MatchHistory, ParameterSet, RatingSnapshot, RatingTable};

/// Elo curve constants. Base 10 over a 400-point scale is used for the
/// update rule, the rating-difference feature and calibration alike.
pub const ELO_BASE: f64 = 10.0;
pub const ELO_SCALE: f64 = 400.0;
pub const DEFAULT_RATING: f64 = 1500.0;

/// How a team is rated the first time it shows up in a replayed match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SeedPolicy {
    Fixed(f64),
    /// Median of the teams rated so far, or `fallback` for the very first teams.
    LeagueMedian { fallback: f64 },
}

impl Default for SeedPolicy {
    fn default() -> Self {
        SeedPolicy::Fixed(DEFAULT_RATING)
    }
}

impl SeedPolicy {
    pub fn seed_rating(&self, table: &RatingTable) -> f64 {
        match *self {
            SeedPolicy::Fixed(rating) => rating,
            SeedPolicy::LeagueMedian { fallback } => table.median().unwrap_or(fallback),
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let rating = match *self {
            SeedPolicy::Fixed(rating) => rating,
            SeedPolicy::LeagueMedian { fallback } => fallback,
        };
        if rating.is_finite() && rating > 0.0 {
            Ok(())
        } else {
            Err(ValidationError::new("default_rating", format!("{} is not a positive rating", rating)))
        }
    }
}

/// Outcome of applying one match to the rating table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingChange {
    pub home_before: f64,
    pub away_before: f64,
    pub expected_home: f64,
    pub multiplier: f64,
    pub home_delta: f64,
    pub away_delta: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct EloCalculator {
    params: ParameterSet,
    seed: SeedPolicy,
}

impl EloCalculator {
    pub fn new(params: ParameterSet, seed: SeedPolicy) -> Self {
        Self { params, seed }
    }

    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    pub fn seed_policy(&self) -> SeedPolicy {
        self.seed
    }

    /// Calculate expected score based on ELO ratings
    pub fn expected_score(rating_a: f64, rating_b: f64) -> f64 {
        1.0 / (1.0 + ELO_BASE.powf((rating_b - rating_a) / ELO_SCALE))
    }

    /// Expected home score with the home-advantage offset applied
    pub fn expected_home_score(&self, home_rating: f64, away_rating: f64) -> f64 {
        Self::expected_score(home_rating + self.params.home_advantage, away_rating)
    }

    /// Margin multiplier: 1 for margins up to one goal, then rising towards
    /// `goal_diff_weight` without ever reaching it.
    pub fn goal_diff_multiplier(&self, goal_difference: i64) -> f64 {
        let excess = (goal_difference.unsigned_abs().saturating_sub(1)) as f64;
        1.0 + (self.params.goal_diff_weight - 1.0) * excess / (excess + 1.0)
    }

    /// Current rating, or the seed the team would receive on first appearance
    pub fn rating_or_seed(&self, table: &RatingTable, team: &str) -> f64 {
        table.get(team).unwrap_or_else(|| self.seed.seed_rating(table))
    }

    /// Update both ratings in place after a finished match.
    pub fn apply_match(&self, table: &mut RatingTable, match_data: &Match) -> Result<RatingChange> {
        match_data.validate()?;

        // Both seeds come from the table as it was before this match.
        let home_rating = self.rating_or_seed(table, &match_data.home_team);
        let away_rating = self.rating_or_seed(table, &match_data.away_team);

        let expected_home = self.expected_home_score(home_rating, away_rating);
        let actual_home = match_data.outcome().home_score();
        let multiplier = self.goal_diff_multiplier(match_data.goal_difference());

        let delta = self.params.k_factor * multiplier * (actual_home - expected_home);

        table.insert(match_data.home_team.clone(), home_rating + delta);
        table.insert(match_data.away_team.clone(), away_rating - delta);

        tracing::debug!(
            "Updated ratings: {} ({:.1} -> {:.1}), {} ({:.1} -> {:.1})",
            match_data.home_team,
            home_rating,
            home_rating + delta,
            match_data.away_team,
            away_rating,
            away_rating - delta
        );

        Ok(RatingChange {
            home_before: home_rating,
            away_before: away_rating,
            expected_home,
            multiplier,
            home_delta: delta,
            away_delta: -delta,
        })
    }

    /// Pure form of [`apply_match`](Self::apply_match): returns a new table.
    pub fn update_ratings(&self, before: &RatingTable, match_data: &Match) -> Result<(RatingTable, RatingChange)> {
        let mut after = before.clone();
        let change = self.apply_match(&mut after, match_data)?;
        Ok((after, change))
    }

    /// Replay a whole history from an empty table.
    pub fn replay(&self, history: &MatchHistory) -> Result<Replay> {
        self.params.validate()?;
        self.seed.validate()?;

        let mut ratings = RatingTable::new();
        let mut snapshots = Vec::with_capacity(history.len() * 2);
        let mut changes = Vec::with_capacity(history.len());

        for (index, match_data) in history.matches().iter().enumerate() {
            let change = self.apply_match(&mut ratings, match_data)?;
            snapshots.push(RatingSnapshot {
                team_id: match_data.home_team.clone(),
                rating: change.home_before + change.home_delta,
                delta: change.home_delta,
                date: match_data.date,
                match_index: index,
            });
            snapshots.push(RatingSnapshot {
                team_id: match_data.away_team.clone(),
                rating: change.away_before + change.away_delta,
                delta: change.away_delta,
                date: match_data.date,
                match_index: index,
            });
            changes.push(change);
        }

        tracing::info!(
            "Replayed {} matches for {} teams",
            history.len(),
            ratings.len()
        );

        Ok(Replay {
            ratings,
            snapshots,
            changes,
        })
    }
}

/// Largest single-match rating gain and loss for a team.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingSwing {
    pub biggest_gain: f64,
    pub gain_match: usize,
    pub biggest_loss: f64,
    pub loss_match: usize,
}

#[derive(Debug, Clone)]
pub struct Replay {
    pub ratings: RatingTable,
    pub snapshots: Vec<RatingSnapshot>,
    pub changes: Vec<RatingChange>,
}

impl Replay {
    /// Ratings before the match at replay position `index` was played.
    pub fn ratings_as_of(&self, index: usize) -> RatingTable {
        let mut table = RatingTable::new();
        for snapshot in self.snapshots.iter().take_while(|s| s.match_index < index) {
            table.insert(snapshot.team_id.clone(), snapshot.rating);
        }
        table
    }

    pub fn history_for<'a>(&'a self, team: &'a str) -> impl Iterator<Item = &'a RatingSnapshot> + 'a {
        self.snapshots.iter().filter(move |s| s.team_id == team)
    }

    pub fn biggest_swings(&self) -> BTreeMap<String, RatingSwing> {
        let mut swings: BTreeMap<String, RatingSwing> = BTreeMap::new();
        for snapshot in &self.snapshots {
            let entry = swings.entry(snapshot.team_id.clone()).or_insert(RatingSwing {
                biggest_gain: snapshot.delta,
                gain_match: snapshot.match_index,
                biggest_loss: snapshot.delta,
                loss_match: snapshot.match_index,
            });
            if snapshot.delta > entry.biggest_gain {
                entry.biggest_gain = snapshot.delta;
                entry.gain_match = snapshot.match_index;
            }
            if snapshot.delta < entry.biggest_loss {
                entry.biggest_loss = snapshot.delta;
                entry.loss_match = snapshot.match_index;
            }
        }
        swings
    }
}
