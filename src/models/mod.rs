use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::ValidationError;
use crate::utils::validate_team_name;

/// Display-side view of a team: the engine only ever reads `rating` and `form`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub rating: f64,
    pub form: f64,
    pub league: Option<String>, // informational, never read by the engine
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    HomeWin,
    Draw,
    AwayWin,
}

impl Outcome {
    pub fn from_score(home_goals: u32, away_goals: u32) -> Self {
        match home_goals.cmp(&away_goals) {
            std::cmp::Ordering::Greater => Outcome::HomeWin,
            std::cmp::Ordering::Equal => Outcome::Draw,
            std::cmp::Ordering::Less => Outcome::AwayWin,
        }
    }

    /// Elo actual score from the home side's point of view.
    pub fn home_score(self) -> f64 {
        match self {
            Outcome::HomeWin => 1.0,
            Outcome::Draw => 0.5,
            Outcome::AwayWin => 0.0,
        }
    }
}

/// Raw row as handed over by a loader. Goals are signed so that a bad feed
/// surfaces as a validation error instead of a parse panic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub date: NaiveDate,
    pub home_team: String,
    pub away_team: String,
    pub home_goals: i32,
    pub away_goals: i32,
}

/// A completed, validated match. `sequence` is the position in the input
/// feed and breaks ties between matches played on the same date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub home_team: String,
    pub away_team: String,
    pub home_goals: u32,
    pub away_goals: u32,
    pub date: NaiveDate,
    pub sequence: usize,
}

impl Match {
    pub fn new(
        home_team: impl Into<String>,
        away_team: impl Into<String>,
        home_goals: u32,
        away_goals: u32,
        date: NaiveDate,
        sequence: usize,
    ) -> Result<Self, ValidationError> {
        let m = Self {
            home_team: home_team.into(),
            away_team: away_team.into(),
            home_goals,
            away_goals,
            date,
            sequence,
        };
        m.validate()?;
        Ok(m)
    }

    pub fn from_record(record: &MatchRecord, sequence: usize) -> Result<Self, ValidationError> {
        let home_goals = u32::try_from(record.home_goals).map_err(|_| {
            ValidationError::new(
                "home_goals",
                format!("match #{} has negative home goals ({})", sequence, record.home_goals),
            )
        })?;
        let away_goals = u32::try_from(record.away_goals).map_err(|_| {
            ValidationError::new(
                "away_goals",
                format!("match #{} has negative away goals ({})", sequence, record.away_goals),
            )
        })?;
        Self::new(
            record.home_team.trim(),
            record.away_team.trim(),
            home_goals,
            away_goals,
            record.date,
            sequence,
        )
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !validate_team_name(&self.home_team) {
            return Err(ValidationError::new(
                "home_team",
                format!("match #{} has a missing or oversized home team id", self.sequence),
            ));
        }
        if !validate_team_name(&self.away_team) {
            return Err(ValidationError::new(
                "away_team",
                format!("match #{} has a missing or oversized away team id", self.sequence),
            ));
        }
        if self.home_team == self.away_team {
            return Err(ValidationError::new(
                "away_team",
                format!("match #{}: '{}' cannot play itself", self.sequence, self.home_team),
            ));
        }
        Ok(())
    }

    pub fn outcome(&self) -> Outcome {
        Outcome::from_score(self.home_goals, self.away_goals)
    }

    pub fn goal_difference(&self) -> i64 {
        i64::from(self.home_goals) - i64::from(self.away_goals)
    }

    pub fn involves(&self, team: &str) -> bool {
        self.home_team == team || self.away_team == team
    }

    /// (goals for, goals against) for `team`, if it played in this match.
    pub fn goals_for(&self, team: &str) -> Option<(u32, u32)> {
        if self.home_team == team {
            Some((self.home_goals, self.away_goals))
        } else if self.away_team == team {
            Some((self.away_goals, self.home_goals))
        } else {
            None
        }
    }

    /// Result quality used by the form signal: win +1, draw 0, loss -1.
    pub fn result_quality_for(&self, team: &str) -> Option<f64> {
        self.goals_for(team).map(|(gf, ga)| match gf.cmp(&ga) {
            std::cmp::Ordering::Greater => 1.0,
            std::cmp::Ordering::Equal => 0.0,
            std::cmp::Ordering::Less => -1.0,
        })
    }
}

/// An upcoming match with no result yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub home_team: String,
    pub away_team: String,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryOrder {
    /// Reject input whose dates go backwards.
    Strict,
    /// Stable sort by date, keeping input order for equal dates.
    #[default]
    Sort,
}

/// The match record store: validated matches in chronological replay order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchHistory {
    matches: Vec<Match>,
}

impl MatchHistory {
    pub fn from_records(records: &[MatchRecord], order: HistoryOrder) -> Result<Self, ValidationError> {
        let matches = records
            .iter()
            .enumerate()
            .map(|(i, r)| Match::from_record(r, i))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_matches(matches, order)
    }

    pub fn from_matches(mut matches: Vec<Match>, order: HistoryOrder) -> Result<Self, ValidationError> {
        for m in &matches {
            m.validate()?;
        }
        match order {
            HistoryOrder::Strict => {
                if let Some(pair) = matches.windows(2).find(|w| w[1].date < w[0].date) {
                    return Err(ValidationError::new(
                        "date",
                        format!(
                            "match #{} dated {} precedes match #{} dated {}",
                            pair[1].sequence, pair[1].date, pair[0].sequence, pair[0].date
                        ),
                    ));
                }
            }
            HistoryOrder::Sort => {
                matches.sort_by(|a, b| a.date.cmp(&b.date).then(a.sequence.cmp(&b.sequence)));
            }
        }
        Ok(Self { matches })
    }

    pub fn matches(&self) -> &[Match] {
        &self.matches
    }

    /// Matches strictly before replay position `index`.
    pub fn before(&self, index: usize) -> &[Match] {
        &self.matches[..index.min(self.matches.len())]
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn teams(&self) -> BTreeSet<&str> {
        self.matches
            .iter()
            .flat_map(|m| [m.home_team.as_str(), m.away_team.as_str()])
            .collect()
    }
}

/// Append-only record of a rating change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingSnapshot {
    pub team_id: String,
    pub rating: f64,
    pub delta: f64,
    pub date: NaiveDate,
    pub match_index: usize,
}

/// Explicit team -> rating table threaded through the rating engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingTable {
    ratings: BTreeMap<String, f64>,
}

impl RatingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, team: &str) -> Option<f64> {
        self.ratings.get(team).copied()
    }

    pub fn contains(&self, team: &str) -> bool {
        self.ratings.contains_key(team)
    }

    pub fn insert(&mut self, team: impl Into<String>, rating: f64) {
        self.ratings.insert(team.into(), rating);
    }

    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.ratings.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn teams(&self) -> impl Iterator<Item = &str> {
        self.ratings.keys().map(String::as_str)
    }

    pub fn median(&self) -> Option<f64> {
        if self.ratings.is_empty() {
            return None;
        }
        let mut values: Vec<f64> = self.ratings.values().copied().collect();
        values.sort_by(f64::total_cmp);
        let mid = values.len() / 2;
        if values.len() % 2 == 0 {
            Some((values[mid - 1] + values[mid]) / 2.0)
        } else {
            Some(values[mid])
        }
    }

    /// Highest rating first; equal ratings fall back to name order.
    pub fn ranked(&self) -> Vec<(String, f64)> {
        let mut rows: Vec<(String, f64)> = self.ratings.iter().map(|(k, v)| (k.clone(), *v)).collect();
        rows.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        rows
    }
}

pub const DEFAULT_K_FACTOR: f64 = 20.0;
pub const DEFAULT_HOME_ADVANTAGE: f64 = 60.0;
pub const DEFAULT_POISSON_BASE: f64 = 1.4;
pub const DEFAULT_DECAY_HALF_LIFE: f64 = 5.0;
pub const DEFAULT_GOAL_DIFF_WEIGHT: f64 = 2.0;

/// Tunable engine parameters.
///
/// * `k_factor` in (0, 100]
/// * `home_advantage` in [0, 200] rating points, added to the home side's
///   rating in the expected-score curve
/// * `poisson_base` in (0, 5]: baseline expected goals per team, used as the
///   intercept prior of the goal model (not an Elo base)
/// * `decay_half_life` > 0, measured in matches of the team
/// * `goal_diff_weight` in [1, 5]: ceiling of the margin multiplier; 1 disables it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub k_factor: f64,
    pub home_advantage: f64,
    pub poisson_base: f64,
    pub decay_half_life: f64,
    pub goal_diff_weight: f64,
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self {
            k_factor: DEFAULT_K_FACTOR,
            home_advantage: DEFAULT_HOME_ADVANTAGE,
            poisson_base: DEFAULT_POISSON_BASE,
            decay_half_life: DEFAULT_DECAY_HALF_LIFE,
            goal_diff_weight: DEFAULT_GOAL_DIFF_WEIGHT,
        }
    }
}

impl ParameterSet {
    pub fn new(
        k_factor: f64,
        home_advantage: f64,
        poisson_base: f64,
        decay_half_life: f64,
        goal_diff_weight: f64,
    ) -> Result<Self, ValidationError> {
        let params = Self {
            k_factor,
            home_advantage,
            poisson_base,
            decay_half_life,
            goal_diff_weight,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        check_range("k_factor", self.k_factor, |v| v > 0.0 && v <= 100.0, "(0, 100]")?;
        check_range("home_advantage", self.home_advantage, |v| (0.0..=200.0).contains(&v), "[0, 200]")?;
        check_range("poisson_base", self.poisson_base, |v| v > 0.0 && v <= 5.0, "(0, 5]")?;
        check_range("decay_half_life", self.decay_half_life, |v| v > 0.0, "(0, inf)")?;
        check_range("goal_diff_weight", self.goal_diff_weight, |v| (1.0..=5.0).contains(&v), "[1, 5]")?;
        Ok(())
    }
}

fn check_range(field: &str, value: f64, ok: impl Fn(f64) -> bool, range: &str) -> Result<(), ValidationError> {
    if value.is_finite() && ok(value) {
        Ok(())
    } else {
        Err(ValidationError::new(field, format!("{} is outside {}", value, range)))
    }
}

/// Typed regression input for one side of a fixture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixtureFeatures {
    /// Own rating minus opponent rating (no home offset).
    pub rating_diff: f64,
    pub is_home: bool,
    /// Own form minus opponent form.
    pub form_diff: f64,
}

impl FixtureFeatures {
    /// Mirrored (home side, away side) features for one fixture.
    pub fn pair(home_rating: f64, away_rating: f64, home_form: f64, away_form: f64) -> (Self, Self) {
        (
            Self {
                rating_diff: home_rating - away_rating,
                is_home: true,
                form_diff: home_form - away_form,
            },
            Self {
                rating_diff: away_rating - home_rating,
                is_home: false,
                form_diff: away_form - home_form,
            },
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeProbabilities {
    pub home_win: f64,
    pub draw: f64,
    pub away_win: f64,
}

impl OutcomeProbabilities {
    pub fn uniform() -> Self {
        Self {
            home_win: 1.0 / 3.0,
            draw: 1.0 / 3.0,
            away_win: 1.0 / 3.0,
        }
    }

    pub fn sum(&self) -> f64 {
        self.home_win + self.draw + self.away_win
    }

    pub fn of(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::HomeWin => self.home_win,
            Outcome::Draw => self.draw,
            Outcome::AwayWin => self.away_win,
        }
    }

    /// Most probable outcome; ties prefer home, then draw.
    pub fn most_likely(&self) -> Outcome {
        if self.home_win >= self.draw && self.home_win >= self.away_win {
            Outcome::HomeWin
        } else if self.draw >= self.away_win {
            Outcome::Draw
        } else {
            Outcome::AwayWin
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub home_team: String,
    pub away_team: String,
    pub expected_goals_home: f64,
    pub expected_goals_away: f64,
    pub home_win_probability: f64,
    pub draw_probability: f64,
    pub away_win_probability: f64,
    pub likely_score: (u32, u32),
}

impl Prediction {
    pub fn probabilities(&self) -> OutcomeProbabilities {
        OutcomeProbabilities {
            home_win: self.home_win_probability,
            draw: self.draw_probability,
            away_win: self.away_win_probability,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn record(d: u32, home: &str, away: &str, hg: i32, ag: i32) -> MatchRecord {
        MatchRecord {
            date: day(d),
            home_team: home.to_string(),
            away_team: away.to_string(),
            home_goals: hg,
            away_goals: ag,
        }
    }

    #[test]
    fn negative_goals_are_rejected_with_field_name() {
        let err = Match::from_record(&record(1, "Flora", "Levadia", -1, 0), 0).unwrap_err();
        assert_eq!(err.field, "home_goals");

        let err = Match::from_record(&record(1, "Flora", "Levadia", 1, -2), 0).unwrap_err();
        assert_eq!(err.field, "away_goals");
    }

    #[test]
    fn missing_team_is_rejected() {
        let err = Match::from_record(&record(1, "  ", "Levadia", 1, 0), 3).unwrap_err();
        assert_eq!(err.field, "home_team");
        let err = Match::from_record(&record(1, "Flora", "", 1, 0), 3).unwrap_err();
        assert_eq!(err.field, "away_team");
    }

    #[test]
    fn self_play_is_rejected() {
        let err = Match::from_record(&record(1, "Flora", "Flora", 1, 0), 0).unwrap_err();
        assert_eq!(err.field, "away_team");
    }

    #[test]
    fn strict_order_rejects_backwards_dates() {
        let records = vec![record(5, "A", "B", 1, 0), record(2, "B", "C", 0, 0)];
        let err = MatchHistory::from_records(&records, HistoryOrder::Strict).unwrap_err();
        assert_eq!(err.field, "date");
    }

    #[test]
    fn sort_order_is_stable_for_equal_dates() {
        let records = vec![
            record(5, "A", "B", 1, 0),
            record(2, "C", "D", 0, 0),
            record(5, "E", "F", 2, 2),
            record(2, "G", "H", 3, 1),
        ];
        let history = MatchHistory::from_records(&records, HistoryOrder::Sort).unwrap();
        let seqs: Vec<usize> = history.matches().iter().map(|m| m.sequence).collect();
        assert_eq!(seqs, vec![1, 3, 0, 2]);
    }

    #[test]
    fn parameter_ranges_are_enforced() {
        assert!(ParameterSet::new(20.0, 60.0, 1.4, 5.0, 2.0).is_ok());
        assert_eq!(ParameterSet::new(0.0, 60.0, 1.4, 5.0, 2.0).unwrap_err().field, "k_factor");
        assert_eq!(ParameterSet::new(101.0, 60.0, 1.4, 5.0, 2.0).unwrap_err().field, "k_factor");
        assert_eq!(ParameterSet::new(20.0, 250.0, 1.4, 5.0, 2.0).unwrap_err().field, "home_advantage");
        assert_eq!(ParameterSet::new(20.0, 60.0, 1.4, 0.0, 2.0).unwrap_err().field, "decay_half_life");
        assert_eq!(ParameterSet::new(20.0, 60.0, 1.4, 5.0, 0.5).unwrap_err().field, "goal_diff_weight");
        assert_eq!(ParameterSet::new(20.0, 60.0, f64::NAN, 5.0, 2.0).unwrap_err().field, "poisson_base");
    }

    #[test]
    fn median_of_even_table() {
        let mut table = RatingTable::new();
        table.insert("A", 1400.0);
        table.insert("B", 1600.0);
        table.insert("C", 1500.0);
        table.insert("D", 1450.0);
        assert_eq!(table.median(), Some(1475.0));
        assert_eq!(table.ranked()[0].0, "B");
    }

    #[test]
    fn features_are_mirrored() {
        let (home, away) = FixtureFeatures::pair(1550.0, 1500.0, 0.5, -0.25);
        assert_eq!(home.rating_diff, 50.0);
        assert_eq!(away.rating_diff, -50.0);
        assert!(home.is_home && !away.is_home);
        assert_eq!(home.form_diff, 0.75);
        assert_eq!(away.form_diff, -0.75);
    }
}
