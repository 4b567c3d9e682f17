use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{Fixture, MatchHistory};
use crate::services::predictor::PredictionEngine;
use crate::utils::calculate_points_percentage;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StandingRow {
    pub team: String,
    pub played: u32,
    pub wins: u32,
    pub draws: u32,
    pub losses: u32,
    pub goals_for: u32,
    pub goals_against: u32,
    pub points: u32,
    /// Expected points still to come from the remaining fixtures.
    pub expected_points: f64,
}

impl StandingRow {
    fn new(team: &str) -> Self {
        Self {
            team: team.to_string(),
            ..Self::default()
        }
    }

    pub fn goal_difference(&self) -> i64 {
        i64::from(self.goals_for) - i64::from(self.goals_against)
    }

    pub fn projected_points(&self) -> f64 {
        f64::from(self.points) + self.expected_points
    }

    pub fn points_percentage(&self) -> f64 {
        calculate_points_percentage(self.wins, self.draws, self.losses)
    }

    fn record(&mut self, goals_for: u32, goals_against: u32) {
        self.played += 1;
        self.goals_for += goals_for;
        self.goals_against += goals_against;
        match goals_for.cmp(&goals_against) {
            std::cmp::Ordering::Greater => {
                self.wins += 1;
                self.points += 3;
            }
            std::cmp::Ordering::Equal => {
                self.draws += 1;
                self.points += 1;
            }
            std::cmp::Ordering::Less => self.losses += 1,
        }
    }
}

fn tally(history: &MatchHistory) -> BTreeMap<String, StandingRow> {
    let mut rows: BTreeMap<String, StandingRow> = BTreeMap::new();
    for m in history.matches() {
        rows.entry(m.home_team.clone())
            .or_insert_with(|| StandingRow::new(&m.home_team))
            .record(m.home_goals, m.away_goals);
        rows.entry(m.away_team.clone())
            .or_insert_with(|| StandingRow::new(&m.away_team))
            .record(m.away_goals, m.home_goals);
    }
    rows
}

/// Table from played matches only: points, goal difference, goals scored, name.
pub fn current_table(history: &MatchHistory) -> Vec<StandingRow> {
    let mut rows: Vec<StandingRow> = tally(history).into_values().collect();
    rows.sort_by(|a, b| {
        b.points
            .cmp(&a.points)
            .then(b.goal_difference().cmp(&a.goal_difference()))
            .then(b.goals_for.cmp(&a.goals_for))
            .then(a.team.cmp(&b.team))
    });
    rows
}

/// Final-table projection: current points plus `3·P(win) + P(draw)` for each
/// remaining fixture, with ratings frozen at the end of the history.
pub fn project_table(
    history: &MatchHistory,
    engine: &PredictionEngine,
    fixtures: &[Fixture],
) -> Result<Vec<StandingRow>> {
    let mut rows = tally(history);

    for fixture in fixtures {
        let prediction = engine.predict(&fixture.home_team, &fixture.away_team)?;
        rows.entry(fixture.home_team.clone())
            .or_insert_with(|| StandingRow::new(&fixture.home_team))
            .expected_points += 3.0 * prediction.home_win_probability + prediction.draw_probability;
        rows.entry(fixture.away_team.clone())
            .or_insert_with(|| StandingRow::new(&fixture.away_team))
            .expected_points += 3.0 * prediction.away_win_probability + prediction.draw_probability;
    }

    let mut table: Vec<StandingRow> = rows.into_values().collect();
    table.sort_by(|a, b| {
        b.projected_points()
            .total_cmp(&a.projected_points())
            .then(b.goal_difference().cmp(&a.goal_difference()))
            .then(a.team.cmp(&b.team))
    });

    tracing::info!("Projected final table over {} remaining fixtures", fixtures.len());
    Ok(table)
}
