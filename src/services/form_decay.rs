use std::collections::BTreeMap;

use crate::error::{Result, ValidationError};
use crate::models::{Match, MatchHistory};

fn check_half_life(half_life: f64) -> std::result::Result<(), ValidationError> {
    if half_life.is_finite() && half_life > 0.0 {
        Ok(())
    } else {
        Err(ValidationError::new(
            "decay_half_life",
            format!("{} must be a positive number of matches", half_life),
        ))
    }
}

/// Recency-weighted mean result quality of `team` over the matches replayed
/// before position `as_of_index`. Age counts the team's own matches (the
/// most recent one has age 0) and each result weighs `0.5^(age / half_life)`.
/// Teams without history have neutral form 0.
pub fn form_for(team: &str, as_of_index: usize, history: &MatchHistory, half_life: f64) -> Result<f64> {
    check_half_life(half_life)?;

    let mut weighted = 0.0_f64;
    let mut total_weight = 0.0_f64;
    let recent_first = history
        .before(as_of_index)
        .iter()
        .rev()
        .filter_map(|m| m.result_quality_for(team));

    for (age, quality) in recent_first.enumerate() {
        let weight = 0.5_f64.powf(age as f64 / half_life);
        weighted += weight * quality;
        total_weight += weight;
    }

    if total_weight == 0.0 {
        Ok(0.0)
    } else {
        Ok(weighted / total_weight)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct FormAccumulator {
    weighted: f64,
    total_weight: f64,
}

/// Incremental twin of [`form_for`], owned by a single replay. Every new
/// result decays the team's previous sums by one half-life step.
#[derive(Debug, Clone, PartialEq)]
pub struct FormState {
    decay: f64,
    teams: BTreeMap<String, FormAccumulator>,
}

impl FormState {
    pub fn new(half_life: f64) -> Result<Self> {
        check_half_life(half_life)?;
        Ok(Self {
            decay: 0.5_f64.powf(1.0 / half_life),
            teams: BTreeMap::new(),
        })
    }

    pub fn form(&self, team: &str) -> f64 {
        match self.teams.get(team) {
            Some(acc) if acc.total_weight > 0.0 => acc.weighted / acc.total_weight,
            _ => 0.0,
        }
    }

    pub fn record(&mut self, match_data: &Match) {
        for team in [&match_data.home_team, &match_data.away_team] {
            if let Some(quality) = match_data.result_quality_for(team) {
                let acc = self.teams.entry(team.clone()).or_default();
                acc.weighted = acc.weighted * self.decay + quality;
                acc.total_weight = acc.total_weight * self.decay + 1.0;
            }
        }
    }
}
