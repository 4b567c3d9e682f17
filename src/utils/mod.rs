use crate::models::{Match, Outcome, OutcomeProbabilities};

/// Convert a team's results to a form string, most recent first (e.g., "WLWDW")
pub fn results_to_form(matches: &[Match], team: &str, last: usize) -> String {
    matches
        .iter()
        .rev()
        .filter_map(|m| m.goals_for(team))
        .take(last)
        .map(|(gf, ga)| match gf.cmp(&ga) {
            std::cmp::Ordering::Greater => 'W',
            std::cmp::Ordering::Equal => 'D',
            std::cmp::Ordering::Less => 'L',
        })
        .collect()
}

/// Share of available points won, in percent
pub fn calculate_points_percentage(wins: u32, draws: u32, losses: u32) -> f64 {
    let total_games = wins + draws + losses;
    if total_games == 0 {
        return 0.0;
    }

    let points = wins * 3 + draws;
    (points as f64) / ((total_games * 3) as f64) * 100.0
}

/// Convert probability to fair decimal odds
pub fn probability_to_odds(probability: f64) -> f64 {
    if probability <= 0.0 || probability >= 1.0 {
        return 1000.0; // Very high odds for impossible/certain events
    }
    1.0 / probability
}

/// Validate team name format
pub fn validate_team_name(name: &str) -> bool {
    !name.trim().is_empty() && name.len() <= 100
}

/// Closest known team name, used to suggest a fix for a typo in a fixture request
pub fn closest_team_name<'a>(wanted: &str, known: impl Iterator<Item = &'a str>) -> Option<String> {
    const MIN_SIMILARITY: f64 = 0.8;

    let wanted = wanted.trim().to_lowercase();
    known
        .map(|name| (strsim::jaro_winkler(&wanted, &name.to_lowercase()), name))
        .filter(|(score, _)| *score >= MIN_SIMILARITY)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, name)| name.to_string())
}

/// Share of matches where the most likely outcome was the actual one
pub fn calculate_prediction_accuracy(predictions: &[(OutcomeProbabilities, Outcome)]) -> f64 {
    if predictions.is_empty() {
        return 0.0;
    }

    let correct = predictions
        .iter()
        .filter(|(probs, outcome)| probs.most_likely() == *outcome)
        .count();

    correct as f64 / predictions.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn played(home: &str, away: &str, hg: u32, ag: u32, seq: usize) -> Match {
        let date = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        Match::new(home, away, hg, ag, date, seq).unwrap()
    }

    #[test]
    fn test_probability_to_odds() {
        assert_eq!(probability_to_odds(0.5), 2.0);
        assert_eq!(probability_to_odds(0.25), 4.0);
        assert!(probability_to_odds(0.0) > 100.0);
    }

    #[test]
    fn test_calculate_points_percentage() {
        assert!((calculate_points_percentage(3, 1, 1) - 200.0 / 3.0).abs() < 1e-9); // 10 points out of 15 possible
        assert_eq!(calculate_points_percentage(0, 0, 0), 0.0);
    }

    #[test]
    fn test_results_to_form() {
        let matches = vec![
            played("Flora", "Levadia", 2, 0, 0),
            played("Kalju", "Flora", 1, 1, 1),
            played("Flora", "Narva", 0, 3, 2),
        ];
        assert_eq!(results_to_form(&matches, "Flora", 5), "LDW");
        assert_eq!(results_to_form(&matches, "Flora", 2), "LD");
        assert_eq!(results_to_form(&matches, "Tammeka", 5), "");
    }

    #[test]
    fn test_closest_team_name() {
        let known = ["Flora Tallinn", "Levadia Tallinn", "Narva Trans"];
        assert_eq!(
            closest_team_name("flora talin", known.iter().copied()),
            Some("Flora Tallinn".to_string())
        );
        assert_eq!(closest_team_name("Zzz", known.iter().copied()), None);
    }

    #[test]
    fn test_prediction_accuracy() {
        let home_fav = OutcomeProbabilities {
            home_win: 0.6,
            draw: 0.25,
            away_win: 0.15,
        };
        let preds = vec![(home_fav, Outcome::HomeWin), (home_fav, Outcome::AwayWin)];
        assert_eq!(calculate_prediction_accuracy(&preds), 0.5);
        assert_eq!(calculate_prediction_accuracy(&[]), 0.0);
    }
}
