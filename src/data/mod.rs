use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::{Result, ValidationError};
use crate::models::{Fixture, MatchRecord, RatingSnapshot};

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%d.%m.%Y"];

#[derive(Debug, Deserialize)]
struct SeasonRow {
    date: String,
    home_team: String,
    away_team: String,
    #[serde(default)]
    home_goals: Option<String>,
    #[serde(default)]
    away_goals: Option<String>,
}

/// Played matches and still-open fixtures from one season file, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedSeason {
    pub records: Vec<MatchRecord>,
    pub fixtures: Vec<Fixture>,
}

pub fn parse_date(raw: &str) -> std::result::Result<NaiveDate, ValidationError> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
        .ok_or_else(|| ValidationError::new("date", format!("'{}' is neither YYYY-MM-DD nor DD.MM.YYYY", raw)))
}

fn parse_goals(field: &str, raw: Option<&str>, line: u64) -> std::result::Result<Option<i32>, ValidationError> {
    match raw.map(str::trim) {
        None | Some("") | Some("-") => Ok(None),
        Some(value) => value
            .parse::<i32>()
            .map(Some)
            .map_err(|_| ValidationError::new(field, format!("line {}: '{}' is not a goal count", line, value))),
    }
}

/// Read `date,home_team,away_team,home_goals,away_goals` rows. A row with both
/// scores blank (or `-`) is an upcoming fixture; a row with only one score is
/// rejected.
pub fn parse_season<R: Read>(reader: R, delimiter: u8) -> Result<LoadedSeason> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut season = LoadedSeason::default();
    for (i, row) in csv_reader.deserialize::<SeasonRow>().enumerate() {
        let row = row?;
        let line = i as u64 + 2;
        let date = parse_date(&row.date)?;
        let home_goals = parse_goals("home_goals", row.home_goals.as_deref(), line)?;
        let away_goals = parse_goals("away_goals", row.away_goals.as_deref(), line)?;

        match (home_goals, away_goals) {
            (Some(home_goals), Some(away_goals)) => season.records.push(MatchRecord {
                date,
                home_team: row.home_team,
                away_team: row.away_team,
                home_goals,
                away_goals,
            }),
            (None, None) => season.fixtures.push(Fixture {
                home_team: row.home_team,
                away_team: row.away_team,
                date: Some(date),
            }),
            (Some(_), None) => {
                return Err(ValidationError::new("away_goals", format!("line {}: score is incomplete", line)).into())
            }
            (None, Some(_)) => {
                return Err(ValidationError::new("home_goals", format!("line {}: score is incomplete", line)).into())
            }
        }
    }

    Ok(season)
}

pub fn load_season(path: &Path, delimiter: u8) -> Result<LoadedSeason> {
    let file = std::fs::File::open(path)?;
    let season = parse_season(file, delimiter)?;
    tracing::info!(
        "Loaded {} results and {} fixtures from {}",
        season.records.len(),
        season.fixtures.len(),
        path.display()
    );
    Ok(season)
}

/// Write rating snapshots as CSV, one row per team per match.
pub fn write_rating_history<W: std::io::Write>(writer: W, snapshots: &[RatingSnapshot]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    for snapshot in snapshots {
        writer.serialize(snapshot)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn export_rating_history(path: &Path, snapshots: &[RatingSnapshot]) -> Result<()> {
    let file = std::fs::File::create(path)?;
    write_rating_history(file, snapshots)?;
    tracing::info!("Exported {} rating snapshots to {}", snapshots.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForgeError;

    const SEASON: &str = "\
date;home_team;away_team;home_goals;away_goals
2024-03-02;Flora;Levadia;2;1
09.03.2024;Kalju;Narva;0;0
2024-03-16;Levadia;Kalju;-;-
2024-03-23;Narva;Flora;;
";

    #[test]
    fn splits_results_and_fixtures() {
        let season = parse_season(SEASON.as_bytes(), b';').unwrap();
        assert_eq!(season.records.len(), 2);
        assert_eq!(season.fixtures.len(), 2);
        assert_eq!(season.records[1].date, NaiveDate::from_ymd_opt(2024, 3, 9).unwrap());
        assert_eq!(season.fixtures[0].home_team, "Levadia");
    }

    #[test]
    fn incomplete_score_is_rejected() {
        let raw = "date,home_team,away_team,home_goals,away_goals\n2024-03-02,Flora,Levadia,2,\n";
        match parse_season(raw.as_bytes(), b',') {
            Err(ForgeError::Validation(e)) => assert_eq!(e.field, "away_goals"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn bad_date_and_goals_are_rejected() {
        assert!(parse_date("2024/03/02").is_err());
        let raw = "date,home_team,away_team,home_goals,away_goals\n2024-03-02,Flora,Levadia,two,1\n";
        assert!(matches!(parse_season(raw.as_bytes(), b','), Err(ForgeError::Validation(_))));
    }

    #[test]
    fn negative_goals_survive_loading_for_validation() {
        let raw = "date,home_team,away_team,home_goals,away_goals\n2024-03-02,Flora,Levadia,-1,1\n";
        let season = parse_season(raw.as_bytes(), b',').unwrap();
        assert_eq!(season.records[0].home_goals, -1);
    }

    #[test]
    fn rating_history_has_header_and_rows() {
        let snapshots = vec![RatingSnapshot {
            team_id: "Flora".into(),
            rating: 1510.0,
            delta: 10.0,
            date: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
            match_index: 0,
        }];
        let mut out = Vec::new();
        write_rating_history(&mut out, &snapshots).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("team_id,rating,delta,date,match_index\n"));
        assert!(text.contains("Flora,1510.0,10.0,2024-03-02,0"));
    }
}
