use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, ValidationError};
use crate::models::ParameterSet;
use crate::services::calibration::{CalibrationConfig, Objective};
use crate::services::elo_calculator::{SeedPolicy, DEFAULT_RATING};

pub const ENV_PREFIX: &str = "RATINGFORGE_";

/// Runtime settings read from the environment (and `.env`, loaded by the binary).
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub params: ParameterSet,
    pub default_rating: f64,
    pub objective: Objective,
    pub workers: Option<usize>,
    pub time_budget: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            params: ParameterSet::default(),
            default_rating: DEFAULT_RATING,
            objective: Objective::default(),
            workers: None,
            time_budget: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = ParameterSet::default();
        let read = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        let params = ParameterSet::new(
            parse_or(&read, "K_FACTOR", defaults.k_factor)?,
            parse_or(&read, "HOME_ADVANTAGE", defaults.home_advantage)?,
            parse_or(&read, "POISSON_BASE", defaults.poisson_base)?,
            parse_or(&read, "DECAY_HALF_LIFE", defaults.decay_half_life)?,
            parse_or(&read, "GOAL_DIFF_WEIGHT", defaults.goal_diff_weight)?,
        )?;

        let default_rating = parse_or(&read, "DEFAULT_RATING", DEFAULT_RATING)?;
        SeedPolicy::Fixed(default_rating).validate()?;

        let objective = match read("OBJECTIVE") {
            Some(raw) => raw.parse::<Objective>()?,
            None => Objective::default(),
        };
        let workers = parse_opt::<usize>(&read, "WORKERS")?.filter(|n| *n > 0);
        let time_budget = parse_opt::<u64>(&read, "TIME_BUDGET_SECS")?.map(Duration::from_secs);

        Ok(Self {
            params,
            default_rating,
            objective,
            workers,
            time_budget,
        })
    }

    pub fn seed_policy(&self) -> SeedPolicy {
        SeedPolicy::Fixed(self.default_rating)
    }

    pub fn calibration_config(&self) -> CalibrationConfig {
        CalibrationConfig {
            objective: self.objective,
            seed_policy: self.seed_policy(),
            workers: self.workers,
            time_budget: self.time_budget,
            ..CalibrationConfig::default()
        }
    }
}

fn parse_opt<T: FromStr>(read: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>> {
    match read(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            ValidationError::new(
                name.to_lowercase(),
                format!("{}{}='{}' could not be parsed", ENV_PREFIX, name, raw),
            )
            .into()
        }),
    }
}

fn parse_or<T: FromStr>(read: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T> {
    Ok(parse_opt(read, name)?.unwrap_or(default))
}

pub fn load_parameters(path: &Path) -> Result<ParameterSet> {
    let raw = std::fs::read_to_string(path)?;
    let params: ParameterSet = serde_json::from_str(&raw)?;
    params.validate()?;
    Ok(params)
}

pub fn save_parameters(path: &Path, params: &ParameterSet) -> Result<()> {
    let json = serde_json::to_string_pretty(params)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForgeError;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let settings = Settings::from_lookup(|_| None).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn values_are_read_and_validated() {
        let settings = Settings::from_lookup(lookup(&[
            ("RATINGFORGE_K_FACTOR", "32"),
            ("RATINGFORGE_OBJECTIVE", "brier"),
            ("RATINGFORGE_WORKERS", "4"),
            ("RATINGFORGE_TIME_BUDGET_SECS", "30"),
        ]))
        .unwrap();
        assert_eq!(settings.params.k_factor, 32.0);
        assert_eq!(settings.objective, Objective::Brier);
        assert_eq!(settings.workers, Some(4));
        assert_eq!(settings.calibration_config().time_budget, Some(Duration::from_secs(30)));

        let err = Settings::from_lookup(lookup(&[("RATINGFORGE_K_FACTOR", "500")])).unwrap_err();
        assert!(matches!(err, ForgeError::Validation(e) if e.field == "k_factor"));

        let err = Settings::from_lookup(lookup(&[("RATINGFORGE_HOME_ADVANTAGE", "lots")])).unwrap_err();
        assert!(matches!(err, ForgeError::Validation(e) if e.field == "home_advantage"));
    }

    #[test]
    fn parameters_round_trip_through_json() {
        let dir = std::env::temp_dir().join(format!("ratingforge-params-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("params.json");

        let params = ParameterSet::new(25.0, 50.0, 1.3, 4.0, 1.5).unwrap();
        save_parameters(&path, &params).unwrap();
        assert_eq!(load_parameters(&path).unwrap(), params);

        std::fs::write(&path, r#"{"k_factor":0.0,"home_advantage":0.0,"poisson_base":1.4,"decay_half_life":5.0,"goal_diff_weight":1.0}"#).unwrap();
        assert!(load_parameters(&path).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
