use std::path::Path;

use anyhow::{bail, Context, Result};

use ratingforge::config::{load_parameters, save_parameters, Settings};
use ratingforge::data::{export_rating_history, load_season, LoadedSeason};
use ratingforge::models::{HistoryOrder, MatchHistory, ParameterSet, Prediction};
use ratingforge::services::{
    calibrate, current_table, project_table, CalibrationConfig, EloCalculator, FitConfig, ParameterGrid,
    ParameterRanges, PredictionEngine, SeedPolicy, TrialStatus,
};
use ratingforge::utils::{probability_to_odds, results_to_form};

use crate::SeasonArgs;

struct Season {
    history: MatchHistory,
    raw: LoadedSeason,
    params: ParameterSet,
    seed: SeedPolicy,
}

fn load(settings: &Settings, args: &SeasonArgs) -> Result<Season> {
    let delimiter = u8::try_from(args.delimiter).context("delimiter must be a single ASCII character")?;
    let raw = load_season(&args.file, delimiter)
        .with_context(|| format!("Failed to load season file: {}", args.file.display()))?;

    let order = if args.strict { HistoryOrder::Strict } else { HistoryOrder::Sort };
    let history = MatchHistory::from_records(&raw.records, order)?;

    let params = match &args.params {
        Some(path) => load_parameters(path)
            .with_context(|| format!("Failed to read parameters from {}", path.display()))?,
        None => settings.params,
    };
    let seed = if args.median_seed {
        SeedPolicy::LeagueMedian {
            fallback: settings.default_rating,
        }
    } else {
        settings.seed_policy()
    };

    Ok(Season {
        history,
        raw,
        params,
        seed,
    })
}

fn train(season: &Season) -> Result<PredictionEngine> {
    if season.history.is_empty() {
        bail!("No played matches found. Add results before predicting.");
    }
    Ok(PredictionEngine::train(
        &season.history,
        season.params,
        season.seed,
        &FitConfig::default(),
    )?)
}

pub fn show_ratings(settings: &Settings, args: &SeasonArgs, as_of: Option<usize>, team: Option<&str>) -> Result<()> {
    let season = load(settings, args)?;
    let replay = EloCalculator::new(season.params, season.seed).replay(&season.history)?;

    if let Some(team) = team {
        println!("📈 Rating history for {}:", team);
        let mut found = false;
        for snapshot in replay.history_for(team) {
            found = true;
            println!(
                "   #{:<4} {}  {:>7.1} ({:+.1})",
                snapshot.match_index,
                snapshot.date.format("%Y-%m-%d"),
                snapshot.rating,
                snapshot.delta
            );
        }
        if !found {
            println!("❌ No matches found for '{}'", team);
        }
        return Ok(());
    }

    let table = match as_of {
        Some(index) => {
            println!("📊 Ratings before match #{}:\n", index);
            replay.ratings_as_of(index)
        }
        None => {
            println!("📊 Ratings after {} matches:\n", season.history.len());
            replay.ratings.clone()
        }
    };

    let swings = replay.biggest_swings();
    let played = match as_of {
        Some(index) => season.history.before(index),
        None => season.history.matches(),
    };
    for (i, (team, rating)) in table.ranked().into_iter().enumerate() {
        let form = results_to_form(played, &team, 5);
        let swing = swings
            .get(&team)
            .map(|s| format!("  best {:+.1} / worst {:+.1}", s.biggest_gain, s.biggest_loss))
            .unwrap_or_default();
        println!("{:>3}. {:<24} {:>7.1}  {:<5}{}", i + 1, team, rating, form, swing);
    }

    Ok(())
}

fn print_prediction(prediction: &Prediction) {
    println!("⚽ {} vs {}:", prediction.home_team, prediction.away_team);
    println!(
        "   Home win: {:.1}% | Draw: {:.1}% | Away win: {:.1}%",
        prediction.home_win_probability * 100.0,
        prediction.draw_probability * 100.0,
        prediction.away_win_probability * 100.0
    );
    println!(
        "   Fair odds: {:.2} | {:.2} | {:.2}",
        probability_to_odds(prediction.home_win_probability),
        probability_to_odds(prediction.draw_probability),
        probability_to_odds(prediction.away_win_probability)
    );
    println!(
        "   Expected goals: {:.2} - {:.2} (most likely {}-{})\n",
        prediction.expected_goals_home,
        prediction.expected_goals_away,
        prediction.likely_score.0,
        prediction.likely_score.1
    );
}

pub fn predict_fixture(settings: &Settings, args: &SeasonArgs, home: &str, away: &str) -> Result<()> {
    let season = load(settings, args)?;
    let engine = train(&season)?;
    let prediction = engine.predict(home, away)?;
    print_prediction(&prediction);
    Ok(())
}

pub fn predict_open_fixtures(settings: &Settings, args: &SeasonArgs) -> Result<()> {
    let season = load(settings, args)?;
    if season.raw.fixtures.is_empty() {
        println!("📭 No upcoming fixtures found. Leave the score columns blank for unplayed matches.");
        return Ok(());
    }

    let engine = train(&season)?;
    println!("🔮 Generating predictions for upcoming matches...\n");
    let predictions = engine.predict_fixtures(&season.raw.fixtures)?;
    for prediction in &predictions {
        print_prediction(prediction);
    }
    println!("✅ Generated predictions for {} matches!", predictions.len());
    Ok(())
}

pub fn run_calibration(
    settings: &Settings,
    args: &SeasonArgs,
    random: Option<usize>,
    seed: u64,
    warmup: f64,
    out: Option<&Path>,
) -> Result<()> {
    let season = load(settings, args)?;
    let candidates = match random {
        Some(n) => ParameterRanges::default().sample(n, seed)?,
        None => ParameterGrid::default().candidates()?,
    };
    let config = CalibrationConfig {
        warmup_fraction: warmup,
        seed_policy: season.seed,
        ..settings.calibration_config()
    };

    println!(
        "🔧 Evaluating {} candidates on {} matches...",
        candidates.len(),
        season.history.len()
    );
    let report = calibrate(&season.history, &candidates, &config)?;

    let cancelled = report.trials.iter().filter(|t| t.status == TrialStatus::Cancelled).count();
    let failed = report
        .trials
        .iter()
        .filter(|t| matches!(t.status, TrialStatus::Failed { .. }))
        .count();
    if cancelled + failed > 0 {
        println!("⚠️  {} trials cancelled, {} failed", cancelled, failed);
    }

    let best = report.best;
    println!("✅ Best {} = {:.5} (candidate #{})", report.objective, report.best_objective, report.best_index);
    println!("   K factor:         {}", best.k_factor);
    println!("   Home advantage:   {}", best.home_advantage);
    println!("   Poisson base:     {}", best.poisson_base);
    println!("   Decay half-life:  {}", best.decay_half_life);
    println!("   Goal diff weight: {}", best.goal_diff_weight);

    if let Some(path) = out {
        save_parameters(path, &best).with_context(|| format!("Failed to write {}", path.display()))?;
        println!("💾 Saved parameters to {}", path.display());
    }

    Ok(())
}

pub fn project_season(settings: &Settings, args: &SeasonArgs) -> Result<()> {
    let season = load(settings, args)?;
    let table = if season.raw.fixtures.is_empty() {
        println!("🏁 No fixtures left, showing the current table:\n");
        current_table(&season.history)
    } else {
        let engine = train(&season)?;
        println!("🔮 Projected table after {} remaining fixtures:\n", season.raw.fixtures.len());
        project_table(&season.history, &engine, &season.raw.fixtures)?
    };

    println!("{:>3}  {:<24} {:>3} {:>4} {:>4} {:>8}", "#", "Team", "P", "GD", "Pts", "Proj");
    for (i, row) in table.iter().enumerate() {
        println!(
            "{:>3}. {:<24} {:>3} {:>+4} {:>4} {:>8.1}",
            i + 1,
            row.team,
            row.played,
            row.goal_difference(),
            row.points,
            row.projected_points()
        );
    }
    Ok(())
}

pub fn export_history(settings: &Settings, args: &SeasonArgs, out: &Path) -> Result<()> {
    let season = load(settings, args)?;
    let replay = EloCalculator::new(season.params, season.seed).replay(&season.history)?;
    export_rating_history(out, &replay.snapshots)
        .with_context(|| format!("Failed to export ratings to {}", out.display()))?;
    println!("✅ Exported {} rating snapshots to {}", replay.snapshots.len(), out.display());
    Ok(())
}
