mod cli;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ratingforge")]
#[command(about = "Elo ratings and match forecasts for football leagues")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct SeasonArgs {
    /// Season CSV: date,home_team,away_team,home_goals,away_goals
    #[arg(short, long)]
    pub file: PathBuf,
    #[arg(short, long, default_value = ",")]
    pub delimiter: char,
    /// Reject out-of-order dates instead of sorting them
    #[arg(long)]
    pub strict: bool,
    /// Parameter set saved by `calibrate --out`
    #[arg(short, long)]
    pub params: Option<PathBuf>,
    /// Seed new teams at the current league median instead of the default rating
    #[arg(long)]
    pub median_seed: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay the season and print the rating table
    Ratings {
        #[command(flatten)]
        season: SeasonArgs,
        /// Show the table as it stood before this match number
        #[arg(long)]
        as_of: Option<usize>,
        /// Show the rating history of one team
        #[arg(short, long)]
        team: Option<String>,
    },
    /// Predict one fixture, or every open fixture in the file
    Predict {
        #[command(flatten)]
        season: SeasonArgs,
        #[arg(long, requires = "away")]
        home: Option<String>,
        #[arg(long, requires = "home")]
        away: Option<String>,
    },
    /// Search parameters by walk-forward backtesting
    Calibrate {
        #[command(flatten)]
        season: SeasonArgs,
        /// Sample this many random candidates instead of the default grid
        #[arg(long)]
        random: Option<usize>,
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Share of the history used for training only
        #[arg(long, default_value = "0.5")]
        warmup: f64,
        /// Write the best parameter set as JSON
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Project the final table from the remaining fixtures
    Project {
        #[command(flatten)]
        season: SeasonArgs,
    },
    /// Export the rating history as CSV
    Export {
        #[command(flatten)]
        season: SeasonArgs,
        #[arg(short, long)]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = ratingforge::config::Settings::from_env()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Ratings { season, as_of, team } => {
            tracing::info!("Replaying {}", season.file.display());
            cli::show_ratings(&settings, &season, as_of, team.as_deref())?;
        }
        Commands::Predict { season, home, away } => {
            tracing::info!("Generating predictions...");
            match (home, away) {
                (Some(home), Some(away)) => cli::predict_fixture(&settings, &season, &home, &away)?,
                _ => cli::predict_open_fixtures(&settings, &season)?,
            }
        }
        Commands::Calibrate {
            season,
            random,
            seed,
            warmup,
            out,
        } => {
            tracing::info!("Calibrating on {}", season.file.display());
            cli::run_calibration(&settings, &season, random, seed, warmup, out.as_deref())?;
        }
        Commands::Project { season } => {
            cli::project_season(&settings, &season)?;
        }
        Commands::Export { season, out } => {
            cli::export_history(&settings, &season, &out)?;
        }
    }

    Ok(())
}
