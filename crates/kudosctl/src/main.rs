//! Kudos Control - operator CLI for the Kudos scoring engine
//!
//! Validates configuration, scores metric feeds and queries or mutates a
//! journal-backed ledger.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kudosctl")]
#[command(about = "Kudos - performance scoring and rewards for contact centers", long_about = None)]
#[command(version = kudos_engine::VERSION)]
struct Cli {
    /// Config file (falls back to $KUDOS_CONFIG, then ./kudos.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the ledger journal
    #[arg(long, global = true, default_value = ".")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration
    CheckConfig {
        /// Print the effective configuration as TOML
        #[arg(long)]
        print: bool,
    },

    /// Compute a composite score from a JSONL metric feed
    Score {
        /// File with one performance record per line
        #[arg(long)]
        feed: PathBuf,

        #[arg(long)]
        participant: String,

        /// Score as of this instant (RFC 3339, default now)
        #[arg(long)]
        as_of: Option<String>,

        /// Credit the score to the ledger under this idempotency key
        #[arg(long)]
        apply: Option<String>,
    },

    /// Show points, XP and level
    Balance {
        #[arg(long)]
        participant: String,
    },

    /// Redeem points
    Spend {
        #[arg(long)]
        participant: String,

        #[arg(long)]
        points: u64,

        /// Idempotency key
        #[arg(long)]
        key: String,
    },

    /// Rank a roster
    Leaderboard {
        /// JSON array of participants
        #[arg(long)]
        roster: PathBuf,

        /// Restrict to one team
        #[arg(long, conflicts_with = "department")]
        team: Option<String>,

        /// Restrict to one department
        #[arg(long)]
        department: Option<String>,

        /// Sort by "xp" or "points"
        #[arg(long, default_value = "xp")]
        sort: String,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show the daily activity streak
    Streak {
        #[arg(long)]
        participant: String,

        /// Business day to evaluate (YYYY-MM-DD)
        #[arg(long)]
        as_of: Option<String>,

        /// Also pay any milestone bonus reached today
        #[arg(long)]
        award: bool,
    },

    /// Draw a spin or scratch reward
    Draw {
        #[arg(long)]
        participant: String,

        /// "spin" or "scratch"
        #[arg(long, default_value = "spin")]
        mechanism: String,

        /// Completed challenge ids, for challenge-gated rewards
        #[arg(long = "challenge")]
        challenges: Vec<String>,

        /// Seed the draw (for reproducible runs)
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Claim a drawn reward
    Claim {
        #[arg(long)]
        outcome: String,

        /// Idempotency key
        #[arg(long)]
        key: String,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("KUDOS_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let ctx = commands::Context::new(cli.config, cli.data_dir);
    match cli.command {
        Commands::CheckConfig { print } => commands::check_config(&ctx, print),
        Commands::Score {
            feed,
            participant,
            as_of,
            apply,
        } => commands::score(&ctx, &feed, &participant, as_of.as_deref(), apply.as_deref()),
        Commands::Balance { participant } => commands::balance(&ctx, &participant),
        Commands::Spend { participant, points, key } => commands::spend(&ctx, &participant, points, &key),
        Commands::Leaderboard {
            roster,
            team,
            department,
            sort,
            limit,
        } => commands::leaderboard(&ctx, &roster, team, department, &sort, limit),
        Commands::Streak {
            participant,
            as_of,
            award,
        } => commands::streak(&ctx, &participant, as_of.as_deref(), award),
        Commands::Draw {
            participant,
            mechanism,
            challenges,
            seed,
        } => commands::draw(&ctx, &participant, &mechanism, &challenges, seed),
        Commands::Claim { outcome, key } => commands::claim(&ctx, &outcome, &key),
    }
}
