//! Command handlers for kudosctl.

use anyhow::{bail, Context as _, Result};
use chrono::{DateTime, NaiveDate, Utc};
use kudos_engine::config::{CONFIG_ENV, DEFAULT_CONFIG_FILE};
use kudos_engine::reward::RewardRng;
use kudos_engine::roster::{Participant, PopulationScope, Roster};
use kudos_engine::{
    Engine, EngineConfig, GateContext, JournalLedgerStore, LeaderboardQuery, PerformanceRecord, RandRng,
    RewardMechanism, SortKey, JOURNAL_FILE,
};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Global options shared by every command
pub struct Context {
    config: Option<PathBuf>,
    data_dir: PathBuf,
}

impl Context {
    pub fn new(config: Option<PathBuf>, data_dir: PathBuf) -> Self {
        Self { config, data_dir }
    }

    /// `--config`, then `$KUDOS_CONFIG`, then `./kudos.toml`
    fn config_path(&self) -> PathBuf {
        resolve_config_path(self.config.clone(), std::env::var_os(CONFIG_ENV).map(PathBuf::from))
    }

    fn load_config(&self) -> Result<EngineConfig> {
        let path = self.config_path();
        let explicit = self.config.is_some();
        if explicit && !path.exists() {
            bail!("config file {} does not exist", path.display());
        }
        EngineConfig::load_or_default(&path).with_context(|| format!("failed to load {}", path.display()))
    }

    fn engine(&self) -> Result<Engine<JournalLedgerStore>> {
        let config = self.load_config()?;
        let journal = self.data_dir.join(JOURNAL_FILE);
        let store = JournalLedgerStore::open(&journal)
            .with_context(|| format!("failed to open journal {}", journal.display()))?;
        debug!(journal = %journal.display(), "ledger opened");
        Engine::from_config(&config, Arc::new(store)).context("invalid configuration")
    }
}

fn resolve_config_path(flag: Option<PathBuf>, env: Option<PathBuf>) -> PathBuf {
    flag.or(env).unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Handle check-config command
pub fn check_config(ctx: &Context, print: bool) -> Result<()> {
    let path = ctx.config_path();
    let config = ctx.load_config()?;
    let settings = config
        .build()
        .with_context(|| format!("{} is invalid", path.display()))?;

    info!(
        path = %path.display(),
        metrics = settings.catalog.len(),
        programs = settings.programs.len(),
        "configuration valid"
    );
    if print {
        print!("{}", config.to_toml_string()?);
    } else {
        println!("ok: {} active metrics, {} reward programs", settings.catalog.active().count(), settings.programs.len());
    }
    Ok(())
}

/// Read a JSONL feed of performance records; blank lines are ignored
pub fn read_feed(path: &Path) -> Result<Vec<PerformanceRecord>> {
    let content = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("{}:{}: bad performance record", path.display(), i + 1))
        })
        .collect()
}

fn parse_instant(value: Option<&str>) -> Result<DateTime<Utc>> {
    match value {
        Some(s) => Ok(DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("invalid timestamp '{}'", s))?
            .with_timezone(&Utc)),
        None => Ok(Utc::now()),
    }
}

/// Handle score command
pub fn score(
    ctx: &Context,
    feed: &Path,
    participant: &str,
    as_of: Option<&str>,
    apply: Option<&str>,
) -> Result<()> {
    let as_of = parse_instant(as_of)?;
    let records = read_feed(feed)?;

    match apply {
        Some(key) => {
            let engine = ctx.engine()?;
            engine.register_participant(participant)?;
            let composite = engine.composite_score(participant, &records, as_of);
            let applied = engine.apply_score(&composite, key, Utc::now())?;
            print_json(&serde_json::json!({ "score": composite, "applied": applied }))
        }
        None => {
            let settings = ctx.load_config()?.build()?;
            let composite = kudos_engine::composite::score(participant, &settings.catalog, &records, as_of);
            print_json(&composite)
        }
    }
}

/// Handle balance command
pub fn balance(ctx: &Context, participant: &str) -> Result<()> {
    let engine = ctx.engine()?;
    let state = engine.progression(participant)?;
    print_json(&serde_json::json!({ "progression": state, "title": state.title() }))
}

/// Handle spend command
pub fn spend(ctx: &Context, participant: &str, points: u64, key: &str) -> Result<()> {
    let engine = ctx.engine()?;
    let state = engine.spend(participant, points, key, Utc::now())?;
    print_json(&state)
}

fn read_roster(path: &Path) -> Result<Roster> {
    let content = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let participants: Vec<Participant> =
        serde_json::from_str(&content).with_context(|| format!("{}: expected a JSON array of participants", path.display()))?;
    Ok(Roster::from_participants(participants))
}

/// Handle leaderboard command
pub fn leaderboard(
    ctx: &Context,
    roster: &Path,
    team: Option<String>,
    department: Option<String>,
    sort: &str,
    limit: Option<usize>,
) -> Result<()> {
    let roster = read_roster(roster)?;
    let sort_key: SortKey = sort.parse().map_err(anyhow::Error::msg)?;
    let population_scope = match (team, department) {
        (Some(team), _) => PopulationScope::Team(team),
        (None, Some(department)) => PopulationScope::Department(department),
        (None, None) => PopulationScope::Org,
    };

    let engine = ctx.engine()?;
    let board = engine.leaderboard(
        &roster,
        &LeaderboardQuery {
            population_scope,
            sort_key,
            limit,
        },
    )?;
    print_json(&board)
}

/// Handle streak command
pub fn streak(ctx: &Context, participant: &str, as_of: Option<&str>, award: bool) -> Result<()> {
    let as_of = as_of
        .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date '{}'", s)))
        .transpose()?;
    let engine = ctx.engine()?;
    let bonus = if award {
        engine.award_streak_bonus(participant, Utc::now())?
    } else {
        None
    };
    let state = engine.streak(participant, as_of)?;
    print_json(&serde_json::json!({ "streak": state, "bonus": bonus }))
}

/// Handle draw command
pub fn draw(ctx: &Context, participant: &str, mechanism: &str, challenges: &[String], seed: Option<u64>) -> Result<()> {
    let mechanism: RewardMechanism = mechanism.parse().map_err(anyhow::Error::msg)?;
    let gate_ctx = challenges
        .iter()
        .fold(GateContext::default(), |acc, id| acc.with_challenge(id, 100.0));
    let mut rng: Box<dyn RewardRng> = match seed {
        Some(seed) => Box::new(RandRng::seeded(seed)),
        None => Box::new(RandRng::os()),
    };

    let engine = ctx.engine()?;
    let response = engine.draw(participant, mechanism, &gate_ctx, rng.as_mut(), Utc::now())?;
    print_json(&response)
}

/// Handle claim command
pub fn claim(ctx: &Context, outcome: &str, key: &str) -> Result<()> {
    let outcome_id = Uuid::parse_str(outcome).with_context(|| format!("invalid outcome id '{}'", outcome))?;
    let engine = ctx.engine()?;
    let receipt = engine.claim(&outcome_id, key, Utc::now())?;
    print_json(&receipt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_path_precedence() {
        let flag = Some(PathBuf::from("/etc/kudos/flag.toml"));
        let env = Some(PathBuf::from("/etc/kudos/env.toml"));
        assert_eq!(resolve_config_path(flag, env.clone()), PathBuf::from("/etc/kudos/flag.toml"));
        assert_eq!(resolve_config_path(None, env), PathBuf::from("/etc/kudos/env.toml"));
        assert_eq!(resolve_config_path(None, None), PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn test_read_feed_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"participantId":"a1","metricKey":"aht","value":280.0,"observedAt":"2026-10-15T18:00:00Z"}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(
            file,
            r#"{{"participantId":"a1","metricKey":"quality","value":92.5,"observedAt":"2026-10-15T18:00:00Z"}}"#
        )
        .unwrap();
        let records = read_feed(file.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].metric_key, "quality");
    }

    #[test]
    fn test_read_feed_reports_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{not json").unwrap();
        let err = read_feed(file.path()).unwrap_err();
        assert!(err.to_string().contains(":1:"));
    }

    #[test]
    fn test_missing_explicit_config_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::new(Some(dir.path().join("absent.toml")), dir.path().to_path_buf());
        assert!(ctx.load_config().is_err());
    }

    #[test]
    fn test_journal_lands_in_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("kudos.toml");
        fs::write(&config, EngineConfig::default().to_toml_string().unwrap()).unwrap();
        let ctx = Context::new(Some(config), dir.path().join("data"));
        let engine = ctx.engine().unwrap();
        engine.register_participant("a1").unwrap();
        assert!(dir.path().join("data").join(JOURNAL_FILE).exists());
    }
}
