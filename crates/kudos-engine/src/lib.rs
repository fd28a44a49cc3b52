//! Performance scoring and gamification engine for contact-center agents.
//!
//! Pipeline: metric feed records -> [`metric`] normalization -> [`composite`]
//! score -> [`progression`] (points/XP/level) -> [`ranking`]. Independently,
//! the [`ledger`] feeds [`streak`] and [`budget`]; the reward arbiter
//! ([`reward`] plus [`engine`]) reads balances and appends payouts.

pub mod budget;
pub mod composite;
pub mod config;
pub mod contest;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod metric;
pub mod progression;
pub mod ranking;
pub mod reward;
pub mod roster;
pub mod store;
pub mod streak;

pub use composite::{CompositeScore, MetricResult};
pub use config::{EngineConfig, EngineSettings};
pub use engine::{BudgetTarget, Engine, LeaderboardQuery, ScoreApplication};
pub use error::{EngineError, ErrorKind};
pub use ledger::{Balance, LedgerEntry, ParticipantBook};
pub use metric::{Direction, MetricDefinition, MetricStatus, PerformanceRecord};
pub use progression::ProgressionState;
pub use ranking::{LeaderboardEntry, SortKey};
pub use reward::{ClaimReceipt, DrawResponse, GateContext, RandRng, RewardMechanism, RewardOutcome, RewardState};
pub use store::{JournalLedgerStore, LedgerStore, MemoryLedgerStore};
pub use streak::StreakState;

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Journal file name inside a data directory
pub const JOURNAL_FILE: &str = "ledger.jsonl";
