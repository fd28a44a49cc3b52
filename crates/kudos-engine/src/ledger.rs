//! Append-only points ledger.
//!
//! Balances are never stored: they are the fold of a participant's entries.
//! Reward draws and claims are kept next to the entries as their own
//! append-only rows so a claim can be matched to exactly one payout entry.

use crate::reward::{RewardMechanism, Segment};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What produced a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    ScoreConversion,
    RewardPayout,
    StreakBonus,
    Redemption,
    Adjustment,
}

impl std::fmt::Display for EntrySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ScoreConversion => write!(f, "score_conversion"),
            Self::RewardPayout => write!(f, "reward_payout"),
            Self::StreakBonus => write!(f, "streak_bonus"),
            Self::Redemption => write!(f, "redemption"),
            Self::Adjustment => write!(f, "adjustment"),
        }
    }
}

/// Earned entries count as qualifying activity for streaks and caps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Earned,
    Redeemed,
}

/// Single ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: Uuid,
    pub participant_id: String,
    pub timestamp: DateTime<Utc>,
    pub points_delta: i64,
    pub xp_delta: i64,
    pub source: EntrySource,
    pub kind: EntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl LedgerEntry {
    /// Entry crediting points/XP.
    pub fn earned(participant_id: &str, points: u64, xp: u64, source: EntrySource, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            participant_id: participant_id.to_string(),
            timestamp: at,
            points_delta: points as i64,
            xp_delta: xp as i64,
            source,
            kind: EntryKind::Earned,
            idempotency_key: None,
        }
    }

    /// Entry debiting points. XP is never spent.
    pub fn redeemed(participant_id: &str, points: u64, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            participant_id: participant_id.to_string(),
            timestamp: at,
            points_delta: -(points as i64),
            xp_delta: 0,
            source: EntrySource::Redemption,
            kind: EntryKind::Redeemed,
            idempotency_key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn is_earned(&self) -> bool {
        self.kind == EntryKind::Earned
    }

    /// Points this entry issued (0 for debits)
    pub fn issued_points(&self) -> u64 {
        if self.is_earned() {
            self.points_delta.max(0) as u64
        } else {
            0
        }
    }
}

/// Points and XP as folded from the ledger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub points: u64,
    pub xp: u64,
}

/// Fold entries into a balance.
pub fn fold_balance<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Balance {
    let (points, xp) = entries
        .into_iter()
        .fold((0i64, 0i64), |(p, x), e| (p + e.points_delta, x + e.xp_delta));
    Balance {
        points: points.max(0) as u64,
        xp: xp.max(0) as u64,
    }
}

/// A draw from a reward table, persisted before any claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawRecord {
    pub outcome_id: Uuid,
    pub participant_id: String,
    pub mechanism: RewardMechanism,
    pub drawn_at: DateTime<Utc>,
    pub segment: Segment,
}

/// Claim of a draw; at most one per outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRecord {
    pub outcome_id: Uuid,
    pub idempotency_key: String,
    pub claimed_at: DateTime<Utc>,
    pub ledger_entry_id: Uuid,
    pub new_points: u64,
    pub new_xp: u64,
}

/// Everything recorded for one participant
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantBook {
    pub participant_id: String,
    pub entries: Vec<LedgerEntry>,
    pub draws: Vec<DrawRecord>,
    pub claims: Vec<ClaimRecord>,
}

impl ParticipantBook {
    pub fn new(participant_id: &str) -> Self {
        Self {
            participant_id: participant_id.to_string(),
            ..Default::default()
        }
    }

    pub fn balance(&self) -> Balance {
        fold_balance(&self.entries)
    }

    /// Row count; grows by one for every appended row of any kind
    pub fn version(&self) -> u64 {
        (self.entries.len() + self.draws.len() + self.claims.len()) as u64
    }

    pub fn entry_by_key(&self, key: &str) -> Option<&LedgerEntry> {
        self.entries
            .iter()
            .find(|e| e.idempotency_key.as_deref() == Some(key))
    }

    pub fn draw(&self, outcome_id: &Uuid) -> Option<&DrawRecord> {
        self.draws.iter().find(|d| d.outcome_id == *outcome_id)
    }

    pub fn claim_for(&self, outcome_id: &Uuid) -> Option<&ClaimRecord> {
        self.claims.iter().find(|c| c.outcome_id == *outcome_id)
    }

    pub fn claim_by_key(&self, key: &str) -> Option<&ClaimRecord> {
        self.claims.iter().find(|c| c.idempotency_key == key)
    }

    /// Draws with no claim yet
    pub fn unclaimed_draws(&self) -> impl Iterator<Item = &DrawRecord> {
        self.draws
            .iter()
            .filter(move |d| self.claim_for(&d.outcome_id).is_none())
    }
}
