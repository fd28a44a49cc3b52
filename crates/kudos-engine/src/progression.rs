//! Progression engine: points, XP, level and level progress.
//!
//! Level curve: `level = floor(sqrt(xp / 100)) + 1`, next level at
//! `level^2 * 100` XP, progress bar at `xp mod 100`. Presentation layers
//! depend on these numbers exactly.

use crate::error::{EngineError, Result};
use crate::ledger::{fold_balance, Balance, LedgerEntry};
use serde::{Deserialize, Serialize};

/// Conversion rules from composite score to points/XP
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressionPolicy {
    /// Points granted per composite score point
    pub points_per_score_point: f64,
    /// XP = points / xp_divisor
    pub xp_divisor: u64,
    /// Upper bound on XP from a single conversion event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xp_cap_per_event: Option<u64>,
}

impl Default for ProgressionPolicy {
    fn default() -> Self {
        Self {
            points_per_score_point: 10.0,
            xp_divisor: 10,
            xp_cap_per_event: Some(50),
        }
    }
}

impl ProgressionPolicy {
    pub fn validate(&self) -> Result<()> {
        if !self.points_per_score_point.is_finite() || self.points_per_score_point < 0.0 {
            return Err(EngineError::Config(
                "progression.points_per_score_point must be a non-negative number".into(),
            ));
        }
        if self.xp_divisor == 0 {
            return Err(EngineError::Config("progression.xp_divisor must be positive".into()));
        }
        Ok(())
    }

    /// Points and XP earned for one composite score.
    pub fn convert(&self, overall_score: f64) -> (u64, u64) {
        if !overall_score.is_finite() || overall_score <= 0.0 {
            return (0, 0);
        }
        let points = (overall_score * self.points_per_score_point).floor() as u64;
        let xp = points / self.xp_divisor.max(1);
        let xp = match self.xp_cap_per_event {
            Some(cap) => xp.min(cap),
            None => xp,
        };
        (points, xp)
    }
}

/// Current progression of one participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionState {
    pub participant_id: String,
    pub points: u64,
    pub xp: u64,
    pub level: u32,
    /// Percent through the current level band (0-100)
    pub level_progress: f64,
    pub next_level_xp: u64,
}

impl ProgressionState {
    pub fn new(participant_id: &str) -> Self {
        Self::from_balance(participant_id, Balance::default())
    }

    pub fn from_balance(participant_id: &str, balance: Balance) -> Self {
        let level = level_for_xp(balance.xp);
        Self {
            participant_id: participant_id.to_string(),
            points: balance.points,
            xp: balance.xp,
            level,
            level_progress: level_progress(balance.xp),
            next_level_xp: next_level_xp(level),
        }
    }

    /// Derive state from the full ledger history.
    pub fn from_ledger<'a>(participant_id: &str, entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Self {
        Self::from_balance(participant_id, fold_balance(entries))
    }

    pub fn balance(&self) -> Balance {
        Balance {
            points: self.points,
            xp: self.xp,
        }
    }

    pub fn title(&self) -> &'static str {
        level_title(self.level)
    }
}

/// Level reached at `xp`
pub fn level_for_xp(xp: u64) -> u32 {
    (xp as f64 / 100.0).sqrt().floor() as u32 + 1
}

/// XP at which `level` ends
pub fn next_level_xp(level: u32) -> u64 {
    (level as u64).pow(2) * 100
}

/// Progress bar value for `xp`
pub fn level_progress(xp: u64) -> f64 {
    (xp % 100) as f64 / 100.0 * 100.0
}

/// Apply a composite score conversion.
pub fn apply_score_to_progression(
    state: &ProgressionState,
    overall_score: f64,
    policy: &ProgressionPolicy,
) -> ProgressionState {
    let (points, xp) = policy.convert(overall_score);
    ProgressionState::from_balance(
        &state.participant_id,
        Balance {
            points: state.points.saturating_add(points),
            xp: state.xp.saturating_add(xp),
        },
    )
}

/// Apply one ledger entry. Debits beyond the balance are rejected.
pub fn apply_ledger_delta(state: &ProgressionState, entry: &LedgerEntry) -> Result<ProgressionState> {
    let points = state.points as i64 + entry.points_delta;
    if points < 0 {
        return Err(EngineError::InsufficientBalance {
            available: state.points,
            requested: entry.points_delta.unsigned_abs(),
        });
    }
    let xp = state.xp as i64 + entry.xp_delta;
    if xp < 0 {
        return Err(EngineError::InsufficientBalance {
            available: state.xp,
            requested: entry.xp_delta.unsigned_abs(),
        });
    }
    Ok(ProgressionState::from_balance(
        &state.participant_id,
        Balance {
            points: points as u64,
            xp: xp as u64,
        },
    ))
}

/// Check a spend against the current balance.
pub fn validate_spend(state: &ProgressionState, amount: u64) -> Result<()> {
    if amount > state.points {
        return Err(EngineError::InsufficientBalance {
            available: state.points,
            requested: amount,
        });
    }
    Ok(())
}

/// Title shown for a level
pub fn level_title(level: u32) -> &'static str {
    match level {
        0..=1 => "Rookie Agent",
        2 => "Floor Regular",
        3 => "Queue Tamer",
        4 => "Call Closer",
        5..=6 => "Customer Champion",
        7..=9 => "Service Specialist",
        10..=14 => "Floor Veteran",
        15..=19 => "Experience Architect",
        _ => "Contact Center Legend",
    }
}
