//! Streak tracker: consecutive qualifying days from the ledger.
//!
//! Streaks are recomputed from ledger history on every query; no counter is
//! stored next to the ledger.

use crate::budget::ResetClock;
use crate::ledger::{EntrySource, LedgerEntry};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Streak statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakState {
    pub participant_id: String,
    /// Consecutive days ending at the anchor day
    pub current_streak: u32,
    /// Best streak ever
    pub longest_streak: u32,
    pub last_qualifying_date: Option<NaiveDate>,
    /// Unique days with qualifying activity
    pub active_days: u32,
}

/// Unique business days with earned activity, ascending. Zero-value
/// credits (an empty reward claim) and streak bonuses do not qualify.
pub fn qualifying_days<'a>(
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
    clock: ResetClock,
) -> Vec<NaiveDate> {
    let mut days: Vec<NaiveDate> = entries
        .into_iter()
        .filter(|e| e.is_earned() && e.source != EntrySource::StreakBonus)
        .filter(|e| e.points_delta > 0 || e.xp_delta > 0)
        .map(|e| clock.business_day(e.timestamp))
        .collect();
    days.sort();
    days.dedup();
    days
}

/// Walk backward from the most recent day while each day is the anchor or
/// the day right before it.
fn current_run(days: &[NaiveDate]) -> u32 {
    let mut iter = days.iter().rev();
    let Some(mut anchor) = iter.next().copied() else {
        return 0;
    };
    let mut count = 1u32;
    for day in iter {
        if *day == anchor - Duration::days(1) {
            count += 1;
            anchor = *day;
        } else {
            break;
        }
    }
    count
}

fn longest_run(days: &[NaiveDate]) -> u32 {
    if days.is_empty() {
        return 0;
    }
    let mut best = 1u32;
    let mut streak = 1u32;
    for window in days.windows(2) {
        if window[1] == window[0] + Duration::days(1) {
            streak += 1;
            best = best.max(streak);
        } else {
            streak = 1;
        }
    }
    best
}

fn from_days(participant_id: &str, days: &[NaiveDate], current_streak: u32) -> StreakState {
    StreakState {
        participant_id: participant_id.to_string(),
        current_streak,
        longest_streak: longest_run(days),
        last_qualifying_date: days.last().copied(),
        active_days: days.len() as u32,
    }
}

/// Streak anchored at the most recent qualifying day.
pub fn compute_streak<'a>(
    participant_id: &str,
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
    clock: ResetClock,
) -> StreakState {
    let days = qualifying_days(entries, clock);
    from_days(participant_id, &days, current_run(&days))
}

/// Streak as seen on `as_of`: broken (0) once the latest qualifying day is
/// older than yesterday. Activity after `as_of` is ignored.
pub fn compute_streak_as_of<'a>(
    participant_id: &str,
    entries: impl IntoIterator<Item = &'a LedgerEntry>,
    clock: ResetClock,
    as_of: NaiveDate,
) -> StreakState {
    let days: Vec<NaiveDate> = qualifying_days(entries, clock)
        .into_iter()
        .filter(|d| *d <= as_of)
        .collect();
    let current = match days.last() {
        Some(last) if *last >= as_of - Duration::days(1) => current_run(&days),
        _ => 0,
    };
    from_days(participant_id, &days, current)
}

/// Bonus granted when a streak reaches a milestone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakMilestone {
    pub days: u32,
    pub points: u64,
    pub xp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreakBonusPolicy {
    pub milestones: Vec<StreakMilestone>,
}

impl Default for StreakBonusPolicy {
    fn default() -> Self {
        Self {
            milestones: vec![
                StreakMilestone { days: 3, points: 30, xp: 3 },
                StreakMilestone { days: 7, points: 100, xp: 10 },
                StreakMilestone { days: 30, points: 500, xp: 50 },
            ],
        }
    }
}

impl StreakBonusPolicy {
    /// Milestone hit exactly by `current_streak`
    pub fn milestone_for(&self, current_streak: u32) -> Option<&StreakMilestone> {
        self.milestones.iter().find(|m| m.days == current_streak)
    }

    /// Idempotency key for a milestone reached on `day`
    pub fn award_key(participant_id: &str, milestone: &StreakMilestone, day: NaiveDate) -> String {
        format!("streak:{}:{}:{}", participant_id, milestone.days, day)
    }
}
