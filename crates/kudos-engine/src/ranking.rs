//! Ranking engine: leaderboard positions and percentiles.
//!
//! A leaderboard is rebuilt from a population snapshot on every query. Top-N
//! views are prefixes of the full ranking, never a separate computation.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::debug;

/// Value the leaderboard is ordered by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Xp,
    Points,
}

impl std::fmt::Display for SortKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Xp => write!(f, "xp"),
            Self::Points => write!(f, "points"),
        }
    }
}

impl std::str::FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "xp" => Ok(Self::Xp),
            "points" => Ok(Self::Points),
            other => Err(format!("unknown sort key '{}'", other)),
        }
    }
}

/// Ranking input for one participant, copied out of the ledger snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantScore {
    pub participant_id: String,
    pub points: u64,
    pub xp: u64,
}

impl ParticipantScore {
    pub fn new(participant_id: &str, points: u64, xp: u64) -> Self {
        Self {
            participant_id: participant_id.to_string(),
            points,
            xp,
        }
    }

    pub fn sort_value(&self, key: SortKey) -> u64 {
        match key {
            SortKey::Xp => self.xp,
            SortKey::Points => self.points,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub participant_id: String,
    pub sort_value: u64,
    pub percentile: u32,
}

/// Order: sort value descending, then participant id ascending.
fn compare(a: &ParticipantScore, b: &ParticipantScore, key: SortKey) -> Ordering {
    b.sort_value(key)
        .cmp(&a.sort_value(key))
        .then_with(|| a.participant_id.cmp(&b.participant_id))
}

/// `round((N - rank + 1) / N * 100)`
pub fn percentile(rank: u32, population: usize) -> u32 {
    if population == 0 {
        return 0;
    }
    let n = population as f64;
    ((n - rank as f64 + 1.0) / n * 100.0).round() as u32
}

/// Rank a population. Duplicate participant ids keep their first occurrence.
pub fn rank(population: &[ParticipantScore], key: SortKey) -> Vec<LeaderboardEntry> {
    let mut seen = HashSet::new();
    let mut sorted: Vec<&ParticipantScore> = population
        .iter()
        .filter(|p| seen.insert(p.participant_id.as_str()))
        .collect();
    if sorted.len() != population.len() {
        debug!(
            dropped = population.len() - sorted.len(),
            "duplicate participants ignored in ranking"
        );
    }
    sorted.sort_by(|a, b| compare(a, b, key));

    let n = sorted.len();
    sorted
        .into_iter()
        .enumerate()
        .map(|(i, p)| {
            let rank = (i + 1) as u32;
            LeaderboardEntry {
                rank,
                participant_id: p.participant_id.clone(),
                sort_value: p.sort_value(key),
                percentile: percentile(rank, n),
            }
        })
        .collect()
}

/// First `limit` entries of the full ranking
pub fn top(population: &[ParticipantScore], key: SortKey, limit: usize) -> Vec<LeaderboardEntry> {
    let mut ranked = rank(population, key);
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn population() -> Vec<ParticipantScore> {
        vec![
            ParticipantScore::new("carol", 300, 30),
            ParticipantScore::new("alice", 500, 10),
            ParticipantScore::new("bob", 300, 50),
            ParticipantScore::new("dave", 100, 50),
        ]
    }

    #[test]
    fn test_rank_by_points_with_tie_break() {
        let ranked = rank(&population(), SortKey::Points);
        let ids: Vec<_> = ranked.iter().map(|e| e.participant_id.as_str()).collect();
        assert_eq!(ids, vec!["alice", "bob", "carol", "dave"]);
        assert_eq!(ranked[0].percentile, 100);
        assert_eq!(ranked[3].percentile, 25);
    }

    #[test]
    fn test_rank_by_xp() {
        let ranked = rank(&population(), SortKey::Xp);
        let ids: Vec<_> = ranked.iter().map(|e| e.participant_id.as_str()).collect();
        assert_eq!(ids, vec!["bob", "dave", "carol", "alice"]);
    }

    #[test]
    fn test_top_is_prefix() {
        let full = rank(&population(), SortKey::Points);
        let top3 = top(&population(), SortKey::Points, 3);
        assert_eq!(&full[..3], &top3[..]);
    }

    #[test]
    fn test_empty_population() {
        assert!(rank(&[], SortKey::Xp).is_empty());
        assert_eq!(percentile(1, 0), 0);
    }

    #[test]
    fn test_sort_key_parse() {
        assert_eq!("XP".parse::<SortKey>().unwrap(), SortKey::Xp);
        assert!("level".parse::<SortKey>().is_err());
    }
}
