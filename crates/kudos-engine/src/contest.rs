//! Contest metadata used for eligibility filtering.
//!
//! Contests are authored elsewhere; the engine only reads the window, the
//! eligible teams and the metric set to narrow populations and records.

use crate::metric::PerformanceRecord;
use crate::roster::{Participant, PopulationScope, Roster};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contest {
    pub id: String,
    pub name: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// Empty means every team
    #[serde(default)]
    pub eligible_teams: Vec<String>,
    /// Empty means every metric
    #[serde(default)]
    pub metric_keys: Vec<String>,
}

impl Contest {
    pub fn is_active(&self, at: DateTime<Utc>) -> bool {
        self.starts_at <= at && at < self.ends_at
    }

    pub fn is_eligible(&self, participant: &Participant) -> bool {
        self.eligible_teams.is_empty() || self.eligible_teams.iter().any(|t| *t == participant.team)
    }

    /// Explicit scope of eligible participants
    pub fn scope(&self, roster: &Roster) -> PopulationScope {
        PopulationScope::Explicit(
            roster
                .iter()
                .filter(|p| self.is_eligible(p))
                .map(|p| p.id.clone())
                .collect(),
        )
    }

    /// Records inside the contest window and metric set
    pub fn filter_records(&self, records: &[PerformanceRecord]) -> Vec<PerformanceRecord> {
        records
            .iter()
            .filter(|r| r.observed_at >= self.starts_at && r.observed_at < self.ends_at)
            .filter(|r| self.metric_keys.is_empty() || self.metric_keys.contains(&r.metric_key))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn contest(now: DateTime<Utc>) -> Contest {
        Contest {
            id: "c1".into(),
            name: "October Sprint".into(),
            starts_at: now - Duration::days(7),
            ends_at: now + Duration::days(7),
            eligible_teams: vec!["billing".into()],
            metric_keys: vec!["aht".into()],
        }
    }

    #[test]
    fn test_window_and_metric_filter() {
        let now = Utc::now();
        let c = contest(now);
        assert!(c.is_active(now));
        let records = vec![
            PerformanceRecord::new("a1", "aht", 20.0, now),
            PerformanceRecord::new("a1", "quality", 90.0, now),
            PerformanceRecord::new("a1", "aht", 25.0, now - Duration::days(30)),
        ];
        let kept = c.filter_records(&records);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].value, 20.0);
    }

    #[test]
    fn test_eligibility_scope() {
        let roster = Roster::from_participants(vec![
            Participant::new("a1", "Alex", "billing", "care"),
            Participant::new("a2", "Riley", "tech", "care"),
        ]);
        let scope = contest(Utc::now()).scope(&roster);
        assert_eq!(scope, PopulationScope::Explicit(vec!["a1".into()]));
    }
}
