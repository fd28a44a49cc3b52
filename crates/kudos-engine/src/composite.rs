//! Composite scorer: weighted aggregation of metric subscores.

use crate::metric::{latest_records, subscore, MetricCatalog, MetricStatus, PerformanceRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-metric breakdown inside a composite score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricResult {
    /// Latest observed raw value, `None` when the feed had nothing
    pub value: Option<f64>,
    pub target: f64,
    /// Normalized subscore, `None` for no-data metrics
    pub raw_score: Option<f64>,
    pub weightage: f64,
    pub weighted_score: f64,
    pub status: MetricStatus,
}

/// Overall score for one participant at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeScore {
    pub participant_id: String,
    pub as_of: DateTime<Utc>,
    pub per_metric: BTreeMap<String, MetricResult>,
    pub overall_score: f64,
    pub total_weightage_used: f64,
}

impl CompositeScore {
    /// Keys of active metrics that had no data
    pub fn missing_metrics(&self) -> Vec<&str> {
        self.per_metric
            .iter()
            .filter(|(_, r)| r.status == MetricStatus::NoData)
            .map(|(k, _)| k.as_str())
            .collect()
    }

    pub fn status(&self) -> MetricStatus {
        if self.total_weightage_used > 0.0 {
            MetricStatus::from_subscore(self.overall_score)
        } else {
            MetricStatus::NoData
        }
    }
}

/// Compute the composite score for `participant_id` from its latest records.
///
/// Only active definitions (enabled, weightage > 0) participate. Missing
/// metrics are reported as no-data and excluded from the denominator, so the
/// result is normalized by the weightage actually used. Definitions are
/// walked in key order, making the float summation independent of how the
/// caller ordered them.
pub fn score(
    participant_id: &str,
    catalog: &MetricCatalog,
    records: &[PerformanceRecord],
    as_of: DateTime<Utc>,
) -> CompositeScore {
    let latest = latest_records(participant_id, records, as_of);

    let mut per_metric = BTreeMap::new();
    let mut total_weighted_score = 0.0;
    let mut total_weightage_used = 0.0;

    for def in catalog.active() {
        let observed = latest
            .get(def.key.as_str())
            .map(|r| r.value)
            .filter(|v| v.is_finite());

        let result = match observed {
            Some(value) => {
                let raw = subscore(value, def);
                let weighted = raw * def.weightage / 100.0;
                total_weighted_score += weighted;
                total_weightage_used += def.weightage;
                MetricResult {
                    value: Some(value),
                    target: def.target,
                    raw_score: Some(raw),
                    weightage: def.weightage,
                    weighted_score: weighted,
                    status: MetricStatus::from_subscore(raw),
                }
            }
            None => MetricResult {
                value: None,
                target: def.target,
                raw_score: None,
                weightage: def.weightage,
                weighted_score: 0.0,
                status: MetricStatus::NoData,
            },
        };
        per_metric.insert(def.key.clone(), result);
    }

    let overall_score = if total_weightage_used > 0.0 {
        total_weighted_score / total_weightage_used * 100.0
    } else {
        0.0
    };

    CompositeScore {
        participant_id: participant_id.to_string(),
        as_of,
        per_metric,
        overall_score,
        total_weightage_used,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{Direction, MetricDefinition};
    use approx::assert_relative_eq;

    fn catalog() -> MetricCatalog {
        MetricCatalog::new(vec![
            MetricDefinition::new("aht", "AHT", 50.0, 20.0, Direction::LowerBetter),
            MetricDefinition::new("quality", "Quality", 50.0, 90.0, Direction::HigherBetter),
            MetricDefinition::new("nps", "NPS", 0.0, 50.0, Direction::HigherBetter),
        ])
        .unwrap()
    }

    #[test]
    fn test_weighted_average() {
        let now = Utc::now();
        let records = vec![
            PerformanceRecord::new("a1", "aht", 26.0, now),
            PerformanceRecord::new("a1", "quality", 90.0, now),
        ];
        let s = score("a1", &catalog(), &records, now);
        // (85 * 0.5 + 100 * 0.5) / 100 * 100
        assert_relative_eq!(s.overall_score, 92.5);
        assert_eq!(s.total_weightage_used, 100.0);
        assert!(!s.per_metric.contains_key("nps"));
    }

    #[test]
    fn test_missing_metric_is_no_data() {
        let now = Utc::now();
        let records = vec![PerformanceRecord::new("a1", "aht", 18.0, now)];
        let s = score("a1", &catalog(), &records, now);
        assert_eq!(s.per_metric["quality"].status, MetricStatus::NoData);
        assert_eq!(s.missing_metrics(), vec!["quality"]);
        // Normalized by weightage used, not by the full 100
        assert_relative_eq!(s.overall_score, 100.0);
    }

    #[test]
    fn test_no_records_scores_zero() {
        let s = score("ghost", &catalog(), &[], Utc::now());
        assert_eq!(s.overall_score, 0.0);
        assert_eq!(s.status(), MetricStatus::NoData);
    }
}
