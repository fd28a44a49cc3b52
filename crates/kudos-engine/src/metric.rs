//! Metric normalizer: raw KPI values to 0-100 subscores.
//!
//! Each KPI is described by a [`MetricDefinition`]. Definitions are validated
//! once when the [`MetricCatalog`] is built so scoring never has to deal with
//! a zero target mid-computation.

use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Penalty ceiling for lower-is-better metrics that miss target.
const LOWER_BETTER_MAX_PENALTY: f64 = 50.0;

/// Whether a lower or higher raw value is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    LowerBetter,
    HigherBetter,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LowerBetter => write!(f, "lower_better"),
            Self::HigherBetter => write!(f, "higher_better"),
        }
    }
}

fn default_cap() -> f64 {
    100.0
}

fn default_enabled() -> bool {
    true
}

/// A single KPI definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub key: String,
    pub display_name: String,
    /// Percentage contribution to the composite (0-100)
    pub weightage: f64,
    pub target: f64,
    pub direction: Direction,
    /// Subscore ceiling for higher-is-better metrics. 100 caps at target,
    /// anything above rewards overshoot (revenue uses 150).
    #[serde(default = "default_cap")]
    pub cap: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl MetricDefinition {
    pub fn new(key: &str, display_name: &str, weightage: f64, target: f64, direction: Direction) -> Self {
        Self {
            key: key.to_string(),
            display_name: display_name.to_string(),
            weightage,
            target,
            direction,
            cap: default_cap(),
            enabled: true,
        }
    }

    pub fn with_cap(mut self, cap: f64) -> Self {
        self.cap = cap;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Enabled with a positive weightage.
    pub fn is_active(&self) -> bool {
        self.enabled && self.weightage > 0.0
    }

    pub fn validate(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(EngineError::metric(&self.key, "empty metric key"));
        }
        if !self.target.is_finite() || self.target == 0.0 {
            return Err(EngineError::metric(&self.key, "target must be finite and non-zero"));
        }
        if self.target < 0.0 {
            return Err(EngineError::metric(&self.key, "target must be positive"));
        }
        if !self.weightage.is_finite() || !(0.0..=100.0).contains(&self.weightage) {
            return Err(EngineError::metric(&self.key, "weightage must be within 0..=100"));
        }
        if !self.cap.is_finite() || self.cap <= 0.0 {
            return Err(EngineError::metric(&self.key, "cap must be positive"));
        }
        Ok(())
    }
}

/// Normalize a raw metric value against its definition.
///
/// Fails with `InvalidMetricConfig` when the definition itself is invalid
/// (most importantly a zero target).
pub fn normalize(value: f64, definition: &MetricDefinition) -> Result<f64> {
    definition.validate()?;
    Ok(subscore(value, definition))
}

/// Subscore for an already validated definition.
pub(crate) fn subscore(value: f64, definition: &MetricDefinition) -> f64 {
    let target = definition.target;
    match definition.direction {
        Direction::LowerBetter => {
            if value <= target {
                100.0
            } else {
                let penalty = ((value - target) / target * 50.0).min(LOWER_BETTER_MAX_PENALTY);
                (100.0 - penalty).max(0.0)
            }
        }
        Direction::HigherBetter => (value / target * 100.0).min(definition.cap).max(0.0),
    }
}

/// Health band of a subscore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetricStatus {
    Excellent,
    OnTrack,
    AtRisk,
    Critical,
    NoData,
}

impl MetricStatus {
    pub fn from_subscore(subscore: f64) -> Self {
        if subscore >= 95.0 {
            Self::Excellent
        } else if subscore >= 80.0 {
            Self::OnTrack
        } else if subscore >= 60.0 {
            Self::AtRisk
        } else {
            Self::Critical
        }
    }
}

impl std::fmt::Display for MetricStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Excellent => write!(f, "excellent"),
            Self::OnTrack => write!(f, "on-track"),
            Self::AtRisk => write!(f, "at-risk"),
            Self::Critical => write!(f, "critical"),
            Self::NoData => write!(f, "no-data"),
        }
    }
}

/// One observation handed over by the metric feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceRecord {
    pub participant_id: String,
    pub metric_key: String,
    pub value: f64,
    pub observed_at: DateTime<Utc>,
}

impl PerformanceRecord {
    pub fn new(participant_id: &str, metric_key: &str, value: f64, observed_at: DateTime<Utc>) -> Self {
        Self {
            participant_id: participant_id.to_string(),
            metric_key: metric_key.to_string(),
            value,
            observed_at,
        }
    }
}

/// Latest record per metric key for one participant, ignoring anything
/// observed after `as_of`. Equal timestamps resolve to the later input row.
pub fn latest_records<'a>(
    participant_id: &str,
    records: &'a [PerformanceRecord],
    as_of: DateTime<Utc>,
) -> BTreeMap<&'a str, &'a PerformanceRecord> {
    let mut latest: BTreeMap<&str, &PerformanceRecord> = BTreeMap::new();
    for record in records
        .iter()
        .filter(|r| r.participant_id == participant_id && r.observed_at <= as_of)
    {
        match latest.get(record.metric_key.as_str()) {
            Some(existing) if existing.observed_at > record.observed_at => {}
            _ => {
                latest.insert(record.metric_key.as_str(), record);
            }
        }
    }
    latest
}

/// Validated, key-ordered set of metric definitions.
#[derive(Debug, Clone, Default)]
pub struct MetricCatalog {
    definitions: BTreeMap<String, MetricDefinition>,
}

impl MetricCatalog {
    pub fn new(definitions: Vec<MetricDefinition>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for def in definitions {
            def.validate()?;
            if map.contains_key(&def.key) {
                return Err(EngineError::metric(&def.key, "duplicate metric key"));
            }
            map.insert(def.key.clone(), def);
        }
        Ok(Self { definitions: map })
    }

    pub fn get(&self, key: &str) -> Option<&MetricDefinition> {
        self.definitions.get(key)
    }

    /// Definitions in key order.
    pub fn iter(&self) -> impl Iterator<Item = &MetricDefinition> {
        self.definitions.values()
    }

    pub fn active(&self) -> impl Iterator<Item = &MetricDefinition> {
        self.iter().filter(|d| d.is_active())
    }

    pub fn total_active_weightage(&self) -> f64 {
        self.active().map(|d| d.weightage).sum()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Restrict to a subset of keys (contest metric sets).
    pub fn restricted_to(&self, keys: &[String]) -> Self {
        Self {
            definitions: self
                .definitions
                .iter()
                .filter(|(k, _)| keys.iter().any(|key| key == *k))
                .map(|(k, d)| (k.clone(), d.clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn aht() -> MetricDefinition {
        MetricDefinition::new("aht", "Average Handle Time", 30.0, 20.0, Direction::LowerBetter)
    }

    #[test]
    fn test_lower_better_meets_target() {
        assert_eq!(normalize(18.0, &aht()).unwrap(), 100.0);
        assert_eq!(normalize(20.0, &aht()).unwrap(), 100.0);
    }

    #[test]
    fn test_lower_better_decay() {
        assert_relative_eq!(normalize(26.0, &aht()).unwrap(), 85.0);
    }

    #[test]
    fn test_lower_better_penalty_floor() {
        assert_eq!(normalize(1_000.0, &aht()).unwrap(), 50.0);
    }

    #[test]
    fn test_higher_better_capped() {
        let quality = MetricDefinition::new("quality", "Quality", 40.0, 90.0, Direction::HigherBetter);
        assert_relative_eq!(normalize(45.0, &quality).unwrap(), 50.0);
        assert_eq!(normalize(200.0, &quality).unwrap(), 100.0);
    }

    #[test]
    fn test_higher_better_overshoot() {
        let revenue = MetricDefinition::new("revenue", "Revenue", 30.0, 1000.0, Direction::HigherBetter)
            .with_cap(150.0);
        assert_relative_eq!(normalize(1200.0, &revenue).unwrap(), 120.0);
        assert_eq!(normalize(5000.0, &revenue).unwrap(), 150.0);
    }

    #[test]
    fn test_zero_target_fails_fast() {
        let bad = MetricDefinition::new("nps", "NPS", 10.0, 0.0, Direction::HigherBetter);
        let err = normalize(10.0, &bad).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidMetricConfig);
    }

    #[test]
    fn test_status_bands() {
        assert_eq!(MetricStatus::from_subscore(95.0), MetricStatus::Excellent);
        assert_eq!(MetricStatus::from_subscore(80.0), MetricStatus::OnTrack);
        assert_eq!(MetricStatus::from_subscore(60.0), MetricStatus::AtRisk);
        assert_eq!(MetricStatus::from_subscore(59.9), MetricStatus::Critical);
        assert_eq!(MetricStatus::NoData.to_string(), "no-data");
    }

    #[test]
    fn test_catalog_rejects_duplicates() {
        assert!(MetricCatalog::new(vec![aht(), aht()]).is_err());
    }

    #[test]
    fn test_latest_records_supersede() {
        let t0 = Utc::now() - chrono::Duration::hours(2);
        let t1 = t0 + chrono::Duration::hours(1);
        let records = vec![
            PerformanceRecord::new("a1", "aht", 30.0, t1),
            PerformanceRecord::new("a1", "aht", 10.0, t0),
            PerformanceRecord::new("a2", "aht", 5.0, t1),
        ];
        let latest = latest_records("a1", &records, Utc::now());
        assert_eq!(latest.len(), 1);
        assert_eq!(latest["aht"].value, 30.0);
    }
}
