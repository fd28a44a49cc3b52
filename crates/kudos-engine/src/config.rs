//! Engine configuration.
//!
//! Config file: TOML, usually `kudos.toml`. Everything is validated once by
//! [`EngineConfig::build`]; the resulting [`EngineSettings`] hold only
//! validated catalogs and tables, so bad targets or probability tables fail
//! at startup and never mid-request.

use crate::budget::IssuanceCaps;
use crate::error::{EngineError, Result};
use crate::metric::{Direction, MetricCatalog, MetricDefinition};
use crate::progression::ProgressionPolicy;
use crate::reward::{
    default_scratch_segments, default_spin_segments, RewardMechanism, RewardProgram, SegmentTable,
    UnlockGate, WeightedSegment,
};
use crate::streak::StreakBonusPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "KUDOS_CONFIG";

/// Default config file name
pub const DEFAULT_CONFIG_FILE: &str = "kudos.toml";

/// Gates and segments of one reward mechanism
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardTableConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub gates: Vec<UnlockGate>,
    pub segments: Vec<WeightedSegment>,
}

fn default_true() -> bool {
    true
}

/// Reward mechanisms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardsConfig {
    pub spin: RewardTableConfig,
    pub scratch: RewardTableConfig,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            spin: RewardTableConfig {
                enabled: true,
                gates: vec![UnlockGate::PointsThreshold { threshold: 500 }],
                segments: default_spin_segments(),
            },
            scratch: RewardTableConfig {
                enabled: true,
                gates: vec![
                    UnlockGate::PointsThreshold { threshold: 1_000 },
                    UnlockGate::ChallengeCompletion {
                        challenges: vec!["daily_quality".to_string()],
                    },
                ],
                segments: default_scratch_segments(),
            },
        }
    }
}

/// Main engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub metrics: Vec<MetricDefinition>,
    pub progression: ProgressionPolicy,
    /// Per-participant issuance caps
    pub caps: IssuanceCaps,
    /// Caps shared by a whole pool; off when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_caps: Option<IssuanceCaps>,
    pub rewards: RewardsConfig,
    pub streak: StreakBonusPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            metrics: default_metrics(),
            progression: ProgressionPolicy::default(),
            caps: IssuanceCaps::default(),
            pool_caps: None,
            rewards: RewardsConfig::default(),
            streak: StreakBonusPolicy::default(),
        }
    }
}

/// Standard contact-center KPI set
pub fn default_metrics() -> Vec<MetricDefinition> {
    vec![
        MetricDefinition::new("aht", "Average Handle Time", 25.0, 300.0, Direction::LowerBetter),
        MetricDefinition::new("quality", "Quality Score", 30.0, 90.0, Direction::HigherBetter),
        MetricDefinition::new("revenue", "Revenue", 25.0, 1_000.0, Direction::HigherBetter).with_cap(150.0),
        MetricDefinition::new("nps", "Net Promoter Score", 20.0, 50.0, Direction::HigherBetter),
    ]
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), metrics = config.metrics.len(), "config loaded");
        Ok(config)
    }

    /// Load from `path` if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            info!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Run every fail-fast check without keeping the result
    pub fn validate(&self) -> Result<()> {
        self.build().map(|_| ())
    }

    /// Validate everything and produce runtime settings.
    pub fn build(&self) -> Result<EngineSettings> {
        let catalog = MetricCatalog::new(self.metrics.clone())?;
        self.progression.validate()?;
        self.caps.validate()?;
        if let Some(pool) = &self.pool_caps {
            pool.validate()?;
        }

        let mut programs = BTreeMap::new();
        for (mechanism, table) in [
            (RewardMechanism::Spin, &self.rewards.spin),
            (RewardMechanism::Scratch, &self.rewards.scratch),
        ] {
            // Disabled tables are still validated so a typo cannot hide
            let segments = SegmentTable::new(table.segments.clone())?;
            if table.enabled {
                programs.insert(
                    mechanism,
                    RewardProgram {
                        mechanism,
                        gates: table.gates.clone(),
                        table: segments,
                    },
                );
            }
        }

        for m in &self.streak.milestones {
            if m.days == 0 {
                return Err(EngineError::Config("streak milestone days must be positive".into()));
            }
        }

        Ok(EngineSettings {
            catalog,
            progression: self.progression,
            caps: self.caps,
            pool_caps: self.pool_caps,
            programs,
            streak: self.streak.clone(),
        })
    }
}

/// Validated runtime settings
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub catalog: MetricCatalog,
    pub progression: ProgressionPolicy,
    pub caps: IssuanceCaps,
    pub pool_caps: Option<IssuanceCaps>,
    pub programs: BTreeMap<RewardMechanism, RewardProgram>,
    pub streak: StreakBonusPolicy,
}

impl EngineSettings {
    pub fn program(&self, mechanism: RewardMechanism) -> Option<&RewardProgram> {
        self.programs.get(&mechanism)
    }
}
