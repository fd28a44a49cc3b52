//! Reward arbiter building blocks: unlock gates, weighted segment tables and
//! the draw.
//!
//! Lifecycle: `Locked -> Eligible -> Drawn -> Claimed`. Gates decide
//! eligibility, a draw picks exactly one segment with a single uniform
//! sample, and the claim (see `engine`) applies it to the ledger once.

use crate::error::{EngineError, Result};
use crate::ledger::{ClaimRecord, DrawRecord};
use chrono::{DateTime, Utc};
use rand::rngs::{OsRng, StdRng};
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Reward mechanisms sharing one table schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardMechanism {
    Spin,
    Scratch,
}

impl std::fmt::Display for RewardMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spin => write!(f, "spin"),
            Self::Scratch => write!(f, "scratch"),
        }
    }
}

impl std::str::FromStr for RewardMechanism {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "spin" => Ok(Self::Spin),
            "scratch" => Ok(Self::Scratch),
            other => Err(format!("unknown reward mechanism '{}'", other)),
        }
    }
}

/// Reward lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RewardState {
    Locked,
    Eligible,
    Drawn,
    Claimed,
}

// === Unlock gates ===

/// Predicate that must hold before a mechanism can be used
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnlockGate {
    PointsThreshold { threshold: u64 },
    ChallengeCompletion { challenges: Vec<String> },
}

/// Caller-supplied context for gate evaluation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateContext {
    /// Progress per challenge id, 0-100
    #[serde(default)]
    pub challenge_progress: BTreeMap<String, f64>,
}

impl GateContext {
    pub fn with_challenge(mut self, id: &str, progress: f64) -> Self {
        self.challenge_progress.insert(id.to_string(), progress);
        self
    }

    fn completed(&self, id: &str) -> bool {
        self.challenge_progress.get(id).is_some_and(|p| *p >= 100.0)
    }
}

/// Result of evaluating every gate of a mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateEvaluation {
    pub by_points: bool,
    pub by_challenges: bool,
    /// No gate configured at all
    pub ungated: bool,
}

impl GateEvaluation {
    pub fn is_eligible(&self) -> bool {
        self.ungated || self.by_points || self.by_challenges
    }

    pub fn state(&self) -> RewardState {
        if self.is_eligible() {
            RewardState::Eligible
        } else {
            RewardState::Locked
        }
    }
}

impl UnlockGate {
    pub fn is_open(&self, points: u64, ctx: &GateContext) -> bool {
        match self {
            Self::PointsThreshold { threshold } => points >= *threshold,
            // An empty challenge set never unlocks
            Self::ChallengeCompletion { challenges } => {
                !challenges.is_empty() && challenges.iter().all(|c| ctx.completed(c))
            }
        }
    }
}

/// Evaluate all gates. Points and challenge paths are both computed and
/// unioned; either alone unlocks.
pub fn evaluate_gates(gates: &[UnlockGate], points: u64, ctx: &GateContext) -> GateEvaluation {
    let mut eval = GateEvaluation {
        ungated: gates.is_empty(),
        ..Default::default()
    };
    for gate in gates {
        let open = gate.is_open(points, ctx);
        match gate {
            UnlockGate::PointsThreshold { .. } => eval.by_points |= open,
            UnlockGate::ChallengeCompletion { .. } => eval.by_challenges |= open,
        }
    }
    eval
}

// === Segment tables ===

/// What a participant wins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub label: String,
    pub points: u64,
    #[serde(default)]
    pub xp: u64,
}

/// Segment with its relative weight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedSegment {
    #[serde(flatten)]
    pub segment: Segment,
    pub weight: f64,
}

impl WeightedSegment {
    pub fn new(label: &str, points: u64, xp: u64, weight: f64) -> Self {
        Self {
            segment: Segment {
                label: label.to_string(),
                points,
                xp,
            },
            weight,
        }
    }
}

/// Validated weighted table. Weights are relative; they are normalized by
/// their total before use.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentTable {
    segments: Vec<WeightedSegment>,
    total_weight: f64,
}

impl SegmentTable {
    pub fn new(segments: Vec<WeightedSegment>) -> Result<Self> {
        if segments.is_empty() {
            return Err(EngineError::InvalidProbabilityTable("table has no segments".into()));
        }
        if let Some(bad) = segments.iter().find(|s| !s.weight.is_finite() || s.weight < 0.0) {
            return Err(EngineError::InvalidProbabilityTable(format!(
                "segment '{}' has invalid weight {}",
                bad.segment.label, bad.weight
            )));
        }
        let total_weight: f64 = segments.iter().map(|s| s.weight).sum();
        if total_weight <= 0.0 || !total_weight.is_finite() {
            return Err(EngineError::InvalidProbabilityTable("total weight is zero".into()));
        }
        Ok(Self {
            segments,
            total_weight,
        })
    }

    pub fn segments(&self) -> &[WeightedSegment] {
        &self.segments
    }

    /// Normalized probability per segment label
    pub fn probabilities(&self) -> Vec<(&str, f64)> {
        self.segments
            .iter()
            .map(|s| (s.segment.label.as_str(), s.weight / self.total_weight))
            .collect()
    }

    /// Cumulative-weight inversion of one uniform sample in [0, 1).
    pub fn select(&self, sample: f64) -> &Segment {
        let sample = if sample.is_finite() { sample.clamp(0.0, 1.0) } else { 0.0 };
        let target = sample * self.total_weight;
        let mut cumulative = 0.0;
        for s in &self.segments {
            cumulative += s.weight;
            if target < cumulative {
                return &s.segment;
            }
        }
        // sample == 1.0 or rounding at the top end
        self.segments
            .iter()
            .rev()
            .find(|s| s.weight > 0.0)
            .map(|s| &s.segment)
            .unwrap_or(&self.segments[self.segments.len() - 1].segment)
    }

    /// Draw one segment with a single sample from `rng`.
    pub fn draw(&self, rng: &mut dyn RewardRng) -> &Segment {
        self.select(rng.next_unit())
    }
}

/// Source of uniform samples in [0, 1) for draws
pub trait RewardRng: Send {
    fn next_unit(&mut self) -> f64;
}

/// Adapter from any `rand` generator
#[derive(Debug, Clone)]
pub struct RandRng<R>(pub R);

impl<R: RngCore + Send> RewardRng for RandRng<R> {
    fn next_unit(&mut self) -> f64 {
        self.0.gen::<f64>()
    }
}

impl RandRng<StdRng> {
    /// Deterministic generator for tests and replays
    pub fn seeded(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

impl RandRng<OsRng> {
    /// OS entropy, for payouts with real value
    pub fn os() -> Self {
        Self(OsRng)
    }
}

/// One configured mechanism: gates plus table
#[derive(Debug, Clone, PartialEq)]
pub struct RewardProgram {
    pub mechanism: RewardMechanism,
    pub gates: Vec<UnlockGate>,
    pub table: SegmentTable,
}

// === Outcomes ===

/// A draw and, once claimed, its claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardOutcome {
    pub outcome_id: Uuid,
    pub participant_id: String,
    pub mechanism: RewardMechanism,
    pub drawn_at: DateTime<Utc>,
    pub segment: Segment,
    pub points_awarded: u64,
    pub xp_awarded: u64,
    pub claimed: bool,
    pub claim_idempotency_key: Option<String>,
}

impl RewardOutcome {
    pub fn from_records(draw: &DrawRecord, claim: Option<&ClaimRecord>) -> Self {
        Self {
            outcome_id: draw.outcome_id,
            participant_id: draw.participant_id.clone(),
            mechanism: draw.mechanism,
            drawn_at: draw.drawn_at,
            segment: draw.segment.clone(),
            points_awarded: draw.segment.points,
            xp_awarded: draw.segment.xp,
            claimed: claim.is_some(),
            claim_idempotency_key: claim.map(|c| c.idempotency_key.clone()),
        }
    }

    pub fn state(&self) -> RewardState {
        if self.claimed {
            RewardState::Claimed
        } else {
            RewardState::Drawn
        }
    }
}

/// Response to a draw request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawResponse {
    pub outcome_id: Uuid,
    pub segment: Segment,
    pub state: RewardState,
}

impl From<&RewardOutcome> for DrawResponse {
    fn from(outcome: &RewardOutcome) -> Self {
        Self {
            outcome_id: outcome.outcome_id,
            segment: outcome.segment.clone(),
            state: outcome.state(),
        }
    }
}

/// Response to a claim. `replayed` marks an already-claimed outcome whose
/// original result is returned unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimReceipt {
    pub outcome_id: Uuid,
    pub state: RewardState,
    #[serde(rename = "newPoints")]
    pub new_points: u64,
    #[serde(rename = "newXP")]
    pub new_xp: u64,
    pub replayed: bool,
}

impl ClaimReceipt {
    pub fn from_claim(claim: &ClaimRecord, replayed: bool) -> Self {
        Self {
            outcome_id: claim.outcome_id,
            state: RewardState::Claimed,
            new_points: claim.new_points,
            new_xp: claim.new_xp,
            replayed,
        }
    }
}

/// Built-in spin wheel
pub fn default_spin_segments() -> Vec<WeightedSegment> {
    vec![
        WeightedSegment::new("Better luck next time", 0, 0, 30.0),
        WeightedSegment::new("+25 points", 25, 2, 30.0),
        WeightedSegment::new("+50 points", 50, 5, 20.0),
        WeightedSegment::new("+100 points", 100, 10, 12.0),
        WeightedSegment::new("+250 points", 250, 25, 6.0),
        WeightedSegment::new("Jackpot +500", 500, 50, 2.0),
    ]
}

/// Built-in scratch card, on a per-mille scale
pub fn default_scratch_segments() -> Vec<WeightedSegment> {
    vec![
        WeightedSegment::new("+10 points", 10, 1, 600.0),
        WeightedSegment::new("+40 points", 40, 4, 300.0),
        WeightedSegment::new("+150 points", 150, 15, 90.0),
        WeightedSegment::new("+400 points", 400, 40, 10.0),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRng(f64);

    impl RewardRng for FixedRng {
        fn next_unit(&mut self) -> f64 {
            self.0
        }
    }

    fn abc() -> SegmentTable {
        SegmentTable::new(vec![
            WeightedSegment::new("A", 1, 0, 70.0),
            WeightedSegment::new("B", 2, 0, 25.0),
            WeightedSegment::new("C", 3, 0, 5.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_select_boundaries() {
        let table = abc();
        assert_eq!(table.select(0.0).label, "A");
        assert_eq!(table.select(0.6999).label, "A");
        assert_eq!(table.select(0.71).label, "B");
        assert_eq!(table.select(0.9499).label, "B");
        assert_eq!(table.select(0.96).label, "C");
        assert_eq!(table.select(1.0).label, "C");
        assert_eq!(table.draw(&mut FixedRng(0.5)).label, "A");
    }

    #[test]
    fn test_zero_weight_never_selected() {
        let table = SegmentTable::new(vec![
            WeightedSegment::new("never", 0, 0, 0.0),
            WeightedSegment::new("always", 5, 0, 3.0),
            WeightedSegment::new("tail", 0, 0, 0.0),
        ])
        .unwrap();
        for sample in [0.0, 0.3, 0.999, 1.0] {
            assert_eq!(table.select(sample).label, "always");
        }
    }

    #[test]
    fn test_invalid_tables() {
        assert!(SegmentTable::new(vec![]).is_err());
        assert!(SegmentTable::new(vec![WeightedSegment::new("x", 0, 0, 0.0)]).is_err());
        let err = SegmentTable::new(vec![
            WeightedSegment::new("x", 0, 0, 5.0),
            WeightedSegment::new("y", 0, 0, -1.0),
        ])
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidProbabilityTable);
    }

    #[test]
    fn test_probabilities_normalized() {
        let table = SegmentTable::new(default_scratch_segments()).unwrap();
        let total: f64 = table.probabilities().iter().map(|(_, p)| p).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_gates_are_or_combined() {
        let gates = vec![
            UnlockGate::PointsThreshold { threshold: 500 },
            UnlockGate::ChallengeCompletion {
                challenges: vec!["qa".into(), "csat".into()],
            },
        ];
        let done = GateContext::default()
            .with_challenge("qa", 100.0)
            .with_challenge("csat", 120.0);
        let half = GateContext::default().with_challenge("qa", 100.0).with_challenge("csat", 40.0);

        let eval = evaluate_gates(&gates, 600, &done);
        assert!(eval.by_points && eval.by_challenges);
        assert!(evaluate_gates(&gates, 100, &done).is_eligible());
        assert!(evaluate_gates(&gates, 600, &half).is_eligible());
        assert_eq!(evaluate_gates(&gates, 100, &half).state(), RewardState::Locked);
    }

    #[test]
    fn test_no_gates_is_open() {
        assert!(evaluate_gates(&[], 0, &GateContext::default()).is_eligible());
    }

    #[test]
    fn test_seeded_rng_is_deterministic() {
        let mut a = RandRng::seeded(7);
        let mut b = RandRng::seeded(7);
        let table = SegmentTable::new(default_spin_segments()).unwrap();
        for _ in 0..50 {
            assert_eq!(table.draw(&mut a), table.draw(&mut b));
        }
    }
}
