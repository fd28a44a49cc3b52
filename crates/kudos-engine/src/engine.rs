//! Engine facade wiring the scoring pipeline to a ledger store.
//!
//! Dependencies are passed in at construction: validated settings and a
//! [`LedgerStore`]. Reads (scores, rankings, streaks) work on copied
//! snapshots; every balance change is one `transact` call on the
//! participant's book.

use crate::budget::{self, BudgetDecision, WindowKind};
use crate::composite::{self, CompositeScore};
use crate::config::{EngineConfig, EngineSettings};
use crate::error::{EngineError, Result};
use crate::ledger::{ClaimRecord, DrawRecord, EntrySource, LedgerEntry, ParticipantBook};
use crate::metric::PerformanceRecord;
use crate::progression::{validate_spend, ProgressionState};
use crate::ranking::{self, LeaderboardEntry, ParticipantScore, SortKey};
use crate::reward::{
    evaluate_gates, ClaimReceipt, DrawResponse, GateContext, GateEvaluation, RewardMechanism,
    RewardOutcome, RewardRng, RewardState,
};
use crate::roster::{PopulationScope, Roster};
use crate::store::LedgerStore;
use crate::streak::{self, StreakBonusPolicy, StreakState};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Leaderboard request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardQuery {
    #[serde(default)]
    pub population_scope: PopulationScope,
    #[serde(default)]
    pub sort_key: SortKey,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Who a budget check is for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BudgetTarget {
    Participant(String),
    Pool(Vec<String>),
}

/// Result of converting a composite score into points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreApplication {
    pub entry_id: Uuid,
    pub points_awarded: u64,
    pub xp_awarded: u64,
    pub progression: ProgressionState,
    pub replayed: bool,
}

pub struct Engine<S: LedgerStore> {
    settings: EngineSettings,
    store: Arc<S>,
    /// Serializes pool-capped issuance; always taken before a book lock
    pool_lock: Mutex<()>,
}

impl<S: LedgerStore> Engine<S> {
    pub fn new(settings: EngineSettings, store: Arc<S>) -> Self {
        Self {
            settings,
            store,
            pool_lock: Mutex::new(()),
        }
    }

    /// Validate `config` and build an engine over `store`
    pub fn from_config(config: &EngineConfig, store: Arc<S>) -> Result<Self> {
        Ok(Self::new(config.build()?, store))
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn register_participant(&self, participant_id: &str) -> Result<bool> {
        let created = self.store.register(participant_id)?;
        if created {
            debug!(participant = participant_id, "participant registered");
        }
        Ok(created)
    }

    /// Register every roster member
    pub fn register_roster(&self, roster: &Roster) -> Result<usize> {
        let mut created = 0;
        for p in roster.iter() {
            if self.register_participant(&p.id)? {
                debug!(member = %p.debug_tag(), "roster member registered");
                created += 1;
            }
        }
        Ok(created)
    }

    // === Scoring ===

    pub fn composite_score(
        &self,
        participant_id: &str,
        records: &[PerformanceRecord],
        as_of: DateTime<Utc>,
    ) -> CompositeScore {
        composite::score(participant_id, &self.settings.catalog, records, as_of)
    }

    /// Convert a composite score into a ledger credit. Re-applying with the
    /// same key returns the original entry without a second credit.
    pub fn apply_score(
        &self,
        score: &CompositeScore,
        idempotency_key: &str,
        at: DateTime<Utc>,
    ) -> Result<ScoreApplication> {
        check_caller_key(idempotency_key)?;
        let participant_id = score.participant_id.as_str();
        let (points, xp) = self.settings.progression.convert(score.overall_score);

        self.store.transact(participant_id, |txn| {
            if let Some(existing) = txn.entry_by_key(idempotency_key) {
                return Ok(ScoreApplication {
                    entry_id: existing.id,
                    points_awarded: existing.points_delta.max(0) as u64,
                    xp_awarded: existing.xp_delta.max(0) as u64,
                    progression: ProgressionState::from_balance(participant_id, txn.balance()),
                    replayed: true,
                });
            }
            let entry = LedgerEntry::earned(participant_id, points, xp, EntrySource::ScoreConversion, at)
                .with_key(idempotency_key);
            let entry_id = entry.id;
            txn.append_entry(entry);
            info!(
                participant = participant_id,
                score = score.overall_score,
                points,
                xp,
                "score applied"
            );
            Ok(ScoreApplication {
                entry_id,
                points_awarded: points,
                xp_awarded: xp,
                progression: ProgressionState::from_balance(participant_id, txn.balance()),
                replayed: false,
            })
        })
    }

    pub fn progression(&self, participant_id: &str) -> Result<ProgressionState> {
        let book = self.store.snapshot(participant_id)?;
        Ok(ProgressionState::from_ledger(participant_id, &book.entries))
    }

    /// Spend points. Validated against the ledger balance inside the
    /// participant's transaction; idempotent by key.
    pub fn spend(
        &self,
        participant_id: &str,
        points: u64,
        idempotency_key: &str,
        at: DateTime<Utc>,
    ) -> Result<ProgressionState> {
        check_caller_key(idempotency_key)?;
        self.store.transact(participant_id, |txn| {
            if txn.entry_by_key(idempotency_key).is_some() {
                return Ok(ProgressionState::from_balance(participant_id, txn.balance()));
            }
            let current = ProgressionState::from_balance(participant_id, txn.balance());
            validate_spend(&current, points)?;
            txn.append_entry(LedgerEntry::redeemed(participant_id, points, at).with_key(idempotency_key));
            info!(participant = participant_id, points, "points redeemed");
            Ok(ProgressionState::from_balance(participant_id, txn.balance()))
        })
    }

    // === Ranking ===

    /// Ranking inputs for the given ids, all copied at one instant
    pub fn population_scores(&self, participant_ids: &[String]) -> Result<Vec<ParticipantScore>> {
        let registered: Vec<String> = participant_ids
            .iter()
            .filter(|id| self.store.contains(id))
            .cloned()
            .collect();
        let books = self.store.snapshot_many(&registered)?;
        let mut scores: Vec<ParticipantScore> = books
            .iter()
            .map(|b| {
                let balance = b.balance();
                ParticipantScore::new(&b.participant_id, balance.points, balance.xp)
            })
            .collect();
        // Roster members without a book rank with zero balances
        for id in participant_ids {
            if !registered.contains(id) {
                scores.push(ParticipantScore::new(id, 0, 0));
            }
        }
        Ok(scores)
    }

    pub fn leaderboard(&self, roster: &Roster, query: &LeaderboardQuery) -> Result<Vec<LeaderboardEntry>> {
        let ids: Vec<String> = roster
            .population(&query.population_scope)
            .into_iter()
            .map(|p| p.id.clone())
            .collect();
        let scores = self.population_scores(&ids)?;
        let mut ranked = ranking::rank(&scores, query.sort_key);
        if let Some(limit) = query.limit {
            ranked.truncate(limit);
        }
        debug!(
            scope = %query.population_scope,
            sort = %query.sort_key,
            population = scores.len(),
            "leaderboard computed"
        );
        Ok(ranked)
    }

    // === Streaks ===

    /// Streak from ledger history; with `as_of`, a lapsed streak reads 0.
    pub fn streak(&self, participant_id: &str, as_of: Option<NaiveDate>) -> Result<StreakState> {
        let book = self.store.snapshot(participant_id)?;
        let clock = self.settings.caps.clock();
        Ok(match as_of {
            Some(day) => streak::compute_streak_as_of(participant_id, &book.entries, clock, day),
            None => streak::compute_streak(participant_id, &book.entries, clock),
        })
    }

    /// Credit the milestone bonus for the streak as of `at`, once per
    /// milestone day. Returns `None` when no milestone is hit or it was
    /// already paid.
    pub fn award_streak_bonus(&self, participant_id: &str, at: DateTime<Utc>) -> Result<Option<LedgerEntry>> {
        let _pool = self.pool_guard()?;
        let pool_entries = self.pool_entries(participant_id)?;
        let clock = self.settings.caps.clock();
        let today = clock.business_day(at);

        self.store.transact(participant_id, |txn| {
            let state = streak::compute_streak_as_of(participant_id, txn.entries(), clock, today);
            let Some(milestone) = self.settings.streak.milestone_for(state.current_streak) else {
                return Ok(None);
            };
            // Keyed by the day the run reached the milestone, not the call day
            let Some(reached_on) = state.last_qualifying_date else {
                return Ok(None);
            };
            let key = StreakBonusPolicy::award_key(participant_id, milestone, reached_on);
            if txn.entry_by_key(&key).is_some() {
                return Ok(None);
            }
            let own: Vec<&LedgerEntry> = txn.entries().collect();
            self.enforce_caps(participant_id, &own, &pool_entries, milestone.points, at)?;

            let entry = LedgerEntry::earned(participant_id, milestone.points, milestone.xp, EntrySource::StreakBonus, at)
                .with_key(key);
            info!(
                participant = participant_id,
                days = milestone.days,
                points = milestone.points,
                "streak bonus awarded"
            );
            txn.append_entry(entry.clone());
            Ok(Some(entry))
        })
    }

    // === Rewards ===

    /// Evaluate the unlock gates of `mechanism` against the ledger balance
    pub fn evaluate_gates(
        &self,
        participant_id: &str,
        mechanism: RewardMechanism,
        ctx: &GateContext,
    ) -> Result<GateEvaluation> {
        let program = self
            .settings
            .program(mechanism)
            .ok_or_else(|| EngineError::InsufficientGate(mechanism.to_string()))?;
        let book = self.store.snapshot(participant_id)?;
        Ok(evaluate_gates(&program.gates, book.balance().points, ctx))
    }

    /// Lifecycle state of a mechanism for a participant: an outstanding
    /// unclaimed draw reads as `Drawn`, otherwise the gates decide.
    pub fn reward_state(
        &self,
        participant_id: &str,
        mechanism: RewardMechanism,
        ctx: &GateContext,
    ) -> Result<RewardState> {
        let book = self.store.snapshot(participant_id)?;
        if book.unclaimed_draws().any(|d| d.mechanism == mechanism) {
            return Ok(RewardState::Drawn);
        }
        let Some(program) = self.settings.program(mechanism) else {
            return Ok(RewardState::Locked);
        };
        Ok(evaluate_gates(&program.gates, book.balance().points, ctx).state())
    }

    /// Draw one outcome. Gates are evaluated inside the participant's
    /// transaction so the points they see are the points at draw time.
    pub fn draw(
        &self,
        participant_id: &str,
        mechanism: RewardMechanism,
        ctx: &GateContext,
        rng: &mut dyn RewardRng,
        at: DateTime<Utc>,
    ) -> Result<DrawResponse> {
        let program = self
            .settings
            .program(mechanism)
            .ok_or_else(|| EngineError::InsufficientGate(mechanism.to_string()))?;

        let outcome = self.store.transact(participant_id, |txn| {
            let eval = evaluate_gates(&program.gates, txn.balance().points, ctx);
            if !eval.is_eligible() {
                return Err(EngineError::InsufficientGate(mechanism.to_string()));
            }
            let segment = program.table.draw(rng).clone();
            let record = DrawRecord {
                outcome_id: Uuid::new_v4(),
                participant_id: participant_id.to_string(),
                mechanism,
                drawn_at: at,
                segment,
            };
            let outcome = RewardOutcome::from_records(&record, None);
            txn.append_draw(record);
            Ok(outcome)
        })?;

        info!(
            participant = participant_id,
            mechanism = %mechanism,
            outcome = %outcome.outcome_id,
            segment = %outcome.segment.label,
            "reward drawn"
        );
        Ok(DrawResponse::from(&outcome))
    }

    /// Claim a drawn outcome, at most once.
    ///
    /// A repeated idempotency key, or a second claim of the same outcome,
    /// returns the original receipt with `replayed = true` and appends
    /// nothing. The payout entry and the claim row commit together.
    pub fn claim(&self, outcome_id: &Uuid, idempotency_key: &str, at: DateTime<Utc>) -> Result<ClaimReceipt> {
        let participant_id = self
            .store
            .locate_outcome(outcome_id)
            .ok_or_else(|| EngineError::OutcomeNotFound(outcome_id.to_string()))?;

        let _pool = self.pool_guard()?;
        let pool_entries = self.pool_entries(&participant_id)?;

        self.store.transact(&participant_id, |txn| {
            if let Some(prior) = txn.claim_by_key(idempotency_key).or_else(|| txn.claim_for(outcome_id)) {
                debug!(outcome = %outcome_id, "claim replayed");
                return Ok(ClaimReceipt::from_claim(prior, true));
            }
            let payout_key = format!("{}{}", CLAIM_KEY_PREFIX, idempotency_key);
            if txn.entry_by_key(&payout_key).is_some() {
                // Payout committed without its claim row
                warn!(outcome = %outcome_id, key = idempotency_key, "payout exists without claim row");
                let balance = txn.balance();
                return Ok(ClaimReceipt {
                    outcome_id: *outcome_id,
                    state: RewardState::Claimed,
                    new_points: balance.points,
                    new_xp: balance.xp,
                    replayed: true,
                });
            }
            let draw = txn
                .draw(outcome_id)
                .cloned()
                .ok_or_else(|| EngineError::OutcomeNotFound(outcome_id.to_string()))?;

            let own: Vec<&LedgerEntry> = txn.entries().collect();
            self.enforce_caps(&participant_id, &own, &pool_entries, draw.segment.points, at)?;

            let entry = LedgerEntry::earned(
                &participant_id,
                draw.segment.points,
                draw.segment.xp,
                EntrySource::RewardPayout,
                at,
            )
            .with_key(payout_key);
            let ledger_entry_id = entry.id;
            txn.append_entry(entry);

            let balance = txn.balance();
            let claim = ClaimRecord {
                outcome_id: *outcome_id,
                idempotency_key: idempotency_key.to_string(),
                claimed_at: at,
                ledger_entry_id,
                new_points: balance.points,
                new_xp: balance.xp,
            };
            let receipt = ClaimReceipt::from_claim(&claim, false);
            txn.append_claim(claim);
            info!(
                participant = %participant_id,
                outcome = %outcome_id,
                points = draw.segment.points,
                xp = draw.segment.xp,
                "reward claimed"
            );
            Ok(receipt)
        })
    }

    pub fn outcome(&self, outcome_id: &Uuid) -> Result<RewardOutcome> {
        let participant_id = self
            .store
            .locate_outcome(outcome_id)
            .ok_or_else(|| EngineError::OutcomeNotFound(outcome_id.to_string()))?;
        let book = self.store.snapshot(&participant_id)?;
        let draw = book
            .draw(outcome_id)
            .ok_or_else(|| EngineError::OutcomeNotFound(outcome_id.to_string()))?;
        Ok(RewardOutcome::from_records(draw, book.claim_for(outcome_id)))
    }

    pub fn outcomes(&self, participant_id: &str) -> Result<Vec<RewardOutcome>> {
        let book = self.store.snapshot(participant_id)?;
        Ok(book
            .draws
            .iter()
            .map(|d| RewardOutcome::from_records(d, book.claim_for(&d.outcome_id)))
            .collect())
    }

    // === Budget ===

    /// Check whether `proposed` points fit the window for a participant or
    /// a pool. Issuance itself re-checks under the participant lock.
    pub fn check_and_reserve(
        &self,
        target: &BudgetTarget,
        window: WindowKind,
        proposed: u64,
        at: DateTime<Utc>,
    ) -> Result<BudgetDecision> {
        match target {
            BudgetTarget::Participant(id) => {
                let book = self.store.snapshot(id)?;
                Ok(budget::check_and_reserve(&book.entries, &self.settings.caps, window, proposed, at))
            }
            BudgetTarget::Pool(ids) => {
                let Some(pool_caps) = &self.settings.pool_caps else {
                    return Ok(BudgetDecision::Allowed);
                };
                let books = self.store.snapshot_many(ids)?;
                let entries = books.iter().flat_map(|b| b.entries.iter());
                Ok(budget::check_and_reserve(entries, pool_caps, window, proposed, at))
            }
        }
    }

    fn pool_guard(&self) -> Result<Option<std::sync::MutexGuard<'_, ()>>> {
        if self.settings.pool_caps.is_some_and(|c| c.any_enabled()) {
            let guard = self
                .pool_lock
                .lock()
                .map_err(|_| EngineError::Store("pool lock poisoned".into()))?;
            Ok(Some(guard))
        } else {
            Ok(None)
        }
    }

    /// Ledger rows of every other registered participant, for pool caps.
    /// Must be called with the pool guard held.
    fn pool_entries(&self, participant_id: &str) -> Result<Vec<LedgerEntry>> {
        if !self.settings.pool_caps.is_some_and(|c| c.any_enabled()) {
            return Ok(Vec::new());
        }
        let others: Vec<String> = self
            .store
            .participants()
            .into_iter()
            .filter(|id| id != participant_id)
            .collect();
        let books: Vec<ParticipantBook> = self.store.snapshot_many(&others)?;
        Ok(books.into_iter().flat_map(|b| b.entries).collect())
    }

    fn enforce_caps(
        &self,
        participant_id: &str,
        own: &[&LedgerEntry],
        pool_entries: &[LedgerEntry],
        proposed: u64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let decision = budget::check_all(own, &self.settings.caps, proposed, at);
        reject_on_cap(participant_id, decision, "participant")?;

        if let Some(pool_caps) = self.settings.pool_caps.as_ref().filter(|c| c.any_enabled()) {
            let mut all: Vec<&LedgerEntry> = own.to_vec();
            all.extend(pool_entries.iter());
            let decision = budget::check_all(&all, pool_caps, proposed, at);
            reject_on_cap(participant_id, decision, "pool")?;
        }
        Ok(())
    }
}

/// Ledger key prefix of claim payout entries
const CLAIM_KEY_PREFIX: &str = "claim:";

/// Ledger key prefix of streak bonus entries
const STREAK_KEY_PREFIX: &str = "streak:";

/// Keys supplied by callers share the ledger key space with engine-made
/// payout and bonus keys, so those prefixes are off limits.
fn check_caller_key(key: &str) -> Result<()> {
    if key.trim().is_empty() || key.starts_with(CLAIM_KEY_PREFIX) || key.starts_with(STREAK_KEY_PREFIX) {
        return Err(EngineError::InvalidIdempotencyKey(key.to_string()));
    }
    Ok(())
}

fn reject_on_cap(participant_id: &str, decision: BudgetDecision, scope: &str) -> Result<()> {
    if let BudgetDecision::Rejected {
        window,
        cap,
        issued,
        proposed,
    } = decision
    {
        warn!(
            participant = participant_id,
            scope,
            window = %window,
            cap,
            issued,
            proposed,
            "issuance cap exceeded"
        );
    }
    decision.into_result()
}
