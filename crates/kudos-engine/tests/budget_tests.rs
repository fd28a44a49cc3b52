//! Tests for issuance caps and budget checks.

mod common;

use common::{at, credit, engine_with, fixed_spin_config};
use kudos_engine::budget::{check_and_reserve, BudgetDecision, CapRule, IssuanceCaps, WindowKind};
use kudos_engine::ledger::{EntrySource, LedgerEntry};
use kudos_engine::reward::{GateContext, RandRng, RewardMechanism};
use kudos_engine::store::LedgerStore;
use kudos_engine::{BudgetTarget, Engine, EngineConfig, EngineError, ErrorKind, MemoryLedgerStore};
use std::sync::Arc;
use std::thread;

fn payout(participant: &str, points: u64, ts: chrono::DateTime<chrono::Utc>) -> LedgerEntry {
    LedgerEntry::earned(participant, points, 0, EntrySource::RewardPayout, ts)
}

fn seed(engine: &Engine<MemoryLedgerStore>, entry: LedgerEntry) {
    let participant = entry.participant_id.clone();
    engine
        .store()
        .transact(&participant, |txn| {
            txn.append_entry(entry);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_daily_cap_rejects_overflow() {
    let caps = IssuanceCaps::default();
    let entries = vec![payout("a1", 900, at(2026, 10, 16, 8))];
    let decision = check_and_reserve(&entries, &caps, WindowKind::Daily, 200, at(2026, 10, 16, 15));
    assert_eq!(
        decision,
        BudgetDecision::Rejected {
            window: WindowKind::Daily,
            cap: 1_000,
            issued: 900,
            proposed: 200,
        }
    );
    // Exactly reaching the cap is allowed
    let decision = check_and_reserve(&entries, &caps, WindowKind::Daily, 100, at(2026, 10, 16, 15));
    assert!(decision.is_allowed());
}

#[test]
fn test_score_conversions_and_adjustments_are_uncapped() {
    let caps = IssuanceCaps::default();
    let ts = at(2026, 10, 16, 8);
    let entries = vec![
        LedgerEntry::earned("a1", 5_000, 50, EntrySource::ScoreConversion, ts),
        LedgerEntry::earned("a1", 5_000, 50, EntrySource::Adjustment, ts),
    ];
    assert!(check_and_reserve(&entries, &caps, WindowKind::Daily, 1_000, ts).is_allowed());
}

#[test]
fn test_disabled_cap_always_allows() {
    let caps = IssuanceCaps::default();
    let entries = vec![payout("a1", 100_000, at(2026, 10, 16, 8))];
    let now = at(2026, 10, 16, 9);
    assert!(check_and_reserve(&entries, &caps, WindowKind::Weekly, 1, now).is_allowed());
    assert!(check_and_reserve(&entries, &caps, WindowKind::Monthly, 1, now).is_allowed());
}

#[test]
fn test_weekly_window_starts_monday() {
    let caps = IssuanceCaps {
        weekly: CapRule::enabled(500),
        ..IssuanceCaps::unlimited()
    };
    // 2026-10-12 is a Monday, 2026-10-11 the Sunday before
    let entries = vec![
        payout("a1", 400, at(2026, 10, 11, 12)),
        payout("a1", 300, at(2026, 10, 12, 12)),
    ];
    let now = at(2026, 10, 16, 12);
    assert!(check_and_reserve(&entries, &caps, WindowKind::Weekly, 200, now).is_allowed());
    assert!(!check_and_reserve(&entries, &caps, WindowKind::Weekly, 201, now).is_allowed());
}

#[test]
fn test_monthly_window_and_reset_hour() {
    let caps = IssuanceCaps {
        monthly: CapRule::enabled(1_000),
        reset_hour: 6,
        ..IssuanceCaps::unlimited()
    };
    // 05:00 on the 1st still belongs to September's last business day
    let entries = vec![payout("a1", 900, at(2026, 10, 1, 5)), payout("a1", 100, at(2026, 10, 1, 7))];
    let now = at(2026, 10, 20, 12);
    assert!(check_and_reserve(&entries, &caps, WindowKind::Monthly, 900, now).is_allowed());
    assert!(!check_and_reserve(&entries, &caps, WindowKind::Monthly, 901, now).is_allowed());
}

#[test]
fn test_engine_participant_check() {
    let engine = engine_with(&EngineConfig::default(), &["a1"]);
    seed(&engine, payout("a1", 900, at(2026, 10, 16, 8)));

    let target = BudgetTarget::Participant("a1".into());
    let decision = engine
        .check_and_reserve(&target, WindowKind::Daily, 200, at(2026, 10, 16, 15))
        .unwrap();
    assert!(!decision.is_allowed());
    let err = decision.into_result().unwrap_err();
    assert_eq!(err.code(), "cap_exceeded");

    // Tomorrow the window is empty again
    let decision = engine
        .check_and_reserve(&target, WindowKind::Daily, 200, at(2026, 10, 17, 1))
        .unwrap();
    assert!(decision.is_allowed());
}

#[test]
fn test_engine_pool_check() {
    let mut config = EngineConfig::default();
    config.caps = IssuanceCaps::unlimited();
    config.pool_caps = Some(IssuanceCaps {
        daily: CapRule::enabled(1_500),
        ..IssuanceCaps::unlimited()
    });
    let engine = engine_with(&config, &["a1", "a2", "a3"]);
    let ts = at(2026, 10, 16, 8);
    seed(&engine, payout("a1", 800, ts));
    seed(&engine, payout("a2", 600, ts));

    let pool = BudgetTarget::Pool(vec!["a1".into(), "a2".into(), "a3".into()]);
    let now = at(2026, 10, 16, 9);
    assert!(engine.check_and_reserve(&pool, WindowKind::Daily, 100, now).unwrap().is_allowed());
    assert_eq!(
        engine.check_and_reserve(&pool, WindowKind::Daily, 101, now).unwrap(),
        BudgetDecision::Rejected {
            window: WindowKind::Daily,
            cap: 1_500,
            issued: 1_400,
            proposed: 101,
        }
    );
    // The per-participant caps are off
    let single = BudgetTarget::Participant("a3".into());
    assert!(engine.check_and_reserve(&single, WindowKind::Daily, 10_000, now).unwrap().is_allowed());
}

#[test]
fn test_pool_without_pool_caps_allows() {
    let engine = engine_with(&EngineConfig::default(), &["a1"]);
    let pool = BudgetTarget::Pool(vec!["a1".into()]);
    let decision = engine
        .check_and_reserve(&pool, WindowKind::Daily, 1_000_000, at(2026, 10, 16, 9))
        .unwrap();
    assert_eq!(decision, BudgetDecision::Allowed);
}

#[test]
fn test_invalid_caps_rejected_at_build() {
    let mut config = EngineConfig::default();
    config.caps.reset_hour = 24;
    assert!(config.build().unwrap_err().is_config());
}

fn pool_config(points: u64, pool_daily: u64) -> EngineConfig {
    let mut config = fixed_spin_config(points, points / 10);
    config.pool_caps = Some(IssuanceCaps {
        daily: CapRule::enabled(pool_daily),
        ..IssuanceCaps::unlimited()
    });
    config
}

#[test]
fn test_pool_cap_blocks_claim_across_participants() {
    let engine = engine_with(&pool_config(200, 300), &["a1", "a2"]);
    let now = at(2026, 10, 16, 10);
    let ctx = GateContext::default();

    let first = engine
        .draw("a1", RewardMechanism::Spin, &ctx, &mut RandRng::seeded(1), now)
        .unwrap();
    engine.claim(&first.outcome_id, "a1-k1", now).unwrap();

    let second = engine
        .draw("a2", RewardMechanism::Spin, &ctx, &mut RandRng::seeded(2), now)
        .unwrap();
    let err = engine.claim(&second.outcome_id, "a2-k1", now).unwrap_err();
    assert!(matches!(
        err,
        EngineError::CapExceeded {
            cap: 300,
            issued: 200,
            proposed: 200,
            ..
        }
    ));
    let book = engine.store().snapshot("a2").unwrap();
    assert!(book.entries.is_empty());
    assert!(book.claims.is_empty());

    // Next business day the pool window is empty again
    let receipt = engine.claim(&second.outcome_id, "a2-k1", at(2026, 10, 17, 10)).unwrap();
    assert_eq!(receipt.new_points, 200);
}

#[test]
fn test_concurrent_pool_claims_respect_cap() {
    let ids: Vec<String> = (0..6).map(|i| format!("agent-{}", i)).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let engine = Arc::new(engine_with(&pool_config(200, 500), &id_refs));
    let now = at(2026, 10, 16, 10);

    let handles: Vec<_> = ids
        .iter()
        .cloned()
        .enumerate()
        .map(|(i, id)| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let drawn = engine
                    .draw(&id, RewardMechanism::Spin, &GateContext::default(), &mut RandRng::seeded(i as u64), now)
                    .unwrap();
                engine.claim(&drawn.outcome_id, &format!("{}-claim", id), now)
            })
        })
        .collect();

    let mut paid = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(receipt) => {
                assert_eq!(receipt.new_points, 200);
                paid += 1;
            }
            Err(err) => assert_eq!(err.kind(), ErrorKind::CapExceeded),
        }
    }
    assert_eq!(paid, 2);

    let issued: i64 = engine
        .store()
        .snapshot_many(&ids)
        .unwrap()
        .iter()
        .flat_map(|b| b.entries.iter())
        .map(|e| e.points_delta)
        .sum();
    assert_eq!(issued, 400);
}

#[test]
fn test_pool_cap_blocks_streak_bonus() {
    let mut config = EngineConfig::default();
    config.caps = IssuanceCaps::unlimited();
    config.pool_caps = Some(IssuanceCaps {
        daily: CapRule::enabled(50),
        ..IssuanceCaps::unlimited()
    });
    let engine = engine_with(&config, &["a1", "a2"]);
    for d in [14, 15, 16] {
        credit(&engine, "a1", 10, 1, at(2026, 10, d, 12));
    }
    seed(&engine, payout("a2", 40, at(2026, 10, 16, 8)));

    let err = engine.award_streak_bonus("a1", at(2026, 10, 16, 18)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CapExceeded);
    let bonuses = engine
        .store()
        .snapshot("a1")
        .unwrap()
        .entries
        .iter()
        .filter(|e| e.source == EntrySource::StreakBonus)
        .count();
    assert_eq!(bonuses, 0);
}
