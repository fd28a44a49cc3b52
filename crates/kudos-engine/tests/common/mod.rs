//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use kudos_engine::budget::IssuanceCaps;
use kudos_engine::ledger::{EntrySource, LedgerEntry};
use kudos_engine::reward::WeightedSegment;
use kudos_engine::store::{LedgerStore, MemoryLedgerStore};
use kudos_engine::{Engine, EngineConfig};
use std::sync::Arc;

pub fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

/// Config whose spin wheel always pays `points`, with no gates and no caps
pub fn fixed_spin_config(points: u64, xp: u64) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.caps = IssuanceCaps::unlimited();
    config.rewards.spin.gates = vec![];
    config.rewards.spin.segments = vec![WeightedSegment::new("fixed", points, xp, 1.0)];
    config
}

pub fn engine_with(config: &EngineConfig, participants: &[&str]) -> Engine<MemoryLedgerStore> {
    let store = Arc::new(MemoryLedgerStore::new());
    let engine = Engine::from_config(config, store).unwrap();
    for p in participants {
        engine.register_participant(p).unwrap();
    }
    engine
}

/// Seed a balance directly through the store
pub fn credit(engine: &Engine<MemoryLedgerStore>, participant: &str, points: u64, xp: u64, ts: DateTime<Utc>) {
    engine
        .store()
        .transact(participant, |txn| {
            txn.append_entry(LedgerEntry::earned(participant, points, xp, EntrySource::Adjustment, ts));
            Ok(())
        })
        .unwrap();
}
