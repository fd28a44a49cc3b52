//! Ledger store: per-participant append-only books.
//!
//! All mutation goes through [`LedgerStore::transact`], which serializes
//! writers per participant and commits append-or-nothing. Reads get a copy
//! of the book, so a ranking pass never sees a half-applied transaction.

use crate::error::{EngineError, Result};
use crate::ledger::{fold_balance, Balance, ClaimRecord, DrawRecord, LedgerEntry, ParticipantBook};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Rows appended by one transaction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingRows {
    pub entries: Vec<LedgerEntry>,
    pub draws: Vec<DrawRecord>,
    pub claims: Vec<ClaimRecord>,
}

impl PendingRows {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.draws.is_empty() && self.claims.is_empty()
    }
}

/// Append-only view of one participant's book during a transaction.
/// Queries see committed rows plus rows appended so far.
pub struct LedgerTxn<'a> {
    book: &'a ParticipantBook,
    pending: PendingRows,
}

impl<'a> LedgerTxn<'a> {
    fn begin(book: &'a ParticipantBook) -> Self {
        Self {
            book,
            pending: PendingRows::default(),
        }
    }

    pub fn participant_id(&self) -> &str {
        &self.book.participant_id
    }

    /// Committed book, without pending rows
    pub fn committed(&self) -> &ParticipantBook {
        self.book
    }

    pub fn entries(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.book.entries.iter().chain(self.pending.entries.iter())
    }

    pub fn balance(&self) -> Balance {
        fold_balance(self.entries())
    }

    pub fn entry_by_key(&self, key: &str) -> Option<&LedgerEntry> {
        self.entries()
            .find(|e| e.idempotency_key.as_deref() == Some(key))
    }

    pub fn draw(&self, outcome_id: &Uuid) -> Option<&DrawRecord> {
        self.book
            .draws
            .iter()
            .chain(self.pending.draws.iter())
            .find(|d| d.outcome_id == *outcome_id)
    }

    pub fn claim_for(&self, outcome_id: &Uuid) -> Option<&ClaimRecord> {
        self.claims().find(|c| c.outcome_id == *outcome_id)
    }

    pub fn claim_by_key(&self, key: &str) -> Option<&ClaimRecord> {
        self.claims().find(|c| c.idempotency_key == key)
    }

    fn claims(&self) -> impl Iterator<Item = &ClaimRecord> {
        self.book.claims.iter().chain(self.pending.claims.iter())
    }

    pub fn append_entry(&mut self, entry: LedgerEntry) {
        self.pending.entries.push(entry);
    }

    pub fn append_draw(&mut self, draw: DrawRecord) {
        self.pending.draws.push(draw);
    }

    pub fn append_claim(&mut self, claim: ClaimRecord) {
        self.pending.claims.push(claim);
    }
}

/// Storage collaborator for participant books
pub trait LedgerStore: Send + Sync {
    /// Create an empty book. Returns false if it already existed.
    fn register(&self, participant_id: &str) -> Result<bool>;

    fn contains(&self, participant_id: &str) -> bool;

    /// Registered participant ids, sorted
    fn participants(&self) -> Vec<String>;

    /// Consistent copy of one book
    fn snapshot(&self, participant_id: &str) -> Result<ParticipantBook>;

    /// Copies of several books taken at one instant, sorted by participant
    /// id. Unknown ids fail with `ParticipantNotFound`.
    fn snapshot_many(&self, participant_ids: &[String]) -> Result<Vec<ParticipantBook>> {
        participant_ids.iter().map(|id| self.snapshot(id)).collect()
    }

    /// Participant owning a drawn outcome
    fn locate_outcome(&self, outcome_id: &Uuid) -> Option<String>;

    /// Run `f` with exclusive access to the participant's book. Rows appended
    /// by `f` are committed only if it returns `Ok`. `f` must not call back
    /// into the store.
    fn transact<T, F>(&self, participant_id: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut LedgerTxn<'_>) -> Result<T>;
}

fn poisoned<T>(_: T) -> EngineError {
    EngineError::Store("lock poisoned".into())
}

/// In-memory arena of books
#[derive(Default)]
pub struct MemoryLedgerStore {
    books: RwLock<HashMap<String, Arc<Mutex<ParticipantBook>>>>,
    outcome_index: RwLock<HashMap<Uuid, String>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn book(&self, participant_id: &str) -> Result<Arc<Mutex<ParticipantBook>>> {
        let books = self.books.read().map_err(poisoned)?;
        books
            .get(participant_id)
            .cloned()
            .ok_or_else(|| EngineError::ParticipantNotFound(participant_id.to_string()))
    }

    /// Transaction whose pending rows pass through `on_commit` (while the
    /// participant lock is held) before they are applied in memory.
    pub(crate) fn transact_with<T, F, H>(&self, participant_id: &str, f: F, on_commit: H) -> Result<T>
    where
        F: FnOnce(&mut LedgerTxn<'_>) -> Result<T>,
        H: FnOnce(&PendingRows) -> Result<()>,
    {
        let book = self.book(participant_id)?;
        let mut book = book.lock().map_err(poisoned)?;

        let (value, pending) = {
            let mut txn = LedgerTxn::begin(&book);
            let value = f(&mut txn)?;
            (value, txn.pending)
        };
        if pending.is_empty() {
            return Ok(value);
        }
        on_commit(&pending)?;

        if !pending.draws.is_empty() {
            let mut index = self.outcome_index.write().map_err(poisoned)?;
            for draw in &pending.draws {
                index.insert(draw.outcome_id, participant_id.to_string());
            }
        }
        debug!(
            participant = participant_id,
            entries = pending.entries.len(),
            draws = pending.draws.len(),
            claims = pending.claims.len(),
            "ledger commit"
        );
        book.entries.extend(pending.entries);
        book.draws.extend(pending.draws);
        book.claims.extend(pending.claims);
        Ok(value)
    }

    fn apply_row(&self, row: JournalRow) -> Result<()> {
        let participant_id = row.participant_id().to_string();
        self.register(&participant_id)?;
        let JournalRow::Commit {
            entries, draws, claims, ..
        } = row
        else {
            return Ok(());
        };
        let book = self.book(&participant_id)?;
        let mut book = book.lock().map_err(poisoned)?;
        if !draws.is_empty() {
            let mut index = self.outcome_index.write().map_err(poisoned)?;
            for draw in &draws {
                index.insert(draw.outcome_id, participant_id.clone());
            }
        }
        book.entries.extend(entries);
        book.draws.extend(draws);
        book.claims.extend(claims);
        Ok(())
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn register(&self, participant_id: &str) -> Result<bool> {
        let mut books = self.books.write().map_err(poisoned)?;
        if books.contains_key(participant_id) {
            return Ok(false);
        }
        books.insert(
            participant_id.to_string(),
            Arc::new(Mutex::new(ParticipantBook::new(participant_id))),
        );
        Ok(true)
    }

    fn contains(&self, participant_id: &str) -> bool {
        self.books
            .read()
            .map(|b| b.contains_key(participant_id))
            .unwrap_or(false)
    }

    fn participants(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .books
            .read()
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    fn snapshot(&self, participant_id: &str) -> Result<ParticipantBook> {
        let book = self.book(participant_id)?;
        let book = book.lock().map_err(poisoned)?;
        Ok(book.clone())
    }

    fn snapshot_many(&self, participant_ids: &[String]) -> Result<Vec<ParticipantBook>> {
        let mut ids: Vec<&String> = participant_ids.iter().collect();
        ids.sort();
        ids.dedup();

        let books = self.books.read().map_err(poisoned)?;
        let handles = ids
            .iter()
            .map(|id| {
                books
                    .get(id.as_str())
                    .cloned()
                    .ok_or_else(|| EngineError::ParticipantNotFound(id.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        // Hold every book lock at once, acquired in id order
        let guards = handles
            .iter()
            .map(|h| h.lock().map_err(poisoned))
            .collect::<Result<Vec<_>>>()?;
        Ok(guards.iter().map(|g| (**g).clone()).collect())
    }

    fn locate_outcome(&self, outcome_id: &Uuid) -> Option<String> {
        self.outcome_index
            .read()
            .ok()
            .and_then(|index| index.get(outcome_id).cloned())
    }

    fn transact<T, F>(&self, participant_id: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut LedgerTxn<'_>) -> Result<T>,
    {
        self.transact_with(participant_id, f, |_| Ok(()))
    }
}

// === Journal-backed store ===

/// One line of the journal file. A transaction is always a single
/// `Commit` line, so a torn write drops the whole transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "row", rename_all = "snake_case")]
enum JournalRow {
    Register {
        participant_id: String,
    },
    Commit {
        participant_id: String,
        #[serde(default)]
        entries: Vec<LedgerEntry>,
        #[serde(default)]
        draws: Vec<DrawRecord>,
        #[serde(default)]
        claims: Vec<ClaimRecord>,
    },
}

impl JournalRow {
    fn participant_id(&self) -> &str {
        match self {
            Self::Register { participant_id } | Self::Commit { participant_id, .. } => participant_id,
        }
    }
}

/// Memory store persisted to a JSONL journal.
///
/// Every committed transaction is appended and fsynced before it becomes
/// visible in memory; the journal is replayed on open.
pub struct JournalLedgerStore {
    path: PathBuf,
    memory: MemoryLedgerStore,
    file: Mutex<File>,
}

impl JournalLedgerStore {
    /// Open or create the journal at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let memory = MemoryLedgerStore::new();
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            let mut replayed = 0usize;
            for (lineno, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<JournalRow>(&line) {
                    Ok(row) => {
                        memory.apply_row(row)?;
                        replayed += 1;
                    }
                    Err(e) => {
                        // Skip malformed lines (torn final write, forward compat)
                        warn!(line = lineno + 1, error = %e, "skipping malformed journal line");
                    }
                }
            }
            debug!(path = %path.display(), rows = replayed, "journal replayed");
        }

        let mut file = OpenOptions::new().create(true).read(true).append(true).open(&path)?;
        if !ends_with_newline(&mut file)? {
            // Terminate a torn tail so the next commit starts on its own line
            warn!(path = %path.display(), "journal ends mid-line");
            file.write_all(b"\n")?;
            file.sync_all()?;
        }
        Ok(Self {
            path,
            memory,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_row(&self, row: &JournalRow) -> Result<()> {
        let mut buf = serde_json::to_string(row)?;
        buf.push('\n');
        let mut file = self.file.lock().map_err(poisoned)?;
        file.write_all(buf.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }
}

fn ends_with_newline(file: &mut File) -> Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

impl LedgerStore for JournalLedgerStore {
    fn register(&self, participant_id: &str) -> Result<bool> {
        if self.memory.contains(participant_id) {
            return Ok(false);
        }
        self.write_row(&JournalRow::Register {
            participant_id: participant_id.to_string(),
        })?;
        self.memory.register(participant_id)
    }

    fn contains(&self, participant_id: &str) -> bool {
        self.memory.contains(participant_id)
    }

    fn participants(&self) -> Vec<String> {
        self.memory.participants()
    }

    fn snapshot(&self, participant_id: &str) -> Result<ParticipantBook> {
        self.memory.snapshot(participant_id)
    }

    fn snapshot_many(&self, participant_ids: &[String]) -> Result<Vec<ParticipantBook>> {
        self.memory.snapshot_many(participant_ids)
    }

    fn locate_outcome(&self, outcome_id: &Uuid) -> Option<String> {
        self.memory.locate_outcome(outcome_id)
    }

    fn transact<T, F>(&self, participant_id: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut LedgerTxn<'_>) -> Result<T>,
    {
        self.memory.transact_with(participant_id, f, |pending| {
            self.write_row(&JournalRow::Commit {
                participant_id: participant_id.to_string(),
                entries: pending.entries.clone(),
                draws: pending.draws.clone(),
                claims: pending.claims.clone(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::EntrySource;
    use chrono::Utc;

    #[test]
    fn test_unknown_participant() {
        let store = MemoryLedgerStore::new();
        let err = store.snapshot("nobody").unwrap_err();
        assert!(matches!(err, EngineError::ParticipantNotFound(_)));
    }

    #[test]
    fn test_failed_transaction_appends_nothing() {
        let store = MemoryLedgerStore::new();
        store.register("a1").unwrap();
        let result: Result<()> = store.transact("a1", |txn| {
            txn.append_entry(LedgerEntry::earned("a1", 10, 1, EntrySource::Adjustment, Utc::now()));
            Err(EngineError::Store("abort".into()))
        });
        assert!(result.is_err());
        assert!(store.snapshot("a1").unwrap().entries.is_empty());
    }

    #[test]
    fn test_txn_sees_pending_rows() {
        let store = MemoryLedgerStore::new();
        store.register("a1").unwrap();
        let balance = store
            .transact("a1", |txn| {
                txn.append_entry(
                    LedgerEntry::earned("a1", 10, 1, EntrySource::Adjustment, Utc::now()).with_key("k1"),
                );
                assert!(txn.entry_by_key("k1").is_some());
                Ok(txn.balance())
            })
            .unwrap();
        assert_eq!(balance.points, 10);
        assert_eq!(store.snapshot("a1").unwrap().version(), 1);
    }

    #[test]
    fn test_register_is_idempotent() {
        let store = MemoryLedgerStore::new();
        assert!(store.register("a1").unwrap());
        assert!(!store.register("a1").unwrap());
        assert_eq!(store.participants(), vec!["a1".to_string()]);
    }

    #[test]
    fn test_commit_is_one_journal_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let store = JournalLedgerStore::open(&path).unwrap();
        store.register("a1").unwrap();
        store
            .transact("a1", |txn| {
                txn.append_entry(LedgerEntry::earned("a1", 10, 1, EntrySource::Adjustment, Utc::now()));
                txn.append_entry(LedgerEntry::earned("a1", 20, 2, EntrySource::Adjustment, Utc::now()));
                Ok(())
            })
            .unwrap();
        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("\"row\":\"commit\""));

        let reopened = JournalLedgerStore::open(&path).unwrap();
        assert_eq!(reopened.snapshot("a1").unwrap().balance().points, 30);
    }
}
