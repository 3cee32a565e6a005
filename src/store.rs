// Local persistence: a key-value store backed by SQLite, and the single-slot
// draft cache built on top of it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::ExpenseDraft;

/// Storage slot for the in-progress expense draft. One fixed key: a new
/// draft save unconditionally overwrites the previous one.
pub const DRAFT_KEY: &str = "splitit-expense-draft";

// ---------------------------------------------------------------------------
// KeyValueStore
// ---------------------------------------------------------------------------

/// Minimal string key-value persistence primitive. The draft store only
/// needs get/set/remove semantics, so any durable backend can sit behind
/// this seam.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }
    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }
    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }
}

/// SQLite-backed key-value store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path` and ensure the state
    /// table exists. Pass `":memory:"` for an ephemeral in-memory database
    /// (useful for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS client_state (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )
        .context("failed to create client_state table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT value FROM client_state WHERE key = ?1")
            .context("failed to prepare state query")?;

        let mut rows = stmt
            .query_map(params![key], |row| row.get::<_, String>(0))
            .context("failed to query client state")?;

        match rows.next() {
            Some(row) => Ok(Some(row.context("failed to read state row")?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO client_state (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .context("failed to save client state")?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.conn()
            .execute("DELETE FROM client_state WHERE key = ?1", params![key])
            .context("failed to remove client state")?;
        Ok(())
    }
}

/// In-memory key-value store. Nothing survives the process; used by tests
/// and available as a throwaway backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.map.lock().expect("memory store mutex poisoned")
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.map().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.map().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.map().remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DraftStore
// ---------------------------------------------------------------------------

/// Stored envelope for a draft: the draft itself plus a save timestamp.
#[derive(Debug, Serialize, Deserialize)]
struct StoredDraft {
    data: ExpenseDraft,
    updated_at: DateTime<Utc>,
}

/// Single-slot durable cache of one [`ExpenseDraft`].
///
/// Persistence failures are never surfaced to the caller: a failed save is
/// logged and dropped, and a missing or unparsable slot loads as `None`.
/// Losing a draft is an inconvenience; failing the edit flow over it is not
/// acceptable.
pub struct DraftStore<S> {
    store: S,
}

impl<S: KeyValueStore> DraftStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Persist `draft` into the slot, overwriting any prior value.
    pub fn save(&self, draft: &ExpenseDraft) {
        let envelope = StoredDraft {
            data: draft.clone(),
            updated_at: Utc::now(),
        };
        let result = serde_json::to_string(&envelope)
            .context("failed to serialize draft")
            .and_then(|json| self.store.set(DRAFT_KEY, &json));
        if let Err(e) = result {
            warn!("unable to save draft: {e:#}");
        }
    }

    /// Return the stored draft, or `None` if the slot is empty or its
    /// contents cannot be read or parsed.
    pub fn load(&self) -> Option<ExpenseDraft> {
        let raw = match self.store.get(DRAFT_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("unable to load draft: {e:#}");
                return None;
            }
        };
        match serde_json::from_str::<StoredDraft>(&raw) {
            Ok(envelope) => Some(envelope.data),
            Err(e) => {
                warn!("stored draft is unreadable, discarding: {e}");
                None
            }
        }
    }

    /// Remove the slot. Idempotent.
    pub fn clear(&self) {
        if let Err(e) = self.store.remove(DRAFT_KEY) {
            warn!("unable to clear draft: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContributionEntry, ShareEntry};

    fn sample_draft() -> ExpenseDraft {
        ExpenseDraft {
            group_id: Some(7),
            title: "Groceries".into(),
            amount: Some(300.0),
            paid_by: Some(1),
            shares: vec![
                ShareEntry {
                    user_id: 1,
                    share_amount: 150.0,
                },
                ShareEntry {
                    user_id: 2,
                    share_amount: 150.0,
                },
            ],
            contributors: vec![ContributionEntry {
                user_id: 1,
                amount_paid: 300.0,
            }],
            split_among: vec![1, 2],
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let drafts = DraftStore::new(SqliteStore::open(":memory:").unwrap());
        let draft = sample_draft();
        drafts.save(&draft);
        assert_eq!(drafts.load(), Some(draft));
    }

    #[test]
    fn memory_store_round_trips_and_clears() {
        let drafts = DraftStore::new(MemoryStore::new());
        let draft = sample_draft();
        drafts.save(&draft);
        assert_eq!(drafts.load(), Some(draft));
        drafts.clear();
        assert_eq!(drafts.load(), None);
    }

    #[test]
    fn load_returns_none_when_empty() {
        let drafts = DraftStore::new(SqliteStore::open(":memory:").unwrap());
        assert_eq!(drafts.load(), None);
    }

    #[test]
    fn corrupted_slot_loads_as_none() {
        let store = SqliteStore::open(":memory:").unwrap();
        store.set(DRAFT_KEY, "{not json").unwrap();
        let drafts = DraftStore::new(store);
        assert_eq!(drafts.load(), None);
    }

    #[test]
    fn save_overwrites_previous_slot() {
        let drafts = DraftStore::new(SqliteStore::open(":memory:").unwrap());
        let mut draft = sample_draft();
        drafts.save(&draft);
        draft.title = "Rent".into();
        drafts.save(&draft);
        assert_eq!(drafts.load().unwrap().title, "Rent");
    }

    #[test]
    fn clear_is_idempotent() {
        let drafts = DraftStore::new(SqliteStore::open(":memory:").unwrap());
        drafts.save(&sample_draft());
        drafts.clear();
        drafts.clear();
        assert_eq!(drafts.load(), None);
    }

    /// Backend that fails every operation, for exercising the fail-open
    /// contract.
    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            anyhow::bail!("storage disabled")
        }
        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            anyhow::bail!("quota exceeded")
        }
        fn remove(&self, _key: &str) -> Result<()> {
            anyhow::bail!("storage disabled")
        }
    }

    #[test]
    fn persistence_errors_never_propagate() {
        let drafts = DraftStore::new(BrokenStore);
        drafts.save(&sample_draft());
        assert_eq!(drafts.load(), None);
        drafts.clear();
    }
}
