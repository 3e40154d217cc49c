//! Durable agent memory backed by SQLite
//!
//! ## Tables
//!
//! - `config` - key/value JSON (credential, lifecycle flags, checkpoints)
//! - `activity_log` - append-only log of posts, comments and votes
//! - `conversations` - reply threads keyed by item id
//! - `seen_items` - ids already shown to the decision oracle
//! - `subscriptions` - channels the agent reads
//!
//! Each table has its own connection and lock. Memory is the only state that
//! survives a restart; everything else is rebuilt from it at boot.

pub mod records;
pub mod schema;

pub use records::{
    ActivityEntry, ActivityKind, ActivityStats, ConversationMessage, MemoryExport, Role,
    Subscription, SubscriptionSource,
};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info};

use schema::Table;

/// Well-known config keys
pub mod keys {
    pub const CREDENTIAL: &str = "credential";
    pub const CLAIM_URL: &str = "claim_url";
    pub const VERIFICATION_CODE: &str = "verification_code";
    pub const VERIFIED: &str = "verified";
    pub const REGISTERED_AT: &str = "registered_at";
    pub const REGISTRATION_ERROR: &str = "registration_error";
    pub const BIRTH_CERTIFICATE: &str = "birth_certificate";
    pub const LAST_HEARTBEAT: &str = "last_heartbeat";
    pub const LAST_DISCOVERY: &str = "last_discovery";

    /// Keys never included in exports or API responses
    pub const SECRET: [&str; 1] = [CREDENTIAL];
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

pub struct MemoryStore {
    config: Mutex<Connection>,
    activity: Mutex<Connection>,
    conversations: Mutex<Connection>,
    seen: Mutex<Connection>,
    subscriptions: Mutex<Connection>,
}

impl MemoryStore {
    /// Open or create the store at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        info!("Opening memory store at {:?}", path);

        Self::build(|| {
            let conn = Connection::open(path)?;
            conn.execute_batch(
                "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;",
            )?;
            Ok(conn)
        })
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        debug!("Opening in-memory memory store");
        Self::build(|| Ok(Connection::open_in_memory()?))
    }

    fn build<F>(connect: F) -> Result<Self, StoreError>
    where
        F: Fn() -> Result<Connection, StoreError>,
    {
        let open = |table: Table| -> Result<Mutex<Connection>, StoreError> {
            let conn = connect()?;
            schema::init_table(&conn, table)?;
            Ok(Mutex::new(conn))
        };

        Ok(Self {
            config: open(Table::Config)?,
            activity: open(Table::Activity)?,
            conversations: open(Table::Conversations)?,
            seen: open(Table::SeenItems)?,
            subscriptions: open(Table::Subscriptions)?,
        })
    }

    fn lock<'a>(
        conn: &'a Mutex<Connection>,
        table: &'static str,
    ) -> Result<MutexGuard<'a, Connection>, StoreError> {
        conn.lock().map_err(|_| StoreError::LockPoisoned(table))
    }

    // =========================================================================
    // Config
    // =========================================================================

    pub fn get_config<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let conn = Self::lock(&self.config, "config")?;
        let raw: Option<String> = conn
            .query_row("SELECT value FROM config WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn set_config<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)?;
        let conn = Self::lock(&self.config, "config")?;
        conn.execute(
            "INSERT INTO config (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, raw, now()],
        )?;
        Ok(())
    }

    /// Write `value` only if `key` is absent. Returns whether it was written.
    pub fn set_config_once<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<bool, StoreError> {
        let raw = serde_json::to_string(value)?;
        let conn = Self::lock(&self.config, "config")?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO config (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, raw, now()],
        )?;
        Ok(inserted == 1)
    }

    pub fn delete_config(&self, key: &str) -> Result<bool, StoreError> {
        let conn = Self::lock(&self.config, "config")?;
        Ok(conn.execute("DELETE FROM config WHERE key = ?1", [key])? == 1)
    }

    // =========================================================================
    // Seen items
    // =========================================================================

    /// Record an item as seen. Returns `false` if it already was.
    pub fn mark_seen(&self, item_id: &str) -> Result<bool, StoreError> {
        let conn = Self::lock(&self.seen, "seen_items")?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO seen_items (item_id, seen_at) VALUES (?1, ?2)",
            params![item_id, now()],
        )?;
        Ok(inserted == 1)
    }

    pub fn is_seen(&self, item_id: &str) -> Result<bool, StoreError> {
        let conn = Self::lock(&self.seen, "seen_items")?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM seen_items WHERE item_id = ?1",
                [item_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn seen_count(&self) -> Result<u64, StoreError> {
        let conn = Self::lock(&self.seen, "seen_items")?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM seen_items", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Forget items seen before `cutoff`
    pub fn prune_seen(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = Self::lock(&self.seen, "seen_items")?;
        let removed = conn.execute(
            "DELETE FROM seen_items WHERE seen_at < ?1",
            [format_time(cutoff)],
        )?;
        if removed > 0 {
            debug!(removed, "Pruned seen items");
        }
        Ok(removed)
    }

    // =========================================================================
    // Activity
    // =========================================================================

    pub fn log_activity(&self, kind: ActivityKind, details: Value) -> Result<ActivityEntry, StoreError> {
        let entry = ActivityEntry {
            id: format!("{}_{}", kind.as_str(), uuid::Uuid::new_v4().simple()),
            kind,
            timestamp: now(),
            details,
        };
        let conn = Self::lock(&self.activity, "activity_log")?;
        conn.execute(
            "INSERT INTO activity_log (id, kind, timestamp, details) VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.id,
                kind.as_str(),
                entry.timestamp,
                serde_json::to_string(&entry.details)?
            ],
        )?;
        Ok(entry)
    }

    /// Most recent entries first
    pub fn recent_activity(&self, limit: usize) -> Result<Vec<ActivityEntry>, StoreError> {
        let conn = Self::lock(&self.activity, "activity_log")?;
        let mut stmt = conn.prepare(
            "SELECT id, kind, timestamp, details FROM activity_log ORDER BY seq DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, kind, timestamp, details) = row?;
            let Some(kind) = ActivityKind::parse(&kind) else {
                continue;
            };
            entries.push(ActivityEntry {
                id,
                kind,
                timestamp,
                details: serde_json::from_str(&details)?,
            });
        }
        Ok(entries)
    }

    pub fn activity_stats(&self) -> Result<ActivityStats, StoreError> {
        let conn = Self::lock(&self.activity, "activity_log")?;
        let mut stmt = conn.prepare("SELECT kind, COUNT(*) FROM activity_log GROUP BY kind")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut stats = ActivityStats::default();
        for row in rows {
            let (kind, count) = row?;
            let count = count as u64;
            match ActivityKind::parse(&kind) {
                Some(ActivityKind::Post) => stats.posts = count,
                Some(ActivityKind::Comment) => stats.comments = count,
                Some(ActivityKind::Upvote) => stats.upvotes = count,
                Some(ActivityKind::Downvote) => stats.downvotes = count,
                None => {}
            }
        }
        Ok(stats)
    }

    // =========================================================================
    // Conversations
    // =========================================================================

    pub fn append_conversation(
        &self,
        thread_id: &str,
        role: Role,
        author: &str,
        content: &str,
    ) -> Result<(), StoreError> {
        let conn = Self::lock(&self.conversations, "conversations")?;
        conn.execute(
            "INSERT INTO conversations (thread_id, role, author, content, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![thread_id, role.as_str(), author, content, now()],
        )?;
        Ok(())
    }

    /// All turns of a thread, oldest first
    pub fn conversation(&self, thread_id: &str) -> Result<Vec<ConversationMessage>, StoreError> {
        let conn = Self::lock(&self.conversations, "conversations")?;
        let mut stmt = conn.prepare(
            "SELECT thread_id, role, author, content, timestamp FROM conversations
             WHERE thread_id = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map([thread_id], conversation_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn all_conversations(&self) -> Result<Vec<ConversationMessage>, StoreError> {
        let conn = Self::lock(&self.conversations, "conversations")?;
        let mut stmt = conn.prepare(
            "SELECT thread_id, role, author, content, timestamp FROM conversations ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map([], conversation_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Returns `false` if already subscribed
    pub fn subscribe(
        &self,
        name: &str,
        display_name: Option<&str>,
        description: Option<&str>,
        source: SubscriptionSource,
    ) -> Result<bool, StoreError> {
        let conn = Self::lock(&self.subscriptions, "subscriptions")?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO subscriptions (name, display_name, description, source, subscribed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![name, display_name, description, source.as_str(), now()],
        )?;
        Ok(inserted == 1)
    }

    pub fn unsubscribe(&self, name: &str) -> Result<bool, StoreError> {
        let conn = Self::lock(&self.subscriptions, "subscriptions")?;
        Ok(conn.execute("DELETE FROM subscriptions WHERE name = ?1", [name])? == 1)
    }

    pub fn subscriptions(&self) -> Result<Vec<Subscription>, StoreError> {
        let conn = Self::lock(&self.subscriptions, "subscriptions")?;
        let mut stmt = conn.prepare(
            "SELECT name, display_name, description, source, subscribed_at
             FROM subscriptions ORDER BY subscribed_at ASC, name ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Subscription {
                name: row.get(0)?,
                display_name: row.get(1)?,
                description: row.get(2)?,
                source: SubscriptionSource::parse(&row.get::<_, String>(3)?),
                subscribed_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn subscribed_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.subscriptions()?.into_iter().map(|s| s.name).collect())
    }

    // =========================================================================
    // Bulk
    // =========================================================================

    /// Remove all rows from every table
    pub fn clear_all(&self) -> Result<(), StoreError> {
        let tables = [
            (&self.config, Table::Config),
            (&self.activity, Table::Activity),
            (&self.conversations, Table::Conversations),
            (&self.seen, Table::SeenItems),
            (&self.subscriptions, Table::Subscriptions),
        ];
        for (conn, table) in tables {
            let conn = Self::lock(conn, table.name())?;
            conn.execute(&format!("DELETE FROM {}", table.name()), [])?;
        }
        info!("Memory store cleared");
        Ok(())
    }

    /// Snapshot of everything except secrets
    pub fn export_state(&self) -> Result<MemoryExport, StoreError> {
        let config = {
            let conn = Self::lock(&self.config, "config")?;
            let mut stmt = conn.prepare("SELECT key, value FROM config ORDER BY key")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut config = BTreeMap::new();
            for row in rows {
                let (key, raw) = row?;
                if keys::SECRET.contains(&key.as_str()) {
                    continue;
                }
                config.insert(key, serde_json::from_str(&raw)?);
            }
            config
        };

        Ok(MemoryExport {
            exported_at: now(),
            config,
            activity: self.recent_activity(usize::MAX >> 1)?,
            conversations: self.all_conversations()?,
            subscriptions: self.subscriptions()?,
            seen_items: self.seen_count()?,
        })
    }
}

fn conversation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationMessage> {
    Ok(ConversationMessage {
        thread_id: row.get(0)?,
        role: Role::parse(&row.get::<_, String>(1)?),
        author: row.get(2)?,
        content: row.get(3)?,
        timestamp: row.get(4)?,
    })
}

/// Fixed-width UTC timestamps so lexical order matches time order
pub fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now() -> String {
    format_time(Utc::now())
}
