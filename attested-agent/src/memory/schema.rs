//! Database schema definitions
//!
//! Each logical table lives behind its own connection so writes only
//! serialize within a table. Every connection creates just the table it owns
//! and records its version in `schema_version`.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::StoreError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Config,
    Activity,
    Conversations,
    SeenItems,
    Subscriptions,
}

impl Table {
    pub const ALL: [Table; 5] = [
        Table::Config,
        Table::Activity,
        Table::Conversations,
        Table::SeenItems,
        Table::Subscriptions,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Config => "config",
            Table::Activity => "activity_log",
            Table::Conversations => "conversations",
            Table::SeenItems => "seen_items",
            Table::Subscriptions => "subscriptions",
        }
    }

    fn ddl(&self) -> &'static str {
        match self {
            Table::Config => CONFIG_SCHEMA,
            Table::Activity => ACTIVITY_SCHEMA,
            Table::Conversations => CONVERSATIONS_SCHEMA,
            Table::SeenItems => SEEN_ITEMS_SCHEMA,
            Table::Subscriptions => SUBSCRIPTIONS_SCHEMA,
        }
    }
}

/// Initialize one table on its connection
pub fn init_table(conn: &Connection, table: Table) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            tbl TEXT PRIMARY KEY,
            version INTEGER NOT NULL
        )",
        [],
    )?;

    let current: Option<i32> = conn
        .query_row(
            "SELECT version FROM schema_version WHERE tbl = ?1",
            [table.name()],
            |row| row.get(0),
        )
        .optional()?;

    match current {
        None => {
            info!(table = table.name(), "Creating table schema v{}", SCHEMA_VERSION);
            conn.execute_batch(table.ddl())?;
            set_version(conn, table)?;
        }
        Some(version) if version < SCHEMA_VERSION => {
            info!(table = table.name(), "Migrating table from v{} to v{}", version, SCHEMA_VERSION);
            // Columns are only ever added; re-running the DDL creates anything missing
            conn.execute_batch(table.ddl())?;
            set_version(conn, table)?;
        }
        Some(version) => {
            debug!(table = table.name(), "Table schema is up to date (v{})", version);
        }
    }

    Ok(())
}

fn set_version(conn: &Connection, table: Table) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO schema_version (tbl, version) VALUES (?1, ?2)
         ON CONFLICT(tbl) DO UPDATE SET version = excluded.version",
        params![table.name(), SCHEMA_VERSION],
    )?;
    Ok(())
}

const CONFIG_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS config (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

const ACTIVITY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS activity_log (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    details TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_activity_log_kind ON activity_log(kind);
CREATE INDEX IF NOT EXISTS idx_activity_log_timestamp ON activity_log(timestamp);
"#;

const CONVERSATIONS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    thread_id TEXT NOT NULL,
    role TEXT NOT NULL,
    author TEXT NOT NULL,
    content TEXT NOT NULL,
    timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_conversations_thread ON conversations(thread_id);
"#;

const SEEN_ITEMS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS seen_items (
    item_id TEXT PRIMARY KEY,
    seen_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_seen_items_seen_at ON seen_items(seen_at);
"#;

const SUBSCRIPTIONS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS subscriptions (
    name TEXT PRIMARY KEY,
    display_name TEXT,
    description TEXT,
    source TEXT NOT NULL,
    subscribed_at TEXT NOT NULL
);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        for table in Table::ALL {
            init_table(&conn, table).unwrap();
            init_table(&conn, table).unwrap();
        }
        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(versions, 5);
    }
}
