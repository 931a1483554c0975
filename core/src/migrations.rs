use rusqlite::Connection;
use tracing::{debug, info};

/// Schema migrations in the order they apply: version and SQL.
pub const MIGRATIONS: &[(i64, &str)] = &[
    (1, include_str!("../migrations/0001_initial.sql")),
    (2, include_str!("../migrations/0002_products.sql")),
];

/// Highest version known to this build.
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|(version, _)| *version).unwrap_or(0)
}

pub fn current_version(conn: &Connection) -> Result<i64, rusqlite::Error> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
}

/// Applies every migration newer than the recorded version, each in its own
/// transaction. Returns the version that failed along with the error.
pub fn ensure_schema(conn: &Connection) -> Result<i64, (i64, rusqlite::Error)> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (version INTEGER PRIMARY KEY, applied_at INTEGER NOT NULL)",
        [],
    )
    .map_err(|e| (0, e))?;
    let current = current_version(conn).map_err(|e| (0, e))?;

    for &(version, sql) in MIGRATIONS {
        if version <= current {
            continue;
        }
        debug!(version, "applying migration");
        apply(conn, version, sql).map_err(|e| (version, e))?;
        info!(version, "migration applied");
    }

    Ok(latest_version().max(current))
}

fn apply(conn: &Connection, version: i64, sql: &str) -> Result<(), rusqlite::Error> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(sql)?;
    tx.execute(
        "INSERT INTO schema_migrations(version, applied_at) VALUES (?, strftime('%s','now'))",
        [version],
    )?;
    tx.commit()
}
