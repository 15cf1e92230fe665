//! Schema migrations for the cache database.
//!
//! Applied versions are recorded in `_migrations`; on open, every entry of
//! [`MIGRATIONS`] above the recorded maximum runs once, in order.

use std::num::ParseIntError;

use super::Error;
use tokio_rusqlite::{Connection, params};

/// (version, SQL) pairs. Versions are increasing integers.
const MIGRATIONS: &[(&str, &str)] = &[
    ("1", include_str!("../../migrations/001_cache_storage.sql")),
    ("2", include_str!("../../migrations/002_active_store.sql")),
];

/// Bring the schema up to the latest version.
pub async fn run(conn: &Connection) -> Result<(), Error> {
    conn.call(|conn| -> Result<(), Error> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current: i64 = conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))?;

        let pending = MIGRATIONS
            .iter()
            .map(|(version, sql)| {
                version
                    .parse::<i64>()
                    .map(|v| (v, *sql))
                    .map_err(|e: ParseIntError| Error::MigrationFailed(format!("bad version {version}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|(version, _)| *version > current);

        for (version, sql) in pending {
            let tx = conn.transaction()?;
            tx.execute_batch(sql)
                .map_err(|e| Error::MigrationFailed(format!("version {version}: {e}")))?;
            tx.execute(
                "INSERT INTO _migrations (version, applied_at) VALUES (?1, ?2)",
                params![version, chrono::Utc::now().to_rfc3339()],
            )?;
            tx.commit()?;
            tracing::debug!(version, "applied cache storage migration");
        }

        Ok(())
    })
    .await
    .map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn tables(conn: &Connection) -> Vec<String> {
        conn.call(|conn| {
            let mut stmt =
                conn.prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name")?;
            stmt.query_map([], |row| row.get(0))?.collect::<Result<Vec<String>, _>>()
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_fresh_database_gets_full_schema() {
        let conn = Connection::open_in_memory().await.unwrap();
        run(&conn).await.unwrap();

        assert_eq!(tables(&conn).await, vec!["_migrations", "active_store", "entries", "stores"]);
    }

    #[tokio::test]
    async fn test_rerun_applies_nothing() {
        let conn = Connection::open_in_memory().await.unwrap();
        run(&conn).await.unwrap();
        run(&conn).await.unwrap();

        let count: i64 = conn
            .call(|conn| conn.query_row("SELECT COUNT(*) FROM _migrations", [], |row| row.get(0)))
            .await
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);
    }
}
