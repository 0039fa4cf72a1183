use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Open a connection to the database file with the settings every manager expects.
pub fn open(path: &str) -> Result<Connection> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
    init_db(&conn)?;
    Ok(conn)
}

/// Initialise the cronwell schema in `conn`.
///
/// Creates the registry, history and monitor tables (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS cluster_nodes (
            server              TEXT    NOT NULL COLLATE NOCASE,
            port                INTEGER NOT NULL,
            instance_id         TEXT    NOT NULL,
            cluster_port        INTEGER NOT NULL,
            join_date           TEXT    NOT NULL,   -- RFC 3339
            health_check_date   TEXT    NOT NULL,   -- RFC 3339
            PRIMARY KEY (server, port)
        ) STRICT;

        CREATE TABLE IF NOT EXISTS job_instance_log (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            instance_id     TEXT    NOT NULL UNIQUE,
            job_id          TEXT    NOT NULL,
            job_name        TEXT    NOT NULL,
            job_group       TEXT    NOT NULL,
            trigger_id      TEXT    NOT NULL,
            trigger_name    TEXT    NOT NULL,
            trigger_group   TEXT    NOT NULL,
            server_name     TEXT    NOT NULL,
            data            TEXT,
            start_date      TEXT    NOT NULL,
            end_date        TEXT,
            duration_ms     INTEGER,
            status          TEXT    NOT NULL DEFAULT 'running',
            effected_rows   INTEGER,
            log             TEXT,
            exception       TEXT,
            retry           INTEGER NOT NULL DEFAULT 0,
            is_stopped      INTEGER NOT NULL DEFAULT 0
        ) STRICT;

        -- Counter monitors: most recent runs of one job
        CREATE INDEX IF NOT EXISTS idx_history_job
            ON job_instance_log (job_group, job_name, id);
        CREATE INDEX IF NOT EXISTS idx_history_start ON job_instance_log (start_date);

        CREATE TABLE IF NOT EXISTS monitor_actions (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            title           TEXT    NOT NULL,
            event           TEXT    NOT NULL,
            job_group       TEXT,               -- NULL = any group
            job_name        TEXT,               -- NULL = any job
            hook            TEXT    NOT NULL,
            group_id        INTEGER NOT NULL,
            event_argument  TEXT,
            active          INTEGER NOT NULL DEFAULT 1
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_monitor_event ON monitor_actions (event, active);

        CREATE TABLE IF NOT EXISTS monitor_alerts (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            monitor_id          INTEGER NOT NULL,
            monitor_title       TEXT    NOT NULL,
            event               TEXT    NOT NULL,
            job_group           TEXT,
            job_name            TEXT,
            fire_instance_id    TEXT,
            hook                TEXT    NOT NULL,
            group_id            INTEGER NOT NULL,
            has_error           INTEGER NOT NULL,
            error_message       TEXT,
            alert_date          TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_alerts_date ON monitor_alerts (alert_date);
        ",
    )?;
    Ok(())
}

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text.
pub fn to_db_time(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn from_db_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {s:?}: {e}")))
}

/// Row-mapper flavour of [`from_db_time`].
pub(crate) fn row_time(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    from_db_time(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn row_opt_time(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        from_db_time(&s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}

/// Parse a `Display`/`FromStr` enum stored as text.
pub(crate) fn row_enum<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(StoreError::Corrupt(e)),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_db_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
    }

    #[test]
    fn db_time_sorts_lexicographically() {
        let a = Utc::now();
        let b = a + chrono::Duration::milliseconds(1500);
        assert!(to_db_time(&a) < to_db_time(&b));
        assert_eq!(from_db_time(&to_db_time(&a)).unwrap().timestamp_millis(), a.timestamp_millis());
    }
}
