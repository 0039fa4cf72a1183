use rusqlite::Connection;

use crate::error::Result;

/// Initialise the trigger clock schema in `conn`.
///
/// Creates the `jobs` and `triggers` tables (idempotent) and an index on
/// `(state, next_fire)` so the polling query stays cheap with many triggers.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            job_group           TEXT    NOT NULL,
            job_name            TEXT    NOT NULL,
            id                  TEXT    NOT NULL,
            kind                TEXT    NOT NULL,   -- JSON-encoded JobKind
            description         TEXT,
            concurrent          INTEGER NOT NULL DEFAULT 1,
            log_retention_days  INTEGER,
            data                TEXT    NOT NULL,   -- JSON object
            created_at          TEXT    NOT NULL,
            updated_at          TEXT    NOT NULL,
            PRIMARY KEY (job_group, job_name)
        ) STRICT;

        CREATE TABLE IF NOT EXISTS triggers (
            trigger_group       TEXT    NOT NULL,
            trigger_name        TEXT    NOT NULL,
            id                  TEXT    NOT NULL,
            job_group           TEXT    NOT NULL,
            job_name            TEXT    NOT NULL,
            schedule            TEXT    NOT NULL,   -- JSON-encoded Schedule
            state               TEXT    NOT NULL DEFAULT 'normal',
            timeout_secs        INTEGER,
            retry_span_secs     INTEGER,
            max_retries         INTEGER,
            data                TEXT    NOT NULL,   -- JSON object
            next_fire           TEXT,               -- RFC 3339 or NULL
            previous_fire       TEXT,
            created_at          TEXT    NOT NULL,
            PRIMARY KEY (trigger_group, trigger_name)
        ) STRICT;

        -- Polling: WHERE state = 'normal' AND next_fire <= ?
        CREATE INDEX IF NOT EXISTS idx_triggers_due ON triggers (state, next_fire);
        CREATE INDEX IF NOT EXISTS idx_triggers_job ON triggers (job_group, job_name);
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_db_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('jobs', 'triggers')",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }
}
