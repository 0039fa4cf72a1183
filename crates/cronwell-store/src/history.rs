use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use cronwell_core::history::{
    ExecutionStatus, HistoryCompletion, HistoryLogEntry, HistoryProgress, NewHistoryEntry,
};
use cronwell_core::ports::HistoryStore;
use cronwell_core::types::JobKey;
use rusqlite::{params, Connection};
use tracing::{debug, instrument};

use crate::db::{row_enum, row_opt_time, row_time, to_db_time};
use crate::error::{Result, StoreError};

const SELECT_COLUMNS: &str = "SELECT id, instance_id, job_id, job_name, job_group, trigger_id,
        trigger_name, trigger_group, server_name, data, start_date, end_date, duration_ms,
        status, effected_rows, log, exception, retry, is_stopped
     FROM job_instance_log";

/// Execution history backed by the `job_instance_log` table.
///
/// A row is inserted as `running` and finalized exactly once; every
/// terminal write is guarded by `status = 'running'`.
pub struct HistoryManager {
    db: Mutex<Connection>,
}

impl HistoryManager {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Insert the `running` row for a fire. Fields are clipped to column widths.
    #[instrument(skip(self, entry), fields(fire_instance_id = %entry.instance_id))]
    pub fn create_job_instance_log(&self, entry: &NewHistoryEntry) -> Result<i64> {
        let e = entry.clone().clipped();
        let db = self.conn()?;
        db.execute(
            "INSERT INTO job_instance_log
             (instance_id, job_id, job_name, job_group, trigger_id, trigger_name,
              trigger_group, server_name, data, start_date, status, retry)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'running', ?11)",
            params![
                e.instance_id,
                e.job_id,
                e.job_name,
                e.job_group,
                e.trigger_id,
                e.trigger_name,
                e.trigger_group,
                e.server_name,
                e.data,
                to_db_time(&e.start_date),
                e.retry,
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Apply the terminal update of a fire.
    #[instrument(skip(self, c), fields(fire_instance_id = %c.instance_id, status = %c.status))]
    pub fn update_history_job_run_log(&self, c: &HistoryCompletion) -> Result<()> {
        if !c.status.is_terminal() {
            return Err(StoreError::InvalidArgument(format!(
                "completion of {} must carry a terminal status",
                c.instance_id
            )));
        }
        let db = self.conn()?;
        let changed = db.execute(
            "UPDATE job_instance_log
             SET status = ?2, end_date = ?3, duration_ms = ?4, effected_rows = ?5,
                 log = ?6, exception = ?7, is_stopped = ?8
             WHERE instance_id = ?1 AND status = 'running'",
            params![
                c.instance_id,
                c.status.to_string(),
                to_db_time(&c.end_date),
                c.duration_ms,
                c.effected_rows,
                c.log,
                c.exception,
                c.is_stopped,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::AlreadyFinalized {
                instance_id: c.instance_id.clone(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn set_job_instance_log_status(
        &self,
        instance_id: &str,
        status: ExecutionStatus,
    ) -> Result<()> {
        let db = self.conn()?;
        let changed = db.execute(
            "UPDATE job_instance_log SET status = ?2, end_date = ?3
             WHERE instance_id = ?1 AND status = 'running'",
            params![instance_id, status.to_string(), to_db_time(&Utc::now())],
        )?;
        if changed == 0 {
            return Err(StoreError::AlreadyFinalized {
                instance_id: instance_id.to_string(),
            });
        }
        Ok(())
    }

    /// Mid-run flush. A row that already finished is left alone.
    #[instrument(skip(self, p), fields(fire_instance_id = %p.instance_id))]
    pub fn persist_job_instance_data(&self, p: &HistoryProgress) -> Result<bool> {
        let db = self.conn()?;
        let changed = db.execute(
            "UPDATE job_instance_log SET log = ?2, exception = ?3, duration_ms = ?4
             WHERE instance_id = ?1 AND status = 'running'",
            params![p.instance_id, p.log, p.exception, p.duration_ms],
        )?;
        Ok(changed > 0)
    }

    #[instrument(skip(self))]
    pub fn get_history_by_instance_id(&self, instance_id: &str) -> Result<Option<HistoryLogEntry>> {
        let db = self.conn()?;
        match db.query_row(
            &format!("{SELECT_COLUMNS} WHERE instance_id = ?1"),
            params![instance_id],
            row_to_entry,
        ) {
            Ok(e) => Ok(Some(e)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Length of the current failure streak, capped at `limit`.
    ///
    /// Running and vetoed rows neither extend nor break the streak.
    #[instrument(skip(self), fields(job = %job))]
    pub fn count_fails_in_row(&self, job: &JobKey, limit: u32) -> Result<u32> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT status FROM job_instance_log
             WHERE job_group = ?1 AND job_name = ?2 AND status NOT IN ('running', 'veto')
             ORDER BY id DESC LIMIT ?3",
        )?;
        let statuses = stmt
            .query_map(params![job.group, job.name, limit as i64], |r| {
                row_enum::<ExecutionStatus>(r, 0)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let streak = statuses
            .iter()
            .take_while(|s| **s == ExecutionStatus::Fail)
            .count() as u32;
        debug!(streak, "fail streak");
        Ok(streak)
    }

    #[instrument(skip(self), fields(job = %job))]
    pub fn count_fails_since(&self, job: &JobKey, since: DateTime<Utc>) -> Result<u32> {
        let db = self.conn()?;
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM job_instance_log
             WHERE job_group = ?1 AND job_name = ?2 AND status = 'fail' AND start_date >= ?3",
            params![job.group, job.name, to_db_time(&since)],
            |r| r.get(0),
        )?;
        Ok(count as u32)
    }

    /// Delete finished rows that started before `before`.
    #[instrument(skip(self))]
    pub fn clear_history_older_than(&self, before: DateTime<Utc>) -> Result<usize> {
        let db = self.conn()?;
        let n = db.execute(
            "DELETE FROM job_instance_log WHERE start_date < ?1 AND status != 'running'",
            params![to_db_time(&before)],
        )?;
        Ok(n)
    }

    #[instrument(skip(self), fields(job = %job))]
    pub fn clear_job_history_older_than(&self, job: &JobKey, before: DateTime<Utc>) -> Result<usize> {
        let db = self.conn()?;
        let n = db.execute(
            "DELETE FROM job_instance_log
             WHERE job_group = ?1 AND job_name = ?2 AND start_date < ?3 AND status != 'running'",
            params![job.group, job.name, to_db_time(&before)],
        )?;
        Ok(n)
    }
}

impl HistoryStore for HistoryManager {
    fn create_job_instance_log(&self, entry: &NewHistoryEntry) -> cronwell_core::Result<i64> {
        Ok(HistoryManager::create_job_instance_log(self, entry)?)
    }

    fn update_history_job_run_log(&self, completion: &HistoryCompletion) -> cronwell_core::Result<()> {
        Ok(HistoryManager::update_history_job_run_log(self, completion)?)
    }

    fn set_job_instance_log_status(
        &self,
        instance_id: &str,
        status: ExecutionStatus,
    ) -> cronwell_core::Result<()> {
        Ok(HistoryManager::set_job_instance_log_status(self, instance_id, status)?)
    }

    fn persist_job_instance_data(&self, progress: &HistoryProgress) -> cronwell_core::Result<bool> {
        Ok(HistoryManager::persist_job_instance_data(self, progress)?)
    }

    fn get_history_by_instance_id(
        &self,
        instance_id: &str,
    ) -> cronwell_core::Result<Option<HistoryLogEntry>> {
        Ok(HistoryManager::get_history_by_instance_id(self, instance_id)?)
    }

    fn count_fails_in_row(&self, job: &JobKey, limit: u32) -> cronwell_core::Result<u32> {
        Ok(HistoryManager::count_fails_in_row(self, job, limit)?)
    }

    fn count_fails_since(&self, job: &JobKey, since: DateTime<Utc>) -> cronwell_core::Result<u32> {
        Ok(HistoryManager::count_fails_since(self, job, since)?)
    }

    fn clear_history_older_than(&self, before: DateTime<Utc>) -> cronwell_core::Result<usize> {
        Ok(HistoryManager::clear_history_older_than(self, before)?)
    }

    fn clear_job_history_older_than(
        &self,
        job: &JobKey,
        before: DateTime<Utc>,
    ) -> cronwell_core::Result<usize> {
        Ok(HistoryManager::clear_job_history_older_than(self, job, before)?)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryLogEntry> {
    Ok(HistoryLogEntry {
        id: row.get(0)?,
        instance_id: row.get(1)?,
        job_id: row.get(2)?,
        job_name: row.get(3)?,
        job_group: row.get(4)?,
        trigger_id: row.get(5)?,
        trigger_name: row.get(6)?,
        trigger_group: row.get(7)?,
        server_name: row.get(8)?,
        data: row.get(9)?,
        start_date: row_time(row, 10)?,
        end_date: row_opt_time(row, 11)?,
        duration_ms: row.get(12)?,
        status: row_enum(row, 13)?,
        effected_rows: row.get(14)?,
        log: row.get(15)?,
        exception: row.get(16)?,
        retry: row.get(17)?,
        is_stopped: row.get(18)?,
    })
}
