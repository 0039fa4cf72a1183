use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use cronwell_core::job::{JobDefinition, JobKind, NewTrigger, Schedule, TriggerDetails, TriggerState};
use cronwell_core::ports::TriggerClock;
use cronwell_core::types::{generate_id, is_reserved_key, DataMap, JobKey, TriggerKey};
use cronwell_store::db::{from_db_time, to_db_time};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, instrument};

use crate::db::init_db;
use crate::error::{Result, SchedulerError};
use crate::schedule::{compute_next_run, validate};

const SELECT_JOBS: &str = "SELECT job_group, job_name, id, kind, description, concurrent,
        log_retention_days, data
     FROM jobs";

const SELECT_TRIGGERS: &str = "SELECT trigger_group, trigger_name, id, job_group, job_name,
        schedule, state, timeout_secs, retry_span_secs, max_retries, data, next_fire,
        previous_fire, created_at
     FROM triggers";

/// SQLite-backed trigger clock: job definitions, triggers and their
/// pause state. The engine polls [`SqliteTriggerClock::due_triggers`].
pub struct SqliteTriggerClock {
    conn: Mutex<Connection>,
}

impl SqliteTriggerClock {
    /// Create the clock, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| SchedulerError::Poisoned)
    }

    /// Insert or replace a job definition.
    #[instrument(skip(self, job), fields(job = %job.key))]
    pub fn add_job(&self, job: &JobDefinition) -> Result<()> {
        let now = to_db_time(&Utc::now());
        let kind = to_json(&job.kind)?;
        let data = to_json(&job.data)?;
        let db = self.conn()?;
        db.execute(
            "INSERT INTO jobs
             (job_group, job_name, id, kind, description, concurrent, log_retention_days,
              data, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
             ON CONFLICT (job_group, job_name) DO UPDATE SET
                kind = excluded.kind, description = excluded.description,
                concurrent = excluded.concurrent,
                log_retention_days = excluded.log_retention_days,
                data = excluded.data, updated_at = excluded.updated_at",
            params![
                job.key.group,
                job.key.name,
                job.id,
                kind,
                job.description,
                job.concurrent,
                job.log_retention_days,
                data,
                now,
            ],
        )?;
        info!("job saved");
        Ok(())
    }

    pub fn get_job(&self, key: &JobKey) -> Result<Option<JobDefinition>> {
        let db = self.conn()?;
        let job = db
            .query_row(
                &format!("{SELECT_JOBS} WHERE job_group = ?1 AND job_name = ?2"),
                params![key.group, key.name],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    pub fn list_jobs(&self) -> Result<Vec<JobDefinition>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!("{SELECT_JOBS} ORDER BY job_group, job_name"))?;
        let jobs = stmt
            .query_map([], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// Remove a job and all of its triggers.
    #[instrument(skip(self), fields(job = %key))]
    pub fn remove_job(&self, key: &JobKey) -> Result<()> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        tx.execute(
            "DELETE FROM triggers WHERE job_group = ?1 AND job_name = ?2",
            params![key.group, key.name],
        )?;
        let n = tx.execute(
            "DELETE FROM jobs WHERE job_group = ?1 AND job_name = ?2",
            params![key.group, key.name],
        )?;
        tx.commit()?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound {
                key: key.to_string(),
            });
        }
        info!("job removed");
        Ok(())
    }

    /// Store a trigger for an existing job and compute its first fire time.
    #[instrument(skip(self, trigger), fields(trigger = %trigger.key, job = %trigger.job_key))]
    pub fn schedule_trigger(&self, trigger: &NewTrigger) -> Result<TriggerDetails> {
        validate(&trigger.schedule).map_err(SchedulerError::InvalidSchedule)?;
        if self.get_job(&trigger.job_key)?.is_none() {
            return Err(SchedulerError::JobNotFound {
                key: trigger.job_key.to_string(),
            });
        }

        let now = Utc::now();
        let next_fire = compute_next_run(&trigger.schedule, now);
        let details = TriggerDetails {
            key: trigger.key.clone(),
            id: generate_id(),
            job_key: trigger.job_key.clone(),
            schedule: trigger.schedule.clone(),
            state: if next_fire.is_some() {
                TriggerState::Normal
            } else {
                TriggerState::Error
            },
            timeout_secs: trigger.timeout_secs,
            retry_span_secs: trigger.retry_span_secs,
            max_retries: trigger.max_retries,
            data: trigger.data.clone(),
            next_fire,
            previous_fire: None,
            created_at: now,
        };

        let db = self.conn()?;
        db.execute(
            "INSERT OR REPLACE INTO triggers
             (trigger_group, trigger_name, id, job_group, job_name, schedule, state,
              timeout_secs, retry_span_secs, max_retries, data, next_fire, previous_fire,
              created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, NULL, ?13)",
            params![
                details.key.group,
                details.key.name,
                details.id,
                details.job_key.group,
                details.job_key.name,
                to_json(&details.schedule)?,
                details.state.to_string(),
                details.timeout_secs.map(|v| v as i64),
                details.retry_span_secs.map(|v| v as i64),
                details.max_retries,
                to_json(&details.data)?,
                details.next_fire.as_ref().map(to_db_time),
                to_db_time(&details.created_at),
            ],
        )?;
        info!(next_fire = ?details.next_fire, "trigger scheduled");
        Ok(details)
    }

    #[instrument(skip(self), fields(trigger = %key))]
    pub fn unschedule_trigger(&self, key: &TriggerKey) -> Result<()> {
        let db = self.conn()?;
        let n = db.execute(
            "DELETE FROM triggers WHERE trigger_group = ?1 AND trigger_name = ?2",
            params![key.group, key.name],
        )?;
        if n == 0 {
            return Err(SchedulerError::TriggerNotFound {
                key: key.to_string(),
            });
        }
        debug!("trigger unscheduled");
        Ok(())
    }

    pub fn get_trigger(&self, key: &TriggerKey) -> Result<Option<TriggerDetails>> {
        let db = self.conn()?;
        let trigger = db
            .query_row(
                &format!("{SELECT_TRIGGERS} WHERE trigger_group = ?1 AND trigger_name = ?2"),
                params![key.group, key.name],
                row_to_trigger,
            )
            .optional()?;
        Ok(trigger)
    }

    pub fn triggers_of_job(&self, job: &JobKey) -> Result<Vec<TriggerDetails>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!(
            "{SELECT_TRIGGERS} WHERE job_group = ?1 AND job_name = ?2
             ORDER BY trigger_group, trigger_name"
        ))?;
        let triggers = stmt
            .query_map(params![job.group, job.name], row_to_trigger)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(triggers)
    }

    pub fn trigger_state(&self, key: &TriggerKey) -> Result<TriggerState> {
        self.get_trigger(key)?
            .map(|t| t.state)
            .ok_or_else(|| SchedulerError::TriggerNotFound {
                key: key.to_string(),
            })
    }

    /// Only `normal` triggers are paused; other states are left as they are.
    #[instrument(skip(self), fields(trigger = %key))]
    pub fn pause_trigger(&self, key: &TriggerKey) -> Result<()> {
        self.trigger_state(key)?;
        let db = self.conn()?;
        db.execute(
            "UPDATE triggers SET state = 'paused'
             WHERE trigger_group = ?1 AND trigger_name = ?2 AND state = 'normal'",
            params![key.group, key.name],
        )?;
        info!("trigger paused");
        Ok(())
    }

    /// Resume a paused trigger. The next fire time is recomputed from now so
    /// fires missed while paused are skipped.
    #[instrument(skip(self), fields(trigger = %key))]
    pub fn resume_trigger(&self, key: &TriggerKey) -> Result<()> {
        let trigger = self
            .get_trigger(key)?
            .ok_or_else(|| SchedulerError::TriggerNotFound {
                key: key.to_string(),
            })?;
        if trigger.state != TriggerState::Paused {
            return Ok(());
        }
        let next = compute_next_run(&trigger.schedule, Utc::now());
        let state = if next.is_some() {
            TriggerState::Normal
        } else {
            TriggerState::Complete
        };
        let db = self.conn()?;
        db.execute(
            "UPDATE triggers SET state = ?1, next_fire = ?2
             WHERE trigger_group = ?3 AND trigger_name = ?4",
            params![state.to_string(), next.as_ref().map(to_db_time), key.group, key.name],
        )?;
        info!(next_fire = ?next, "trigger resumed");
        Ok(())
    }

    pub fn job_data(&self, job: &JobKey) -> Result<DataMap> {
        self.get_job(job)?
            .map(|j| j.data)
            .ok_or_else(|| SchedulerError::JobNotFound {
                key: job.to_string(),
            })
    }

    pub fn put_job_data(&self, job: &JobKey, key: &str, value: Option<&str>) -> Result<()> {
        let mut data = self.job_data(job)?;
        set_entry(&mut data, key, value);
        let db = self.conn()?;
        db.execute(
            "UPDATE jobs SET data = ?1, updated_at = ?2 WHERE job_group = ?3 AND job_name = ?4",
            params![to_json(&data)?, to_db_time(&Utc::now()), job.group, job.name],
        )?;
        Ok(())
    }

    pub fn put_trigger_data(&self, trigger: &TriggerKey, key: &str, value: Option<&str>) -> Result<()> {
        let mut data = self
            .get_trigger(trigger)?
            .map(|t| t.data)
            .ok_or_else(|| SchedulerError::TriggerNotFound {
                key: trigger.to_string(),
            })?;
        set_entry(&mut data, key, value);
        let db = self.conn()?;
        db.execute(
            "UPDATE triggers SET data = ?1 WHERE trigger_group = ?2 AND trigger_name = ?3",
            params![to_json(&data)?, trigger.group, trigger.name],
        )?;
        Ok(())
    }

    /// Every trigger whose fire time has arrived, oldest first.
    pub fn due_triggers(&self, now: DateTime<Utc>) -> Result<Vec<TriggerDetails>> {
        let db = self.conn()?;
        let mut stmt = db.prepare_cached(&format!(
            "{SELECT_TRIGGERS} WHERE state = 'normal' AND next_fire IS NOT NULL AND next_fire <= ?1
             ORDER BY next_fire"
        ))?;
        let due = stmt
            .query_map([to_db_time(&now)], row_to_trigger)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(due)
    }

    /// Claim the fire of a due trigger at `now` and advance it. A trigger
    /// with no further fire time is deleted when it belongs to a reserved
    /// group (retry, manual, resume) and marked complete otherwise.
    ///
    /// The write only applies while the row still holds the `next_fire`
    /// read by [`SqliteTriggerClock::due_triggers`], so of several nodes
    /// polling one database exactly one gets `true` and fires.
    pub fn mark_fired(&self, trigger: &TriggerDetails, now: DateTime<Utc>) -> Result<bool> {
        let Some(due_at) = trigger.next_fire.as_ref().map(to_db_time) else {
            return Ok(false);
        };
        let next = compute_next_run(&trigger.schedule, now);
        let db = self.conn()?;
        let changed = match next {
            None if is_reserved_key(&trigger.key.group) => db.execute(
                "DELETE FROM triggers
                 WHERE trigger_group = ?1 AND trigger_name = ?2
                   AND state = 'normal' AND next_fire = ?3",
                params![trigger.key.group, trigger.key.name, due_at],
            )?,
            _ => {
                let state = if next.is_some() {
                    TriggerState::Normal
                } else {
                    TriggerState::Complete
                };
                db.execute(
                    "UPDATE triggers SET state = ?1, next_fire = ?2, previous_fire = ?3
                     WHERE trigger_group = ?4 AND trigger_name = ?5
                       AND state = 'normal' AND next_fire = ?6",
                    params![
                        state.to_string(),
                        next.as_ref().map(to_db_time),
                        to_db_time(&now),
                        trigger.key.group,
                        trigger.key.name,
                        due_at,
                    ],
                )?
            }
        };
        if changed != 1 {
            debug!(trigger = %trigger.key, "fire already claimed elsewhere");
            return Ok(false);
        }
        debug!(trigger = %trigger.key, next_fire = ?next, "trigger fired");
        Ok(true)
    }
}

fn set_entry(data: &mut DataMap, key: &str, value: Option<&str>) {
    match value {
        Some(v) => {
            data.insert(key.to_string(), v.to_string());
        }
        None => {
            data.remove(key);
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))
}

fn decode_err(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn json_col<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| decode_err(idx, e))
}

fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| from_db_time(&s).map_err(|e| decode_err(idx, e)))
        .transpose()
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<JobDefinition> {
    let kind: JobKind = json_col(row, 3)?;
    Ok(JobDefinition {
        key: JobKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
        id: row.get(2)?,
        kind,
        description: row.get(4)?,
        concurrent: row.get(5)?,
        log_retention_days: row.get(6)?,
        data: json_col(row, 7)?,
    })
}

fn row_to_trigger(row: &Row<'_>) -> rusqlite::Result<TriggerDetails> {
    let schedule: Schedule = json_col(row, 5)?;
    let state_raw: String = row.get(6)?;
    let state = state_raw.parse::<TriggerState>().map_err(|e| {
        decode_err(6, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })?;
    let created_at = time_col(row, 13)?.ok_or(rusqlite::Error::InvalidColumnType(
        13,
        "created_at".into(),
        rusqlite::types::Type::Null,
    ))?;
    Ok(TriggerDetails {
        key: TriggerKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
        id: row.get(2)?,
        job_key: JobKey::new(row.get::<_, String>(3)?, row.get::<_, String>(4)?),
        schedule,
        state,
        timeout_secs: row.get::<_, Option<i64>>(7)?.map(|v| v as u64),
        retry_span_secs: row.get::<_, Option<i64>>(8)?.map(|v| v as u64),
        max_retries: row.get(9)?,
        data: json_col(row, 10)?,
        next_fire: time_col(row, 11)?,
        previous_fire: time_col(row, 12)?,
        created_at,
    })
}

impl TriggerClock for SqliteTriggerClock {
    fn add_job(&self, job: &JobDefinition) -> cronwell_core::Result<()> {
        Ok(SqliteTriggerClock::add_job(self, job)?)
    }
    fn get_job(&self, key: &JobKey) -> cronwell_core::Result<Option<JobDefinition>> {
        Ok(SqliteTriggerClock::get_job(self, key)?)
    }
    fn list_jobs(&self) -> cronwell_core::Result<Vec<JobDefinition>> {
        Ok(SqliteTriggerClock::list_jobs(self)?)
    }
    fn remove_job(&self, key: &JobKey) -> cronwell_core::Result<()> {
        Ok(SqliteTriggerClock::remove_job(self, key)?)
    }
    fn schedule_trigger(&self, trigger: &NewTrigger) -> cronwell_core::Result<TriggerDetails> {
        Ok(SqliteTriggerClock::schedule_trigger(self, trigger)?)
    }
    fn unschedule_trigger(&self, key: &TriggerKey) -> cronwell_core::Result<()> {
        Ok(SqliteTriggerClock::unschedule_trigger(self, key)?)
    }
    fn get_trigger(&self, key: &TriggerKey) -> cronwell_core::Result<Option<TriggerDetails>> {
        Ok(SqliteTriggerClock::get_trigger(self, key)?)
    }
    fn triggers_of_job(&self, job: &JobKey) -> cronwell_core::Result<Vec<TriggerDetails>> {
        Ok(SqliteTriggerClock::triggers_of_job(self, job)?)
    }
    fn trigger_state(&self, key: &TriggerKey) -> cronwell_core::Result<TriggerState> {
        Ok(SqliteTriggerClock::trigger_state(self, key)?)
    }
    fn pause_trigger(&self, key: &TriggerKey) -> cronwell_core::Result<()> {
        Ok(SqliteTriggerClock::pause_trigger(self, key)?)
    }
    fn resume_trigger(&self, key: &TriggerKey) -> cronwell_core::Result<()> {
        Ok(SqliteTriggerClock::resume_trigger(self, key)?)
    }
    fn job_data(&self, job: &JobKey) -> cronwell_core::Result<DataMap> {
        Ok(SqliteTriggerClock::job_data(self, job)?)
    }
    fn put_job_data(&self, job: &JobKey, key: &str, value: Option<&str>) -> cronwell_core::Result<()> {
        Ok(SqliteTriggerClock::put_job_data(self, job, key, value)?)
    }
    fn put_trigger_data(
        &self,
        trigger: &TriggerKey,
        key: &str,
        value: Option<&str>,
    ) -> cronwell_core::Result<()> {
        Ok(SqliteTriggerClock::put_trigger_data(self, trigger, key, value)?)
    }
}
