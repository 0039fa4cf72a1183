use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use cronwell_core::monitor::{MonitorAction, MonitorAlert, MonitorEvent};
use cronwell_core::ports::MonitorStore;
use rusqlite::{params, Connection};
use tracing::instrument;

use crate::db::{row_enum, to_db_time};
use crate::error::{Result, StoreError};

const SELECT_ACTIONS: &str = "SELECT id, title, event, job_group, job_name, hook, group_id,
        event_argument, active
     FROM monitor_actions";

/// Monitor actions and alert log.
pub struct MonitorManager {
    db: Mutex<Connection>,
}

impl MonitorManager {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }

    #[instrument(skip(self))]
    pub fn get_monitor_actions(&self) -> Result<Vec<MonitorAction>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!("{SELECT_ACTIONS} ORDER BY id"))?;
        let rows = stmt.query_map([], row_to_action)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    #[instrument(skip(self), fields(event = %event))]
    pub fn get_monitor_actions_for_event(&self, event: MonitorEvent) -> Result<Vec<MonitorAction>> {
        let db = self.conn()?;
        let mut stmt =
            db.prepare(&format!("{SELECT_ACTIONS} WHERE event = ?1 AND active = 1 ORDER BY id"))?;
        let rows = stmt.query_map(params![event.as_str()], row_to_action)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    #[instrument(skip(self))]
    pub fn get_monitor_action(&self, id: i64) -> Result<Option<MonitorAction>> {
        let db = self.conn()?;
        match db.query_row(
            &format!("{SELECT_ACTIONS} WHERE id = ?1"),
            params![id],
            row_to_action,
        ) {
            Ok(a) => Ok(Some(a)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Insert a new action and return its id. The action's own `id` is ignored.
    #[instrument(skip(self, action), fields(title = %action.title, event = %action.event))]
    pub fn add_monitor_action(&self, action: &MonitorAction) -> Result<i64> {
        validate(action)?;
        let db = self.conn()?;
        db.execute(
            "INSERT INTO monitor_actions
             (title, event, job_group, job_name, hook, group_id, event_argument, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                action.title,
                action.event.as_str(),
                action.job_group,
                action.job_name,
                action.hook,
                action.group_id,
                action.event_argument,
                action.active,
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    #[instrument(skip(self, action), fields(id = action.id))]
    pub fn update_monitor_action(&self, action: &MonitorAction) -> Result<()> {
        validate(action)?;
        let db = self.conn()?;
        let changed = db.execute(
            "UPDATE monitor_actions
             SET title = ?2, event = ?3, job_group = ?4, job_name = ?5, hook = ?6,
                 group_id = ?7, event_argument = ?8, active = ?9
             WHERE id = ?1",
            params![
                action.id,
                action.title,
                action.event.as_str(),
                action.job_group,
                action.job_name,
                action.hook,
                action.group_id,
                action.event_argument,
                action.active,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "monitor action",
                key: action.id.to_string(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn delete_monitor_action(&self, id: i64) -> Result<()> {
        let db = self.conn()?;
        let changed = db.execute("DELETE FROM monitor_actions WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "monitor action",
                key: id.to_string(),
            });
        }
        Ok(())
    }

    /// An action with the same event, job scope, hook and distribution group exists.
    #[instrument(skip(self, action), fields(event = %action.event))]
    pub fn is_monitor_exists(&self, action: &MonitorAction) -> Result<bool> {
        let db = self.conn()?;
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM monitor_actions
             WHERE event = ?1 AND job_group IS ?2 AND job_name IS ?3
               AND hook = ?4 AND group_id = ?5",
            params![
                action.event.as_str(),
                action.job_group,
                action.job_name,
                action.hook,
                action.group_id,
            ],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    #[instrument(skip(self, alert), fields(monitor_id = alert.monitor_id, has_error = alert.has_error))]
    pub fn add_monitor_alert(&self, alert: &MonitorAlert) -> Result<i64> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO monitor_alerts
             (monitor_id, monitor_title, event, job_group, job_name, fire_instance_id,
              hook, group_id, has_error, error_message, alert_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                alert.monitor_id,
                alert.monitor_title,
                alert.event.as_str(),
                alert.job_group,
                alert.job_name,
                alert.fire_instance_id,
                alert.hook,
                alert.group_id,
                alert.has_error,
                alert.error_message,
                to_db_time(&alert.alert_date),
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    #[instrument(skip(self))]
    pub fn count_alerts(&self) -> Result<i64> {
        let db = self.conn()?;
        Ok(db.query_row("SELECT COUNT(*) FROM monitor_alerts", [], |r| r.get(0))?)
    }

    #[instrument(skip(self))]
    pub fn clear_alerts_older_than(&self, before: DateTime<Utc>) -> Result<usize> {
        let db = self.conn()?;
        let n = db.execute(
            "DELETE FROM monitor_alerts WHERE alert_date < ?1",
            params![to_db_time(&before)],
        )?;
        Ok(n)
    }
}

/// Counter and threshold events are useless without a numeric argument.
fn validate(action: &MonitorAction) -> Result<()> {
    if action.event.requires_argument() && action.argument_as_i64().is_none() {
        return Err(StoreError::InvalidArgument(format!(
            "monitor event {} requires a numeric event argument",
            action.event
        )));
    }
    if action.event.is_system() && (action.job_group.is_some() || action.job_name.is_some()) {
        return Err(StoreError::InvalidArgument(format!(
            "monitor event {} is not scoped to a job",
            action.event
        )));
    }
    Ok(())
}

impl MonitorStore for MonitorManager {
    fn get_monitor_actions(&self) -> cronwell_core::Result<Vec<MonitorAction>> {
        Ok(MonitorManager::get_monitor_actions(self)?)
    }

    fn get_monitor_actions_for_event(
        &self,
        event: MonitorEvent,
    ) -> cronwell_core::Result<Vec<MonitorAction>> {
        Ok(MonitorManager::get_monitor_actions_for_event(self, event)?)
    }

    fn get_monitor_action(&self, id: i64) -> cronwell_core::Result<Option<MonitorAction>> {
        Ok(MonitorManager::get_monitor_action(self, id)?)
    }

    fn add_monitor_action(&self, action: &MonitorAction) -> cronwell_core::Result<i64> {
        Ok(MonitorManager::add_monitor_action(self, action)?)
    }

    fn update_monitor_action(&self, action: &MonitorAction) -> cronwell_core::Result<()> {
        Ok(MonitorManager::update_monitor_action(self, action)?)
    }

    fn delete_monitor_action(&self, id: i64) -> cronwell_core::Result<()> {
        Ok(MonitorManager::delete_monitor_action(self, id)?)
    }

    fn is_monitor_exists(&self, action: &MonitorAction) -> cronwell_core::Result<bool> {
        Ok(MonitorManager::is_monitor_exists(self, action)?)
    }

    fn add_monitor_alert(&self, alert: &MonitorAlert) -> cronwell_core::Result<i64> {
        Ok(MonitorManager::add_monitor_alert(self, alert)?)
    }

    fn clear_alerts_older_than(&self, before: DateTime<Utc>) -> cronwell_core::Result<usize> {
        Ok(MonitorManager::clear_alerts_older_than(self, before)?)
    }
}

fn row_to_action(row: &rusqlite::Row<'_>) -> rusqlite::Result<MonitorAction> {
    Ok(MonitorAction {
        id: row.get(0)?,
        title: row.get(1)?,
        event: row_enum(row, 2)?,
        job_group: row.get(3)?,
        job_name: row.get(4)?,
        hook: row.get(5)?,
        group_id: row.get(6)?,
        event_argument: row.get(7)?,
        active: row.get(8)?,
    })
}
