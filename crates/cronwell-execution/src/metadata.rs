use cronwell_protocol::lifecycle::ExceptionInfo;

const EXCEPTION_SEPARATOR_WIDTH: usize = 80;

/// A `put_job_data` / `put_trigger_data` call recorded during the run and
/// applied to the trigger clock when the run ends. `None` removes the key.
pub type DataUpdate = (String, Option<String>);

/// Mutable state of one running fire instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobExecutionMetadata {
    log: Vec<String>,
    exceptions: Vec<ExceptionInfo>,
    exceptions_truncated: bool,
    effected_rows: Option<i64>,
    progress: u8,
    reported_exception: Option<ExceptionInfo>,
    ambient_exception: Option<ExceptionInfo>,
    job_data: Vec<DataUpdate>,
    trigger_data: Vec<DataUpdate>,
}

impl JobExecutionMetadata {
    pub fn append_log(&mut self, line: impl Into<String>) {
        self.log.push(line.into());
    }

    /// Returns false when the list is already at `max_items`. The first
    /// dropped exception leaves a single note in the log.
    pub fn add_aggregate_exception(&mut self, exception: ExceptionInfo, max_items: usize) -> bool {
        if self.exceptions.len() >= max_items {
            if !self.exceptions_truncated {
                self.exceptions_truncated = true;
                self.log.push(format!(
                    "[warning] aggregate exception limit of {max_items} reached, further exceptions are dropped"
                ));
            }
            return false;
        }
        self.exceptions.push(exception);
        true
    }

    pub fn set_effected_rows(&mut self, value: i64) {
        self.effected_rows = Some(value);
    }

    pub fn increase_effected_rows(&mut self, delta: i64) {
        self.effected_rows = Some(self.effected_rows.unwrap_or(0).saturating_add(delta));
    }

    /// Values above 100 are clamped. Later calls overwrite earlier ones.
    pub fn update_progress(&mut self, progress: u8) {
        self.progress = progress.min(100);
    }

    pub fn update_progress_of(&mut self, current: i64, total: i64) {
        let progress = if total <= 0 {
            0
        } else {
            (current.max(0).saturating_mul(100) / total).clamp(0, 100)
        };
        self.progress = progress as u8;
    }

    /// First report wins; later reports are ignored.
    pub fn report_exception(&mut self, exception: ExceptionInfo) -> bool {
        if self.reported_exception.is_some() {
            return false;
        }
        self.reported_exception = Some(exception);
        true
    }

    /// Exception raised by the host (job error, timeout). Loses to an
    /// explicit report.
    pub fn set_ambient_exception(&mut self, exception: ExceptionInfo) {
        if self.ambient_exception.is_none() {
            self.ambient_exception = Some(exception);
        }
    }

    pub fn unhandled_exception(&self) -> Option<&ExceptionInfo> {
        self.reported_exception
            .as_ref()
            .or(self.ambient_exception.as_ref())
    }

    pub fn is_running_success(&self) -> bool {
        self.unhandled_exception().is_none()
    }

    pub fn put_job_data(&mut self, key: impl Into<String>, value: Option<String>) {
        self.job_data.push((key.into(), value));
    }

    pub fn put_trigger_data(&mut self, key: impl Into<String>, value: Option<String>) {
        self.trigger_data.push((key.into(), value));
    }

    pub fn finalize(&mut self) {
        self.progress = 100;
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn effected_rows(&self) -> Option<i64> {
        self.effected_rows
    }

    pub fn exceptions(&self) -> &[ExceptionInfo] {
        &self.exceptions
    }

    pub fn exceptions_count(&self) -> usize {
        self.exceptions.len()
    }

    pub fn exceptions_truncated(&self) -> bool {
        self.exceptions_truncated
    }

    pub fn job_data_updates(&self) -> &[DataUpdate] {
        &self.job_data
    }

    pub fn trigger_data_updates(&self) -> &[DataUpdate] {
        &self.trigger_data
    }

    /// One line per entry, each terminated by a newline.
    pub fn log_text(&self) -> String {
        let mut text = String::new();
        for line in &self.log {
            text.push_str(line);
            text.push('\n');
        }
        text
    }

    /// Empty when nothing was captured; a single exception renders as its
    /// own text.
    pub fn exceptions_text(&self) -> String {
        match self.exceptions.as_slice() {
            [] => String::new(),
            [single] => single.full_text().to_string(),
            many => {
                let separator = "-".repeat(EXCEPTION_SEPARATOR_WIDTH);
                let mut text = format!("There is {} aggregate exception\n", many.len());
                for ex in many {
                    text.push_str(&format!("  - {}\n", ex.message));
                }
                text.push_str(&separator);
                text.push('\n');
                for ex in many {
                    text.push_str(ex.full_text());
                    text.push('\n');
                    text.push_str(&separator);
                    text.push('\n');
                }
                text
            }
        }
    }

    /// Text for the history `exception` column: the unhandled exception
    /// when there is one, otherwise the aggregate list.
    pub fn exception_column(&self) -> Option<String> {
        if let Some(ex) = self.unhandled_exception() {
            return Some(ex.full_text().to_string());
        }
        let text = self.exceptions_text();
        (!text.is_empty()).then_some(text)
    }
}
