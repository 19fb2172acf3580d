use std::path::PathBuf;

use chrono::NaiveDateTime;

/// What to run and how.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Whole pipelines to run.
    pub pipelines: Vec<String>,
    /// Standalone actions as `section.action`.
    pub actions: Vec<String>,
    /// Start of the run. When absent the run starts one second past the
    /// earliest journal watermark, or at the configured `start_date`.
    pub start: Option<NaiveDateTime>,
    /// End of the run, inclusive. Defaults to now.
    pub end: Option<NaiveDateTime>,
    /// Overrides the configured chunk size.
    pub chunk_size_days: Option<u32>,
    pub dry_run: bool,
    /// Re-execute windows already covered by the journal.
    pub force: bool,
    /// Directory for the run lock file. No lock is taken when absent.
    pub lock_dir: Option<PathBuf>,
    /// Lock file name prefix. Defaults to `<module>-`.
    pub lock_prefix: Option<String>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pipeline(mut self, name: impl Into<String>) -> Self {
        self.pipelines.push(name.into());
        self
    }

    pub fn action(mut self, qualified: impl Into<String>) -> Self {
        self.actions.push(qualified.into());
        self
    }

    pub fn range(mut self, start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn chunk_size_days(mut self, days: u32) -> Self {
        self.chunk_size_days = Some(days);
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = Some(dir.into());
        self
    }
}
