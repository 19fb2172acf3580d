use crate::period::DateRange;

use super::summary::{ActionExecutionResult, PipelineState};

/// Events emitted while a run progresses.
pub enum ProgressEvent {
    PipelineStarted {
        pipeline: String,
        range: DateRange,
    },
    ChunkStarted {
        pipeline: String,
        index: usize,
        total: usize,
        chunk: DateRange,
    },
    ActionFinished(ActionExecutionResult),
    PipelineFinished {
        pipeline: String,
        state: PipelineState,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for library callers and tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}
