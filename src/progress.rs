//! Progress reporting.
//!
//! Long-running stages report `(current, total)` pairs through a
//! [`Progress`] sink. The default sink emits tracing events; tests use
//! [`RecordingProgress`] to assert on what was reported.

use parking_lot::Mutex;

/// Sink for progress updates and log lines.
pub trait Progress: Send + Sync {
    /// Report a free-form message.
    fn log(&self, message: &str);

    /// Report `current` of `total` for the task `id`.
    fn progress(&self, id: &str, label: &str, current: usize, total: usize);
}

/// Progress reported as tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl Progress for TracingProgress {
    fn log(&self, message: &str) {
        tracing::info!("{message}");
    }

    fn progress(&self, id: &str, label: &str, current: usize, total: usize) {
        tracing::debug!(task = id, current, total, "{label}");
    }
}

/// One recorded progress update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Task id.
    pub id: String,
    /// Items done.
    pub current: usize,
    /// Items overall.
    pub total: usize,
}

/// In-memory progress for testing.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    messages: Mutex<Vec<String>>,
    updates: Mutex<Vec<ProgressUpdate>>,
}

impl RecordingProgress {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages logged so far.
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    /// Updates reported for task `id`, in order.
    pub fn updates_for(&self, id: &str) -> Vec<(usize, usize)> {
        self.updates
            .lock()
            .iter()
            .filter(|u| u.id == id)
            .map(|u| (u.current, u.total))
            .collect()
    }
}

impl Progress for RecordingProgress {
    fn log(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }

    fn progress(&self, id: &str, _label: &str, current: usize, total: usize) {
        self.updates.lock().push(ProgressUpdate {
            id: id.to_string(),
            current,
            total,
        });
    }
}
