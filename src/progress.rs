//! Restore progress record polled by clients during a long restore.
//!
//! One record per daemon, handed to the restore path through `AppState`
//! rather than read from a module global. Within one attempt `progress`
//! never decreases; `reset` starts the next attempt.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStatus {
    NotStarted,
    Started,
    Processing,
    Error,
    Done,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressState {
    pub status: RestoreStatus,
    pub progress: u8,
    pub message: String,
}

#[derive(Clone)]
pub struct ProgressReporter {
    inner: Arc<Mutex<ProgressState>>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ProgressState {
                status: RestoreStatus::NotStarted,
                progress: 0,
                message: "Geri yükleme başlatılmadı".to_string(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Begin a new restore attempt.
    pub fn reset(&self, message: &str) {
        let mut state = self.lock();
        state.status = RestoreStatus::Started;
        state.progress = 0;
        state.message = message.to_string();
    }

    /// Advance to a checkpoint. A value below the current one is clamped so
    /// polling clients never see the bar move backwards.
    pub fn update(&self, progress: u8, message: &str) {
        let mut state = self.lock();
        state.status = RestoreStatus::Processing;
        state.progress = state.progress.max(progress.min(100));
        state.message = message.to_string();
        log::info!("restore {}%: {}", state.progress, message);
    }

    pub fn finish(&self, message: &str) {
        let mut state = self.lock();
        state.status = RestoreStatus::Done;
        state.progress = 100;
        state.message = message.to_string();
    }

    /// Terminal error state. The last reached progress value is kept.
    pub fn fail(&self, message: &str) {
        let mut state = self.lock();
        state.status = RestoreStatus::Error;
        state.message = message.to_string();
    }

    pub fn read(&self) -> ProgressState {
        self.lock().clone()
    }
}
