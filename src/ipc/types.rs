use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use rusqlite::Connection;
use serde::Deserialize;

use crate::progress::ProgressReporter;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Injected progress record shared with polling clients.
    pub progress: ProgressReporter,
    /// Restores are serialized; a second attempt while one runs is rejected.
    pub restore_in_flight: Arc<AtomicBool>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            progress: ProgressReporter::new(),
            restore_in_flight: Arc::new(AtomicBool::new(false)),
        }
    }
}
