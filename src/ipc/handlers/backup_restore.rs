use crate::backup;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::paths::MediaPaths;
use crate::restore;
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::UNIX_EPOCH;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

/// Archives live directly under `media/backups`; only bare filenames are
/// accepted so a request can never escape it.
fn safe_backup_path(media: &MediaPaths, filename: &str) -> Result<PathBuf, HandlerErr> {
    if filename.is_empty()
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains("..")
    {
        return Err(HandlerErr {
            code: "bad_params",
            message: "invalid backup filename".to_string(),
            details: Some(json!({ "filename": filename })),
        });
    }
    Ok(media.backups_dir().join(filename))
}

fn handle_backup_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some((conn, media)) = open_workspace(state) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match backup::create_backup(conn, &media) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "filename": summary.filename,
                "path": summary.path.to_string_lossy(),
                "sizeBytes": summary.size,
                "collections": summary.collections,
                "photos": summary.photos,
            }),
        ),
        Err(e) => err(&req.id, "io_failed", format!("{e:#}"), None),
    }
}

fn handle_backup_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some((_, media)) = open_workspace(state) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let dir = media.backups_dir();
    let mut items: Vec<(String, u64, u64)> = Vec::new();
    let mut total_size = 0u64;
    if dir.is_dir() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "io_failed", e.to_string(), None),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if !path.is_file() || !name.ends_with(".zip") {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            let modified = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0);
            total_size += meta.len();
            items.push((name.to_string(), meta.len(), modified));
        }
    }
    // Newest first; names embed the timestamp, so they break ties.
    items.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| b.0.cmp(&a.0)));
    let backups: Vec<serde_json::Value> = items
        .into_iter()
        .map(|(name, size, modified)| {
            json!({ "filename": name, "sizeBytes": size, "modifiedAt": modified })
        })
        .collect();
    ok(&req.id, json!({ "backups": backups, "totalSizeBytes": total_size }))
}

fn handle_backup_download(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some((_, media)) = open_workspace(state) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(filename) = req.params.get("filename").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing filename", None);
    };
    let path = match safe_backup_path(&media, filename) {
        Ok(p) => p,
        Err(e) => return e.response(&req.id),
    };
    if !path.is_file() {
        return err(
            &req.id,
            "not_found",
            "backup file not found",
            Some(json!({ "filename": filename })),
        );
    }
    let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    ok(
        &req.id,
        json!({ "filename": filename, "path": path.to_string_lossy(), "sizeBytes": size }),
    )
}

fn handle_backup_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some((_, media)) = open_workspace(state) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(filename) = req.params.get("filename").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing filename", None);
    };
    let path = match safe_backup_path(&media, filename) {
        Ok(p) => p,
        Err(e) => return e.response(&req.id),
    };
    if !path.is_file() {
        return err(
            &req.id,
            "not_found",
            "backup file not found",
            Some(json!({ "filename": filename })),
        );
    }
    if let Err(e) = std::fs::remove_file(&path) {
        return err(&req.id, "io_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "deleted": filename }))
}

fn handle_restore_run(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(in_path) = req
        .params
        .get("inPath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
    else {
        return err(&req.id, "bad_params", "missing inPath", None);
    };
    if !in_path.is_file() {
        return err(
            &req.id,
            "not_found",
            "uploaded archive not found",
            Some(json!({ "path": in_path.to_string_lossy() })),
        );
    }
    let progress = state.progress.clone();
    let in_flight = state.restore_in_flight.clone();
    let Some((conn, media)) = open_workspace(state) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    // Validation failure surfaces before anything is touched; the polled
    // record still ends in its terminal error state.
    match backup::is_zip_file(&in_path) {
        Ok(true) => {}
        Ok(false) => {
            progress.reset("Geri yükleme işlemi başlatılıyor...");
            progress.fail("Geçerli bir ZIP dosyası değil");
            return err(
                &req.id,
                "invalid_archive",
                "not a valid zip archive",
                Some(json!({ "path": in_path.to_string_lossy() })),
            );
        }
        Err(e) => return err(&req.id, "io_failed", format!("{e:#}"), None),
    }

    if in_flight
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return err(
            &req.id,
            "restore_in_progress",
            "another restore is already running",
            None,
        );
    }
    let result = restore::run_restore(conn, &media, &in_path, &progress);
    in_flight.store(false, Ordering::SeqCst);

    match result {
        Ok(outcome) => ok(
            &req.id,
            json!({
                "collectionsRestored": outcome.collections_restored,
                "rowsInserted": outcome.rows_inserted,
                "rowsSkipped": outcome.rows_skipped,
                "purgesSkipped": outcome.purges_skipped,
                "photosRestored": outcome.photos_restored,
                "photosSkipped": outcome.photos_skipped,
                "emergencySnapshotTaken": outcome.emergency_snapshot_taken,
            }),
        ),
        Err(failure) => err(
            &req.id,
            "restore_failed",
            format!("{:#}", failure.error),
            Some(json!({ "emergencyRecoveryAttempted": failure.recovery_attempted })),
        ),
    }
}

fn handle_restore_progress(state: &mut AppState, req: &Request) -> serde_json::Value {
    let snapshot = state.progress.read();
    match serde_json::to_value(&snapshot) {
        Ok(v) => ok(&req.id, v),
        Err(e) => err(&req.id, "io_failed", e.to_string(), None),
    }
}

fn open_workspace(state: &mut AppState) -> Option<(&rusqlite::Connection, MediaPaths)> {
    let workspace = state.workspace.clone()?;
    let conn = state.db.as_ref()?;
    Some((conn, MediaPaths::new(&workspace)))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.create" => Some(handle_backup_create(state, req)),
        "backup.list" => Some(handle_backup_list(state, req)),
        "backup.download" => Some(handle_backup_download(state, req)),
        "backup.delete" => Some(handle_backup_delete(state, req)),
        "restore.run" => Some(handle_restore_run(state, req)),
        "restore.progress" => Some(handle_restore_progress(state, req)),
        _ => None,
    }
}
