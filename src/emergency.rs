//! Emergency fallback: a collections-only snapshot written right before a
//! destructive restore, and the self-heal path that reloads the newest one.

use anyhow::{anyhow, Context};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::SystemTime;

use crate::paths::MediaPaths;
use crate::registry;
use crate::restore;

/// Snapshots kept in `media/emergency_backup/`; older ones are pruned.
const RETAIN: usize = 5;

/// Serialize every collection (no binary assets) to a timestamped JSON
/// document. Callers on a critical path treat a failure as log-only.
pub fn write_snapshot(conn: &Connection, media: &MediaPaths) -> anyhow::Result<PathBuf> {
    let dir = media.emergency_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.to_string_lossy()))?;

    let mut doc = Map::new();
    for c in registry::insert_order() {
        let rows = registry::serialize_rows(conn, c)
            .with_context(|| format!("failed to serialize {}", c.name))?;
        doc.insert(c.name.to_string(), Value::Array(rows));
    }
    doc.insert(
        "backup_date".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );

    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("emergency_{stamp}.json"));
    let text = serde_json::to_string_pretty(&doc).context("failed to serialize snapshot")?;
    std::fs::write(&path, text)
        .with_context(|| format!("failed to write {}", path.to_string_lossy()))?;

    prune_old(media);
    Ok(path)
}

/// Reload the most recent snapshot: purge in reverse dependency order, then
/// reinsert in forward order, same two-phase algorithm as the main restore.
/// This is the last resort; the caller only logs a failure.
pub fn restore_latest_snapshot(conn: &Connection, media: &MediaPaths) -> anyhow::Result<()> {
    let path = latest_snapshot(media)?
        .ok_or_else(|| anyhow!("no emergency snapshot available"))?;
    log::info!("healing from emergency snapshot {}", path.to_string_lossy());

    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
    let doc: Map<String, Value> =
        serde_json::from_str(&text).context("emergency snapshot is invalid JSON")?;

    restore::with_foreign_keys_disabled(conn, |conn| {
        let tx = conn
            .unchecked_transaction()
            .context("failed to begin snapshot transaction")?;
        let purges_skipped = restore::purge_all(&tx);
        if purges_skipped > 0 {
            log::warn!("{} collections could not be purged before self-heal", purges_skipped);
        }
        let mut skipped = 0;
        for c in registry::insert_order() {
            let Some(rows) = doc.get(c.name).and_then(|v| v.as_array()) else {
                continue;
            };
            let (_, s) = restore::insert_rows(&tx, c, rows);
            skipped += s;
        }
        if skipped > 0 {
            log::warn!("{} rows skipped during self-heal", skipped);
        }
        tx.commit().context("failed to commit snapshot transaction")
    })?;
    Ok(())
}

fn latest_snapshot(media: &MediaPaths) -> anyhow::Result<Option<PathBuf>> {
    Ok(snapshots_by_age(media)?.into_iter().next().map(|(p, _)| p))
}

/// Snapshot files, newest first by modification time.
fn snapshots_by_age(media: &MediaPaths) -> anyhow::Result<Vec<(PathBuf, SystemTime)>> {
    let dir = media.emergency_dir();
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for entry in std::fs::read_dir(&dir).context("failed to list emergency snapshots")? {
        let entry = entry.context("failed to read snapshot entry")?;
        let path = entry.path();
        let is_snapshot = path.is_file()
            && path
                .file_name()
                .and_then(|s| s.to_str())
                .map(|n| n.starts_with("emergency_") && n.ends_with(".json"))
                .unwrap_or(false);
        if !is_snapshot {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        found.push((path, modified));
    }
    found.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
    Ok(found)
}

fn prune_old(media: &MediaPaths) {
    let Ok(snapshots) = snapshots_by_age(media) else {
        return;
    };
    for (path, _) in snapshots.into_iter().skip(RETAIN) {
        if let Err(e) = std::fs::remove_file(&path) {
            log::warn!("failed to prune old snapshot {}: {}", path.to_string_lossy(), e);
        }
    }
}
