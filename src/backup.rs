use anyhow::Context;
use chrono::Utc;
use rusqlite::Connection;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::paths::MediaPaths;
use crate::registry;

pub const DOCUMENT_ENTRY: &str = "backup.json";
pub const DB_ENTRY: &str = "database/db.sqlite3";
pub const BACKUP_VERSION: &str = "1.6";

#[derive(Debug, Clone)]
pub struct BackupSummary {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub collections: usize,
    pub photos: usize,
}

/// Serialize every collection plus referenced photos into one timestamped
/// zip under `media/backups/`. Staging is removed on success and failure,
/// and a half-written archive never survives a failure.
pub fn create_backup(conn: &Connection, media: &MediaPaths) -> anyhow::Result<BackupSummary> {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let staging = media.backups_dir().join(format!("backup_{stamp}"));
    let archive_path = media.backups_dir().join(format!("backup_{stamp}.zip"));

    let result = assemble(conn, media, &staging, &archive_path);
    let _ = std::fs::remove_dir_all(&staging);
    if result.is_err() {
        let _ = std::fs::remove_file(&archive_path);
    }

    let (collections, photos) = result?;
    let size = std::fs::metadata(&archive_path)
        .with_context(|| format!("failed to stat archive {}", archive_path.to_string_lossy()))?
        .len();
    Ok(BackupSummary {
        filename: format!("backup_{stamp}.zip"),
        path: archive_path,
        size,
        collections,
        photos,
    })
}

fn assemble(
    conn: &Connection,
    media: &MediaPaths,
    staging: &Path,
    archive_path: &Path,
) -> anyhow::Result<(usize, usize)> {
    let photos_dir = staging.join("photos");
    std::fs::create_dir_all(&photos_dir)
        .with_context(|| format!("failed to create staging {}", staging.to_string_lossy()))?;

    let mut doc = Map::new();
    let order = registry::insert_order();
    for c in &order {
        let rows = registry::serialize_rows(conn, c)
            .with_context(|| format!("failed to serialize {}", c.name))?;
        doc.insert(c.name.to_string(), Value::Array(rows));
    }

    let photo_info = stage_photos(conn, media, &photos_dir)?;
    let photo_count = photo_info.len();
    doc.insert("photo_info".to_string(), Value::Array(photo_info));
    doc.insert(
        "backup_date".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    doc.insert(
        "backup_version".to_string(),
        Value::String(BACKUP_VERSION.to_string()),
    );

    // Cold copy of the database file. Best-effort: the row document is the
    // authoritative payload.
    let staged_db = staging.join("db.sqlite3");
    let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
    if let Err(e) = std::fs::copy(media.database_file(), &staged_db) {
        log::warn!("database copy skipped: {}", e);
    }

    write_archive(archive_path, &doc, &photos_dir, &staged_db)?;
    Ok((order.len(), photo_count))
}

/// Copy every referenced photo that exists on disk into the staging area
/// under a collision-safe name and describe it for the document.
fn stage_photos(
    conn: &Connection,
    media: &MediaPaths,
    photos_dir: &Path,
) -> anyhow::Result<Vec<Value>> {
    let mut photo_info = Vec::new();
    for c in registry::COLLECTIONS {
        let Some(photo) = &c.photo else {
            continue;
        };
        let sql = format!(
            "SELECT id, {field} FROM {table} WHERE {field} IS NOT NULL AND {field} != ''",
            field = photo.field,
            table = c.table
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        for (pk, rel) in rows {
            let source = media.resolve_media(&rel);
            if !source.is_file() {
                log::warn!("{} {} photo missing on disk: {}", c.name, pk, rel);
                continue;
            }
            let basename = source
                .file_name()
                .and_then(|s| s.to_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("{}_{}", photo.kind, pk));
            let staged_name = collision_safe_name(photos_dir, &basename);
            std::fs::copy(&source, photos_dir.join(&staged_name)).with_context(|| {
                format!("failed to stage photo {}", source.to_string_lossy())
            })?;
            photo_info.push(serde_json::json!({
                "type": photo.kind,
                "id": pk,
                "filename": staged_name,
                "field": photo.field,
            }));
        }
    }
    Ok(photo_info)
}

fn collision_safe_name(dir: &Path, basename: &str) -> String {
    if !dir.join(basename).exists() {
        return basename.to_string();
    }
    let tag = Uuid::new_v4().to_string();
    format!("{}_{}", &tag[..8], basename)
}

fn write_archive(
    archive_path: &Path,
    doc: &Map<String, Value>,
    photos_dir: &Path,
    staged_db: &Path,
) -> anyhow::Result<()> {
    let out_file = File::create(archive_path).with_context(|| {
        format!("failed to create archive {}", archive_path.to_string_lossy())
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(DOCUMENT_ENTRY, opts)
        .context("failed to start backup.json entry")?;
    zip.write_all(
        serde_json::to_string_pretty(doc)
            .context("failed to serialize backup document")?
            .as_bytes(),
    )
    .context("failed to write backup.json entry")?;

    for entry in std::fs::read_dir(photos_dir).context("failed to list staged photos")? {
        let entry = entry.context("failed to read staged photo entry")?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        zip.start_file(format!("photos/{name}"), opts)
            .with_context(|| format!("failed to start photo entry {name}"))?;
        let mut f = File::open(&path)
            .with_context(|| format!("failed to open staged photo {name}"))?;
        std::io::copy(&mut f, &mut zip)
            .with_context(|| format!("failed to write photo entry {name}"))?;
    }

    if staged_db.is_file() {
        zip.start_file(DB_ENTRY, opts)
            .context("failed to start database entry")?;
        let mut f = File::open(staged_db).context("failed to open staged database")?;
        std::io::copy(&mut f, &mut zip).context("failed to write database entry")?;
    }

    zip.finish().context("failed to finalize backup archive")?;
    Ok(())
}

pub fn is_zip_file(path: &Path) -> anyhow::Result<bool> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut sig = [0u8; 4];
    let read = f.read(&mut sig).context("failed to read file signature")?;
    if read < 4 {
        return Ok(false);
    }
    Ok(sig == [0x50, 0x4B, 0x03, 0x04])
}
