//! Restore state machine.
//!
//! One forward path: persist upload, validate, extract, emergency snapshot,
//! purge in reverse dependency order, repopulate in forward order, restore
//! photos, clean up. Row- and collection-level failures are skipped and
//! counted; anything else aborts the attempt, triggers the emergency
//! fallback, and re-enables foreign keys before returning.

use anyhow::{anyhow, Context};
use rusqlite::Connection;
use serde_json::{Map, Value};
use std::fs::File;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use zip::ZipArchive;

use crate::backup::{self, DOCUMENT_ENTRY};
use crate::emergency;
use crate::paths::MediaPaths;
use crate::progress::ProgressReporter;
use crate::registry;

#[derive(Debug, Default, Clone)]
pub struct RestoreOutcome {
    pub collections_restored: usize,
    pub rows_inserted: usize,
    pub rows_skipped: usize,
    pub purges_skipped: usize,
    pub photos_restored: usize,
    pub photos_skipped: usize,
    pub emergency_snapshot_taken: bool,
}

/// A failed attempt, with whether the emergency self-heal was run. It only
/// runs once the purge phase has begun; before that the store is untouched.
#[derive(Debug)]
pub struct RestoreFailure {
    pub error: anyhow::Error,
    pub recovery_attempted: bool,
}

pub fn run_restore(
    conn: &Connection,
    media: &MediaPaths,
    upload: &Path,
    progress: &ProgressReporter,
) -> Result<RestoreOutcome, RestoreFailure> {
    progress.reset("Geri yükleme işlemi başlatılıyor...");

    let epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let work_dir = media.temp_restore_dir().join(format!("restore_{epoch}"));

    let mut destructive = false;
    let result = attempt(conn, media, upload, progress, &work_dir, &mut destructive);
    let _ = std::fs::remove_dir_all(&work_dir);

    match result {
        Ok(outcome) => {
            progress.finish("Geri yükleme başarıyla tamamlandı!");
            Ok(outcome)
        }
        Err(e) => {
            progress.fail(&format!("Geri yükleme hatası: {e}"));
            log::error!("restore failed: {e:#}");
            // Self-heal only once the purge has begun; before that the
            // store is untouched and an older snapshot would overwrite it.
            if destructive {
                if let Err(heal) = emergency::restore_latest_snapshot(conn, media) {
                    log::error!("emergency recovery failed: {heal:#}");
                }
            }
            Err(RestoreFailure {
                error: e,
                recovery_attempted: destructive,
            })
        }
    }
}

fn attempt(
    conn: &Connection,
    media: &MediaPaths,
    upload: &Path,
    progress: &ProgressReporter,
    work_dir: &Path,
    destructive: &mut bool,
) -> anyhow::Result<RestoreOutcome> {
    let mut outcome = RestoreOutcome::default();

    // RECEIVED: persist the uploaded bytes into the scratch area.
    std::fs::create_dir_all(work_dir)
        .with_context(|| format!("failed to create {}", work_dir.to_string_lossy()))?;
    let archive_path = work_dir.join("upload.zip");
    std::fs::copy(upload, &archive_path)
        .with_context(|| format!("failed to persist upload {}", upload.to_string_lossy()))?;
    progress.update(10, "Yedek dosyası kaydedildi");

    // VALIDATED: reject anything that is not a zip before touching state.
    if !backup::is_zip_file(&archive_path)? {
        return Err(anyhow!("geçerli bir ZIP dosyası değil"));
    }
    let file = File::open(&archive_path).context("failed to open uploaded archive")?;
    let mut archive = ZipArchive::new(file).context("geçerli bir ZIP dosyası değil")?;
    progress.update(20, "Yedek dosyası doğrulandı");

    // EXTRACTED: unpack and require the document.
    let extract_dir = work_dir.join("extracted");
    extract_archive(&mut archive, &extract_dir)?;
    let document_path = extract_dir.join(DOCUMENT_ENTRY);
    if !document_path.is_file() {
        return Err(anyhow!("yedek dosyasında backup.json bulunamadı"));
    }
    let text = std::fs::read_to_string(&document_path).context("failed to read backup.json")?;
    let doc: Map<String, Value> =
        serde_json::from_str(&text).context("backup.json is invalid JSON")?;
    progress.update(30, "Yedek verileri okundu");

    // SNAPSHOTTED: best-effort safety net, never blocks the restore.
    match emergency::write_snapshot(conn, media) {
        Ok(path) => {
            outcome.emergency_snapshot_taken = true;
            log::info!("emergency snapshot written: {}", path.to_string_lossy());
        }
        Err(e) => log::warn!("emergency snapshot failed: {e:#}"),
    }
    progress.update(40, "Acil yedek oluşturuldu");

    // PURGED + REPOPULATED under one transaction, foreign keys relaxed.
    *destructive = true;
    with_foreign_keys_disabled(conn, |conn| {
        let tx = conn.unchecked_transaction().context("failed to begin transaction")?;

        progress.update(50, "Eski veriler siliniyor...");
        outcome.purges_skipped = purge_all(&tx);
        progress.update(60, "Eski veriler silindi");

        let order = registry::insert_order();
        let total = order.len();
        for (i, c) in order.iter().enumerate() {
            let Some(rows) = doc.get(c.name).and_then(|v| v.as_array()) else {
                // Absent collection means nothing to restore for this type.
                continue;
            };
            let (inserted, skipped) = insert_rows(&tx, c, rows);
            outcome.rows_inserted += inserted;
            outcome.rows_skipped += skipped;
            outcome.collections_restored += 1;
            let pct = 60 + ((i + 1) * 30 / total) as u8;
            progress.update(pct, &format!("{} yüklendi", c.name));
        }

        tx.commit().context("failed to commit restore transaction")?;
        Ok(())
    })?;

    // ASSETS_RESTORED: copy photos to their type-keyed destinations.
    progress.update(90, "Fotoğraflar yükleniyor...");
    let (restored, skipped) = restore_photos(&doc, &extract_dir, media);
    outcome.photos_restored = restored;
    outcome.photos_skipped = skipped;

    progress.update(95, "Veritabanı dosyası geri yükleniyor...");
    restore_database_copy(&extract_dir, media);

    Ok(outcome)
}

/// Run `f` with SQLite foreign-key enforcement off, re-enabling it on every
/// exit path. The pragma only takes effect outside a transaction, so it is
/// toggled here rather than inside the write scope.
pub(crate) fn with_foreign_keys_disabled<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    conn.pragma_update(None, "foreign_keys", false)
        .context("failed to disable foreign keys")?;
    let result = f(conn);
    if let Err(e) = conn.pragma_update(None, "foreign_keys", true) {
        log::error!("failed to re-enable foreign keys: {e}");
    }
    result
}

/// Delete every collection in reverse dependency order. A failing delete is
/// logged and skipped; returns the number of skipped collections.
pub(crate) fn purge_all(conn: &Connection) -> usize {
    let mut skipped = 0;
    for c in registry::delete_order() {
        if let Err(e) = conn.execute(&format!("DELETE FROM {}", c.table), []) {
            log::warn!("purge of {} failed: {}", c.name, e);
            skipped += 1;
        }
    }
    skipped
}

/// Insert serialized rows, preserving primary keys. Malformed or rejected
/// rows are logged and skipped, never fatal.
pub(crate) fn insert_rows(
    conn: &Connection,
    c: &registry::Collection,
    rows: &[Value],
) -> (usize, usize) {
    let mut inserted = 0;
    let mut skipped = 0;
    for row in rows {
        let pk = row.get("pk").and_then(|v| v.as_i64());
        let Some(fields) = row.get("fields").and_then(|v| v.as_object()) else {
            log::warn!("{}: row without fields object skipped", c.name);
            skipped += 1;
            continue;
        };
        match registry::insert_row(conn, c, pk, fields) {
            Ok(_) => inserted += 1,
            Err(e) => {
                log::warn!("{} row {:?} skipped: {}", c.name, pk, e);
                skipped += 1;
            }
        }
    }
    (inserted, skipped)
}

fn extract_archive(archive: &mut ZipArchive<File>, extract_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(extract_dir)
        .with_context(|| format!("failed to create {}", extract_dir.to_string_lossy()))?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).context("failed to read archive entry")?;
        let Some(rel) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
            log::warn!("archive entry with unsafe name skipped: {}", entry.name());
            continue;
        };
        let dest = extract_dir.join(rel);
        if entry.is_dir() {
            std::fs::create_dir_all(&dest)?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&dest)
            .with_context(|| format!("failed to create {}", dest.to_string_lossy()))?;
        std::io::copy(&mut entry, &mut out)
            .with_context(|| format!("failed to extract {}", dest.to_string_lossy()))?;
    }
    Ok(())
}

/// Copy photos listed in `photo_info` to the destination derived from their
/// type. Missing sources, unknown types, and path-shaped names are skipped
/// with a warning; the producer only ever writes bare filenames.
fn restore_photos(
    doc: &Map<String, Value>,
    extract_dir: &Path,
    media: &MediaPaths,
) -> (usize, usize) {
    let mut restored = 0;
    let mut skipped = 0;
    let photos_dir = extract_dir.join("photos");
    let entries = doc
        .get("photo_info")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    for entry in &entries {
        let kind = entry.get("type").and_then(|v| v.as_str()).unwrap_or("");
        let filename = entry.get("filename").and_then(|v| v.as_str()).unwrap_or("");
        if filename.is_empty()
            || filename.contains('/')
            || filename.contains('\\')
            || filename.contains("..")
        {
            log::warn!("photo entry with unsafe name skipped: {}", filename);
            skipped += 1;
            continue;
        }
        let source = photos_dir.join(filename);
        if !source.is_file() {
            log::warn!("photo {} missing from archive", filename);
            skipped += 1;
            continue;
        }
        let Some(dest_dir) = media.photo_dest_dir(kind) else {
            log::warn!("photo {} has unknown type {}", filename, kind);
            skipped += 1;
            continue;
        };
        let copy = std::fs::create_dir_all(&dest_dir)
            .and_then(|_| std::fs::copy(&source, dest_dir.join(filename)));
        match copy {
            Ok(_) => restored += 1,
            Err(e) => {
                log::warn!("photo {} restore failed: {}", filename, e);
                skipped += 1;
            }
        }
    }
    (restored, skipped)
}

/// Best-effort cold copy of the archived database file. The live store has
/// already been repopulated row by row; this only parks the file copy for
/// manual use.
fn restore_database_copy(extract_dir: &Path, media: &MediaPaths) {
    let source = extract_dir.join(backup::DB_ENTRY);
    if !source.is_file() {
        return;
    }
    let dest_dir = media.database_copy_dir();
    let copy = std::fs::create_dir_all(&dest_dir)
        .and_then(|_| std::fs::copy(&source, dest_dir.join("db.sqlite3")));
    if let Err(e) = copy {
        log::warn!("database copy restore failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_workspace(prefix: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    fn insert(conn: &Connection, name: &str, pk: i64, fields: Value) {
        let c = registry::find(name).expect("collection");
        let fields = fields.as_object().expect("object").clone();
        registry::insert_row(conn, c, Some(pk), &fields).expect("insert");
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .expect("count")
    }

    #[test]
    fn purge_respects_foreign_keys_even_when_enforced() {
        // Reverse dependency order must delete children first, so the purge
        // succeeds without relaxing enforcement at all.
        let workspace = temp_workspace("hafizd-purge");
        let conn = crate::db::open_db(&workspace).expect("open db");
        insert(&conn, "ogrenciler", 1, json!({ "ad_soyad": "Ali Yılmaz" }));
        insert(&conn, "dersler", 1, json!({ "ad": "Tecvid", "tur": "TECV" }));
        insert(
            &conn,
            "sinav_sonuclari",
            1,
            json!({ "ogrenci_id": 1, "ders_id": 1, "sinav_tipi": "VIZE", "puan": 85 }),
        );

        assert_eq!(purge_all(&conn), 0);
        assert_eq!(count(&conn, "ogrenciler"), 0);
        assert_eq!(count(&conn, "sinav_sonuclari"), 0);
        let _ = std::fs::remove_dir_all(workspace);
    }

    #[test]
    fn emergency_snapshot_heals_a_failed_restore() {
        let workspace = temp_workspace("hafizd-selfheal");
        let conn = crate::db::open_db(&workspace).expect("open db");
        let media = MediaPaths::new(&workspace);
        media.ensure_base_dirs().expect("media dirs");

        insert(&conn, "categories", 1, json!({ "name": "Genel", "slug": "genel" }));
        insert(&conn, "ogrenciler", 1, json!({ "ad_soyad": "Ayşe Demir" }));
        insert(&conn, "ogrenciler", 2, json!({ "ad_soyad": "Fatma Kaya" }));

        emergency::write_snapshot(&conn, &media).expect("snapshot");

        // Simulate a restore dying after the purge phase.
        assert_eq!(purge_all(&conn), 0);
        assert_eq!(count(&conn, "ogrenciler"), 0);

        emergency::restore_latest_snapshot(&conn, &media).expect("self-heal");
        assert_eq!(count(&conn, "ogrenciler"), 2);
        assert_eq!(count(&conn, "categories"), 1);
        let name: String = conn
            .query_row("SELECT ad_soyad FROM ogrenciler WHERE id = 2", [], |r| r.get(0))
            .expect("row back");
        assert_eq!(name, "Fatma Kaya");
        let _ = std::fs::remove_dir_all(workspace);
    }

    #[test]
    fn rejected_rows_are_counted_not_fatal() {
        let workspace = temp_workspace("hafizd-skiprows");
        let conn = crate::db::open_db(&workspace).expect("open db");
        let c = registry::find("categories").expect("collection");
        let rows = vec![
            json!({ "model": "categories", "pk": 1, "fields": { "name": "Genel", "slug": "genel" } }),
            // Duplicate pk violates the primary key and must be skipped.
            json!({ "model": "categories", "pk": 1, "fields": { "name": "Kopya", "slug": "kopya" } }),
            json!({ "model": "categories", "pk": 2, "fields": { "name": "Dua", "slug": "dua" } }),
        ];
        let (inserted, skipped) = insert_rows(&conn, c, &rows);
        assert_eq!(inserted, 2);
        assert_eq!(skipped, 1);
        assert_eq!(count(&conn, "categories"), 2);
        let _ = std::fs::remove_dir_all(workspace);
    }

    #[test]
    fn path_shaped_photo_names_never_escape_the_destination() {
        let workspace = temp_workspace("hafizd-phototraversal");
        let media = MediaPaths::new(&workspace);
        media.ensure_base_dirs().expect("media dirs");

        // An attacker-built document pointing at a planted file that a dotted
        // name would drop into the emergency snapshot directory.
        let extract_dir = workspace.join("extracted");
        let planted_name = "emergency_99991231_235959.json";
        let planted_dir = extract_dir.join("emergency_backup");
        std::fs::create_dir_all(extract_dir.join("photos")).expect("photos dir");
        std::fs::create_dir_all(&planted_dir).expect("planted dir");
        std::fs::write(planted_dir.join(planted_name), "{}").expect("planted file");

        let doc = json!({
            "photo_info": [{
                "type": "ogrenci",
                "id": 1,
                "filename": format!("../emergency_backup/{planted_name}"),
                "field": "profil_foto"
            }]
        });
        let doc = doc.as_object().expect("object").clone();

        let (restored, skipped) = restore_photos(&doc, &extract_dir, &media);
        assert_eq!(restored, 0);
        assert_eq!(skipped, 1);
        assert!(
            !media.emergency_dir().join(planted_name).exists(),
            "photo restore wrote outside its destination directory"
        );
        let _ = std::fs::remove_dir_all(workspace);
    }

    #[test]
    fn foreign_keys_are_reenabled_after_an_error() {
        let workspace = temp_workspace("hafizd-fkguard");
        let conn = crate::db::open_db(&workspace).expect("open db");
        let result: anyhow::Result<()> =
            with_foreign_keys_disabled(&conn, |_| Err(anyhow!("forced failure")));
        assert!(result.is_err());
        let enabled: i64 = conn
            .pragma_query_value(None, "foreign_keys", |r| r.get(0))
            .expect("pragma");
        assert_eq!(enabled, 1);
        let _ = std::fs::remove_dir_all(workspace);
    }
}
