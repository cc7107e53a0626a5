use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
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

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_hafizd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn hafizd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn expect_ok(resp: &serde_json::Value, what: &str) -> serde_json::Value {
    assert_eq!(
        resp.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        what,
        resp
    );
    resp.get("result").cloned().unwrap_or(json!({}))
}

fn insert(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    collection: &str,
    pk: i64,
    fields: serde_json::Value,
) {
    let resp = request(
        stdin,
        reader,
        id,
        "records.insert",
        json!({ "collection": collection, "pk": pk, "fields": fields }),
    );
    expect_ok(&resp, &format!("insert {}", collection));
}

fn count(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    collection: &str,
) -> i64 {
    let resp = request(
        stdin,
        reader,
        id,
        "records.count",
        json!({ "collection": collection }),
    );
    expect_ok(&resp, &format!("count {}", collection))
        .get("count")
        .and_then(|v| v.as_i64())
        .expect("count value")
}

#[test]
fn backup_then_restore_reproduces_every_row_and_photo() {
    let workspace = temp_dir("hafizd-roundtrip");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    expect_ok(&resp, "workspace.select");

    // Scenario data: 3 students, 2 exam results referencing students 1 and
    // 2, one category, one post referencing that category.
    insert(
        &mut stdin,
        &mut reader,
        "2",
        "categories",
        1,
        json!({ "name": "Genel", "slug": "genel" }),
    );
    insert(
        &mut stdin,
        &mut reader,
        "3",
        "yazilar",
        1,
        json!({
            "title": "Hafızlık yolculuğu",
            "description": "İlk yazı",
            "slug": "hafizlik-yolculugu",
            "date": "2026-08-20",
            "is_active": 1,
            "category_id": 1
        }),
    );
    insert(
        &mut stdin,
        &mut reader,
        "4",
        "dersler",
        1,
        json!({ "ad": "Tecvid", "tur": "TECV" }),
    );
    for (i, name) in ["Ali Yılmaz", "Ayşe Demir", "Fatma Kaya"].iter().enumerate() {
        insert(
            &mut stdin,
            &mut reader,
            &format!("5-{i}"),
            "ogrenciler",
            (i + 1) as i64,
            json!({ "ad_soyad": name, "seviye": "TEMEL", "kayit_tarihi": "2026-01-10" }),
        );
    }
    insert(
        &mut stdin,
        &mut reader,
        "6",
        "sinav_sonuclari",
        1,
        json!({ "ogrenci_id": 1, "ders_id": 1, "sinav_tipi": "VIZE", "puan": 85 }),
    );
    insert(
        &mut stdin,
        &mut reader,
        "7",
        "sinav_sonuclari",
        2,
        json!({ "ogrenci_id": 2, "ders_id": 1, "sinav_tipi": "FINAL", "puan": 92 }),
    );

    // Give student 1 a profile photo so asset correlation is exercised.
    let photo_src = workspace.join("ali.jpg");
    std::fs::write(&photo_src, b"\xFF\xD8\xFFfake-jpeg-bytes").expect("photo file");
    let resp = request(
        &mut stdin,
        &mut reader,
        "8",
        "assets.attach",
        json!({
            "collection": "ogrenciler",
            "pk": 1,
            "sourcePath": photo_src.to_string_lossy()
        }),
    );
    let stored = expect_ok(&resp, "assets.attach")
        .get("storedPath")
        .and_then(|v| v.as_str())
        .expect("storedPath")
        .to_string();
    assert!(stored.starts_with("ogrenci_profil/"), "stored: {}", stored);

    let resp = request(&mut stdin, &mut reader, "9", "backup.create", json!({}));
    let summary = expect_ok(&resp, "backup.create");
    let archive = summary
        .get("path")
        .and_then(|v| v.as_str())
        .expect("archive path")
        .to_string();
    assert_eq!(summary.get("photos").and_then(|v| v.as_i64()), Some(1));

    // Drift the live data so the restore visibly rewinds it.
    insert(
        &mut stdin,
        &mut reader,
        "10",
        "alintilar",
        99,
        json!({ "quote_text": "silinecek alıntı" }),
    );
    let profile_dir = workspace.join("media").join("ogrenci_profil");
    std::fs::remove_dir_all(&profile_dir).expect("drop photos");

    let resp = request(
        &mut stdin,
        &mut reader,
        "11",
        "restore.run",
        json!({ "inPath": archive }),
    );
    let outcome = expect_ok(&resp, "restore.run");
    assert_eq!(outcome.get("rowsSkipped").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(outcome.get("photosRestored").and_then(|v| v.as_i64()), Some(1));

    assert_eq!(count(&mut stdin, &mut reader, "12", "ogrenciler"), 3);
    assert_eq!(count(&mut stdin, &mut reader, "13", "sinav_sonuclari"), 2);
    assert_eq!(count(&mut stdin, &mut reader, "14", "categories"), 1);
    assert_eq!(count(&mut stdin, &mut reader, "15", "yazilar"), 1);
    // The drifted quote was not part of the archive.
    assert_eq!(count(&mut stdin, &mut reader, "16", "alintilar"), 0);

    let resp = request(
        &mut stdin,
        &mut reader,
        "17",
        "records.list",
        json!({ "collection": "ogrenciler" }),
    );
    let rows = expect_ok(&resp, "records.list");
    let rows = rows.get("rows").and_then(|v| v.as_array()).expect("rows");
    let mut pks: Vec<i64> = rows
        .iter()
        .map(|r| r.get("pk").and_then(|v| v.as_i64()).expect("pk"))
        .collect();
    pks.sort();
    assert_eq!(pks, vec![1, 2, 3]);
    let ali = rows
        .iter()
        .find(|r| r.get("pk").and_then(|v| v.as_i64()) == Some(1))
        .expect("student 1");
    assert_eq!(
        ali.pointer("/fields/ad_soyad").and_then(|v| v.as_str()),
        Some("Ali Yılmaz")
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "18",
        "records.list",
        json!({ "collection": "sinav_sonuclari" }),
    );
    let rows = expect_ok(&resp, "records.list");
    let mut refs: Vec<i64> = rows
        .get("rows")
        .and_then(|v| v.as_array())
        .expect("rows")
        .iter()
        .map(|r| r.pointer("/fields/ogrenci_id").and_then(|v| v.as_i64()).expect("ref"))
        .collect();
    refs.sort();
    assert_eq!(refs, vec![1, 2]);

    // Asset correlation: the photo is back in the student profile dir and
    // its owning row exists.
    let restored_photo = workspace.join("media").join(&stored);
    assert!(restored_photo.is_file(), "photo not restored: {:?}", restored_photo);

    let resp = request(&mut stdin, &mut reader, "19", "restore.progress", json!({}));
    let progress = expect_ok(&resp, "restore.progress");
    assert_eq!(progress.get("status").and_then(|v| v.as_str()), Some("done"));
    assert_eq!(progress.get("progress").and_then(|v| v.as_i64()), Some(100));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
