use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::paths::MediaPaths;
use crate::registry;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

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

fn get_collection(params: &serde_json::Value) -> Result<&'static registry::Collection, HandlerErr> {
    let name = params
        .get("collection")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "missing collection".to_string(),
            details: None,
        })?;
    registry::find(name).ok_or_else(|| HandlerErr {
        code: "bad_params",
        message: format!("unknown collection: {}", name),
        details: Some(json!({
            "known": registry::COLLECTIONS.iter().map(|c| c.name).collect::<Vec<_>>()
        })),
    })
}

fn records_insert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let c = get_collection(params)?;
    let fields = params
        .get("fields")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "missing fields object".to_string(),
            details: None,
        })?;
    for key in fields.keys() {
        if !c.columns.contains(&key.as_str()) {
            return Err(HandlerErr {
                code: "bad_params",
                message: format!("unknown field {} for {}", key, c.name),
                details: Some(json!({ "allowed": c.columns })),
            });
        }
    }
    let pk = params.get("pk").and_then(|v| v.as_i64());
    let pk = registry::insert_row(conn, c, pk, fields).map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": c.table })),
    })?;
    Ok(json!({ "collection": c.name, "pk": pk }))
}

fn records_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let c = get_collection(params)?;
    let rows = registry::serialize_rows(conn, c).map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })?;
    Ok(json!({ "collection": c.name, "rows": rows }))
}

fn records_count(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let c = get_collection(params)?;
    let count: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM {}", c.table), [], |r| r.get(0))
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    Ok(json!({ "collection": c.name, "count": count }))
}

/// Copy a file into the collection's media directory and point the row's
/// photo field at it. Image optimization is deliberately not done here.
fn assets_attach(
    conn: &Connection,
    media: &MediaPaths,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let c = get_collection(params)?;
    let photo = c.photo.as_ref().ok_or_else(|| HandlerErr {
        code: "bad_params",
        message: format!("{} has no photo field", c.name),
        details: None,
    })?;
    let pk = params.get("pk").and_then(|v| v.as_i64()).ok_or_else(|| HandlerErr {
        code: "bad_params",
        message: "missing pk".to_string(),
        details: None,
    })?;
    let source = params
        .get("sourcePath")
        .and_then(|v| v.as_str())
        .map(std::path::PathBuf::from)
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "missing sourcePath".to_string(),
            details: None,
        })?;
    if !source.is_file() {
        return Err(HandlerErr {
            code: "not_found",
            message: "source file not found".to_string(),
            details: Some(json!({ "path": source.to_string_lossy() })),
        });
    }

    let exists = conn
        .query_row(&format!("SELECT 1 FROM {} WHERE id = ?", c.table), [pk], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    if exists.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: format!("{} {} not found", c.name, pk),
            details: None,
        });
    }

    let filename = source
        .file_name()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("{}_{}", photo.kind, pk));
    let dest_dir = media.photo_dest_dir(photo.kind).ok_or_else(|| HandlerErr {
        code: "io_failed",
        message: format!("no destination for photo type {}", photo.kind),
        details: None,
    })?;
    let copy = std::fs::create_dir_all(&dest_dir)
        .and_then(|_| std::fs::copy(&source, dest_dir.join(&filename)));
    if let Err(e) = copy {
        return Err(HandlerErr {
            code: "io_failed",
            message: e.to_string(),
            details: Some(json!({ "path": dest_dir.to_string_lossy() })),
        });
    }

    // Store the media-relative path the way the web app serves it.
    let media_root = media.media_root();
    let stored = dest_dir
        .join(&filename)
        .strip_prefix(&media_root)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or(filename.clone());
    conn.execute(
        &format!("UPDATE {} SET {} = ? WHERE id = ?", c.table, photo.field),
        rusqlite::params![stored, pk],
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": c.table })),
    })?;

    Ok(json!({ "collection": c.name, "pk": pk, "storedPath": stored }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let needs_db = matches!(
        req.method.as_str(),
        "records.insert" | "records.list" | "records.count" | "assets.attach"
    );
    if !needs_db {
        return None;
    }
    let Some(workspace) = state.workspace.clone() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let media = MediaPaths::new(&workspace);

    let result = match req.method.as_str() {
        "records.insert" => records_insert(conn, &req.params),
        "records.list" => records_list(conn, &req.params),
        "records.count" => records_count(conn, &req.params),
        "assets.attach" => assets_attach(conn, &media, &req.params),
        _ => return None,
    };
    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(e) => e.response(&req.id),
    })
}
