//! Declared entity-collection registry.
//!
//! Every table the backup document moves is declared here once: its
//! `backup.json` key, its columns, and the collections it references.
//! Insert order is derived by a stable topological sort of the reference
//! graph; delete order is the exact reverse. Nothing else in the crate
//! hardcodes either order.

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::{json, Map, Number, Value};

#[derive(Debug)]
pub struct PhotoField {
    /// Column holding a media-relative path ("ogrenci_profil/ali.jpg").
    pub field: &'static str,
    /// `photo_info` "type" value, also keys the restore destination dir.
    pub kind: &'static str,
}

#[derive(Debug)]
pub struct Collection {
    /// Fixed `backup.json` key and `model` value of serialized rows.
    pub name: &'static str,
    pub table: &'static str,
    /// All columns except the integer primary key `id`.
    pub columns: &'static [&'static str],
    pub depends_on: &'static [&'static str],
    pub photo: Option<PhotoField>,
}

// Declaration order mirrors the original backup document; the derived
// insert order is what actually hits the database.
pub const COLLECTIONS: &[Collection] = &[
    Collection {
        name: "ogrenciler",
        table: "ogrenciler",
        columns: &[
            "ad_soyad",
            "kayit_tarihi",
            "seviye",
            "profil_foto",
            "ozel_notlar",
            "son_guncelleme",
        ],
        depends_on: &[],
        photo: Some(PhotoField {
            field: "profil_foto",
            kind: "ogrenci",
        }),
    },
    Collection {
        name: "yazilar",
        table: "yazilar",
        columns: &[
            "title",
            "description",
            "image_url",
            "date",
            "is_active",
            "slug",
            "tarih",
            "category_id",
        ],
        depends_on: &["categories"],
        photo: Some(PhotoField {
            field: "image_url",
            kind: "yazi",
        }),
    },
    Collection {
        name: "ezber_kayitlari",
        table: "ezber_kayitlari",
        columns: &[
            "ogrenci_id",
            "sure_id",
            "durum",
            "baslama_tarihi",
            "bitis_tarihi",
            "tahmini_bitis",
            "gunluk_calisma",
            "zorluk",
            "yorum",
            "ilerleme",
        ],
        depends_on: &["ogrenciler", "ezber_sureleri"],
        photo: None,
    },
    Collection {
        name: "sinav_sonuclari",
        table: "sinav_sonuclari",
        columns: &["ogrenci_id", "ders_id", "sinav_tipi", "puan", "tarih", "aciklama"],
        depends_on: &["ogrenciler", "dersler"],
        photo: None,
    },
    Collection {
        name: "ders_notlari",
        table: "ders_notlari",
        columns: &[
            "ogrenci_id",
            "ders_id",
            "not_degeri",
            "yorum",
            "tarih",
            "olusturulma_tarihi",
            "guncelleme_tarihi",
        ],
        depends_on: &["ogrenciler", "dersler"],
        photo: None,
    },
    Collection {
        name: "alintilar",
        table: "alintilar",
        columns: &[
            "quote_text",
            "author",
            "source",
            "category",
            "is_active",
            "created_at",
        ],
        depends_on: &[],
        photo: None,
    },
    Collection {
        name: "dersler",
        table: "dersler",
        columns: &["ad", "tur", "aciklama"],
        depends_on: &[],
        photo: None,
    },
    Collection {
        name: "ezber_sureleri",
        table: "ezber_sureleri",
        columns: &["ad", "sira", "tahmini_sure", "aciklama"],
        depends_on: &[],
        photo: None,
    },
    Collection {
        name: "elifba_ezberleri",
        table: "elifba_ezberleri",
        columns: &["ad", "sira", "tahmini_sure", "aciklama"],
        depends_on: &[],
        photo: None,
    },
    Collection {
        name: "elifba_ezber_durumlari",
        table: "elifba_ezber_durumlari",
        columns: &[
            "ogrenci_id",
            "ezber_id",
            "durum",
            "baslama_tarihi",
            "bitis_tarihi",
            "yorum",
            "tamamlandi_tarihi",
        ],
        depends_on: &["ogrenciler", "elifba_ezberleri"],
        photo: None,
    },
    Collection {
        name: "categories",
        table: "categories",
        columns: &["name", "slug"],
        depends_on: &[],
        photo: None,
    },
    Collection {
        name: "galeri",
        table: "galeri",
        columns: &["baslik", "dosya", "yukleme_tarihi"],
        depends_on: &[],
        photo: Some(PhotoField {
            field: "dosya",
            kind: "galeri",
        }),
    },
];

pub fn find(name: &str) -> Option<&'static Collection> {
    COLLECTIONS.iter().find(|c| c.name == name)
}

/// Parents-before-children order, stable with respect to declaration order.
pub fn insert_order() -> Vec<&'static Collection> {
    let mut placed: Vec<&'static Collection> = Vec::with_capacity(COLLECTIONS.len());
    let mut done = vec![false; COLLECTIONS.len()];
    loop {
        let mut progressed = false;
        for (i, c) in COLLECTIONS.iter().enumerate() {
            if done[i] {
                continue;
            }
            let ready = c
                .depends_on
                .iter()
                .all(|dep| placed.iter().any(|p| p.name == *dep));
            if ready {
                placed.push(c);
                done[i] = true;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    // Static graph is acyclic; leftovers would mean a declaration bug.
    for (i, c) in COLLECTIONS.iter().enumerate() {
        if !done[i] {
            log::error!("collection {} unreachable in dependency order", c.name);
            placed.push(c);
        }
    }
    placed
}

/// Children-before-parents order: the exact reverse of [`insert_order`].
pub fn delete_order() -> Vec<&'static Collection> {
    let mut order = insert_order();
    order.reverse();
    order
}

fn sql_to_json(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        // No blob columns exist in this schema.
        ValueRef::Blob(_) => Value::Null,
    }
}

fn json_to_sql(v: &Value) -> SqlValue {
    match v {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Serialize every row of a collection in `{model, pk, fields}` form.
pub fn serialize_rows(conn: &Connection, c: &Collection) -> anyhow::Result<Vec<Value>> {
    let sql = format!("SELECT id, {} FROM {} ORDER BY id", c.columns.join(", "), c.table);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |r| {
            let pk: i64 = r.get(0)?;
            let mut fields = Map::new();
            for (i, col) in c.columns.iter().enumerate() {
                fields.insert((*col).to_string(), sql_to_json(r.get_ref(i + 1)?));
            }
            Ok(json!({ "model": c.name, "pk": pk, "fields": fields }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Insert one serialized row, preserving its primary key when given.
/// Returns the row's primary key. Unknown field keys are ignored so that
/// documents written by newer producers still load.
pub fn insert_row(
    conn: &Connection,
    c: &Collection,
    pk: Option<i64>,
    fields: &Map<String, Value>,
) -> rusqlite::Result<i64> {
    let placeholders = vec!["?"; c.columns.len() + 1].join(", ");
    let sql = format!(
        "INSERT INTO {}(id, {}) VALUES({})",
        c.table,
        c.columns.join(", "),
        placeholders
    );
    let mut binds: Vec<SqlValue> = Vec::with_capacity(c.columns.len() + 1);
    binds.push(pk.map(SqlValue::Integer).unwrap_or(SqlValue::Null));
    for col in c.columns {
        binds.push(fields.get(*col).map(json_to_sql).unwrap_or(SqlValue::Null));
    }
    conn.execute(&sql, params_from_iter(binds))?;
    Ok(pk.unwrap_or_else(|| conn.last_insert_rowid()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_collection_is_ordered_once() {
        let order = insert_order();
        assert_eq!(order.len(), COLLECTIONS.len());
        for c in COLLECTIONS {
            assert_eq!(
                order.iter().filter(|o| o.name == c.name).count(),
                1,
                "{} must appear exactly once",
                c.name
            );
        }
    }

    #[test]
    fn dependencies_precede_dependents_on_insert() {
        let order = insert_order();
        let pos = |name: &str| order.iter().position(|c| c.name == name).unwrap();
        for c in COLLECTIONS {
            for dep in c.depends_on {
                assert!(
                    pos(dep) < pos(c.name),
                    "{} must be inserted before {}",
                    dep,
                    c.name
                );
            }
        }
    }

    #[test]
    fn delete_order_is_exact_reverse_of_insert_order() {
        let forward: Vec<&str> = insert_order().iter().map(|c| c.name).collect();
        let mut backward: Vec<&str> = delete_order().iter().map(|c| c.name).collect();
        backward.reverse();
        assert_eq!(forward, backward);
    }

    #[test]
    fn unknown_dependency_names_are_declaration_bugs() {
        for c in COLLECTIONS {
            for dep in c.depends_on {
                assert!(find(dep).is_some(), "{} references unknown {}", c.name, dep);
            }
        }
    }
}
