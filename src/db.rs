use rusqlite::Connection;
use std::path::Path;

pub const DB_FILENAME: &str = "hafizlik.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILENAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS categories(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            slug TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS dersler(
            id INTEGER PRIMARY KEY,
            ad TEXT NOT NULL,
            tur TEXT NOT NULL UNIQUE,
            aciklama TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS ezber_sureleri(
            id INTEGER PRIMARY KEY,
            ad TEXT NOT NULL,
            sira INTEGER NOT NULL UNIQUE,
            tahmini_sure INTEGER NOT NULL DEFAULT 7,
            aciklama TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS elifba_ezberleri(
            id INTEGER PRIMARY KEY,
            ad TEXT NOT NULL,
            sira INTEGER NOT NULL UNIQUE,
            tahmini_sure INTEGER NOT NULL DEFAULT 3,
            aciklama TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS ogrenciler(
            id INTEGER PRIMARY KEY,
            ad_soyad TEXT NOT NULL,
            kayit_tarihi TEXT,
            seviye TEXT NOT NULL DEFAULT 'HAZ1',
            profil_foto TEXT,
            ozel_notlar TEXT NOT NULL DEFAULT '',
            son_guncelleme TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS yazilar(
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            image_url TEXT,
            date TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            slug TEXT NOT NULL UNIQUE,
            tarih TEXT,
            category_id INTEGER NOT NULL,
            FOREIGN KEY(category_id) REFERENCES categories(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_yazilar_category ON yazilar(category_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS alintilar(
            id INTEGER PRIMARY KEY,
            quote_text TEXT NOT NULL,
            author TEXT,
            source TEXT,
            category TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS galeri(
            id INTEGER PRIMARY KEY,
            baslik TEXT,
            dosya TEXT,
            yukleme_tarihi TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS ezber_kayitlari(
            id INTEGER PRIMARY KEY,
            ogrenci_id INTEGER NOT NULL,
            sure_id INTEGER NOT NULL,
            durum TEXT NOT NULL DEFAULT 'BASLAMADI',
            baslama_tarihi TEXT,
            bitis_tarihi TEXT,
            tahmini_bitis TEXT,
            gunluk_calisma INTEGER NOT NULL DEFAULT 1,
            zorluk INTEGER NOT NULL DEFAULT 2,
            yorum TEXT NOT NULL DEFAULT '',
            ilerleme INTEGER NOT NULL DEFAULT 0,
            UNIQUE(ogrenci_id, sure_id),
            FOREIGN KEY(ogrenci_id) REFERENCES ogrenciler(id),
            FOREIGN KEY(sure_id) REFERENCES ezber_sureleri(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ezber_kayitlari_ogrenci ON ezber_kayitlari(ogrenci_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sinav_sonuclari(
            id INTEGER PRIMARY KEY,
            ogrenci_id INTEGER NOT NULL,
            ders_id INTEGER NOT NULL,
            sinav_tipi TEXT NOT NULL,
            puan INTEGER NOT NULL,
            tarih TEXT,
            aciklama TEXT NOT NULL DEFAULT '',
            FOREIGN KEY(ogrenci_id) REFERENCES ogrenciler(id),
            FOREIGN KEY(ders_id) REFERENCES dersler(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sinav_sonuclari_ogrenci ON sinav_sonuclari(ogrenci_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sinav_sonuclari_ders ON sinav_sonuclari(ders_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS ders_notlari(
            id INTEGER PRIMARY KEY,
            ogrenci_id INTEGER NOT NULL,
            ders_id INTEGER NOT NULL,
            not_degeri INTEGER NOT NULL DEFAULT 0,
            yorum TEXT NOT NULL DEFAULT '',
            tarih TEXT,
            olusturulma_tarihi TEXT,
            guncelleme_tarihi TEXT,
            UNIQUE(ogrenci_id, ders_id, tarih),
            FOREIGN KEY(ogrenci_id) REFERENCES ogrenciler(id),
            FOREIGN KEY(ders_id) REFERENCES dersler(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ders_notlari_ogrenci ON ders_notlari(ogrenci_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS elifba_ezber_durumlari(
            id INTEGER PRIMARY KEY,
            ogrenci_id INTEGER NOT NULL,
            ezber_id INTEGER NOT NULL,
            durum TEXT NOT NULL DEFAULT 'BASLAMADI',
            baslama_tarihi TEXT,
            bitis_tarihi TEXT,
            yorum TEXT NOT NULL DEFAULT '',
            tamamlandi_tarihi TEXT,
            UNIQUE(ogrenci_id, ezber_id),
            FOREIGN KEY(ogrenci_id) REFERENCES ogrenciler(id),
            FOREIGN KEY(ezber_id) REFERENCES elifba_ezberleri(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_elifba_durumlari_ogrenci ON elifba_ezber_durumlari(ogrenci_id)",
        [],
    )?;

    Ok(conn)
}
