use chrono::{Datelike, Utc};
use std::path::{Path, PathBuf};

use crate::db;

/// Workspace directory layout. The database sits next to a `media/` tree
/// holding uploads, backup archives, emergency snapshots, and the restore
/// scratch area.
#[derive(Debug, Clone)]
pub struct MediaPaths {
    workspace: PathBuf,
}

impl MediaPaths {
    pub fn new(workspace: &Path) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
        }
    }

    pub fn database_file(&self) -> PathBuf {
        self.workspace.join(db::DB_FILENAME)
    }

    pub fn media_root(&self) -> PathBuf {
        self.workspace.join("media")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.media_root().join("backups")
    }

    pub fn emergency_dir(&self) -> PathBuf {
        self.media_root().join("emergency_backup")
    }

    pub fn temp_restore_dir(&self) -> PathBuf {
        self.media_root().join("temp_restore")
    }

    /// Destination for the cold database copy carried inside an archive.
    pub fn database_copy_dir(&self) -> PathBuf {
        self.media_root().join("database")
    }

    /// Resolve a media-relative field value ("uploads/x.jpg") to disk.
    pub fn resolve_media(&self, rel: &str) -> PathBuf {
        self.media_root().join(rel)
    }

    /// Destination directory for a restored photo, keyed by `photo_info`
    /// type. Gallery photos land in the current year/month folder.
    pub fn photo_dest_dir(&self, kind: &str) -> Option<PathBuf> {
        match kind {
            "yazi" => Some(self.media_root().join("uploads")),
            "ogrenci" => Some(self.media_root().join("ogrenci_profil")),
            "galeri" => {
                let now = Utc::now();
                Some(
                    self.media_root()
                        .join("galeri")
                        .join(now.year().to_string())
                        .join(format!("{:02}", now.month())),
                )
            }
            _ => None,
        }
    }

    pub fn ensure_base_dirs(&self) -> anyhow::Result<()> {
        for dir in [
            self.backups_dir(),
            self.emergency_dir(),
            self.temp_restore_dir(),
            self.media_root().join("uploads"),
            self.media_root().join("ogrenci_profil"),
            self.media_root().join("galeri"),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}
