//! Local SQLite index of `FileMetadata` records (§3): fingerprint, name,
//! size, MIME type, the locally known seeders list, and an optional
//! encryption descriptor. This is a read-through cache over what KAD holds
//! authoritatively — losing it just means re-querying the DHT.

use chrono::{DateTime, Local};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

use crate::error::ChiralResult;

/// A locally known file, published or downloaded.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub id: i64,
    pub name: String,
    pub fingerprint_hex: String,
    pub original_filename: String,
    pub file_size: u64,
    pub mime_type: String,
    pub created_at: DateTime<Local>,
    pub tags: Vec<String>,
    pub seeders: Vec<String>,
    pub encryption_descriptor: Option<String>,
}

pub struct DatabaseManager {
    connection: Connection,
}

impl DatabaseManager {
    pub fn new(db_path: &PathBuf) -> ChiralResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let connection = Connection::open(db_path)?;
        let manager = DatabaseManager { connection };
        manager.initialize_schema()?;
        Ok(manager)
    }

    fn initialize_schema(&self) -> ChiralResult<()> {
        self.connection.execute(
            "CREATE TABLE IF NOT EXISTS files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                fingerprint_hex TEXT NOT NULL UNIQUE,
                original_filename TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                mime_type TEXT NOT NULL DEFAULT 'application/octet-stream',
                created_at TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '',
                seeders TEXT NOT NULL DEFAULT '',
                encryption_descriptor TEXT
            )",
            [],
        )?;
        self.connection.execute(
            "CREATE INDEX IF NOT EXISTS idx_files_fingerprint ON files(fingerprint_hex)",
            [],
        )?;
        Ok(())
    }

    pub fn store_file(
        &self,
        name: &str,
        fingerprint_hex: &str,
        original_filename: &str,
        file_size: u64,
        mime_type: &str,
        tags: &[String],
        encryption_descriptor: Option<&str>,
    ) -> ChiralResult<i64> {
        self.connection.execute(
            "INSERT INTO files (name, fingerprint_hex, original_filename, file_size, mime_type, created_at, tags, seeders, encryption_descriptor)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, '', ?8)",
            params![
                name,
                fingerprint_hex,
                original_filename,
                file_size,
                mime_type,
                Local::now().to_rfc3339(),
                tags.join(","),
                encryption_descriptor,
            ],
        )?;
        Ok(self.connection.last_insert_rowid())
    }

    /// Append a peer to a file's locally known seeders list. Monotonic per
    /// the `FileMetadata` invariant; duplicates are not re-added.
    pub fn add_seeder(&self, fingerprint_hex: &str, peer_id: &str) -> ChiralResult<()> {
        if let Some(mut entry) = self.get_file_by_fingerprint(fingerprint_hex)? {
            if !entry.seeders.iter().any(|s| s == peer_id) {
                entry.seeders.push(peer_id.to_string());
                self.connection.execute(
                    "UPDATE files SET seeders = ?1 WHERE fingerprint_hex = ?2",
                    params![entry.seeders.join(","), fingerprint_hex],
                )?;
            }
        }
        Ok(())
    }

    pub fn get_file_by_name(&self, name: &str) -> ChiralResult<Option<FileEntry>> {
        let mut stmt = self.connection.prepare(
            "SELECT id, name, fingerprint_hex, original_filename, file_size, mime_type, created_at, tags, seeders, encryption_descriptor
             FROM files WHERE name = ?1",
        )?;
        Ok(stmt
            .query_row(params![name], Self::row_to_entry)
            .optional()?)
    }

    pub fn get_file_by_fingerprint(&self, fingerprint_hex: &str) -> ChiralResult<Option<FileEntry>> {
        let mut stmt = self.connection.prepare(
            "SELECT id, name, fingerprint_hex, original_filename, file_size, mime_type, created_at, tags, seeders, encryption_descriptor
             FROM files WHERE fingerprint_hex = ?1",
        )?;
        Ok(stmt
            .query_row(params![fingerprint_hex], Self::row_to_entry)
            .optional()?)
    }

    pub fn list_files(&self) -> ChiralResult<Vec<FileEntry>> {
        let mut stmt = self.connection.prepare(
            "SELECT id, name, fingerprint_hex, original_filename, file_size, mime_type, created_at, tags, seeders, encryption_descriptor
             FROM files ORDER BY created_at DESC",
        )?;
        let entries = stmt
            .query_map([], Self::row_to_entry)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn delete_file(&self, name: &str) -> ChiralResult<bool> {
        let rows = self
            .connection
            .execute("DELETE FROM files WHERE name = ?1", params![name])?;
        Ok(rows > 0)
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<FileEntry> {
        let tags_str: String = row.get(7)?;
        let seeders_str: String = row.get(8)?;
        let created_at_str: String = row.get(6)?;
        let created_at = DateTime::parse_from_rfc3339(&created_at_str)
            .map_err(|_| {
                rusqlite::Error::InvalidColumnType(6, "created_at".to_string(), rusqlite::types::Type::Text)
            })?
            .with_timezone(&Local::now().timezone());

        Ok(FileEntry {
            id: row.get(0)?,
            name: row.get(1)?,
            fingerprint_hex: row.get(2)?,
            original_filename: row.get(3)?,
            file_size: row.get(4)?,
            mime_type: row.get(5)?,
            created_at,
            tags: split_csv(&tags_str),
            seeders: split_csv(&seeders_str),
            encryption_descriptor: row.get(9)?,
        })
    }
}

fn split_csv(s: &str) -> Vec<String> {
    if s.is_empty() {
        Vec::new()
    } else {
        s.split(',').map(|s| s.trim().to_string()).collect()
    }
}

/// Default database path under the configured store directory.
pub fn get_default_db_path(store_dir: &Path) -> PathBuf {
    store_dir.join("files.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (DatabaseManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("files.db");
        (DatabaseManager::new(&path).unwrap(), dir)
    }

    #[test]
    fn stores_and_retrieves_by_fingerprint() {
        let (db, _dir) = manager();
        db.store_file("report", "abcd1234", "report.pdf", 1024, "application/pdf", &[], None)
            .unwrap();
        let entry = db.get_file_by_fingerprint("abcd1234").unwrap().unwrap();
        assert_eq!(entry.name, "report");
        assert_eq!(entry.file_size, 1024);
    }

    #[test]
    fn seeders_list_is_monotonic_and_deduplicated() {
        let (db, _dir) = manager();
        db.store_file("movie", "ffff", "movie.mkv", 2048, "video/x-matroska", &[], None)
            .unwrap();
        db.add_seeder("ffff", "peer-a").unwrap();
        db.add_seeder("ffff", "peer-a").unwrap();
        db.add_seeder("ffff", "peer-b").unwrap();

        let entry = db.get_file_by_fingerprint("ffff").unwrap().unwrap();
        assert_eq!(entry.seeders, vec!["peer-a", "peer-b"]);
    }
}
