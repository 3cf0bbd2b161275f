//! Database handle
//!
//! Opens a fresh connection per operation group; connections are not shared
//! across threads.

use std::path::{Path, PathBuf};

use rusqlite::Connection;

use promptloom_core::error::Result;
use promptloom_core::schema;

/// Handle to the Promptloom database file.
pub struct Database {
    path: PathBuf,
}

impl Database {
    /// Open or create a database at the given path and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
        schema::init_schema(&conn)?;

        Ok(Self { path })
    }

    /// Get a new connection.
    pub(crate) fn conn(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
        Ok(conn)
    }

    /// Path of the underlying database file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Encode an embedding vector as the JSON TEXT column value.
pub(crate) fn encode_vec(v: &[f32]) -> String {
    serde_json::to_string(v).unwrap_or_else(|_| "[]".to_string())
}

/// Decode a JSON TEXT column back into a vector. Absent or malformed
/// values decode to None.
pub(crate) fn decode_vec(raw: Option<String>) -> Option<Vec<f32>> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db")).unwrap();
        assert!(db.path().exists());
    }

    #[test]
    fn test_vec_roundtrip() {
        let v = vec![0.25f32, -1.0, 3.5];
        let encoded = encode_vec(&v);
        assert_eq!(decode_vec(Some(encoded)), Some(v));
        assert_eq!(decode_vec(None), None);
        assert_eq!(decode_vec(Some("not json".to_string())), None);
    }
}
