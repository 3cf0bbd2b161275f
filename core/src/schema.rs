//! Database schema and migrations for Promptloom
//!
//! Manages the SQLite database with four tables:
//! - prompts: de-duplicated prompt corpus with fingerprints and embeddings
//! - families: clusters with centroids and template watermarks
//! - templates: immutable version chain of canonical templates per family
//! - lineage: parent/child mutation edges between prompts

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize or migrate the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    let version = get_schema_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
        [],
    )?;

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// V1: prompts, families, templates, lineage
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS families (
            family_id TEXT PRIMARY KEY,
            family_name TEXT NOT NULL,
            description TEXT,
            member_count INTEGER NOT NULL DEFAULT 0,
            centroid_vector TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            member_count_at_last_template INTEGER NOT NULL DEFAULT 0,
            needs_template_update INTEGER NOT NULL DEFAULT 0,
            template_update_threshold INTEGER NOT NULL DEFAULT 5,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_families_name ON families(family_name);

        CREATE TABLE IF NOT EXISTS prompts (
            prompt_id TEXT PRIMARY KEY,
            original_text TEXT NOT NULL,
            normalized_text TEXT NOT NULL,
            dedup_hash TEXT NOT NULL,
            simhash TEXT NOT NULL,
            embedding_vector TEXT,
            family_id TEXT REFERENCES families(family_id),
            metadata TEXT,
            is_template_seed INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_prompts_dedup_hash ON prompts(dedup_hash);
        CREATE INDEX IF NOT EXISTS idx_prompts_simhash ON prompts(simhash);
        CREATE INDEX IF NOT EXISTS idx_prompts_family_id ON prompts(family_id);
        CREATE INDEX IF NOT EXISTS idx_prompts_created_at ON prompts(created_at);

        CREATE TABLE IF NOT EXISTS templates (
            template_id TEXT PRIMARY KEY,
            family_id TEXT NOT NULL REFERENCES families(family_id),
            parent_template_id TEXT REFERENCES templates(template_id),
            is_active INTEGER NOT NULL DEFAULT 1,
            template_text TEXT NOT NULL,
            slots TEXT NOT NULL DEFAULT '[]',
            version_major INTEGER NOT NULL DEFAULT 1,
            version_minor INTEGER NOT NULL DEFAULT 0,
            version_patch INTEGER NOT NULL DEFAULT 0,
            quality_score REAL,
            is_refined INTEGER NOT NULL DEFAULT 0,
            intent_embedding TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_templates_family_id ON templates(family_id);
        CREATE INDEX IF NOT EXISTS idx_templates_is_active ON templates(is_active);

        CREATE TABLE IF NOT EXISTS lineage (
            lineage_id TEXT PRIMARY KEY,
            parent_prompt_id TEXT REFERENCES prompts(prompt_id),
            child_prompt_id TEXT NOT NULL REFERENCES prompts(prompt_id),
            mutation_type TEXT NOT NULL,
            confidence REAL NOT NULL DEFAULT 0.0,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_lineage_parent ON lineage(parent_prompt_id);
        CREATE INDEX IF NOT EXISTS idx_lineage_child ON lineage(child_prompt_id);",
    )?;

    set_schema_version(conn, 1)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_init() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"prompts".to_string()));
        assert!(tables.contains(&"families".to_string()));
        assert!(tables.contains(&"templates".to_string()));
        assert!(tables.contains(&"lineage".to_string()));
        assert!(tables.contains(&"schema_version".to_string()));
    }

    #[test]
    fn test_schema_init_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }
}
