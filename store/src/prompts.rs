//! Prompt store operations

use rusqlite::{params, Row};
use tracing::debug;

use promptloom_core::error::Result;
use promptloom_core::types::Prompt;

use crate::db::{decode_vec, encode_vec, Database};

const PROMPT_COLUMNS: &str = "prompt_id, original_text, normalized_text, dedup_hash, simhash, \
     embedding_vector, family_id, metadata, is_template_seed, created_at, updated_at";

fn row_to_prompt(row: &Row) -> rusqlite::Result<Prompt> {
    Ok(Prompt {
        prompt_id: row.get(0)?,
        original_text: row.get(1)?,
        normalized_text: row.get(2)?,
        dedup_hash: row.get(3)?,
        simhash: row.get(4)?,
        embedding: decode_vec(row.get(5)?),
        family_id: row.get(6)?,
        metadata: row.get(7)?,
        is_template_seed: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

impl Database {
    /// Insert a new prompt row. The caller has already passed deduplication.
    pub fn insert_prompt(&self, prompt: &Prompt) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO prompts (
                prompt_id, original_text, normalized_text, dedup_hash, simhash,
                embedding_vector, family_id, metadata, is_template_seed,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                prompt.prompt_id,
                prompt.original_text,
                prompt.normalized_text,
                prompt.dedup_hash,
                prompt.simhash,
                prompt.embedding.as_deref().map(encode_vec),
                prompt.family_id,
                prompt.metadata,
                prompt.is_template_seed,
                prompt.created_at,
                prompt.updated_at,
            ],
        )?;
        debug!("Inserted prompt {}", prompt.prompt_id);
        Ok(())
    }

    pub fn get_prompt(&self, prompt_id: &str) -> Result<Option<Prompt>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM prompts WHERE prompt_id = ?1",
            PROMPT_COLUMNS
        ))?;
        let mut rows = stmt.query_map(params![prompt_id], row_to_prompt)?;
        Ok(rows.next().transpose()?)
    }

    /// Exact-hit lookup by dedup hash.
    pub fn get_prompt_by_hash(&self, dedup_hash: &str) -> Result<Option<Prompt>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM prompts WHERE dedup_hash = ?1",
            PROMPT_COLUMNS
        ))?;
        let mut rows = stmt.query_map(params![dedup_hash], row_to_prompt)?;
        Ok(rows.next().transpose()?)
    }

    /// All (prompt_id, simhash) pairs, for rebuilding the near-dup index.
    pub fn all_simhashes(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT prompt_id, simhash FROM prompts")?;
        let pairs = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pairs)
    }

    /// Prompts still lacking an embedding or a family, in creation order.
    pub fn pending_prompts(&self, limit: usize) -> Result<Vec<Prompt>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM prompts
             WHERE embedding_vector IS NULL OR family_id IS NULL
             ORDER BY created_at ASC LIMIT ?1",
            PROMPT_COLUMNS
        ))?;
        let prompts = stmt
            .query_map(params![limit as i64], row_to_prompt)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(prompts)
    }

    pub fn pending_count(&self) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM prompts
             WHERE embedding_vector IS NULL OR family_id IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn classified_count(&self) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM prompts WHERE family_id IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn prompt_count(&self) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM prompts", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// The whole corpus in creation order (full clustering input).
    pub fn all_prompts(&self) -> Result<Vec<Prompt>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM prompts ORDER BY created_at ASC",
            PROMPT_COLUMNS
        ))?;
        let prompts = stmt
            .query_map([], row_to_prompt)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(prompts)
    }

    pub fn latest_prompts(&self, limit: usize) -> Result<Vec<Prompt>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM prompts ORDER BY created_at DESC LIMIT ?1",
            PROMPT_COLUMNS
        ))?;
        let prompts = stmt
            .query_map(params![limit as i64], row_to_prompt)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(prompts)
    }

    pub fn prompts_by_family(&self, family_id: &str) -> Result<Vec<Prompt>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM prompts WHERE family_id = ?1 ORDER BY created_at ASC",
            PROMPT_COLUMNS
        ))?;
        let prompts = stmt
            .query_map(params![family_id], row_to_prompt)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(prompts)
    }

    /// Persist a prompt's embedding alone.
    pub fn update_embedding(&self, prompt_id: &str, embedding: &[f32]) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE prompts SET embedding_vector = ?1, updated_at = ?2 WHERE prompt_id = ?3",
            params![
                encode_vec(embedding),
                promptloom_core::types::now_utc_iso(),
                prompt_id
            ],
        )?;
        Ok(())
    }

    /// Persist embedding and (possibly null) family in one commit.
    ///
    /// A single UPDATE statement, so the prompt is never observable in a
    /// half-assigned state.
    pub fn update_embedding_and_family(
        &self,
        prompt_id: &str,
        embedding: &[f32],
        family_id: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE prompts SET embedding_vector = ?1, family_id = ?2, updated_at = ?3
             WHERE prompt_id = ?4",
            params![
                encode_vec(embedding),
                family_id,
                promptloom_core::types::now_utc_iso(),
                prompt_id
            ],
        )?;
        Ok(())
    }

    pub fn update_family(&self, prompt_id: &str, family_id: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE prompts SET family_id = ?1, updated_at = ?2 WHERE prompt_id = ?3",
            params![
                family_id,
                promptloom_core::types::now_utc_iso(),
                prompt_id
            ],
        )?;
        Ok(())
    }

    /// Null out every stored embedding (embedding-model change).
    /// Returns the number of cleared rows.
    pub fn clear_embeddings(&self) -> Result<u64> {
        let conn = self.conn()?;
        let cleared = conn.execute(
            "UPDATE prompts SET embedding_vector = NULL, updated_at = ?1
             WHERE embedding_vector IS NOT NULL",
            params![promptloom_core::types::now_utc_iso()],
        )?;
        Ok(cleared as u64)
    }

    /// Flag the prompts a template extraction sampled from.
    pub fn mark_template_seeds(&self, prompt_ids: &[String]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for id in prompt_ids {
            tx.execute(
                "UPDATE prompts SET is_template_seed = 1 WHERE prompt_id = ?1",
                params![id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}
