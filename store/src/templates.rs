//! Template store operations
//!
//! Templates are never updated in place. Each extraction inserts a new row,
//! flips the previous active row off, links back via parent_template_id, and
//! advances the family's watermark, all in one transaction, so the
//! one-active-per-family invariant holds at every commit point.

use rusqlite::{params, Row};
use tracing::debug;

use promptloom_core::error::Result;
use promptloom_core::types::{now_utc_iso, Slot, TemplateRecord};

use crate::db::{decode_vec, encode_vec, Database};

const TEMPLATE_COLUMNS: &str = "template_id, family_id, parent_template_id, is_active, template_text, \
     slots, version_major, version_minor, version_patch, quality_score, \
     is_refined, intent_embedding, created_at, updated_at";

fn row_to_template(row: &Row) -> rusqlite::Result<TemplateRecord> {
    let slots_raw: String = row.get(5)?;
    let slots: Vec<Slot> = serde_json::from_str(&slots_raw).unwrap_or_default();

    Ok(TemplateRecord {
        template_id: row.get(0)?,
        family_id: row.get(1)?,
        parent_template_id: row.get(2)?,
        is_active: row.get(3)?,
        template_text: row.get(4)?,
        slots,
        version_major: row.get(6)?,
        version_minor: row.get(7)?,
        version_patch: row.get(8)?,
        quality_score: row.get(9)?,
        is_refined: row.get(10)?,
        intent_embedding: decode_vec(row.get(11)?),
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

impl Database {
    pub fn get_template(&self, template_id: &str) -> Result<Option<TemplateRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM templates WHERE template_id = ?1",
            TEMPLATE_COLUMNS
        ))?;
        let mut rows = stmt.query_map(params![template_id], row_to_template)?;
        Ok(rows.next().transpose()?)
    }

    /// The family's single active template, if any.
    pub fn active_template(&self, family_id: &str) -> Result<Option<TemplateRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM templates WHERE family_id = ?1 AND is_active = 1",
            TEMPLATE_COLUMNS
        ))?;
        let mut rows = stmt.query_map(params![family_id], row_to_template)?;
        Ok(rows.next().transpose()?)
    }

    /// Insert a new template version and retire the previous active one.
    ///
    /// `member_count` becomes the family's member_count_at_last_template.
    pub fn insert_template_version(
        &self,
        template: &TemplateRecord,
        member_count: i64,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = now_utc_iso();

        tx.execute(
            "UPDATE templates SET is_active = 0, updated_at = ?1
             WHERE family_id = ?2 AND is_active = 1",
            params![now, template.family_id],
        )?;

        tx.execute(
            "INSERT INTO templates (
                template_id, family_id, parent_template_id, is_active, template_text,
                slots, version_major, version_minor, version_patch, quality_score,
                is_refined, intent_embedding, created_at, updated_at
            ) VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                template.template_id,
                template.family_id,
                template.parent_template_id,
                template.template_text,
                serde_json::to_string(&template.slots)?,
                template.version_major,
                template.version_minor,
                template.version_patch,
                template.quality_score,
                template.is_refined,
                template.intent_embedding.as_deref().map(encode_vec),
                template.created_at,
                template.updated_at,
            ],
        )?;

        tx.execute(
            "UPDATE families SET member_count_at_last_template = ?1,
                needs_template_update = 0, updated_at = ?2
             WHERE family_id = ?3",
            params![member_count, now, template.family_id],
        )?;

        tx.commit()?;
        debug!(
            "Inserted template {} v{} for family {}",
            template.template_id,
            template.version_string(),
            template.family_id
        );
        Ok(())
    }

    /// Full version chain of a family, oldest first.
    pub fn template_chain(&self, family_id: &str) -> Result<Vec<TemplateRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM templates WHERE family_id = ?1 ORDER BY created_at ASC",
            TEMPLATE_COLUMNS
        ))?;
        let templates = stmt
            .query_map(params![family_id], row_to_template)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(templates)
    }

    pub fn template_count(&self) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM templates", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use promptloom_core::types::{new_id, now_utc_iso, TemplateRecord};

    use crate::Database;

    fn make_template(family_id: &str, parent: Option<String>) -> TemplateRecord {
        TemplateRecord {
            template_id: new_id(),
            family_id: family_id.to_string(),
            parent_template_id: parent,
            is_active: true,
            template_text: "Write a {{language}} script to {{task}}".to_string(),
            slots: vec![],
            version_major: 1,
            version_minor: 0,
            version_patch: 0,
            quality_score: None,
            is_refined: false,
            intent_embedding: None,
            created_at: now_utc_iso(),
            updated_at: now_utc_iso(),
        }
    }

    fn seeded_family(db: &Database) -> String {
        let normalized = "seed prompt text";
        let prompt = promptloom_core::types::Prompt {
            prompt_id: new_id(),
            original_text: normalized.to_string(),
            normalized_text: normalized.to_string(),
            dedup_hash: promptloom_core::normalize::dedup_hash(normalized),
            simhash: "0".repeat(16),
            embedding: None,
            family_id: None,
            metadata: None,
            is_template_seed: false,
            created_at: now_utc_iso(),
            updated_at: now_utc_iso(),
        };
        db.insert_prompt(&prompt).unwrap();
        db.commit_cluster("Cluster-0", None, &[1.0], &[prompt.prompt_id])
            .unwrap()
    }

    #[test]
    fn test_insert_version_flips_active_and_links_parent() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db")).unwrap();
        let family_id = seeded_family(&db);

        let first = make_template(&family_id, None);
        db.insert_template_version(&first, 3).unwrap();

        let active = db.active_template(&family_id).unwrap().unwrap();
        assert_eq!(active.template_id, first.template_id);
        assert_eq!(
            db.get_family(&family_id)
                .unwrap()
                .unwrap()
                .member_count_at_last_template,
            3
        );

        let mut second = make_template(&family_id, Some(first.template_id.clone()));
        second.version_minor = 1;
        db.insert_template_version(&second, 8).unwrap();

        let active = db.active_template(&family_id).unwrap().unwrap();
        assert_eq!(active.template_id, second.template_id);
        assert_eq!(
            active.parent_template_id,
            Some(first.template_id.clone())
        );

        let chain = db.template_chain(&family_id).unwrap();
        assert_eq!(chain.len(), 2);
        assert!(!chain[0].is_active);
        assert!(chain[1].is_active);
        // Exactly one root, chain is a total order
        assert!(chain[0].parent_template_id.is_none());
        assert_eq!(
            chain[1].parent_template_id.as_deref(),
            Some(chain[0].template_id.as_str())
        );
    }
}
