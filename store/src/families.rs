//! Family store operations
//!
//! Full-pass updates (family upsert + member reassignment) are transactional
//! per family: a failure while committing one family leaves every other
//! family untouched.

use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

use promptloom_core::error::Result;
use promptloom_core::types::{new_id, now_utc_iso, Family};

use crate::db::{decode_vec, encode_vec, Database};

const FAMILY_COLUMNS: &str = "family_id, family_name, description, member_count, centroid_vector, \
     version, member_count_at_last_template, needs_template_update, \
     template_update_threshold, created_at, updated_at";

fn row_to_family(row: &Row) -> rusqlite::Result<Family> {
    Ok(Family {
        family_id: row.get(0)?,
        family_name: row.get(1)?,
        description: row.get(2)?,
        member_count: row.get(3)?,
        centroid: decode_vec(row.get(4)?),
        version: row.get(5)?,
        member_count_at_last_template: row.get(6)?,
        needs_template_update: row.get(7)?,
        template_update_threshold: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

impl Database {
    pub fn get_family(&self, family_id: &str) -> Result<Option<Family>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM families WHERE family_id = ?1",
            FAMILY_COLUMNS
        ))?;
        let mut rows = stmt.query_map(params![family_id], row_to_family)?;
        Ok(rows.next().transpose()?)
    }

    pub fn all_families(&self) -> Result<Vec<Family>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM families ORDER BY created_at ASC",
            FAMILY_COLUMNS
        ))?;
        let families = stmt
            .query_map([], row_to_family)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(families)
    }

    pub fn family_count(&self) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM families", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Centroids of every family that has one, for the assignment loop.
    pub fn family_centroids(&self) -> Result<Vec<(String, Vec<f32>)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT family_id, centroid_vector FROM families WHERE centroid_vector IS NOT NULL",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let raw: Option<String> = row.get(1)?;
                Ok((id, raw))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, raw)| decode_vec(raw).map(|c| (id, c)))
            .collect())
    }

    /// Commit one cluster of a full pass: create or update the family and
    /// point every member prompt at it, atomically.
    ///
    /// Existing families are matched by name (labels are not stable across
    /// passes, names are). Returns the family id.
    pub fn commit_cluster(
        &self,
        family_name: &str,
        description: Option<&str>,
        centroid: &[f32],
        member_ids: &[String],
    ) -> Result<String> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = now_utc_iso();

        let existing: Option<String> = tx
            .query_row(
                "SELECT family_id FROM families WHERE family_name = ?1",
                params![family_name],
                |row| row.get(0),
            )
            .optional()?;

        let family_id = match existing {
            Some(id) => {
                // A shrinking family keeps the watermark within member_count
                tx.execute(
                    "UPDATE families SET centroid_vector = ?1, member_count = ?2,
                        member_count_at_last_template = MIN(member_count_at_last_template, ?2),
                        version = version + 1, updated_at = ?3 WHERE family_id = ?4",
                    params![encode_vec(centroid), member_ids.len() as i64, now, id],
                )?;
                id
            }
            None => {
                let id = new_id();
                tx.execute(
                    "INSERT INTO families (
                        family_id, family_name, description, member_count, centroid_vector,
                        version, member_count_at_last_template, needs_template_update,
                        template_update_threshold, created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, 1, 0, 0, 5, ?6, ?7)",
                    params![
                        id,
                        family_name,
                        description,
                        member_ids.len() as i64,
                        encode_vec(centroid),
                        now,
                        now
                    ],
                )?;
                id
            }
        };

        for prompt_id in member_ids {
            tx.execute(
                "UPDATE prompts SET family_id = ?1, updated_at = ?2 WHERE prompt_id = ?3",
                params![family_id, now, prompt_id],
            )?;
        }

        tx.commit()?;
        debug!(
            "Committed cluster '{}' ({} members) as family {}",
            family_name,
            member_ids.len(),
            family_id
        );
        Ok(family_id)
    }

    /// Clear the family reference of noise points after a full pass.
    pub fn clear_family_assignments(&self, prompt_ids: &[String]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = now_utc_iso();
        for prompt_id in prompt_ids {
            tx.execute(
                "UPDATE prompts SET family_id = NULL, updated_at = ?1 WHERE prompt_id = ?2",
                params![now, prompt_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Advance the template watermark without inserting a new version
    /// (used when re-extraction produced an identical template).
    pub fn set_template_watermark(&self, family_id: &str, member_count: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE families SET member_count_at_last_template = ?1, updated_at = ?2
             WHERE family_id = ?3",
            params![member_count, now_utc_iso(), family_id],
        )?;
        Ok(())
    }

    /// Refresh every family's member_count from the prompts table.
    ///
    /// Bulk operation; must not run concurrently with a full pass.
    pub fn recount_members(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE families SET
                member_count = (SELECT COUNT(*) FROM prompts WHERE prompts.family_id = families.family_id),
                member_count_at_last_template = MIN(
                    member_count_at_last_template,
                    (SELECT COUNT(*) FROM prompts WHERE prompts.family_id = families.family_id)
                ),
                updated_at = ?1",
            params![now_utc_iso()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::Database;

    fn make_prompt(text: &str) -> promptloom_core::types::Prompt {
        use promptloom_core::normalize::{dedup_hash, normalize_text};
        use promptloom_core::simhash::{simhash64, to_hex};
        use promptloom_core::types::{new_id, now_utc_iso, Prompt};

        let normalized = normalize_text(text);
        Prompt {
            prompt_id: new_id(),
            original_text: text.to_string(),
            normalized_text: normalized.clone(),
            dedup_hash: dedup_hash(&normalized),
            simhash: to_hex(simhash64(&normalized)),
            embedding: None,
            family_id: None,
            metadata: None,
            is_template_seed: false,
            created_at: now_utc_iso(),
            updated_at: now_utc_iso(),
        }
    }

    #[test]
    fn test_commit_cluster_creates_then_updates() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db")).unwrap();

        let a = make_prompt("write a python script to scrape a website");
        let b = make_prompt("write a python script to parse a csv file");
        db.insert_prompt(&a).unwrap();
        db.insert_prompt(&b).unwrap();

        let members = vec![a.prompt_id.clone(), b.prompt_id.clone()];
        let id1 = db
            .commit_cluster("Code Generation", None, &[0.5, 0.5], &members)
            .unwrap();

        let family = db.get_family(&id1).unwrap().unwrap();
        assert_eq!(family.member_count, 2);
        assert_eq!(family.version, 1);
        assert_eq!(
            db.get_prompt(&a.prompt_id).unwrap().unwrap().family_id,
            Some(id1.clone())
        );

        // Second pass with the same name updates in place and bumps version
        let id2 = db
            .commit_cluster("Code Generation", None, &[0.6, 0.4], &members[..1])
            .unwrap();
        assert_eq!(id1, id2);
        let family = db.get_family(&id1).unwrap().unwrap();
        assert_eq!(family.version, 2);
        assert_eq!(family.member_count, 1);
    }

    #[test]
    fn test_recount_members() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db")).unwrap();

        let a = make_prompt("prompt one");
        let b = make_prompt("prompt two");
        db.insert_prompt(&a).unwrap();
        db.insert_prompt(&b).unwrap();

        let id = db
            .commit_cluster("Cluster-0", None, &[1.0], &[a.prompt_id.clone()])
            .unwrap();
        db.update_family(&b.prompt_id, Some(&id)).unwrap();

        db.recount_members().unwrap();
        assert_eq!(db.get_family(&id).unwrap().unwrap().member_count, 2);
    }

    #[test]
    fn test_centroids_skip_families_without_one() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db")).unwrap();

        let a = make_prompt("prompt one");
        db.insert_prompt(&a).unwrap();
        db.commit_cluster("Cluster-0", None, &[0.1, 0.9], &[a.prompt_id.clone()])
            .unwrap();

        let centroids = db.family_centroids().unwrap();
        assert_eq!(centroids.len(), 1);
        assert_eq!(centroids[0].1, vec![0.1, 0.9]);
    }
}
