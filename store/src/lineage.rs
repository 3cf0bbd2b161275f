//! Lineage store operations
//!
//! Lineage edges form a DAG across the corpus. Chain traversal walks both
//! directions with a visited set, so a malformed cycle cannot loop forever.

use std::collections::HashSet;

use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use promptloom_core::error::Result;
use promptloom_core::types::{LineageEdge, MutationKind};

use crate::db::Database;

/// Which side of the target prompt a chain entry sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainDirection {
    Current,
    Ancestor,
    Descendant,
}

/// One entry of an evolution chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEntry {
    pub prompt_id: String,
    pub mutation: Option<MutationKind>,
    pub confidence: f64,
    pub direction: ChainDirection,
}

fn row_to_edge(row: &Row) -> rusqlite::Result<LineageEdge> {
    let mutation: String = row.get(3)?;
    Ok(LineageEdge {
        lineage_id: row.get(0)?,
        parent_prompt_id: row.get(1)?,
        child_prompt_id: row.get(2)?,
        mutation: MutationKind::parse(&mutation),
        confidence: row.get(4)?,
        created_at: row.get(5)?,
    })
}

const LINEAGE_COLUMNS: &str =
    "lineage_id, parent_prompt_id, child_prompt_id, mutation_type, confidence, created_at";

impl Database {
    pub fn insert_lineage(&self, edge: &LineageEdge) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO lineage (
                lineage_id, parent_prompt_id, child_prompt_id, mutation_type,
                confidence, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                edge.lineage_id,
                edge.parent_prompt_id,
                edge.child_prompt_id,
                edge.mutation.as_str(),
                edge.confidence,
                edge.created_at,
            ],
        )?;
        Ok(())
    }

    /// Edges whose child is the given prompt.
    pub fn lineage_parents(&self, prompt_id: &str) -> Result<Vec<LineageEdge>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM lineage WHERE child_prompt_id = ?1",
            LINEAGE_COLUMNS
        ))?;
        let edges = stmt
            .query_map(params![prompt_id], row_to_edge)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(edges)
    }

    /// Edges whose parent is the given prompt.
    pub fn lineage_children(&self, prompt_id: &str) -> Result<Vec<LineageEdge>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM lineage WHERE parent_prompt_id = ?1",
            LINEAGE_COLUMNS
        ))?;
        let edges = stmt
            .query_map(params![prompt_id], row_to_edge)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(edges)
    }

    pub fn lineage_count(&self) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM lineage", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Full evolution chain for a prompt: all ancestors, the prompt itself,
    /// then all descendants.
    pub fn lineage_chain(&self, prompt_id: &str) -> Result<Vec<ChainEntry>> {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();

        visited.insert(prompt_id.to_string());
        self.walk_ancestors(prompt_id, &mut visited, &mut chain)?;
        chain.reverse();

        chain.push(ChainEntry {
            prompt_id: prompt_id.to_string(),
            mutation: None,
            confidence: 1.0,
            direction: ChainDirection::Current,
        });

        let mut visited = HashSet::new();
        visited.insert(prompt_id.to_string());
        self.walk_descendants(prompt_id, &mut visited, &mut chain)?;

        Ok(chain)
    }

    fn walk_ancestors(
        &self,
        prompt_id: &str,
        visited: &mut HashSet<String>,
        chain: &mut Vec<ChainEntry>,
    ) -> Result<()> {
        for edge in self.lineage_parents(prompt_id)? {
            let Some(parent_id) = edge.parent_prompt_id else {
                continue;
            };
            if !visited.insert(parent_id.clone()) {
                continue;
            }
            chain.push(ChainEntry {
                prompt_id: parent_id.clone(),
                mutation: Some(edge.mutation),
                confidence: edge.confidence,
                direction: ChainDirection::Ancestor,
            });
            self.walk_ancestors(&parent_id, visited, chain)?;
        }
        Ok(())
    }

    fn walk_descendants(
        &self,
        prompt_id: &str,
        visited: &mut HashSet<String>,
        chain: &mut Vec<ChainEntry>,
    ) -> Result<()> {
        for edge in self.lineage_children(prompt_id)? {
            let child_id = edge.child_prompt_id.clone();
            if !visited.insert(child_id.clone()) {
                continue;
            }
            chain.push(ChainEntry {
                prompt_id: child_id.clone(),
                mutation: Some(edge.mutation),
                confidence: edge.confidence,
                direction: ChainDirection::Descendant,
            });
            self.walk_descendants(&child_id, visited, chain)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use promptloom_core::types::{new_id, now_utc_iso, LineageEdge, MutationKind};

    use super::ChainDirection;
    use crate::Database;

    fn edge(parent: Option<&str>, child: &str, mutation: MutationKind) -> LineageEdge {
        LineageEdge {
            lineage_id: new_id(),
            parent_prompt_id: parent.map(String::from),
            child_prompt_id: child.to_string(),
            mutation,
            confidence: 0.9,
            created_at: now_utc_iso(),
        }
    }

    #[test]
    fn test_chain_walks_both_directions() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db")).unwrap();

        // a -> b -> c
        db.insert_lineage(&edge(Some("a"), "b", MutationKind::MinorEdit))
            .unwrap();
        db.insert_lineage(&edge(Some("b"), "c", MutationKind::VariableChange))
            .unwrap();

        let chain = db.lineage_chain("b").unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0].prompt_id, "a");
        assert_eq!(chain[0].direction, ChainDirection::Ancestor);
        assert_eq!(chain[1].prompt_id, "b");
        assert_eq!(chain[1].direction, ChainDirection::Current);
        assert_eq!(chain[2].prompt_id, "c");
        assert_eq!(chain[2].direction, ChainDirection::Descendant);
    }

    #[test]
    fn test_chain_survives_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("test.db")).unwrap();

        db.insert_lineage(&edge(Some("a"), "b", MutationKind::MinorEdit))
            .unwrap();
        db.insert_lineage(&edge(Some("b"), "a", MutationKind::MinorEdit))
            .unwrap();

        let chain = db.lineage_chain("a").unwrap();
        // a appears once as current, b once in each direction at most
        assert!(chain.len() <= 3);
    }
}
