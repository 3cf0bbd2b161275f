//! Ingestion worker state file
//!
//! A small JSON document holding the last successful run time. It is only
//! advanced after a tick completes, so a failed tick re-covers the same
//! window on the next run.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerState {
    /// ISO-8601 UTC timestamp of the last successful tick
    pub last_run_time: String,
}

impl WorkerState {
    /// Load state from disk, defaulting to 24 hours ago.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<WorkerState>(&contents) {
                Ok(state) => return state,
                Err(e) => warn!("Failed to parse worker state: {}", e),
            },
            Err(_) => {}
        }

        Self {
            last_run_time: (Utc::now() - Duration::hours(24)).to_rfc3339(),
        }
    }

    /// Save state to disk.
    pub fn save(&self, path: &Path) -> promptloom_core::error::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Parse the stored timestamp; malformed values fall back to 24h ago.
    pub fn last_run(&self) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(&self.last_run_time)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now() - Duration::hours(24))
    }
}
