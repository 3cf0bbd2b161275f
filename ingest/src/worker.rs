//! Ingestion worker
//!
//! Polls the log-export API on an interval, runs the dedup pipeline over
//! whatever arrived, and advances the state file only after a fully
//! successful tick so a failure re-covers the same window next time.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info};

use promptloom_core::error::Result;
use promptloom_core::types::IngestReport;
use promptloom_engine::CancelFlag;
use promptloom_store::{Database, WorkerState};

use crate::export::LogExportClient;
use crate::pipeline::Ingestor;

pub struct IngestWorker {
    db: Arc<Database>,
    export: LogExportClient,
    state_path: PathBuf,
    hamming_threshold: u32,
    interval: Duration,
}

impl IngestWorker {
    pub fn new(
        db: Arc<Database>,
        export: LogExportClient,
        state_path: PathBuf,
        hamming_threshold: u32,
        interval: Duration,
    ) -> Self {
        Self {
            db,
            export,
            state_path,
            hamming_threshold,
            interval,
        }
    }

    /// One ingestion tick: poll, dedup, persist, checkpoint.
    pub async fn run_tick(&self, cancel: &CancelFlag) -> Result<IngestReport> {
        let state = WorkerState::load(&self.state_path);
        let window_start = state.last_run();
        let window_end = Utc::now();

        info!("Running ingestion from {} to now", window_start);
        let records = self.export.fetch_logs(window_start, cancel).await?;

        let report = if records.is_empty() {
            info!("No new logs found");
            IngestReport::default()
        } else {
            let mut ingestor = Ingestor::new(self.db.clone(), self.hamming_threshold)?;
            ingestor.ingest_many(&records)?
        };

        // Checkpoint only after everything above committed
        WorkerState {
            last_run_time: window_end.to_rfc3339(),
        }
        .save(&self.state_path)?;

        Ok(report)
    }

    /// The worker loop. A failed tick leaves the state file untouched and
    /// retries the same window after the sleep.
    pub async fn run_loop(&self, cancel: CancelFlag) {
        info!(
            "Ingestion worker started (interval: {}s)",
            self.interval.as_secs()
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.run_tick(&cancel).await {
                Ok(report) => {
                    if report.saved + report.exact_duplicates + report.near_duplicates > 0 {
                        info!(
                            "Ingested: {} saved, {} exact, {} near duplicates",
                            report.saved, report.exact_duplicates, report.near_duplicates
                        );
                    }
                }
                Err(e) => {
                    error!("Error in ingestion loop: {}", e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = cancel.cancelled() => {
                    info!("Ingestion worker stopping");
                    break;
                }
            }
        }
    }
}
