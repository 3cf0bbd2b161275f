//! Promptloom Ingest - ingestion adapters and the dedup pipeline
//!
//! File readers (txt/csv/json/jsonl), the log-export API client, the
//! two-tier dedup ingestion pipeline, and the periodic ingestion worker.

pub mod export;
pub mod files;
pub mod pipeline;
pub mod worker;

pub use export::LogExportClient;
pub use files::{read_file, RawRecord};
pub use pipeline::{add_and_classify, AddOutcome, IngestOutcome, Ingestor};
pub use worker::IngestWorker;
