//! Log-export API client
//!
//! Protocol: create an export with filters, start it, poll its status
//! until it completes, fetch the signed download URL, then pull the JSON
//! Lines body. Polling has no maximum wait; it continues until the export
//! finishes or the worker is cancelled. Individual requests carry a 30 s
//! timeout and a single API key header.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, info};

use promptloom_core::error::{Error, Result};
use promptloom_engine::CancelFlag;

use crate::files::{extract_text, RawRecord};

pub struct LogExportClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    poll_interval: Duration,
}

impl LogExportClient {
    pub fn new(base_url: String, api_key: String, poll_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Export(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            poll_interval: Duration::from_secs(poll_secs.max(1)),
        })
    }

    /// Fetch all log records generated since `time_min`.
    pub async fn fetch_logs(
        &self,
        time_min: DateTime<Utc>,
        cancel: &CancelFlag,
    ) -> Result<Vec<RawRecord>> {
        let export_id = self.create_export(time_min).await?;
        info!("Created log export {}", export_id);

        self.start_export(&export_id).await?;
        self.wait_for_completion(&export_id, cancel).await?;

        let signed_url = self.download_url(&export_id).await?;
        let body = self.fetch_body(&signed_url).await?;

        let records: Vec<RawRecord> = body
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|value| {
                let text = extract_text(&value)?;
                let mut metadata = json!({ "source": "export" });
                for key in ["timestamp", "created_at", "model", "cost"] {
                    if let Some(v) = value.get(key) {
                        metadata[key] = v.clone();
                    }
                }
                Some(RawRecord { text, metadata })
            })
            .collect();

        info!("Export {} produced {} records", export_id, records.len());
        Ok(records)
    }

    async fn create_export(&self, time_min: DateTime<Utc>) -> Result<String> {
        let body = json!({
            "filters": {
                "time_of_generation_min": time_min.to_rfc3339(),
            },
            "requested_data": ["created_at", "request", "response", "model", "cost"],
        });

        let response: Value = self
            .post(&format!("{}/logs/exports", self.base_url), Some(&body))
            .await?;
        response
            .get("id")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| Error::Export("Export creation returned no id".to_string()))
    }

    async fn start_export(&self, export_id: &str) -> Result<()> {
        self.post::<Value>(
            &format!("{}/logs/exports/{}/start", self.base_url, export_id),
            None,
        )
        .await?;
        Ok(())
    }

    async fn wait_for_completion(&self, export_id: &str, cancel: &CancelFlag) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Export("Cancelled while polling export".to_string()));
            }

            let status_url = format!("{}/logs/exports/{}", self.base_url, export_id);
            let response: Value = self.get(&status_url).await?;
            let status = response
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            debug!("Export {} status: {}", export_id, status);

            match status {
                "completed" | "success" => return Ok(()),
                "failure" | "failed" | "error" => {
                    return Err(Error::Export(format!("Export {} failed", export_id)));
                }
                _ => {}
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = cancel.cancelled() => {
                    return Err(Error::Export("Cancelled while polling export".to_string()));
                }
            }
        }
    }

    async fn download_url(&self, export_id: &str) -> Result<String> {
        let response: Value = self
            .get(&format!(
                "{}/logs/exports/{}/download",
                self.base_url, export_id
            ))
            .await?;
        response
            .get("signed_url")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| Error::Export("Download returned no signed_url".to_string()))
    }

    async fn fetch_body(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Export(format!("Signed URL fetch failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::Export(format!(
                "Signed URL fetch returned HTTP {}",
                response.status()
            )));
        }
        response
            .text()
            .await
            .map_err(|e| Error::Export(format!("Signed URL body read failed: {}", e)))
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        let mut req = self.client.post(url).header("x-api-key", &self.api_key);
        if let Some(body) = body {
            req = req.json(body);
        }
        let response = req
            .send()
            .await
            .map_err(|e| Error::Export(format!("Request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::Export(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }
        response
            .json()
            .await
            .map_err(|e| Error::Export(format!("Malformed response: {}", e)))
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| Error::Export(format!("Request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::Export(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }
        response
            .json()
            .await
            .map_err(|e| Error::Export(format!("Malformed response: {}", e)))
    }
}
