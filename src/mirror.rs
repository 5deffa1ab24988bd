use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::config::configured;
use crate::error::MirrorError;
use crate::models::Incident;

/// Best-effort copy of new records into the external spreadsheet.
///
/// The endpoint is an Apps Script web app whose response is never read:
/// `Ok` only means the request left without a transport error. Nothing is
/// queued or retried, so the sheet can drift from the record store.
#[derive(Clone)]
pub struct MirrorExporter {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl MirrorExporter {
    pub fn new(endpoint: Option<String>) -> Result<Self, MirrorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint: configured(endpoint),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    pub async fn export(&self, record: &Incident) -> Result<(), MirrorError> {
        let endpoint = self.endpoint.as_deref().ok_or(MirrorError::NotConfigured)?;
        self.client.post(endpoint).json(record).send().await?;
        debug!(id = %record.id, "record dispatched to mirror");
        Ok(())
    }

    /// One independent request per record, all in flight at once.
    pub async fn export_many(&self, records: &[Incident]) -> Result<(), MirrorError> {
        if self.endpoint.is_none() {
            return Err(MirrorError::NotConfigured);
        }

        let results = join_all(records.iter().map(|record| self.export(record))).await;
        let mut failed = 0;
        for (record, result) in records.iter().zip(results) {
            if let Err(error) = result {
                warn!(id = %record.id, %error, "mirror export failed");
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(MirrorError::Batch {
                failed,
                total: records.len(),
            });
        }
        Ok(())
    }
}
