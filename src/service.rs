use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{IncidentError, StoreError};
use crate::mirror::MirrorExporter;
use crate::models::{Incident, IncidentPatch, IncidentRow, Role, User};
use crate::store::IncidentStore;

/// The only path between the application and the incident record store.
pub struct IncidentService {
    store: Arc<dyn IncidentStore>,
    mirror: Option<MirrorExporter>,
    pending_mirror: Mutex<JoinSet<()>>,
}

impl IncidentService {
    pub fn new(store: Arc<dyn IncidentStore>) -> Self {
        Self {
            store,
            mirror: None,
            pending_mirror: Mutex::new(JoinSet::new()),
        }
    }

    pub fn with_mirror(mut self, mirror: MirrorExporter) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn store(&self) -> Arc<dyn IncidentStore> {
        Arc::clone(&self.store)
    }

    /// Every record, newest first. A failed read is logged and comes back
    /// as an empty list; use [`Self::try_fetch_all`] to tell the two apart.
    pub async fn fetch_all(&self) -> Vec<Incident> {
        self.try_fetch_all().await.unwrap_or_else(|error| {
            error!(%error, "failed to fetch incidents");
            Vec::new()
        })
    }

    pub async fn try_fetch_all(&self) -> Result<Vec<Incident>, StoreError> {
        let rows = self.store.select_all().await?;
        let incidents = rows
            .into_iter()
            .map(IncidentRow::into_incident)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(count = incidents.len(), "incidents fetched");
        Ok(incidents)
    }

    /// Inserts the whole batch in one store call. When a staff session
    /// creates records they are then handed to the mirror in the background;
    /// the mirror outcome never changes the result.
    pub async fn create_many(
        &self,
        records: &[Incident],
        session: Option<&User>,
    ) -> Result<(), IncidentError> {
        if records.is_empty() {
            return Err(IncidentError::EmptyBatch);
        }

        let creator = session.map(|user| user.id);
        let rows: Vec<IncidentRow> = records
            .iter()
            .map(|record| IncidentRow::from_incident(record, creator))
            .collect();

        if let Err(error) = self.store.insert_many(&rows).await {
            error!(%error, count = rows.len(), "failed to create incidents");
            return Err(IncidentError::Create(error));
        }
        info!(count = rows.len(), "incidents created");

        if session.is_some_and(|user| user.role == Role::Gestor) {
            self.dispatch_mirror(records);
        }
        Ok(())
    }

    pub async fn delete_one(&self, id: &str) -> Result<(), IncidentError> {
        self.store.delete(id).await.map_err(|error| {
            error!(%error, id, "failed to delete incident");
            IncidentError::Delete(error)
        })?;
        info!(id, "incident deleted");
        Ok(())
    }

    pub async fn update_one(&self, id: &str, patch: &IncidentPatch) -> Result<(), IncidentError> {
        if patch.is_empty() {
            return Ok(());
        }
        self.store.update(id, patch).await.map_err(|error| {
            error!(%error, id, "failed to update incident");
            IncidentError::Update(error)
        })?;
        info!(id, "incident updated");
        Ok(())
    }

    /// Waits for mirror exports that are still in flight.
    pub async fn drain_mirror(&self) {
        let mut pending = std::mem::take(&mut *self.lock_pending());
        while let Some(joined) = pending.join_next().await {
            if let Err(error) = joined {
                warn!(%error, "mirror task aborted");
            }
        }
    }

    fn dispatch_mirror(&self, records: &[Incident]) {
        let Some(mirror) = self.mirror.clone() else {
            return;
        };
        if !mirror.is_enabled() {
            debug!("mirror not configured, skipping export");
            return;
        }

        let records = records.to_vec();
        let mut pending = self.lock_pending();
        while let Some(finished) = pending.try_join_next() {
            if let Err(error) = finished {
                warn!(%error, "mirror task aborted");
            }
        }
        pending.spawn(async move {
            if let Err(error) = mirror.export_many(&records).await {
                warn!(%error, count = records.len(), "mirror export did not complete");
            }
        });
    }

    #[cfg(test)]
    fn pending_mirror(&self) -> usize {
        self.lock_pending().len()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, JoinSet<()>> {
        self.pending_mirror
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
