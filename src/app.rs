use std::sync::Arc;

use anyhow::bail;
use chrono::NaiveTime;
use tokio::sync::OnceCell;
use tracing::info;

use crate::auth::{RoleIntent, SessionGate};
use crate::classifier::{Analysis, IncidentClassifier};
use crate::directory::StudentDirectory;
use crate::draft::{StaffDraft, TeacherDraft};
use crate::error::AuthError;
use crate::models::{Incident, IncidentPatch, Status, User};
use crate::service::IncidentService;
use crate::store::StudentStore;
use crate::sync::{FetchState, RecordView};

/// Session, service, roster and displayed record set for one user.
pub struct Portal {
    service: Arc<IncidentService>,
    students: Arc<dyn StudentStore>,
    directory: OnceCell<StudentDirectory>,
    gate: SessionGate,
    view: Arc<RecordView>,
    classifier: Arc<dyn IncidentClassifier>,
}

impl Portal {
    pub fn new(
        service: Arc<IncidentService>,
        students: Arc<dyn StudentStore>,
        gate: SessionGate,
        classifier: Arc<dyn IncidentClassifier>,
    ) -> Self {
        Self {
            service,
            students,
            directory: OnceCell::new(),
            gate,
            view: Arc::new(RecordView::new()),
            classifier,
        }
    }

    pub fn service(&self) -> Arc<IncidentService> {
        Arc::clone(&self.service)
    }

    pub fn view(&self) -> Arc<RecordView> {
        Arc::clone(&self.view)
    }

    pub fn gate_mut(&mut self) -> &mut SessionGate {
        &mut self.gate
    }

    pub async fn login(
        &mut self,
        intent: RoleIntent,
        email: &str,
        password: &str,
    ) -> Result<User, AuthError> {
        self.gate.login(intent, email, password).await
    }

    /// Loaded on first use and kept for the rest of the session.
    pub async fn directory(&self) -> &StudentDirectory {
        self.directory
            .get_or_init(|| StudentDirectory::load(self.students.as_ref()))
            .await
    }

    pub async fn record_staff(&self, draft: &StaffDraft, now: NaiveTime) -> anyhow::Result<Incident> {
        let user = self.require(RoleIntent::Gestao)?.clone();
        let record = draft.build(self.directory().await, now)?;

        self.service
            .create_many(std::slice::from_ref(&record), Some(&user))
            .await?;
        info!(id = %record.id, category = ?record.category, "staff record saved");
        self.view.refresh(&self.service).await;
        Ok(record)
    }

    pub async fn record_teacher(
        &self,
        draft: &TeacherDraft,
        now: NaiveTime,
    ) -> anyhow::Result<Vec<Incident>> {
        let user = self.require(RoleIntent::Professor)?.clone();
        draft.validate()?;

        let analysis = Analysis::or_default(self.classifier.analyze(&draft.description).await);
        let records = draft.build(self.directory().await, now, &analysis)?;

        self.service.create_many(&records, Some(&user)).await?;
        info!(count = records.len(), severity = %analysis.severity, "teacher records saved");
        self.view.refresh(&self.service).await;
        Ok(records)
    }

    /// Current records, optionally narrowed by the history filter.
    pub async fn history(&self, search: Option<&str>) -> anyhow::Result<Vec<Incident>> {
        self.view.refresh(&self.service).await;
        match self.view.current().state {
            FetchState::Loaded(records) => Ok(records
                .into_iter()
                .filter(|record| search.map_or(true, |term| record.matches(term)))
                .collect()),
            FetchState::Failed(message) => bail!("Erro ao carregar registros: {message}"),
            FetchState::Loading => Ok(Vec::new()),
        }
    }

    pub async fn delete_record(&self, id: &str) -> anyhow::Result<()> {
        self.require(RoleIntent::Gestao)?;
        self.service.delete_one(id).await?;
        self.view.refresh(&self.service).await;
        Ok(())
    }

    pub async fn set_status(&self, id: &str, status: Status) -> anyhow::Result<()> {
        self.require(RoleIntent::Gestao)?;
        let patch = IncidentPatch {
            status: Some(status),
            ..IncidentPatch::default()
        };
        self.service.update_one(id, &patch).await?;
        self.view.refresh(&self.service).await;
        Ok(())
    }

    /// Ends the session. Fetches still in flight resolve into a closed view
    /// and are dropped.
    pub async fn close(&mut self) -> Result<(), AuthError> {
        self.view.close();
        self.gate.logout().await
    }

    fn require(&self, intent: RoleIntent) -> Result<&User, AuthError> {
        self.gate
            .current_user()
            .filter(|user| user.role == intent.expected_role())
            .ok_or_else(|| AuthError::RoleMismatch {
                intent: intent.label().to_string(),
            })
    }
}
