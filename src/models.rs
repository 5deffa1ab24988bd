use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

pub const CATEGORY_OCCURRENCE: &str = "OCORRÊNCIA";
pub const CATEGORY_SUSPENSION: &str = "SUSPENSÃO";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    #[serde(rename = "Baixa")]
    Low,
    #[serde(rename = "Média")]
    Medium,
    #[serde(rename = "Alta")]
    High,
    #[serde(rename = "Crítica")]
    Critical,
}

impl Severity {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "Baixa",
            Self::Medium => "Média",
            Self::High => "Alta",
            Self::Critical => "Crítica",
        }
    }

    /// 1 for `Baixa` up to 4 for `Crítica`.
    pub const fn rank(self) -> i32 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "baixa" => Ok(Self::Low),
            "média" | "media" => Ok(Self::Medium),
            "alta" => Ok(Self::High),
            "crítica" | "critica" => Ok(Self::Critical),
            _ => Err(format!("unknown severity `{}`", value.trim())),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "Pendente")]
    Pending,
    #[serde(rename = "Em Análise")]
    UnderReview,
    #[serde(rename = "Resolvido")]
    Resolved,
}

impl Status {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pendente",
            Self::UnderReview => "Em Análise",
            Self::Resolved => "Resolvido",
        }
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "Pendente" => Ok(Self::Pending),
            "Em Análise" | "Em Analise" => Ok(Self::UnderReview),
            "Resolvido" => Ok(Self::Resolved),
            other => Err(format!("unknown status `{other}`")),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which workflow produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Professor,
    Gestao,
}

impl Source {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Professor => "professor",
            Self::Gestao => "gestao",
        }
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "professor" => Ok(Self::Professor),
            "gestao" => Ok(Self::Gestao),
            other => Err(format!("unknown source `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Gestor,
    Professor,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gestor => "gestor",
            Self::Professor => "professor",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "gestor" => Ok(Self::Gestor),
            "professor" => Ok(Self::Professor),
            other => Err(format!("unknown role `{other}`")),
        }
    }
}

/// In-memory incident record. Serializes to the flat camelCase shape the
/// mirror spreadsheet consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub professor_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_room: Option<String>,
    pub student_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ra: Option<String>,
    pub date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub register_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discipline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub irregularities: Option<String>,
    pub description: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_analysis: Option<String>,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Incident {
    pub fn is_suspension(&self) -> bool {
        self.category.as_deref() == Some(CATEGORY_SUSPENSION)
    }

    /// Case-insensitive history filter over student, classroom and author.
    pub fn matches(&self, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return true;
        }

        [
            Some(self.student_name.as_str()),
            self.class_room.as_deref(),
            self.professor_name.as_deref(),
        ]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(&term))
    }
}

/// Persisted shape of an incident, one field per `incidents` column.
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentRow {
    pub id: String,
    pub professor_name: Option<String>,
    pub class_room: Option<String>,
    pub student_name: String,
    pub ra: Option<String>,
    pub date: String,
    pub time: Option<String>,
    pub register_date: Option<String>,
    pub return_date: Option<String>,
    pub discipline: Option<String>,
    pub irregularities: Option<String>,
    pub description: String,
    pub severity: String,
    pub ai_analysis: Option<String>,
    pub status: String,
    pub category: Option<String>,
    pub source: String,
    pub created_by: Option<Uuid>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl IncidentRow {
    /// `creator` wins over whatever account the record already names.
    pub fn from_incident(incident: &Incident, creator: Option<Uuid>) -> Self {
        Self {
            id: incident.id.clone(),
            professor_name: incident.professor_name.clone(),
            class_room: incident.class_room.clone(),
            student_name: incident.student_name.clone(),
            ra: incident.ra.clone(),
            date: incident.date.clone(),
            time: incident.time.clone(),
            register_date: incident.register_date.clone(),
            return_date: incident.return_date.clone(),
            discipline: incident.discipline.clone(),
            irregularities: incident.irregularities.clone(),
            description: incident.description.clone(),
            severity: incident.severity.as_str().to_string(),
            ai_analysis: incident.ai_analysis.clone(),
            status: incident.status.as_str().to_string(),
            category: incident.category.clone(),
            source: incident.source.as_str().to_string(),
            created_by: creator.or(incident.created_by),
            created_at: incident.created_at,
            updated_at: incident.updated_at,
        }
    }

    pub fn into_incident(self) -> Result<Incident, StoreError> {
        let invalid = |id: &str, reason: String| StoreError::InvalidRow {
            id: id.to_string(),
            reason,
        };
        let severity = self
            .severity
            .parse::<Severity>()
            .map_err(|reason| invalid(&self.id, reason))?;
        let status = self
            .status
            .parse::<Status>()
            .map_err(|reason| invalid(&self.id, reason))?;
        let source = self
            .source
            .parse::<Source>()
            .map_err(|reason| invalid(&self.id, reason))?;

        Ok(Incident {
            id: self.id,
            professor_name: self.professor_name,
            class_room: self.class_room,
            student_name: self.student_name,
            ra: self.ra,
            date: self.date,
            time: self.time,
            register_date: self.register_date,
            return_date: self.return_date,
            discipline: self.discipline,
            irregularities: self.irregularities,
            description: self.description,
            severity,
            ai_analysis: self.ai_analysis,
            status,
            category: self.category,
            source,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Partial update. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncidentPatch {
    pub status: Option<Status>,
    pub severity: Option<Severity>,
    pub ai_analysis: Option<String>,
    pub description: Option<String>,
}

impl IncidentPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.severity.is_none()
            && self.ai_analysis.is_none()
            && self.description.is_none()
    }

    pub fn apply(&self, row: &mut IncidentRow) {
        if let Some(status) = self.status {
            row.status = status.as_str().to_string();
        }
        if let Some(severity) = self.severity {
            row.severity = severity.as_str().to_string();
        }
        if let Some(analysis) = &self.ai_analysis {
            row.ai_analysis = Some(analysis.clone());
        }
        if let Some(description) = &self.description {
            row.description = description.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub ra: String,
    pub name: String,
    pub classroom: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub full_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CategorySummary {
    pub category: String,
    pub count: usize,
    pub avg_severity: f64,
}

#[derive(Debug, Clone)]
pub struct ClassroomTally {
    pub classroom: String,
    pub count: usize,
    pub suspensions: usize,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn incident(id: &str, student: &str) -> Incident {
        Incident {
            id: id.to_string(),
            professor_name: Some("MARIA SOUZA".to_string()),
            class_room: Some("6ºAno A".to_string()),
            student_name: student.to_string(),
            ra: Some("000111222sp".to_string()),
            date: "03/02/2026".to_string(),
            time: Some("10:15".to_string()),
            register_date: Some("03/02/2026".to_string()),
            return_date: None,
            discipline: Some("MATEMÁTICA".to_string()),
            irregularities: Some("CONVERSA".to_string()),
            description: "CONVERSOU DURANTE A PROVA".to_string(),
            severity: Severity::Medium,
            ai_analysis: None,
            status: Status::Pending,
            category: Some(CATEGORY_OCCURRENCE.to_string()),
            source: Source::Gestao,
            created_by: None,
            created_at: None,
            updated_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_mapping_round_trips_every_field() {
        let mut incident = fixtures::incident("gest-1", "ANA LIMA");
        incident.return_date = Some("10/02/2026".to_string());
        incident.ai_analysis = Some("Conversar com a família".to_string());
        incident.created_at = Some(Utc::now());

        let back = IncidentRow::from_incident(&incident, None)
            .into_incident()
            .expect("valid row");
        assert_eq!(back, incident);
    }

    #[test]
    fn creator_stamp_overrides_record_owner() {
        let mut incident = fixtures::incident("gest-2", "ANA LIMA");
        incident.created_by = Some(Uuid::new_v4());
        let creator = Uuid::new_v4();
        let row = IncidentRow::from_incident(&incident, Some(creator));
        assert_eq!(row.created_by, Some(creator));
    }

    #[test]
    fn rows_with_unknown_enum_values_are_rejected() {
        let mut row = IncidentRow::from_incident(&fixtures::incident("x", "ANA"), None);
        row.severity = "Gravíssima".to_string();
        assert!(matches!(
            row.into_incident(),
            Err(StoreError::InvalidRow { id, .. }) if id == "x"
        ));
    }

    #[test]
    fn serializes_with_portuguese_enum_labels() {
        let json = serde_json::to_value(fixtures::incident("gest-3", "ANA")).unwrap();
        assert_eq!(json["severity"], "Média");
        assert_eq!(json["status"], "Pendente");
        assert_eq!(json["source"], "gestao");
        assert_eq!(json["studentName"], "ANA");
        assert!(json.get("returnDate").is_none());
    }

    #[test]
    fn severity_is_ordered() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
        assert_eq!("Crítica".parse::<Severity>(), Ok(Severity::Critical));
    }

    #[test]
    fn severity_labels_parse_in_any_case() {
        assert_eq!("média".parse::<Severity>(), Ok(Severity::Medium));
        assert_eq!("ALTA".parse::<Severity>(), Ok(Severity::High));
        assert_eq!(" CRÍTICA ".parse::<Severity>(), Ok(Severity::Critical));
        assert!("grave".parse::<Severity>().is_err());
    }

    #[test]
    fn history_filter_is_case_insensitive() {
        let incident = fixtures::incident("gest-4", "JOÃO PEREIRA");
        assert!(incident.matches("joão"));
        assert!(incident.matches("6ºano"));
        assert!(incident.matches("souza"));
        assert!(incident.matches(""));
        assert!(!incident.matches("7ºano"));
    }
}
