use chrono::{NaiveDate, NaiveTime};
use uuid::Uuid;

use crate::catalog;
use crate::classifier::Analysis;
use crate::directory::StudentDirectory;
use crate::error::DraftError;
use crate::models::{
    Incident, Severity, Source, Status, CATEGORY_OCCURRENCE, CATEGORY_SUSPENSION,
};

const DEFAULT_DISCIPLINE: &str = "N/A";
const NO_IRREGULARITIES: &str = "NENHUMA";

/// Input of the staff form: one student, one record.
#[derive(Debug, Clone)]
pub struct StaffDraft {
    pub classroom: String,
    pub student_name: String,
    pub responsible: String,
    pub category: String,
    pub discipline: Option<String>,
    pub irregularities: Vec<String>,
    pub description: String,
    pub register_date: NaiveDate,
    pub return_date: Option<NaiveDate>,
}

impl StaffDraft {
    pub fn build(
        &self,
        directory: &StudentDirectory,
        now: NaiveTime,
    ) -> Result<Incident, DraftError> {
        let student_name = required(&self.student_name, "aluno")?;
        let description = required(&self.description, "descrição")?;
        let classroom = classroom(&self.classroom)?;
        let category = required(&self.category, "classificação")?;
        let responsible = required(&self.responsible, "responsável")?;
        let irregularities = irregularities(&self.irregularities)?;

        let register_date = format_date_br(self.register_date);
        let return_date = if category == CATEGORY_SUSPENSION {
            self.return_date.map(format_date_br)
        } else {
            None
        };

        Ok(Incident {
            id: format!("gest-{}", Uuid::new_v4()),
            professor_name: Some(responsible),
            class_room: Some(classroom.to_string()),
            ra: Some(directory.resolve_ra(&student_name, classroom)),
            student_name,
            date: register_date.clone(),
            time: Some(format_time(now)),
            register_date: Some(register_date),
            return_date,
            discipline: Some(discipline(self.discipline.as_deref())),
            irregularities: Some(irregularities.join(", ")),
            description,
            severity: Severity::Medium,
            ai_analysis: None,
            status: Status::Pending,
            category: Some(category),
            source: Source::Gestao,
            created_by: None,
            created_at: None,
            updated_at: None,
        })
    }
}

/// Input of the teacher form: the same report for several students.
#[derive(Debug, Clone)]
pub struct TeacherDraft {
    pub responsible: String,
    pub classroom: String,
    pub students: Vec<String>,
    pub discipline: Option<String>,
    pub irregularities: Vec<String>,
    pub description: String,
    pub register_date: NaiveDate,
}

impl TeacherDraft {
    pub fn validate(&self) -> Result<(), DraftError> {
        required(&self.responsible, "professor")?;
        classroom(&self.classroom)?;
        if self.students.iter().all(|name| name.trim().is_empty()) {
            return Err(DraftError::NoStudents);
        }
        required(&self.description, "descrição")?;
        irregularities(&self.irregularities)?;
        Ok(())
    }

    pub fn build(
        &self,
        directory: &StudentDirectory,
        now: NaiveTime,
        analysis: &Analysis,
    ) -> Result<Vec<Incident>, DraftError> {
        self.validate()?;
        let classroom = self.classroom.trim();
        let responsible = self.responsible.trim().to_uppercase();
        let description = self.description.trim().to_uppercase();
        let irregularities = irregularities(&self.irregularities)?;
        let irregularities = if irregularities.is_empty() {
            NO_IRREGULARITIES.to_string()
        } else {
            irregularities.join(", ")
        };
        let date = format_date_br(self.register_date);
        let time = format_time(now);
        let batch = Uuid::new_v4();

        Ok(self
            .students
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .enumerate()
            .map(|(index, name)| Incident {
                id: format!("prof-{batch}-{index}"),
                professor_name: Some(responsible.clone()),
                class_room: Some(classroom.to_string()),
                student_name: name.to_uppercase(),
                ra: Some(directory.resolve_ra(name, classroom)),
                date: date.clone(),
                time: Some(time.clone()),
                register_date: None,
                return_date: None,
                discipline: Some(discipline(self.discipline.as_deref())),
                irregularities: Some(irregularities.clone()),
                description: description.clone(),
                severity: analysis.severity,
                ai_analysis: Some(analysis.recommendation.clone()),
                status: Status::Pending,
                category: Some(CATEGORY_OCCURRENCE.to_string()),
                source: Source::Professor,
                created_by: None,
                created_at: None,
                updated_at: None,
            })
            .collect())
    }
}

pub fn format_date_br(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

fn format_time(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

fn required(value: &str, field: &'static str) -> Result<String, DraftError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DraftError::Missing(field));
    }
    Ok(value.to_uppercase())
}

fn classroom(value: &str) -> Result<&str, DraftError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DraftError::Missing("turma"));
    }
    if !catalog::is_classroom(value) {
        return Err(DraftError::UnknownClassroom(value.to_string()));
    }
    Ok(value)
}

fn irregularities(values: &[String]) -> Result<Vec<String>, DraftError> {
    let mut picked: Vec<String> = Vec::new();
    for value in values {
        let tag = value.trim().to_uppercase();
        if !catalog::is_irregularity(&tag) {
            return Err(DraftError::UnknownIrregularity(value.trim().to_string()));
        }
        if !picked.contains(&tag) {
            picked.push(tag);
        }
    }
    Ok(picked)
}

fn discipline(value: Option<&str>) -> String {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_DISCIPLINE)
        .to_uppercase()
}
