use tracing::{error, info};

use crate::models::Student;
use crate::store::StudentStore;

/// RA recorded when a name cannot be matched to exactly one student.
pub const RA_PLACEHOLDER: &str = "---";

/// Session-long snapshot of the roster. Never refreshed once loaded.
#[derive(Debug, Clone, Default)]
pub struct StudentDirectory {
    students: Vec<Student>,
}

impl StudentDirectory {
    pub fn from_students(mut students: Vec<Student>) -> Self {
        students.sort_by(|a, b| a.name.cmp(&b.name));
        Self { students }
    }

    /// A failed load yields an empty directory, so every lookup falls back
    /// to [`RA_PLACEHOLDER`].
    pub async fn load(store: &dyn StudentStore) -> Self {
        match store.all_students().await {
            Ok(students) => {
                info!(students = students.len(), "student directory loaded");
                Self::from_students(students)
            }
            Err(error) => {
                error!(%error, "failed to load student directory");
                Self::default()
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.students.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }

    pub fn in_classroom<'a>(&'a self, classroom: &'a str) -> impl Iterator<Item = &'a Student> {
        self.students
            .iter()
            .filter(move |student| student.classroom == classroom)
    }

    pub fn resolve_ra(&self, name: &str, classroom: &str) -> String {
        let wanted = name.trim().to_uppercase();
        let mut matches = self
            .in_classroom(classroom)
            .filter(|student| student.name.trim().to_uppercase() == wanted);

        match (matches.next(), matches.next()) {
            (Some(student), None) => student.ra.clone(),
            _ => RA_PLACEHOLDER.to_string(),
        }
    }
}
