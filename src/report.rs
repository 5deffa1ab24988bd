use std::collections::HashMap;
use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::{CategorySummary, ClassroomTally, Incident, Status};

pub fn summarize_by_category(incidents: &[Incident]) -> Vec<CategorySummary> {
    let mut map: HashMap<String, (usize, i32)> = HashMap::new();

    for incident in incidents {
        let category = incident
            .category
            .clone()
            .unwrap_or_else(|| "SEM CLASSIFICAÇÃO".to_string());
        let entry = map.entry(category).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += incident.severity.rank();
    }

    let mut summaries: Vec<CategorySummary> = map
        .into_iter()
        .map(|(category, (count, total_severity))| CategorySummary {
            category,
            count,
            avg_severity: if count == 0 {
                0.0
            } else {
                total_severity as f64 / count as f64
            },
        })
        .collect();

    summaries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.category.cmp(&b.category)));
    summaries
}

pub fn tally_by_classroom(incidents: &[Incident]) -> Vec<ClassroomTally> {
    let mut map: HashMap<String, (usize, usize)> = HashMap::new();

    for incident in incidents {
        let classroom = incident.class_room.clone().unwrap_or_else(|| "N/A".to_string());
        let entry = map.entry(classroom).or_insert((0, 0));
        entry.0 += 1;
        if incident.is_suspension() {
            entry.1 += 1;
        }
    }

    let mut tallies: Vec<ClassroomTally> = map
        .into_iter()
        .map(|(classroom, (count, suspensions))| ClassroomTally {
            classroom,
            count,
            suspensions,
        })
        .collect();

    tallies.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.classroom.cmp(&b.classroom)));
    tallies
}

/// Markdown summary of the record set. `incidents` is expected newest first.
pub fn build_report(generated_on: NaiveDate, incidents: &[Incident]) -> String {
    let summaries = summarize_by_category(incidents);
    let tallies = tally_by_classroom(incidents);
    let open = incidents
        .iter()
        .filter(|incident| incident.status != Status::Resolved)
        .count();

    let mut output = String::new();

    let _ = writeln!(output, "# Relatório de Ocorrências");
    let _ = writeln!(
        output,
        "Gerado em {} ({} registros, {} em aberto)",
        generated_on.format("%d/%m/%Y"),
        incidents.len(),
        open
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Por Classificação");

    if summaries.is_empty() {
        let _ = writeln!(output, "Nenhum registro encontrado.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: {} registros (gravidade média {:.1})",
                summary.category, summary.count, summary.avg_severity
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Turmas com Mais Registros");

    if tallies.is_empty() {
        let _ = writeln!(output, "Nenhum registro encontrado.");
    } else {
        for tally in tallies.iter().take(10) {
            let _ = writeln!(
                output,
                "- {}: {} registros, {} suspensões",
                tally.classroom, tally.count, tally.suspensions
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Registros Recentes");

    if incidents.is_empty() {
        let _ = writeln!(output, "Nenhum registro encontrado.");
    } else {
        for incident in incidents.iter().take(5) {
            let _ = writeln!(
                output,
                "- {} ({}) em {} [{}]: {}",
                incident.student_name,
                incident.class_room.as_deref().unwrap_or("N/A"),
                incident.date,
                incident.status,
                incident.description
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{fixtures, Severity, CATEGORY_SUSPENSION};

    fn sample() -> Vec<Incident> {
        let mut suspension = fixtures::incident("gest-2", "BRUNO COSTA");
        suspension.category = Some(CATEGORY_SUSPENSION.to_string());
        suspension.severity = Severity::Critical;
        suspension.class_room = Some("7ºAno B".to_string());

        let mut resolved = fixtures::incident("gest-1", "ANA LIMA");
        resolved.status = Status::Resolved;
        resolved.severity = Severity::Low;

        vec![suspension, resolved, fixtures::incident("prof-1-0", "CARLA DIAS")]
    }

    #[test]
    fn averages_severity_rank_per_category() {
        let summaries = summarize_by_category(&sample());
        assert_eq!(summaries[0].category, "OCORRÊNCIA");
        assert_eq!(summaries[0].count, 2);
        assert!((summaries[0].avg_severity - 1.5).abs() < f64::EPSILON);
        assert_eq!(summaries[1].category, "SUSPENSÃO");
        assert!((summaries[1].avg_severity - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn tallies_suspensions_per_classroom() {
        let tallies = tally_by_classroom(&sample());
        assert_eq!(tallies[0].classroom, "6ºAno A");
        assert_eq!(tallies[0].count, 2);
        assert_eq!(tallies[0].suspensions, 0);
        assert_eq!(tallies[1].suspensions, 1);
    }

    #[test]
    fn report_counts_open_records() {
        let day = NaiveDate::from_ymd_opt(2026, 2, 10).unwrap();
        let report = build_report(day, &sample());
        assert!(report.contains("Gerado em 10/02/2026 (3 registros, 2 em aberto)"));
        assert!(report.contains("- 7ºAno B: 1 registros, 1 suspensões"));
    }

    #[test]
    fn empty_report_says_so() {
        let day = NaiveDate::from_ymd_opt(2026, 2, 10).unwrap();
        let report = build_report(day, &[]);
        assert_eq!(report.matches("Nenhum registro encontrado.").count(), 3);
    }
}
