use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::Context;
use regex::Regex;
use tracing::{error, info};

use crate::models::Student;
use crate::store::StudentStore;

const GROUP_WIDTH: usize = 5;
const MIN_RA_LEN: usize = 5;
pub const UPSERT_BATCH: usize = 50;

static ANO: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)ano").unwrap());
static SERIE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)série").unwrap());
static LEVEL_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)E\.[FM]").unwrap());
static SECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([0-9]ºAno|[0-9]ªSérie)([A-Z])").unwrap());

/// `"6º ano A E.F"` becomes `"6ºAno A"`, `"1ª série B E.M"` becomes
/// `"1ª Série B"`, matching the catalogue labels.
pub fn normalize_classroom(raw: &str) -> String {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let compact = ANO.replace_all(&compact, "Ano");
    let compact = SERIE.replace_all(&compact, "Série");
    let compact = LEVEL_SUFFIX.replace_all(&compact, "");
    SECTION
        .replace(&compact, "$1 $2")
        .replace("ªSérie", "ª Série")
        .trim()
        .to_string()
}

/// Lower-cases and appends the `sp` suffix to bare numeric RAs.
pub fn normalize_ra(raw: &str) -> String {
    let mut ra = raw.trim().to_lowercase();
    let bare = !ra.is_empty() && ra.chars().all(|c| c.is_ascii_digit() || c == 'x');
    if bare && !ra.ends_with("sp") {
        ra.push_str("sp");
    }
    ra
}

/// Parses the roster grid exported from the school spreadsheet.
///
/// The first row is a header. Each row holds side-by-side groups of five
/// columns starting at column 1: name at +1, classroom at +3, RA at +4.
/// When an RA shows up more than once the leftmost, earliest entry wins.
pub fn parse_roster<R: Read>(reader: R) -> Result<Vec<Student>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut seen = HashSet::new();
    let mut students = Vec::new();

    for record in reader.records().skip(1) {
        let record = record?;
        for start in (1..record.len()).step_by(GROUP_WIDTH) {
            let field = |offset: usize| record.get(start + offset).unwrap_or("").trim();
            let (name, classroom, ra) = (field(1), field(3), field(4));
            if name.is_empty() || classroom.is_empty() || ra.is_empty() {
                continue;
            }

            let ra = normalize_ra(ra);
            if ra.len() < MIN_RA_LEN || !seen.insert(ra.clone()) {
                continue;
            }
            students.push(Student {
                ra,
                name: name.to_uppercase(),
                classroom: normalize_classroom(classroom),
            });
        }
    }

    Ok(students)
}

/// Upserts the roster in batches. A failed batch is logged and skipped.
pub async fn import_roster(store: &dyn StudentStore, csv_path: &Path) -> anyhow::Result<usize> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open roster {}", csv_path.display()))?;
    let students = parse_roster(file).context("failed to parse roster CSV")?;
    info!(students = students.len(), "roster parsed");

    let mut imported = 0usize;
    for (index, batch) in students.chunks(UPSERT_BATCH).enumerate() {
        match store.upsert_students(batch).await {
            Ok(_) => imported += batch.len(),
            Err(error) => error!(batch = index + 1, %error, "roster batch failed"),
        }
    }
    Ok(imported)
}
