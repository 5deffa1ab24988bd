use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use printpdf::{BuiltinFont, Mm, PdfDocument};

use crate::models::Incident;

pub const PAGE_LINES: usize = 60;
const LINE_WIDTH: usize = 80;
const BLANK_DATE: &str = "___/___/___";

// A4 portrait, Courier 9pt: 80 columns fit inside the side margins.
const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_LEFT_MM: f32 = 25.0;
const FIRST_LINE_MM: f32 = 280.0;
const LEADING_MM: f32 = 4.3;
const FONT_SIZE: f32 = 9.0;

/// Where a rendered document goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputMode {
    /// Rendered into the temp directory for opening.
    View,
    Save(Option<PathBuf>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub title: String,
    pub file_name: String,
    pub pages: Vec<Vec<String>>,
}

impl Document {
    /// Body lines of page `index` followed by its footer.
    pub fn page_text(&self, index: usize) -> Vec<String> {
        let mut lines = self.pages.get(index).cloned().unwrap_or_default();
        lines.push(String::new());
        lines.push(format!(
            "{:>width$}",
            format!("Página {}/{}", index + 1, self.pages.len()),
            width = LINE_WIDTH
        ));
        lines
    }

    pub fn to_pdf(&self) -> anyhow::Result<Vec<u8>> {
        let (pdf, first_page, first_layer) = PdfDocument::new(
            self.title.as_str(),
            Mm(PAGE_WIDTH_MM),
            Mm(PAGE_HEIGHT_MM),
            "Termo",
        );
        let font = pdf
            .add_builtin_font(BuiltinFont::Courier)
            .map_err(|error| anyhow!("failed to load PDF font: {error:?}"))?;

        let mut target = (first_page, first_layer);
        for index in 0..self.pages.len() {
            if index > 0 {
                target = pdf.add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Termo");
            }
            let layer = pdf.get_page(target.0).get_layer(target.1);
            for (row, line) in self.page_text(index).into_iter().enumerate() {
                if line.is_empty() {
                    continue;
                }
                let y = FIRST_LINE_MM - row as f32 * LEADING_MM;
                layer.use_text(line, FONT_SIZE, Mm(MARGIN_LEFT_MM), Mm(y), &font);
            }
        }

        pdf.save_to_bytes()
            .map_err(|error| anyhow!("failed to render PDF: {error:?}"))
    }

    /// Writes the PDF and returns where it landed.
    pub fn emit(&self, mode: &OutputMode) -> anyhow::Result<PathBuf> {
        let path = match mode {
            OutputMode::View => std::env::temp_dir().join(&self.file_name),
            OutputMode::Save(path) => path
                .clone()
                .unwrap_or_else(|| Path::new(&self.file_name).to_path_buf()),
        };
        let bytes = self.to_pdf()?;
        std::fs::write(&path, bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

pub fn file_name(incident: &Incident) -> String {
    let student = incident.student_name.split_whitespace().collect::<Vec<_>>().join("_");
    format!("Ocorrencia_{}_{}.pdf", student, incident.date.replace('/', "-"))
}

pub fn build_document(incident: &Incident) -> Document {
    let na = |value: &Option<String>| value.clone().unwrap_or_else(|| "N/A".to_string());
    let mut lines = vec![
        "ESTADO DE SÃO PAULO".to_string(),
        "SECRETARIA DA EDUCAÇÃO".to_string(),
        "EE LYDIA KITZ MOREIRA".to_string(),
        "R. Dorezopolis, 294 - Jardim Santa Clara, Guarulhos - SP, 07123-120".to_string(),
        "Telefone: (11) 2403-3105".to_string(),
        "=".repeat(LINE_WIDTH),
        String::new(),
    ];

    let title = if incident.is_suspension() {
        "TERMO DE SUSPENSÃO DISCIPLINAR"
    } else {
        "REGISTRO DE OCORRÊNCIA ESCOLAR"
    };
    lines.push(center(title));
    lines.push(String::new());

    lines.push("DADOS DO ALUNO:".to_string());
    lines.push(format!("NOME: {}", incident.student_name));
    lines.push(format!("RA: {}", na(&incident.ra)));
    lines.push(format!("SÉRIE/TURMA: {}", na(&incident.class_room)));
    lines.push(String::new());

    lines.push("DETALHES DO EVENTO:".to_string());
    lines.push(format!(
        "DATA DO OCORRIDO: {}    HORÁRIO: {}",
        incident.date,
        na(&incident.time)
    ));
    lines.push(format!("PROFESSOR/RESPONSÁVEL: {}", na(&incident.professor_name)));
    lines.push(format!("DISCIPLINA: {}", na(&incident.discipline)));
    lines.push(String::new());

    lines.push("RELATO DOS FATOS:".to_string());
    lines.extend(wrap(&incident.description, LINE_WIDTH));
    lines.push(String::new());

    lines.push("MEDIDA APLICADA / CONDUTA:".to_string());
    let measure = if incident.is_suspension() {
        format!(
            "SUSPENSÃO DISCIPLINAR COM RETORNO PREVISTO PARA: {}",
            incident.return_date.as_deref().unwrap_or(BLANK_DATE)
        )
    } else {
        "ADVERTÊNCIA E REGISTRO EM PRONTUÁRIO ESCOLAR.".to_string()
    };
    lines.extend(wrap(&measure, LINE_WIDTH));
    if let Some(irregularities) = incident
        .irregularities
        .as_deref()
        .filter(|value| !value.is_empty() && *value != "NENHUMA")
    {
        lines.extend(wrap(&format!("IRREGULARIDADES: {irregularities}"), LINE_WIDTH));
    }
    if let Some(analysis) = incident.ai_analysis.as_deref() {
        lines.extend(wrap(&format!("SUGESTÃO DE CONDUTA: {analysis}"), LINE_WIDTH));
    }

    lines.extend([
        String::new(),
        String::new(),
        format!("{:<40}{:>40}", "_".repeat(30), "_".repeat(30)),
        format!("{:<40}{:>40}", "Assinatura do Aluno", "Assinatura do Responsável"),
        String::new(),
        String::new(),
        center(&"_".repeat(30)),
        center("Direção / Gestão Escolar"),
        String::new(),
        format!(
            "Guarulhos, {} - Registro gerado via Sistema de Gestão LKM",
            incident.date
        ),
    ]);

    Document {
        title: title.to_string(),
        file_name: file_name(incident),
        pages: paginate(lines),
    }
}

fn paginate(lines: Vec<String>) -> Vec<Vec<String>> {
    // Two lines per page go to the footer.
    let body = PAGE_LINES - 2;
    lines.chunks(body).map(<[String]>::to_vec).collect()
}

fn center(text: &str) -> String {
    let len = text.chars().count();
    let pad = LINE_WIDTH.saturating_sub(len) / 2;
    format!("{}{}", " ".repeat(pad), text)
}

fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut line = String::new();
        let pieces = paragraph.split_whitespace().flat_map(|word| {
            let chars: Vec<char> = word.chars().collect();
            chars
                .chunks(width.max(1))
                .map(|piece| piece.iter().collect::<String>())
                .collect::<Vec<_>>()
        });
        for word in pieces {
            let word = word.as_str();
            let needed = line.chars().count() + word.chars().count() + usize::from(!line.is_empty());
            if needed > width && !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(word);
        }
        lines.push(line);
    }
    lines
}
