use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

mod app;
mod auth;
mod catalog;
mod classifier;
mod config;
mod db;
mod directory;
mod document;
mod draft;
mod error;
#[cfg(test)]
mod memory;
mod mirror;
mod models;
mod report;
mod roster;
mod service;
mod store;
mod sync;

use crate::app::Portal;
use crate::auth::{RoleIntent, SessionGate};
use crate::classifier::{GeminiClassifier, IncidentClassifier, NoClassifier};
use crate::config::Config;
use crate::db::PgStore;
use crate::document::OutputMode;
use crate::draft::{StaffDraft, TeacherDraft};
use crate::mirror::MirrorExporter;
use crate::models::{Incident, Status};
use crate::service::IncidentService;
use crate::sync::RealtimeSynchronizer;

#[derive(Parser)]
#[command(name = "incident-portal")]
#[command(about = "Disciplinary incident records for EE Lydia Kitz Moreira", long_about = None)]
struct Cli {
    /// Account e-mail for commands that open a session
    #[arg(long, global = true)]
    email: Option<String>,
    #[arg(long, global = true, env = "PORTAL_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    /// Workflow to sign in to: gestao or professor
    #[arg(long = "as", global = true, value_name = "INTENT")]
    intent: Option<RoleIntent>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo accounts, students and records (uses --password)
    Seed,
    /// Import the student roster from the spreadsheet CSV export
    ImportStudents {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Register a teacher account
    Signup {
        #[arg(long)]
        full_name: String,
    },
    /// Record an occurrence or suspension for one student (staff)
    RecordStaff {
        #[arg(long)]
        classroom: String,
        #[arg(long)]
        student: String,
        #[arg(long)]
        responsible: String,
        #[arg(long, default_value = models::CATEGORY_OCCURRENCE)]
        category: String,
        #[arg(long)]
        discipline: Option<String>,
        #[arg(long)]
        irregularity: Vec<String>,
        #[arg(long)]
        description: String,
        /// Defaults to today (YYYY-MM-DD)
        #[arg(long)]
        register_date: Option<NaiveDate>,
        #[arg(long)]
        return_date: Option<NaiveDate>,
    },
    /// Record the same occurrence for several students (teacher)
    RecordTeacher {
        #[arg(long)]
        responsible: String,
        #[arg(long)]
        classroom: String,
        #[arg(long, required = true)]
        student: Vec<String>,
        #[arg(long)]
        discipline: Option<String>,
        #[arg(long)]
        irregularity: Vec<String>,
        #[arg(long)]
        description: String,
        #[arg(long)]
        register_date: Option<NaiveDate>,
    },
    /// List records, newest first
    History {
        #[arg(long)]
        search: Option<String>,
    },
    /// Permanently delete a record
    Delete {
        #[arg(long)]
        id: String,
        #[arg(long)]
        yes: bool,
    },
    /// Change the workflow status of a record
    SetStatus {
        #[arg(long)]
        id: String,
        #[arg(long)]
        status: Status,
    },
    /// Print the record set every time it changes, until Ctrl-C
    Watch,
    /// Render the printable term for one record as a PDF
    Document {
        #[arg(long)]
        id: String,
        #[arg(long, conflicts_with = "view")]
        out: Option<PathBuf>,
        #[arg(long)]
        view: bool,
    },
    /// Generate a markdown summary of the history
    Report {
        #[arg(long, default_value = "relatorio.md")]
        out: PathBuf,
    },
}

struct Credentials {
    email: Option<String>,
    password: Option<String>,
    intent: Option<RoleIntent>,
}

impl Credentials {
    fn pair(&self) -> anyhow::Result<(&str, &str)> {
        let email = self.email.as_deref().context("--email is required for this command")?;
        let password = self
            .password
            .as_deref()
            .context("--password (or PORTAL_PASSWORD) is required for this command")?;
        Ok((email, password))
    }

    async fn login(&self, portal: &mut Portal, intent: RoleIntent) -> anyhow::Result<()> {
        let (email, password) = self.pair()?;
        let user = portal.login(intent, email, password).await?;
        info!(email = %user.email, role = user.role.as_str(), "signed in");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    let credentials = Credentials {
        email: cli.email,
        password: cli.password,
        intent: cli.intent,
    };

    let store = Arc::new(PgStore::new(pool.clone()));
    let mirror = MirrorExporter::new(config.mirror_url.clone())?;
    let service = Arc::new(IncidentService::new(store.clone()).with_mirror(mirror));
    let classifier: Arc<dyn IncidentClassifier> = match config.gemini_api_key.clone() {
        Some(api_key) => Arc::new(
            GeminiClassifier::new(Some(api_key), &config.gemini_model)
                .context("failed to build classifier client")?,
        ),
        None => {
            info!("GEMINI_API_KEY not set, AI analysis disabled");
            Arc::new(NoClassifier)
        }
    };
    let gate = SessionGate::new(store.clone(), config.gate.clone());
    let mut portal = Portal::new(service.clone(), store.clone(), gate, classifier);

    let today = Local::now().date_naive();

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let password = credentials
                .password
                .as_deref()
                .context("--password (or PORTAL_PASSWORD) sets the demo accounts' password")?;
            db::seed(&pool, password).await?;
            println!(
                "Seed data inserted. Accounts: {} and {}.",
                db::SEED_STAFF_EMAIL,
                db::SEED_PROFESSOR_EMAIL
            );
        }
        Commands::ImportStudents { csv } => {
            let imported = roster::import_roster(store.as_ref(), &csv).await?;
            println!("Imported {imported} students from {}.", csv.display());
        }
        Commands::Signup { full_name } => {
            let (email, password) = credentials.pair()?;
            let user = portal.gate_mut().sign_up(email, password, &full_name).await?;
            println!("Cadastro realizado: {} ({}).", user.email, user.role.as_str());
        }
        Commands::RecordStaff {
            classroom,
            student,
            responsible,
            category,
            discipline,
            irregularity,
            description,
            register_date,
            return_date,
        } => {
            credentials.login(&mut portal, RoleIntent::Gestao).await?;
            let draft = StaffDraft {
                classroom,
                student_name: student,
                responsible,
                category,
                discipline,
                irregularities: irregularity,
                description,
                register_date: register_date.unwrap_or(today),
                return_date,
            };
            let record = portal.record_staff(&draft, Local::now().time()).await?;
            println!("Registro salvo com sucesso: {} (RA {}).", record.id, ra(&record));
        }
        Commands::RecordTeacher {
            responsible,
            classroom,
            student,
            discipline,
            irregularity,
            description,
            register_date,
        } => {
            credentials.login(&mut portal, RoleIntent::Professor).await?;
            let draft = TeacherDraft {
                responsible,
                classroom,
                students: student,
                discipline,
                irregularities: irregularity,
                description,
                register_date: register_date.unwrap_or(today),
            };
            let records = portal.record_teacher(&draft, Local::now().time()).await?;
            println!("{} ocorrência(s) registrada(s).", records.len());
            for record in &records {
                println!(
                    "- {} {} (RA {}) gravidade {}",
                    record.id,
                    record.student_name,
                    ra(record),
                    record.severity
                );
            }
        }
        Commands::History { search } => {
            let intent = credentials.intent.unwrap_or(RoleIntent::Gestao);
            credentials.login(&mut portal, intent).await?;
            let records = portal.history(search.as_deref()).await?;
            if records.is_empty() {
                println!("Nenhum registro encontrado.");
            }
            for record in &records {
                print_row(record);
            }
        }
        Commands::Delete { id, yes } => {
            if !yes {
                bail!("Excluir permanentemente este registro? Repita com --yes para confirmar.");
            }
            credentials.login(&mut portal, RoleIntent::Gestao).await?;
            portal.delete_record(&id).await?;
            println!("Registro {id} excluído.");
        }
        Commands::SetStatus { id, status } => {
            credentials.login(&mut portal, RoleIntent::Gestao).await?;
            portal.set_status(&id, status).await?;
            println!("Registro {id} agora está {status}.");
        }
        Commands::Watch => {
            let intent = credentials.intent.unwrap_or(RoleIntent::Gestao);
            credentials.login(&mut portal, intent).await?;
            let synchronizer =
                RealtimeSynchronizer::new(portal.service()).with_view(portal.view());
            let subscription = synchronizer
                .subscribe(|records| {
                    println!("--- {} registro(s) ---", records.len());
                    for record in records.iter().take(10) {
                        print_row(record);
                    }
                })
                .await?;
            let initial = portal.history(None).await?;
            info!(count = initial.len(), "initial record set loaded");
            println!("Aguardando alterações (Ctrl-C para sair)...");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            subscription.unsubscribe();
        }
        Commands::Document { id, out, view } => {
            let intent = credentials.intent.unwrap_or(RoleIntent::Gestao);
            credentials.login(&mut portal, intent).await?;
            let records = portal.history(None).await?;
            let record = records
                .iter()
                .find(|record| record.id == id)
                .with_context(|| format!("registro {id} não encontrado"))?;
            let mode = if view {
                OutputMode::View
            } else {
                OutputMode::Save(out)
            };
            let path = document::build_document(record).emit(&mode)?;
            match mode {
                OutputMode::View => {
                    println!("Documento pronto para visualização: {}", path.display())
                }
                OutputMode::Save(_) => println!("Documento salvo em {}.", path.display()),
            }
        }
        Commands::Report { out } => {
            let intent = credentials.intent.unwrap_or(RoleIntent::Gestao);
            credentials.login(&mut portal, intent).await?;
            let records = portal.history(None).await?;
            let report = report::build_report(today, &records);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    service.drain_mirror().await;
    if let Err(error) = portal.close().await {
        tracing::warn!(%error, "sign-out failed");
    }
    Ok(())
}

fn ra(record: &Incident) -> &str {
    record.ra.as_deref().unwrap_or(directory::RA_PLACEHOLDER)
}

fn print_row(record: &Incident) {
    println!(
        "{} | {} | {} | {} | {} | {} | {}",
        record.date,
        record.student_name,
        record.class_room.as_deref().unwrap_or("N/A"),
        record.category.as_deref().unwrap_or("N/A"),
        record.severity,
        record.status,
        record.id
    );
}
