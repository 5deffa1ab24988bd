use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::{PgListener, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::{hash_password, verify_password, AuthProvider, AuthSession};
use crate::error::{AuthError, StoreError};
use crate::models::{
    IncidentPatch, IncidentRow, Role, Student, User, CATEGORY_OCCURRENCE, CATEGORY_SUSPENSION,
};
use crate::store::{
    ChangeFeed, ChangeKind, IncidentStore, StudentStore, CHANGE_BUFFER, CHANGE_CHANNEL,
};

const INCIDENT_COLUMNS: &str = "id, professor_name, class_room, student_name, ra, date, time, \
     register_date, return_date, discipline, irregularities, description, severity, \
     ai_analysis, status, category, source, created_by, created_at, updated_at";

pub const SEED_STAFF_EMAIL: &str = "gestao@escola.com";
pub const SEED_PROFESSOR_EMAIL: &str = "docente@prof.educacao.sp.gov.br";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Postgres-backed record store, change feed and account provider.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn classify(error: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &error {
        if db.is_unique_violation() || db.is_check_violation() || db.is_foreign_key_violation() {
            return StoreError::Constraint(db.message().to_string());
        }
    }
    if matches!(
        error,
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
    ) {
        return StoreError::Unavailable(error.to_string());
    }
    StoreError::Database(error)
}

fn incident_row(row: &PgRow) -> IncidentRow {
    IncidentRow {
        id: row.get("id"),
        professor_name: row.get("professor_name"),
        class_room: row.get("class_room"),
        student_name: row.get("student_name"),
        ra: row.get("ra"),
        date: row.get("date"),
        time: row.get("time"),
        register_date: row.get("register_date"),
        return_date: row.get("return_date"),
        discipline: row.get("discipline"),
        irregularities: row.get("irregularities"),
        description: row.get("description"),
        severity: row.get("severity"),
        ai_analysis: row.get("ai_analysis"),
        status: row.get("status"),
        category: row.get("category"),
        source: row.get("source"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn user_row(row: &PgRow) -> Result<User, AuthError> {
    let role: String = row.get("role");
    Ok(User {
        id: row.get("id"),
        email: row.get("email"),
        role: role.parse().map_err(AuthError::Provider)?,
        full_name: row.get("full_name"),
    })
}

fn provider_error(error: sqlx::Error) -> AuthError {
    error!(%error, "account lookup failed");
    AuthError::Provider(error.to_string())
}

#[async_trait]
impl IncidentStore for PgStore {
    async fn select_all(&self) -> Result<Vec<IncidentRow>, StoreError> {
        let query = format!(
            "SELECT {INCIDENT_COLUMNS} FROM incident_portal.incidents \
             ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;
        Ok(rows.iter().map(incident_row).collect())
    }

    async fn insert_many(&self, rows: &[IncidentRow]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }

        // One statement, so the batch lands whole or not at all.
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO incident_portal.incidents (id, professor_name, class_room, \
             student_name, ra, date, time, register_date, return_date, discipline, \
             irregularities, description, severity, ai_analysis, status, category, source, \
             created_by) ",
        );
        builder.push_values(rows, |mut values, row| {
            values
                .push_bind(row.id.clone())
                .push_bind(row.professor_name.clone())
                .push_bind(row.class_room.clone())
                .push_bind(row.student_name.clone())
                .push_bind(row.ra.clone())
                .push_bind(row.date.clone())
                .push_bind(row.time.clone())
                .push_bind(row.register_date.clone())
                .push_bind(row.return_date.clone())
                .push_bind(row.discipline.clone())
                .push_bind(row.irregularities.clone())
                .push_bind(row.description.clone())
                .push_bind(row.severity.clone())
                .push_bind(row.ai_analysis.clone())
                .push_bind(row.status.clone())
                .push_bind(row.category.clone())
                .push_bind(row.source.clone())
                .push_bind(row.created_by);
        });

        builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn update(&self, id: &str, patch: &IncidentPatch) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("UPDATE incident_portal.incidents SET ");
        let mut assignments = builder.separated(", ");
        if let Some(status) = patch.status {
            assignments.push("status = ");
            assignments.push_bind_unseparated(status.as_str());
        }
        if let Some(severity) = patch.severity {
            assignments.push("severity = ");
            assignments.push_bind_unseparated(severity.as_str());
        }
        if let Some(analysis) = &patch.ai_analysis {
            assignments.push("ai_analysis = ");
            assignments.push_bind_unseparated(analysis.clone());
        }
        if let Some(description) = &patch.description {
            assignments.push("description = ");
            assignments.push_bind_unseparated(description.clone());
        }
        builder.push(" WHERE id = ").push_bind(id.to_string());

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        debug!(id, rows = result.rows_affected(), "incident update applied");
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM incident_portal.incidents WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        debug!(id, rows = result.rows_affected(), "incident delete applied");
        Ok(())
    }

    async fn changes(&self) -> Result<ChangeFeed, StoreError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(classify)?;
        listener.listen(CHANGE_CHANNEL).await.map_err(classify)?;
        info!(channel = CHANGE_CHANNEL, "listening for incident changes");

        let (tx, rx) = mpsc::channel(CHANGE_BUFFER);
        let forwarder = tokio::spawn(async move {
            loop {
                let kind = match listener.try_recv().await {
                    Ok(Some(notification)) => ChangeKind::from_op(notification.payload()),
                    Ok(None) => {
                        // Notifications sent while disconnected are lost; a
                        // synthetic change makes subscribers refetch.
                        warn!("change listener reconnecting");
                        ChangeKind::Update
                    }
                    Err(error) => {
                        error!(%error, "change listener failed");
                        break;
                    }
                };
                if tx.send(kind).await.is_err() {
                    break;
                }
            }
        });

        Ok(ChangeFeed::new(rx, Some(forwarder)))
    }
}

#[async_trait]
impl StudentStore for PgStore {
    async fn all_students(&self) -> Result<Vec<Student>, StoreError> {
        let rows = sqlx::query("SELECT ra, name, classroom FROM incident_portal.students")
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;

        Ok(rows
            .into_iter()
            .map(|row| Student {
                ra: row.get("ra"),
                name: row.get("name"),
                classroom: row.get("classroom"),
            })
            .collect())
    }

    async fn upsert_students(&self, students: &[Student]) -> Result<u64, StoreError> {
        if students.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO incident_portal.students (ra, name, classroom) ");
        builder.push_values(students, |mut values, student| {
            values
                .push_bind(student.ra.clone())
                .push_bind(student.name.clone())
                .push_bind(student.classroom.clone());
        });
        builder.push(
            " ON CONFLICT (ra) DO UPDATE \
             SET name = EXCLUDED.name, classroom = EXCLUDED.classroom",
        );

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AuthProvider for PgStore {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let row = sqlx::query(
            "SELECT id, password_hash FROM incident_portal.users WHERE lower(email) = lower($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(provider_error)?;

        let Some(row) = row else {
            return Err(AuthError::InvalidCredentials);
        };
        let stored_hash: String = row.get("password_hash");
        if !verify_password(password, &stored_hash) {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(AuthSession {
            user_id: row.get("id"),
        })
    }

    async fn profile(&self, user_id: Uuid) -> Result<Option<User>, AuthError> {
        let row = sqlx::query(
            "SELECT id, email, role, full_name FROM incident_portal.users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(provider_error)?;

        row.as_ref().map(user_row).transpose()
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
        role: Role,
    ) -> Result<(AuthSession, User), AuthError> {
        let password_hash = hash_password(password)?;
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_lowercase(),
            role,
            full_name: Some(full_name.to_string()),
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO incident_portal.users (id, email, password_hash, role, full_name)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(password_hash)
        .bind(role.as_str())
        .bind(full_name)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok((AuthSession { user_id: user.id }, user)),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(AuthError::Provider("User already registered".to_string()))
            }
            Err(error) => Err(provider_error(error)),
        }
    }

    async fn sign_out(&self, session: &AuthSession) -> Result<(), AuthError> {
        debug!(user_id = %session.user_id, "session released");
        Ok(())
    }
}

pub async fn seed(pool: &PgPool, password: &str) -> anyhow::Result<()> {
    let accounts = [
        (
            Uuid::parse_str("6f1c2a9e-4d1b-4c36-9a51-0b7e2f8d3c41")?,
            SEED_STAFF_EMAIL,
            Role::Gestor,
            "COORDENAÇÃO PEDAGÓGICA",
        ),
        (
            Uuid::parse_str("b2e4d7a1-93c5-4f08-8e6d-5a1f0c9b7d22")?,
            SEED_PROFESSOR_EMAIL,
            Role::Professor,
            "MARIA SOUZA",
        ),
    ];

    for (id, email, role, full_name) in accounts {
        let password_hash = hash_password(password).context("failed to hash seed password")?;
        sqlx::query(
            r#"
            INSERT INTO incident_portal.users (id, email, password_hash, role, full_name)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (email) DO UPDATE
            SET password_hash = EXCLUDED.password_hash, role = EXCLUDED.role
            "#,
        )
        .bind(id)
        .bind(email)
        .bind(password_hash)
        .bind(role.as_str())
        .bind(full_name)
        .execute(pool)
        .await?;
    }

    let students = [
        ("000111222sp", "ANA LIMA", "6ºAno A"),
        ("000333444sp", "BRUNO COSTA", "6ºAno A"),
        ("000555666sp", "CARLA DIAS", "6ºAno A"),
        ("000777888sp", "DANIEL ROCHA", "7ºAno B"),
        ("000999000sp", "EDUARDA MELO", "1ª Série A"),
    ];
    let students: Vec<Student> = students
        .into_iter()
        .map(|(ra, name, classroom)| Student {
            ra: ra.to_string(),
            name: name.to_string(),
            classroom: classroom.to_string(),
        })
        .collect();
    PgStore::new(pool.clone())
        .upsert_students(&students)
        .await
        .context("failed to seed students")?;

    let incidents = [
        (
            "seed-gest-001",
            "ANA LIMA",
            "000111222sp",
            "6ºAno A",
            CATEGORY_OCCURRENCE,
            "USO DE CELULAR",
            "Média",
            "gestao",
            "UTILIZOU O CELULAR DURANTE A AVALIAÇÃO APÓS ADVERTÊNCIA VERBAL.",
        ),
        (
            "seed-gest-002",
            "DANIEL ROCHA",
            "000777888sp",
            "7ºAno B",
            CATEGORY_SUSPENSION,
            "DESACATO, INDISCIPLINA",
            "Alta",
            "gestao",
            "DESACATOU A INSPETORA NO INTERVALO E SE RECUSOU A IR À DIREÇÃO.",
        ),
        (
            "seed-prof-001",
            "BRUNO COSTA",
            "000333444sp",
            "6ºAno A",
            CATEGORY_OCCURRENCE,
            "SEM MATERIAL",
            "Baixa",
            "professor",
            "COMPARECEU À AULA SEM O MATERIAL PELA TERCEIRA VEZ NA SEMANA.",
        ),
    ];

    for (id, student, ra, classroom, category, irregularities, severity, source, description) in
        incidents
    {
        let return_date = (category == CATEGORY_SUSPENSION).then_some("12/02/2026");
        sqlx::query(
            r#"
            INSERT INTO incident_portal.incidents
            (id, professor_name, class_room, student_name, ra, date, time, register_date,
             return_date, discipline, irregularities, description, severity, status,
             category, source)
            VALUES ($1, 'MARIA SOUZA', $2, $3, $4, '09/02/2026', '10:30', '09/02/2026',
                    $5, 'N/A', $6, $7, $8, 'Pendente', $9, $10)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(classroom)
        .bind(student)
        .bind(ra)
        .bind(return_date)
        .bind(irregularities)
        .bind(description)
        .bind(severity)
        .bind(category)
        .bind(source)
        .execute(pool)
        .await?;
    }

    Ok(())
}
