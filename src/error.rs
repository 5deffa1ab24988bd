use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{0} still holds a placeholder value")]
    Placeholder(&'static str),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("invalid stored record {id}: {reason}")]
    InvalidRow { id: String, reason: String },
}

/// Failures of a create/delete/update call, named after the operation so
/// the caller can show them as-is.
#[derive(Debug, Error)]
pub enum IncidentError {
    #[error("Erro ao salvar: nenhum registro informado")]
    EmptyBatch,

    #[error("Erro ao salvar: {0}")]
    Create(#[source] StoreError),

    #[error("Erro ao deletar: {0}")]
    Delete(#[source] StoreError),

    #[error("Erro ao atualizar: {0}")]
    Update(#[source] StoreError),
}

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("URL do Script não configurada")]
    NotConfigured,

    #[error("mirror transport failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{failed} of {total} mirror exports failed")]
    Batch { failed: usize, total: usize },
}

/// User-facing authentication and authorization failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Credenciais inválidas")]
    InvalidCredentials,

    #[error("Acesso negado. A área de Gestão é restrita ao e-mail {allowed}")]
    StaffOnly { allowed: String },

    #[error("Acesso restrito. Utilize seu e-mail institucional (@{domains})")]
    DomainNotAllowed { domains: String },

    #[error("Por favor, informe seu nome completo.")]
    MissingFullName,

    #[error("Este usuário não tem permissão de {intent}")]
    RoleMismatch { intent: String },

    #[error("Erro ao carregar dados do usuário")]
    ProfileUnavailable,

    #[error("{0}")]
    Provider(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DraftError {
    #[error("campo obrigatório ausente: {0}")]
    Missing(&'static str),

    #[error("selecione ao menos um aluno")]
    NoStudents,

    #[error("turma desconhecida: {0}")]
    UnknownClassroom(String),

    #[error("irregularidade desconhecida: {0}")]
    UnknownIrregularity(String),
}
