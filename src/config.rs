use crate::auth::GatePolicy;
use crate::error::ConfigError;

/// Values containing this marker were never filled in.
pub const PLACEHOLDER_MARKER: &str = "YOUR_";

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_STAFF_EMAIL: &str = "gestao@escola.com";
pub const DEFAULT_PROFESSOR_DOMAIN: &str = "prof.educacao.sp.gov.br";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub mirror_url: Option<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gate: GatePolicy,
}

impl Config {
    /// Reads the process environment after loading an optional `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = match lookup("DATABASE_URL") {
            Some(value) if is_placeholder(&value) => {
                return Err(ConfigError::Placeholder("DATABASE_URL"))
            }
            Some(value) if !value.trim().is_empty() => value.trim().to_string(),
            _ => return Err(ConfigError::Missing("DATABASE_URL")),
        };

        let staff_email = configured(lookup("PORTAL_GESTAO_EMAIL"))
            .unwrap_or_else(|| DEFAULT_STAFF_EMAIL.to_string());
        let professor_domains = configured(lookup("PORTAL_PROFESSOR_DOMAINS"))
            .map(|value| {
                value
                    .split(',')
                    .map(|domain| domain.trim().trim_start_matches('@').to_lowercase())
                    .filter(|domain| !domain.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|domains| !domains.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_PROFESSOR_DOMAIN.to_string()]);

        Ok(Self {
            database_url,
            mirror_url: configured(lookup("MIRROR_SCRIPT_URL")),
            gemini_api_key: configured(lookup("GEMINI_API_KEY")),
            gemini_model: configured(lookup("GEMINI_MODEL"))
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            gate: GatePolicy {
                staff_email: staff_email.to_lowercase(),
                professor_domains,
            },
        })
    }
}

pub fn is_placeholder(value: &str) -> bool {
    value.contains(PLACEHOLDER_MARKER)
}

/// Treats blank and placeholder values as absent.
pub fn configured(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty() && !is_placeholder(value))
}
