use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AuthError;
use crate::models::{Role, User};

/// Opaque handle returned by the provider after a successful sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub user_id: Uuid,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthError>;

    async fn profile(&self, user_id: Uuid) -> Result<Option<User>, AuthError>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
        role: Role,
    ) -> Result<(AuthSession, User), AuthError>;

    async fn sign_out(&self, session: &AuthSession) -> Result<(), AuthError>;
}

/// The workflow a user picks before submitting credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleIntent {
    Gestao,
    Professor,
}

impl RoleIntent {
    pub const fn expected_role(self) -> Role {
        match self {
            Self::Gestao => Role::Gestor,
            Self::Professor => Role::Professor,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Gestao => "Gestão",
            Self::Professor => "Professor",
        }
    }
}

impl FromStr for RoleIntent {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "gestao" | "gestão" => Ok(Self::Gestao),
            "professor" => Ok(Self::Professor),
            other => Err(format!("unknown role intent `{other}` (use gestao or professor)")),
        }
    }
}

impl fmt::Display for RoleIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatePolicy {
    pub staff_email: String,
    pub professor_domains: Vec<String>,
}

impl GatePolicy {
    /// Identity checks that run before any credential leaves the process.
    pub fn admit(&self, intent: RoleIntent, email: &str) -> Result<(), AuthError> {
        let email = email.trim().to_lowercase();
        match intent {
            RoleIntent::Gestao if email != self.staff_email => Err(AuthError::StaffOnly {
                allowed: self.staff_email.clone(),
            }),
            RoleIntent::Professor => {
                let domain = email.rsplit_once('@').map(|(_, domain)| domain).unwrap_or("");
                if self.professor_domains.iter().any(|allowed| allowed == domain) {
                    Ok(())
                } else {
                    Err(AuthError::DomainNotAllowed {
                        domains: self.professor_domains.join(", @"),
                    })
                }
            }
            RoleIntent::Gestao => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    LoggedOut { error: Option<String> },
    Authenticating(RoleIntent),
    LoggedIn(User),
}

pub struct SessionGate {
    provider: Arc<dyn AuthProvider>,
    policy: GatePolicy,
    state: SessionState,
    session: Option<AuthSession>,
}

impl SessionGate {
    pub fn new(provider: Arc<dyn AuthProvider>, policy: GatePolicy) -> Self {
        Self {
            provider,
            policy,
            state: SessionState::LoggedOut { error: None },
            session: None,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn current_user(&self) -> Option<&User> {
        match &self.state {
            SessionState::LoggedIn(user) => Some(user),
            _ => None,
        }
    }

    pub async fn login(
        &mut self,
        intent: RoleIntent,
        email: &str,
        password: &str,
    ) -> Result<User, AuthError> {
        self.state = SessionState::Authenticating(intent);
        let outcome = self.authenticate(intent, email, password).await;
        self.settle(email, outcome)
    }

    /// Self-registration, only offered to the teacher workflow. The new
    /// account always gets the `professor` role.
    pub async fn sign_up(
        &mut self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<User, AuthError> {
        self.state = SessionState::Authenticating(RoleIntent::Professor);
        let outcome = self.register(email, password, full_name).await;
        self.settle(email, outcome)
    }

    pub async fn logout(&mut self) -> Result<(), AuthError> {
        let outcome = match self.session.take() {
            Some(session) => self.provider.sign_out(&session).await,
            None => Ok(()),
        };
        self.state = SessionState::LoggedOut { error: None };
        outcome
    }

    async fn authenticate(
        &self,
        intent: RoleIntent,
        email: &str,
        password: &str,
    ) -> Result<(AuthSession, User), AuthError> {
        self.policy.admit(intent, email)?;

        let session = self.provider.sign_in(email.trim(), password).await?;
        match self.authorize(intent, &session).await {
            Ok(user) => Ok((session, user)),
            Err(error) => {
                // Signed in but not admitted; the provider session goes too.
                if let Err(release) = self.provider.sign_out(&session).await {
                    warn!(error = %release, "failed to release rejected session");
                }
                Err(error)
            }
        }
    }

    async fn authorize(&self, intent: RoleIntent, session: &AuthSession) -> Result<User, AuthError> {
        let user = self
            .provider
            .profile(session.user_id)
            .await?
            .ok_or(AuthError::ProfileUnavailable)?;

        if user.role != intent.expected_role() {
            return Err(AuthError::RoleMismatch {
                intent: intent.label().to_string(),
            });
        }
        Ok(user)
    }

    async fn register(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<(AuthSession, User), AuthError> {
        self.policy.admit(RoleIntent::Professor, email)?;
        let full_name = full_name.trim();
        if full_name.is_empty() {
            return Err(AuthError::MissingFullName);
        }

        self.provider
            .sign_up(email.trim(), password, full_name, Role::Professor)
            .await
    }

    fn settle(
        &mut self,
        email: &str,
        outcome: Result<(AuthSession, User), AuthError>,
    ) -> Result<User, AuthError> {
        match outcome {
            Ok((session, user)) => {
                info!(user_id = %user.id, role = user.role.as_str(), "session opened");
                self.session = Some(session);
                self.state = SessionState::LoggedIn(user.clone());
                Ok(user)
            }
            Err(error) => {
                warn!(email, %error, "authentication rejected");
                self.session = None;
                self.state = SessionState::LoggedOut {
                    error: Some(error.to_string()),
                };
                Err(error)
            }
        }
    }
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|error| AuthError::Provider(error.to_string()))
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}
