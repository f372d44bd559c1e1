use std::sync::Arc;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoginError {
    #[error("username and password are required")]
    MissingCredentials,
    #[error("invalid credentials")]
    InvalidCredentials,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("missing session")]
    Missing,
    #[error("invalid session")]
    Invalid,
    #[error("expired session")]
    Expired,
}

/// Authenticated operator, attached to requests that pass the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub username: String,
}

#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
struct SessionRecord {
    username: String,
    expires_at: OffsetDateTime,
}

/// Single-operator credential check plus in-memory sessions.
///
/// Sessions are keyed by the SHA-256 of the token, so the table never holds a
/// usable secret. Sessions do not survive a restart.
#[derive(Clone)]
pub struct AuthService {
    username: String,
    password_hash: Vec<u8>,
    ttl: Duration,
    sessions: Arc<DashMap<String, SessionRecord>>,
}

impl AuthService {
    pub fn new(username: impl Into<String>, password: &str, ttl: Duration) -> Self {
        Self {
            username: username.into(),
            password_hash: hash_secret(password),
            ttl,
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn login(&self, username: &str, password: &str) -> Result<IssuedSession, LoginError> {
        self.login_at(username, password, OffsetDateTime::now_utc())
    }

    pub fn authenticate(&self, token: &str) -> Result<Principal, SessionError> {
        self.authenticate_at(token, OffsetDateTime::now_utc())
    }

    /// Drop the session behind `token`. Unknown tokens are ignored.
    pub fn logout(&self, token: &str) {
        self.sessions.remove(&session_key(token));
    }

    /// Number of live entries, including expired ones not yet evicted.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn login_at(
        &self,
        username: &str,
        password: &str,
        now: OffsetDateTime,
    ) -> Result<IssuedSession, LoginError> {
        if username.is_empty() || password.is_empty() {
            return Err(LoginError::MissingCredentials);
        }

        let user_ok = self.username.as_bytes().ct_eq(username.as_bytes());
        let password_ok = self.password_hash.ct_eq(&hash_secret(password));
        if (user_ok & password_ok).unwrap_u8() == 0 {
            return Err(LoginError::InvalidCredentials);
        }

        self.sessions.retain(|_, record| record.expires_at > now);

        let token = generate_token();
        let expires_at = now + self.ttl;
        self.sessions.insert(
            session_key(&token),
            SessionRecord {
                username: self.username.clone(),
                expires_at,
            },
        );
        Ok(IssuedSession { token, expires_at })
    }

    fn authenticate_at(&self, token: &str, now: OffsetDateTime) -> Result<Principal, SessionError> {
        if token.is_empty() {
            return Err(SessionError::Missing);
        }

        let key = session_key(token);
        let record = self
            .sessions
            .get(&key)
            .map(|entry| entry.value().clone())
            .ok_or(SessionError::Invalid)?;

        if record.expires_at <= now {
            self.sessions.remove(&key);
            return Err(SessionError::Expired);
        }

        Ok(Principal {
            username: record.username,
        })
    }
}

fn hash_secret(secret: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.finalize().to_vec()
}

fn session_key(token: &str) -> String {
    hex::encode(hash_secret(token))
}

fn generate_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        AuthService::new("admin", "hunter2", Duration::hours(1))
    }

    #[test]
    fn login_requires_both_fields() {
        let auth = service();
        assert_eq!(
            auth.login("", "hunter2").unwrap_err(),
            LoginError::MissingCredentials
        );
        assert_eq!(
            auth.login("admin", "").unwrap_err(),
            LoginError::MissingCredentials
        );
    }

    #[test]
    fn wrong_credentials_are_rejected() {
        let auth = service();
        assert_eq!(
            auth.login("admin", "hunter3").unwrap_err(),
            LoginError::InvalidCredentials
        );
        assert_eq!(
            auth.login("root", "hunter2").unwrap_err(),
            LoginError::InvalidCredentials
        );
        assert_eq!(auth.session_count(), 0);
    }

    #[test]
    fn issued_session_authenticates_until_logout() {
        let auth = service();
        let session = auth.login("admin", "hunter2").expect("login");
        assert_eq!(session.token.len(), 64);

        let principal = auth.authenticate(&session.token).expect("valid");
        assert_eq!(principal.username, "admin");

        auth.logout(&session.token);
        assert_eq!(
            auth.authenticate(&session.token).unwrap_err(),
            SessionError::Invalid
        );
        assert_eq!(auth.authenticate("").unwrap_err(), SessionError::Missing);
    }

    #[test]
    fn expired_sessions_are_evicted() {
        let auth = service();
        let now = OffsetDateTime::now_utc();
        let session = auth.login_at("admin", "hunter2", now).expect("login");

        let later = now + Duration::hours(2);
        assert_eq!(
            auth.authenticate_at(&session.token, later).unwrap_err(),
            SessionError::Expired
        );
        assert_eq!(auth.session_count(), 0);
    }

    #[test]
    fn login_sweeps_expired_sessions() {
        let auth = service();
        let now = OffsetDateTime::now_utc();
        auth.login_at("admin", "hunter2", now).expect("first");
        auth.login_at("admin", "hunter2", now + Duration::hours(3))
            .expect("second");
        assert_eq!(auth.session_count(), 1);
    }
}
