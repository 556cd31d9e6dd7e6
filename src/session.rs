// src/session.rs

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

/// Jurisdictions a claim can be filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum UsState {
    MO,
    TX,
    IN,
}

impl fmt::Display for UsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            UsState::MO => "MO",
            UsState::TX => "TX",
            UsState::IN => "IN",
        };
        f.write_str(code)
    }
}

impl FromStr for UsState {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "MO" => Ok(UsState::MO),
            "TX" => Ok(UsState::TX),
            "IN" => Ok(UsState::IN),
            _ => Err(SessionError::UnknownState(s.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SessionError {
    #[error("Invalid Credentials")]
    InvalidCredentials,
    #[error("not logged in")]
    NotAuthenticated,
    #[error("Consent required.")]
    ConsentRequired,
    #[error("unsupported state {0:?} (expected MO, TX or IN)")]
    UnknownState(String),
}

/// The single accepted username/password pair.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            username: "test".to_string(),
            password: "test".to_string(),
        }
    }
}

/// Keys for the external services, as entered for this session.
#[derive(Debug, Clone)]
pub struct ApiKeys {
    pub recognition: String,
    pub valuation: String,
    pub dv: String,
}

/// Per-user context handed to every pipeline stage.
#[derive(Debug)]
pub struct Session {
    authenticated: bool,
    consented: bool,
    pub state: UsState,
    pub keys: ApiKeys,
}

impl Session {
    pub fn new(state: UsState, keys: ApiKeys) -> Self {
        Self {
            authenticated: false,
            consented: false,
            state,
            keys,
        }
    }

    pub fn login(
        &mut self,
        accepted: &Credentials,
        username: &str,
        password: &str,
    ) -> Result<(), SessionError> {
        if username == accepted.username && password == accepted.password {
            self.authenticated = true;
            info!(user = %username, "Logged in");
            Ok(())
        } else {
            warn!(user = %username, "Rejected login");
            Err(SessionError::InvalidCredentials)
        }
    }

    pub fn grant_consent(&mut self) {
        self.consented = true;
    }

    /// Both the login and the data-processing consent must be in place
    /// before any document is touched.
    pub fn ensure_ready(&self) -> Result<(), SessionError> {
        if !self.authenticated {
            return Err(SessionError::NotAuthenticated);
        }
        if !self.consented {
            return Err(SessionError::ConsentRequired);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_session(state: UsState) -> Session {
    let mut session = Session::new(
        state,
        ApiKeys {
            recognition: "rk".to_string(),
            valuation: "vk".to_string(),
            dv: "dk".to_string(),
        },
    );
    session
        .login(&Credentials::default(), "test", "test")
        .expect("default credentials");
    session.grant_consent();
    session
}
