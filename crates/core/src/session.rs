//! The signed-in user.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Identifies the current user; every remote call is scoped to it.
///
/// Sessions are created and cleared by the UI shell. The sync engines only
/// read them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Session {
    email: String,
}

impl Session {
    pub fn new(email: impl Into<String>) -> DomainResult<Self> {
        let email = email.into();
        let email = email.trim();
        if email.is_empty() {
            return Err(DomainError::validation("session email must not be empty"));
        }
        if !email.contains('@') {
            return Err(DomainError::validation(format!(
                "session email '{email}' is not an address"
            )));
        }
        Ok(Self {
            email: email.to_string(),
        })
    }

    pub fn email(&self) -> &str {
        &self.email
    }
}
