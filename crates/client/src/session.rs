//! Shared handle to the signed-in session.

use std::sync::{Arc, RwLock};

use f15_core::Session;

/// The current [`Session`], owned by the UI shell.
///
/// The shell signs users in and out; the remote client and the engines hold
/// clones of this handle and only ever read it.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    inner: Arc<RwLock<Option<Session>>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(session: Session) -> Self {
        let ctx = Self::new();
        ctx.sign_in(session);
        ctx
    }

    pub fn sign_in(&self, session: Session) {
        tracing::info!(email = session.email(), "session signed in");
        let mut guard = self.inner.write().unwrap_or_else(|p| p.into_inner());
        *guard = Some(session);
    }

    pub fn sign_out(&self) {
        let mut guard = self.inner.write().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = guard.take() {
            tracing::info!(email = previous.email(), "session signed out");
        }
    }

    pub fn current(&self) -> Option<Session> {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn email(&self) -> Option<String> {
        self.current().map(|s| s.email().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_see_sign_in_and_sign_out() {
        let shell = SessionContext::new();
        let engine_view = shell.clone();
        assert_eq!(engine_view.email(), None);

        shell.sign_in(Session::new("ana@frame15.com").unwrap());
        assert_eq!(engine_view.email().as_deref(), Some("ana@frame15.com"));

        shell.sign_out();
        assert!(engine_view.current().is_none());
    }
}
