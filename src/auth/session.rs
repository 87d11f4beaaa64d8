//! Signed-in / signed-out state of one client session.

use tokio::sync::watch;

use crate::errors::AppError;

/// Authentication state of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    SignedOut,
    SignedIn { user_id: String, email: String },
}

impl AuthState {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            AuthState::SignedOut => None,
            AuthState::SignedIn { user_id, .. } => Some(user_id),
        }
    }
}

/// Supplies the session user and notifies listeners when it changes.
pub struct AuthSession {
    state: watch::Sender<AuthState>,
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthSession {
    pub fn new() -> Self {
        let (state, _) = watch::channel(AuthState::SignedOut);
        Self { state }
    }

    pub fn sign_in(&self, user_id: &str, email: &str) -> Result<(), AppError> {
        if user_id.trim().is_empty() {
            return Err(AppError::Unauthenticated(
                "Cannot sign in without a user id".to_string(),
            ));
        }
        tracing::info!("{} signed in", email);
        self.state.send_replace(AuthState::SignedIn {
            user_id: user_id.to_string(),
            email: email.to_string(),
        });
        Ok(())
    }

    pub fn sign_out(&self) {
        let previous = self.state.send_replace(AuthState::SignedOut);
        if let AuthState::SignedIn { email, .. } = previous {
            tracing::info!("{} signed out", email);
        }
    }

    pub fn current(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// Identifier of the signed-in user.
    pub fn current_user(&self) -> Result<String, AppError> {
        self.state
            .borrow()
            .user_id()
            .map(str::to_string)
            .ok_or_else(|| AppError::Unauthenticated("No one is signed in".to_string()))
    }

    /// Auth-state-changed notifications. The receiver sees the current state first.
    pub fn changes(&self) -> watch::Receiver<AuthState> {
        let mut rx = self.state.subscribe();
        rx.mark_changed();
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_signed_out() {
        let session = AuthSession::new();
        assert_eq!(session.current(), AuthState::SignedOut);
        assert!(matches!(
            session.current_user(),
            Err(AppError::Unauthenticated(_))
        ));
    }

    #[test]
    fn test_sign_in_and_out() {
        let session = AuthSession::new();
        session.sign_in("u1", "driver@example.com").unwrap();
        assert_eq!(session.current_user().unwrap(), "u1");

        session.sign_out();
        assert!(session.current_user().is_err());
    }

    #[test]
    fn test_blank_user_cannot_sign_in() {
        let session = AuthSession::new();
        assert!(session.sign_in(" ", "driver@example.com").is_err());
        assert_eq!(session.current(), AuthState::SignedOut);
    }

    #[tokio::test]
    async fn test_changes_are_observed() {
        let session = AuthSession::new();
        let mut changes = session.changes();

        changes.changed().await.unwrap();
        assert_eq!(*changes.borrow_and_update(), AuthState::SignedOut);

        session.sign_in("u1", "driver@example.com").unwrap();
        changes.changed().await.unwrap();
        assert_eq!(changes.borrow_and_update().user_id(), Some("u1"));
    }
}
