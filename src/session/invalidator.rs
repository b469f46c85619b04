use std::sync::Arc;

use super::navigation::{Destination, Navigator};
use super::state::SessionState;
use crate::auth::{AuthError, CredentialStore};

/// Why the session is being torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationReason {
    /// User asked to log out
    Logout,
    /// Refresh endpoint rejected the token or could not be reached
    RefreshFailed,
    /// No refresh token was stored
    NoRefreshToken,
    /// Login got tokens but could not complete; roll back silently
    LoginAborted,
}

impl From<&AuthError> for InvalidationReason {
    fn from(err: &AuthError) -> Self {
        match err {
            AuthError::NoRefreshToken => InvalidationReason::NoRefreshToken,
            _ => InvalidationReason::RefreshFailed,
        }
    }
}

/// Single choke point for ending a session
pub struct SessionInvalidator {
    state: Arc<SessionState>,
    store: Arc<dyn CredentialStore>,
    navigator: Arc<dyn Navigator>,
}

impl SessionInvalidator {
    pub fn new(
        state: Arc<SessionState>,
        store: Arc<dyn CredentialStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            state,
            store,
            navigator,
        }
    }

    /// Session this invalidator tears down
    pub(crate) fn session(&self) -> &Arc<SessionState> {
        &self.state
    }

    /// Clear identity, credential references and persisted tokens, then navigate
    ///
    /// Everything is cleared under the session write lock, so readers see either
    /// the full session or none of it. A call on an already-empty session does
    /// nothing, including navigation. Returns whether anything was torn down.
    pub async fn invalidate(&self, reason: InvalidationReason) -> bool {
        let store = &self.store;
        let was_active = self
            .state
            .clear_with(|session_active| {
                let stored = store
                    .access_token()
                    .map(|t| t.is_some())
                    .unwrap_or(true)
                    || store.refresh_token().map(|t| t.is_some()).unwrap_or(true);

                if let Err(e) = store.clear() {
                    tracing::error!(error = %e, "Failed to clear persisted credentials");
                }

                session_active || stored
            })
            .await;

        if !was_active {
            tracing::debug!(?reason, "Session already invalidated");
            return false;
        }

        tracing::info!(?reason, "Session invalidated");

        let destination = match reason {
            InvalidationReason::Logout => Some(Destination::Home),
            InvalidationReason::RefreshFailed | InvalidationReason::NoRefreshToken => {
                Some(Destination::Login {
                    redirect: self.navigator.current_location(),
                })
            }
            InvalidationReason::LoginAborted => None,
        };

        if let Some(destination) = destination {
            self.navigator.navigate(destination);
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{CredentialPair, MemoryCredentialStore};
    use crate::session::RecordingNavigator;

    fn setup() -> (
        SessionInvalidator,
        Arc<SessionState>,
        Arc<MemoryCredentialStore>,
        Arc<RecordingNavigator>,
    ) {
        let state = Arc::new(SessionState::new());
        let store = Arc::new(MemoryCredentialStore::with_pair(CredentialPair {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
        }));
        let navigator = Arc::new(RecordingNavigator::new());
        let invalidator = SessionInvalidator::new(state.clone(), store.clone(), navigator.clone());
        (invalidator, state, store, navigator)
    }

    #[tokio::test]
    async fn test_invalidate_is_idempotent() {
        let (invalidator, state, store, navigator) = setup();
        state
            .set_credentials(&store.load().unwrap().unwrap())
            .await;

        assert!(invalidator.invalidate(InvalidationReason::Logout).await);
        assert!(!invalidator.invalidate(InvalidationReason::Logout).await);

        assert_eq!(store.load().unwrap(), None);
        assert!(state.snapshot().await.access_token.is_none());
        assert_eq!(navigator.history(), vec![Destination::Home]);
    }

    #[tokio::test]
    async fn test_refresh_failure_preserves_location() {
        let (invalidator, _state, _store, navigator) = setup();
        navigator.set_location("/admin/declarations");

        invalidator
            .invalidate(InvalidationReason::RefreshFailed)
            .await;

        assert_eq!(
            navigator.history(),
            vec![Destination::Login {
                redirect: Some("/admin/declarations".to_string())
            }]
        );
    }

    #[tokio::test]
    async fn test_login_abort_does_not_navigate() {
        let (invalidator, _state, store, navigator) = setup();

        assert!(invalidator.invalidate(InvalidationReason::LoginAborted).await);
        assert_eq!(store.access_token().unwrap(), None);
        assert!(navigator.history().is_empty());
    }
}
