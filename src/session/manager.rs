use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use super::invalidator::{InvalidationReason, SessionInvalidator};
use super::navigation::{Destination, Navigator};
use super::state::{Profile, Role, SessionState};
use crate::auth::{CredentialStore, LoginRequest};
use crate::endpoints::{self, NewUser};
use crate::error::ApiError;
use crate::http_client::{ApiClient, ClientSettings};

/// Failed session action, with a message ready to show the user
#[derive(Error, Debug)]
#[error("{message}")]
pub struct ActionError {
    pub message: String,
    #[source]
    pub source: ApiError,
}

impl From<ApiError> for ActionError {
    fn from(source: ApiError) -> Self {
        Self {
            message: source.user_message(),
            source,
        }
    }
}

pub type Outcome<T> = std::result::Result<T, ActionError>;

/// Owner of the session
///
/// Exposes the read-only session facts and the login/register/logout/profile
/// actions. Every action reports success or a normalized error.
pub struct SessionManager {
    client: Arc<ApiClient>,
    state: Arc<SessionState>,
    store: Arc<dyn CredentialStore>,
    invalidator: Arc<SessionInvalidator>,
    navigator: Arc<dyn Navigator>,
    /// Actions in flight; overlapping actions each hold one count
    loading: AtomicUsize,
    last_error: RwLock<Option<String>>,
}

impl SessionManager {
    /// Wire store, session, invalidator and API client together
    pub fn connect(
        settings: &ClientSettings,
        store: Arc<dyn CredentialStore>,
        navigator: Arc<dyn Navigator>,
    ) -> anyhow::Result<Self> {
        let state = Arc::new(SessionState::new());
        let invalidator = Arc::new(SessionInvalidator::new(
            state.clone(),
            store.clone(),
            navigator.clone(),
        ));
        let client = Arc::new(ApiClient::new(settings, store.clone(), invalidator.clone())?);

        Ok(Self {
            client,
            state,
            store,
            invalidator,
            navigator,
            loading: AtomicUsize::new(0),
            last_error: RwLock::new(None),
        })
    }

    /// Authenticated client for any other endpoint
    pub fn client(&self) -> &Arc<ApiClient> {
        &self.client
    }

    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state.is_authenticated().await
    }

    pub async fn is_admin(&self) -> bool {
        self.state.is_admin().await
    }

    pub async fn is_police(&self) -> bool {
        self.state.is_police().await
    }

    pub async fn is_staff(&self) -> bool {
        self.state.is_staff().await
    }

    pub async fn role(&self) -> Role {
        self.state.role().await
    }

    pub async fn profile(&self) -> Option<Profile> {
        self.state.profile().await
    }

    /// Whether any action is in progress
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst) > 0
    }

    /// Message of the last failed action, cleared when the next one starts
    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    /// Log in, load the profile and navigate by role
    pub async fn login(&self, credentials: &LoginRequest) -> Outcome<Destination> {
        self.run_action(self.login_inner(credentials)).await
    }

    /// Create an account, then log in with the same credentials
    pub async fn register(&self, user: &NewUser) -> Outcome<Destination> {
        self.run_action(async {
            endpoints::register(&self.client, user).await?;
            tracing::info!(username = %user.username, "Account created, logging in");
            self.login_inner(&user.credentials()).await
        })
        .await
    }

    /// Load the profile; a 401 that survived refresh logs the user out
    pub async fn fetch_profile(&self) -> Outcome<Profile> {
        self.fetch_profile_inner().await.map_err(ActionError::from)
    }

    /// Replace the profile with the server's returned representation
    pub async fn update_profile(&self, data: &Value) -> Outcome<Profile> {
        self.run_action(async {
            let profile = endpoints::update_profile(&self.client, data).await?;
            self.state.set_identity(profile.clone()).await;
            Ok(profile)
        })
        .await
    }

    /// Rehydrate the session from persisted credentials
    ///
    /// Returns `None` when nothing is persisted.
    pub async fn init(&self) -> Outcome<Option<Profile>> {
        let access_token = self.store.access_token().map_err(ApiError::from)?;
        let Some(access_token) = access_token else {
            tracing::debug!("No persisted access token, session stays empty");
            return Ok(None);
        };

        match self.store.load().map_err(ApiError::from)? {
            Some(pair) => self.state.set_credentials(&pair).await,
            None => self.state.set_access_token(access_token).await,
        }

        self.fetch_profile().await.map(Some)
    }

    pub async fn logout(&self) {
        self.invalidator.invalidate(InvalidationReason::Logout).await;
    }

    async fn login_inner(&self, credentials: &LoginRequest) -> Result<Destination, ApiError> {
        let pair = endpoints::obtain_token(&self.client, credentials).await?;

        self.store.store_pair(&pair)?;
        self.state.set_credentials(&pair).await;
        tracing::info!(username = %credentials.username, "Tokens issued");

        if let Err(e) = self.fetch_profile_inner().await {
            // Do not leave tokens behind for a session that never started
            self.invalidator
                .invalidate(InvalidationReason::LoginAborted)
                .await;
            return Err(e);
        }

        let destination = if self.state.is_staff().await {
            Destination::Dashboard
        } else {
            Destination::MyDeclarations
        };
        self.navigator.navigate(destination.clone());

        Ok(destination)
    }

    async fn fetch_profile_inner(&self) -> Result<Profile, ApiError> {
        match endpoints::profile(&self.client).await {
            Ok(profile) => {
                tracing::debug!(
                    username = %profile.username,
                    role = profile.role().as_str(),
                    "Profile loaded"
                );
                self.state.set_identity(profile.clone()).await;
                Ok(profile)
            }
            Err(e @ ApiError::AuthorizationExpired { .. }) => {
                tracing::warn!("Profile rejected with 401, logging out");
                self.logout().await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn run_action<T, F>(&self, action: F) -> Outcome<T>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        let _loading = LoadingGuard::enter(&self.loading);
        *self.last_error.write().await = None;

        match action.await {
            Ok(value) => Ok(value),
            Err(e) => {
                let err = ActionError::from(e);
                tracing::warn!(error = %err.source, "Session action failed");
                *self.last_error.write().await = Some(err.message.clone());
                Err(err)
            }
        }
    }
}

/// One in-flight action; released on completion or cancellation
struct LoadingGuard<'a>(&'a AtomicUsize);

impl<'a> LoadingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryCredentialStore;
    use crate::session::RecordingNavigator;
    use reqwest::Url;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn manager() -> SessionManager {
        let settings = ClientSettings {
            base_url: Url::parse("http://127.0.0.1:9/api/").unwrap(),
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(1),
        };
        SessionManager::connect(
            &settings,
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(RecordingNavigator::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_loading_spans_overlapping_actions() {
        let manager = manager();
        let (first_tx, first_rx) = oneshot::channel::<()>();
        let (second_tx, second_rx) = oneshot::channel::<()>();

        let first = manager.run_action(async {
            let _ = first_rx.await;
            Ok::<_, ApiError>(1)
        });
        let second = manager.run_action(async {
            let _ = second_rx.await;
            Ok::<_, ApiError>(2)
        });
        tokio::pin!(first);
        tokio::pin!(second);

        assert!(!manager.is_loading());
        assert!(futures::poll!(first.as_mut()).is_pending());
        assert!(futures::poll!(second.as_mut()).is_pending());
        assert!(manager.is_loading());

        first_tx.send(()).unwrap();
        assert_eq!(first.await.unwrap(), 1);
        // The second action is still running
        assert!(manager.is_loading());

        second_tx.send(()).unwrap();
        assert_eq!(second.await.unwrap(), 2);
        assert!(!manager.is_loading());
    }

    #[tokio::test]
    async fn test_cancelled_action_releases_loading() {
        let manager = manager();
        {
            let pending = manager.run_action(std::future::pending::<Result<(), ApiError>>());
            tokio::pin!(pending);
            assert!(futures::poll!(pending.as_mut()).is_pending());
            assert!(manager.is_loading());
        }
        assert!(!manager.is_loading());
    }

    #[tokio::test]
    async fn test_failed_action_records_message_and_clears_loading() {
        let manager = manager();

        let err = manager
            .run_action(async {
                Err::<(), _>(ApiError::ValidationError {
                    status: 400,
                    body: serde_json::json!({ "detail": "Déclaration introuvable." }),
                })
            })
            .await
            .unwrap_err();

        assert_eq!(err.message, "Déclaration introuvable.");
        assert_eq!(
            manager.last_error().await.as_deref(),
            Some("Déclaration introuvable.")
        );
        assert!(!manager.is_loading());

        manager.run_action(async { Ok::<_, ApiError>(()) }).await.unwrap();
        assert_eq!(manager.last_error().await, None);
    }
}
