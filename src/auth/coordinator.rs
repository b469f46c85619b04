use reqwest::{Client, Url};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

use super::credentials::CredentialStore;
use super::refresh;
use super::types::AuthError;
use crate::session::{InvalidationReason, SessionInvalidator};

type Waiter = oneshot::Sender<Result<String, AuthError>>;

/// Single-flight refresh state
///
/// The queue holds every caller waiting on the outstanding refresh, the caller
/// that started it included.
enum RefreshState {
    Idle,
    Refreshing { waiters: Vec<Waiter> },
}

/// Refresh coordinator
/// Guarantees at most one refresh call in flight and fans its outcome out to all waiters
#[derive(Clone)]
pub struct RefreshCoordinator {
    state: Arc<Mutex<RefreshState>>,

    /// HTTP client shared with the request pipeline
    client: Client,

    base_url: Url,

    store: Arc<dyn CredentialStore>,

    invalidator: Arc<SessionInvalidator>,
}

impl RefreshCoordinator {
    pub fn new(
        client: Client,
        base_url: Url,
        store: Arc<dyn CredentialStore>,
        invalidator: Arc<SessionInvalidator>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(RefreshState::Idle)),
            client,
            base_url,
            store,
            invalidator,
        }
    }

    /// Get a fresh access token to replace `rejected`
    ///
    /// The first caller starts a refresh; callers arriving while it is outstanding
    /// join the queue and receive the same outcome. A caller whose 401 arrives
    /// after a refresh already stored a different token gets that token without
    /// a new refresh. On failure the session has already been invalidated by the
    /// time the error is returned.
    pub async fn acquire_token(&self, rejected: Option<&str>) -> Result<String, AuthError> {
        let (tx, rx) = oneshot::channel();

        let start = {
            let mut state = lock(&self.state);
            match &mut *state {
                RefreshState::Idle => {
                    if let Some(current) = self.replacement_for(rejected) {
                        tracing::debug!("Token already refreshed, reusing it");
                        return Ok(current);
                    }
                    *state = RefreshState::Refreshing { waiters: vec![tx] };
                    true
                }
                RefreshState::Refreshing { waiters } => {
                    waiters.push(tx);
                    tracing::debug!(queued = waiters.len(), "Refresh in progress, waiting");
                    false
                }
            }
        };

        if start {
            // Detached so a cancelled caller cannot strand the queue
            tokio::spawn(self.clone().run_refresh());
        }

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => {
                // Refresh task died before reporting: still a failed refresh
                self.invalidator
                    .invalidate(InvalidationReason::RefreshFailed)
                    .await;
                Err(AuthError::Abandoned)
            }
        }
    }

    /// Whether a refresh is currently outstanding
    pub fn is_refreshing(&self) -> bool {
        matches!(*lock(&self.state), RefreshState::Refreshing { .. })
    }

    /// Number of callers waiting on the outstanding refresh
    pub fn queued(&self) -> usize {
        match &*lock(&self.state) {
            RefreshState::Refreshing { waiters } => waiters.len(),
            RefreshState::Idle => 0,
        }
    }

    /// Stored access token, if it differs from the one that was rejected
    fn replacement_for(&self, rejected: Option<&str>) -> Option<String> {
        let current = self.store.access_token().ok().flatten()?;
        (Some(current.as_str()) != rejected).then_some(current)
    }

    async fn run_refresh(self) {
        let drain = QueueDrain {
            state: self.state.clone(),
            finished: false,
        };

        let outcome = self.perform_refresh().await;

        if let Err(ref e) = outcome {
            tracing::error!(error = %e, "Token refresh failed, invalidating session");
            self.invalidator
                .invalidate(InvalidationReason::from(e))
                .await;
        }

        drain.resolve(outcome);
    }

    async fn perform_refresh(&self) -> Result<String, AuthError> {
        let refresh_token = self
            .store
            .refresh_token()
            .map_err(|e| AuthError::Store(e.to_string()))?
            .ok_or(AuthError::NoRefreshToken)?;

        let data =
            refresh::refresh_access_token(&self.client, &self.base_url, &refresh_token).await?;

        // One write for both tokens so a failure leaves the previous pair intact
        self.store
            .store_refreshed(&data.access, data.refresh.as_deref())
            .map_err(|e| AuthError::Store(e.to_string()))?;
        self.invalidator
            .session()
            .apply_refresh(&data.access, data.refresh.as_deref())
            .await;

        Ok(data.access)
    }
}

fn lock(state: &Mutex<RefreshState>) -> MutexGuard<'_, RefreshState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Empties the waiter queue exactly once
///
/// If the refresh task unwinds before resolving, dropping the guard still
/// returns the coordinator to `Idle`. Each waiter sees its sender dropped,
/// invalidates the session and gets `AuthError::Abandoned`.
struct QueueDrain {
    state: Arc<Mutex<RefreshState>>,
    finished: bool,
}

impl QueueDrain {
    fn take_waiters(&self) -> Vec<Waiter> {
        let mut state = lock(&self.state);
        match std::mem::replace(&mut *state, RefreshState::Idle) {
            RefreshState::Refreshing { waiters } => waiters,
            RefreshState::Idle => Vec::new(),
        }
    }

    fn resolve(mut self, outcome: Result<String, AuthError>) {
        self.finished = true;

        // The queue is swapped out before any waiter is woken, so a waiter that
        // immediately hits another 401 starts a new refresh on an empty queue.
        let waiters = self.take_waiters();
        tracing::debug!(
            waiters = waiters.len(),
            success = outcome.is_ok(),
            "Draining refresh queue"
        );

        for waiter in waiters {
            // Receiver gone means that caller was cancelled
            let _ = waiter.send(outcome.clone());
        }
    }
}

impl Drop for QueueDrain {
    fn drop(&mut self) {
        if !self.finished {
            let abandoned = self.take_waiters();
            tracing::warn!(waiters = abandoned.len(), "Refresh abandoned");
        }
    }
}
