// In-memory session: identity plus credential references

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::auth::CredentialPair;

/// User role as reported by the profile endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Police,
    Citizen,
}

impl Role {
    /// Parse a raw role; absent or unrecognized values fall back to `Citizen`
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::to_lowercase).as_deref() {
            Some("admin") => Role::Admin,
            Some("police") => Role::Police,
            _ => Role::Citizen,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Police => "police",
            Role::Citizen => "citoyen",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }

    pub fn is_police(&self) -> bool {
        matches!(self, Role::Police)
    }

    /// Admin or police
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Admin | Role::Police)
    }
}

/// Identity record returned by `GET profile/`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    #[serde(default)]
    pub username: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Remaining fields (names, telephone, dates) kept verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Profile {
    pub fn role(&self) -> Role {
        Role::parse(self.role.as_deref())
    }
}

/// Snapshot of the session
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub identity: Option<Profile>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl Session {
    /// Identity and access token both present
    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some() && self.access_token.is_some()
    }

    pub fn role(&self) -> Role {
        Role::parse(self.identity.as_ref().and_then(|p| p.role.as_deref()))
    }

    fn is_empty(&self) -> bool {
        self.identity.is_none() && self.access_token.is_none() && self.refresh_token.is_none()
    }
}

/// Session holder
///
/// Readable by anyone; only the session manager and the invalidator write.
/// Role facts are recomputed from the identity on every read.
#[derive(Default)]
pub struct SessionState {
    inner: RwLock<Session>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Session {
        self.inner.read().await.clone()
    }

    pub async fn profile(&self) -> Option<Profile> {
        self.inner.read().await.identity.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.inner.read().await.is_authenticated()
    }

    pub async fn role(&self) -> Role {
        self.inner.read().await.role()
    }

    pub async fn is_admin(&self) -> bool {
        self.role().await.is_admin()
    }

    pub async fn is_police(&self) -> bool {
        self.role().await.is_police()
    }

    pub async fn is_staff(&self) -> bool {
        self.role().await.is_staff()
    }

    pub(crate) async fn set_identity(&self, profile: Profile) {
        self.inner.write().await.identity = Some(profile);
    }

    pub(crate) async fn set_credentials(&self, pair: &CredentialPair) {
        let mut session = self.inner.write().await;
        session.access_token = Some(pair.access_token.clone());
        session.refresh_token = Some(pair.refresh_token.clone());
    }

    pub(crate) async fn set_access_token(&self, access_token: String) {
        self.inner.write().await.access_token = Some(access_token);
    }

    /// Mirror a refreshed token pair into a live session
    ///
    /// An empty session stays empty: a refresh finishing after logout must not
    /// bring credentials back.
    pub(crate) async fn apply_refresh(&self, access_token: &str, refresh_token: Option<&str>) {
        let mut session = self.inner.write().await;
        if session.access_token.is_none() {
            return;
        }
        session.access_token = Some(access_token.to_string());
        if let Some(refresh_token) = refresh_token {
            session.refresh_token = Some(refresh_token.to_string());
        }
    }

    /// Empty the session under a single write lock
    ///
    /// `teardown` runs while the lock is held; it receives whether the session
    /// held anything. Returns that same flag.
    pub(crate) async fn clear_with<F>(&self, teardown: F) -> bool
    where
        F: FnOnce(bool) -> bool,
    {
        let mut session = self.inner.write().await;
        let was_active = teardown(!session.is_empty());
        *session = Session::default();
        was_active
    }
}
