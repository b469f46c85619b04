// Authentication module
// Credential persistence and coordinated token refresh

mod coordinator;
mod credentials;
mod refresh;
mod types;

pub use coordinator::RefreshCoordinator;
pub use credentials::{
    CredentialStore, MemoryCredentialStore, SqliteCredentialStore, ACCESS_TOKEN_KEY,
    REFRESH_TOKEN_KEY,
};
pub use refresh::REFRESH_PATH;
pub use types::{AuthError, CredentialPair, LoginRequest, TokenPairResponse};
