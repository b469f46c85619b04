// Session module
// Identity, role facts, session actions and teardown

mod invalidator;
mod manager;
mod navigation;
mod state;

pub use invalidator::{InvalidationReason, SessionInvalidator};
pub use manager::{ActionError, Outcome, SessionManager};
pub use navigation::{Destination, LogNavigator, Navigator, RecordingNavigator};
pub use state::{Profile, Role, Session, SessionState};
