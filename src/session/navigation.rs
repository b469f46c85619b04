// Navigation capability injected into the session layer

use std::sync::{Mutex, PoisonError};

/// Where the UI should go after a session transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Public landing page
    Home,
    /// Login page; `redirect` is the location to return to after login
    Login { redirect: Option<String> },
    /// Staff dashboard
    Dashboard,
    /// Citizen's own declarations
    MyDeclarations,
}

impl Destination {
    /// Route name used by the frontend router
    pub fn route_name(&self) -> &'static str {
        match self {
            Destination::Home => "home",
            Destination::Login { .. } => "login",
            Destination::Dashboard => "dashboard",
            Destination::MyDeclarations => "mes-declarations",
        }
    }
}

pub trait Navigator: Send + Sync {
    fn navigate(&self, destination: Destination);

    /// Location the user is currently on, if known
    fn current_location(&self) -> Option<String> {
        None
    }
}

/// Navigator that only logs; used by the CLI
#[derive(Debug, Default)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate(&self, destination: Destination) {
        tracing::info!(route = destination.route_name(), ?destination, "Navigate");
    }
}

/// Navigator that records every destination
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    history: Mutex<Vec<Destination>>,
    location: Mutex<Option<String>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_location(&self, location: &str) {
        *self.location.lock().unwrap_or_else(PoisonError::into_inner) = Some(location.to_string());
    }

    pub fn history(&self) -> Vec<Destination> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, destination: Destination) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(destination);
    }

    fn current_location(&self) -> Option<String> {
        self.location
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
