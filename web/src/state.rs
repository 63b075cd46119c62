//! Shared handler state.

use std::sync::Arc;

use boxoffice_core::ReadinessProbe;
use boxoffice_runtime::{CheckoutSessionBuilder, NotificationHandler};

/// State shared by every handler. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Opens payment sessions
    pub checkout: Arc<CheckoutSessionBuilder>,
    /// Applies verified payment notifications
    pub notifications: Arc<dyn NotificationHandler>,
    /// Database liveness for `/ready`
    pub readiness: Arc<dyn ReadinessProbe>,
}

impl AppState {
    /// Bundle the services behind the HTTP surface.
    #[must_use]
    pub fn new(
        checkout: CheckoutSessionBuilder,
        notifications: Arc<dyn NotificationHandler>,
        readiness: Arc<dyn ReadinessProbe>,
    ) -> Self {
        Self {
            checkout: Arc::new(checkout),
            notifications,
            readiness,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
