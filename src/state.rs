use std::sync::Arc;

use crate::monitoring::Metrics;
use crate::security::{AuthManager, SecureMessage};

#[derive(Clone)]
pub struct AppState {
    pub codec: Arc<SecureMessage>,
    pub auth: Arc<AuthManager>,
    pub metrics: Arc<Metrics>,
}
