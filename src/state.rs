use std::sync::Arc;
use std::time::Duration;

use crate::auth::CredentialValidator;
use crate::error::Error;
use crate::lifecycle::Lifecycle;
use crate::metrics::Metrics;

/// Everything the router and its stages share, built once at startup.
#[derive(Clone)]
pub struct AppContext {
    pub lifecycle: Arc<Lifecycle>,
    pub metrics: Arc<Metrics>,
    pub validator: Arc<dyn CredentialValidator>,
}

impl AppContext {
    pub fn new(
        drain_timeout: Duration,
        validator: Arc<dyn CredentialValidator>,
    ) -> Result<Self, Error> {
        Ok(Self {
            lifecycle: Arc::new(Lifecycle::new(drain_timeout)),
            metrics: Arc::new(Metrics::new()?),
            validator,
        })
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}
