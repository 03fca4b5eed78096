use std::sync::Arc;

use crate::cache::admin::CacheAdmin;
use crate::config::ObsConfig;
use crate::engine::Engine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub config: Arc<ObsConfig>,
    /// Present when cache updates are enabled; the reload endpoint
    /// needs it.
    pub admin: Option<Arc<CacheAdmin>>,
}

impl AppState {
    #[must_use]
    pub fn new(engine: Arc<Engine>, config: Arc<ObsConfig>, admin: Option<Arc<CacheAdmin>>) -> Self {
        Self {
            engine,
            config,
            admin,
        }
    }
}
