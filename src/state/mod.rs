/// Game aggregate and its mutations.
pub mod game;
/// In-process change notification per key.
pub mod version_waiter;

use std::sync::Arc;

use tokio::sync::{RwLock, watch};

use crate::{
    actor::EntityClient, config::AppConfig, dao::Stores, error::ServiceError,
    lock::DistributedMutex,
};

pub use self::version_waiter::VersionWaiter;

/// Handle to the state shared by every request.
pub type SharedState = Arc<AppState>;

/// Central application state: the installed storage backend and the change signal.
pub struct AppState {
    config: AppConfig,
    stores: RwLock<Option<Stores>>,
    degraded: watch::Sender<bool>,
    versions: VersionWaiter,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            config,
            stores: RwLock::new(None),
            degraded: degraded_tx,
            versions: VersionWaiter::new(),
        })
    }

    /// Configuration the process was started with.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Per-game change signal used by long-poll requests.
    pub fn versions(&self) -> &VersionWaiter {
        &self.versions
    }

    /// Install a storage backend and leave degraded mode.
    pub async fn install_stores(&self, stores: Stores) {
        {
            let mut guard = self.stores.write().await;
            *guard = Some(stores);
        }
        self.update_degraded(false);
    }

    /// Remove the current backend and enter degraded mode.
    pub async fn clear_stores(&self) {
        {
            let mut guard = self.stores.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Lock-aware entity access over the installed backend.
    ///
    /// Fails with [`ServiceError::Degraded`] while no healthy backend is installed.
    pub async fn entities(&self) -> Result<EntityClient, ServiceError> {
        if self.is_degraded() {
            return Err(ServiceError::Degraded);
        }
        let guard = self.stores.read().await;
        let stores = guard.as_ref().ok_or(ServiceError::Degraded)?;
        let mutex = DistributedMutex::new(stores.leases.clone(), self.config.lock);
        Ok(EntityClient::new(mutex, stores.tables.clone()))
    }

    /// Currently installed backend, if any.
    pub async fn stores(&self) -> Option<Stores> {
        self.stores.read().await.clone()
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }
}
