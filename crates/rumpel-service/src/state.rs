//! Application state shared across handlers.
//!
//! # Broadcast Channel Behavior
//!
//! Host commands and core notifications are fanned out over broadcast
//! channels sized by `server.broadcast_buffer` (default: 100). A WebSocket
//! client that falls behind loses the oldest messages. Senders never block.

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::{RwLock, broadcast, watch};
use tracing::info;

use rumpel_core::{
    CoreDependencies, CoreHandle, SharedToken, TrackingCore, TrackingPreferences, UploadTransport,
};
use rumpel_store::Store;

use crate::bridge::{BridgeLocationService, HostCommand};
use crate::config::Config;

/// Shared application state.
pub struct AppState {
    /// Handle to the running tracking core.
    pub core: CoreHandle,
    /// The sample store (shared with the core).
    pub store: Arc<Store>,
    /// Configuration (RwLock for runtime updates).
    pub config: RwLock<Config>,
    /// Current tracking preferences, shared with the core. Sending on it
    /// reconfigures the core.
    pub preferences: Arc<watch::Sender<TrackingPreferences>>,
    /// Auth token used for uploads.
    pub token: Arc<SharedToken>,
    /// The bridge's location service.
    pub location: Arc<BridgeLocationService>,
    /// When the service started.
    pub started_at: OffsetDateTime,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("core", &self.core)
            .field("token_set", &self.token.is_set())
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Build the tracking core and spawn its event loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        store: Store,
        config: Config,
        transport: Arc<dyn UploadTransport>,
        token: Option<String>,
    ) -> Arc<Self> {
        let store = Arc::new(store);
        let (commands_tx, _) = broadcast::channel(config.server.broadcast_buffer);
        let location = Arc::new(BridgeLocationService::new(commands_tx));
        let token = Arc::new(SharedToken::new(token));
        let preferences = Arc::new(watch::channel(config.tracking.preferences()).0);

        let deps = CoreDependencies {
            store: Arc::clone(&store),
            location_service: location.clone(),
            transport,
            auth: token.clone(),
            preferences: Arc::clone(&preferences),
        };
        let (core, handle) = TrackingCore::new(deps, config.core_config());
        tokio::spawn(core.run());
        info!("Tracking core spawned");

        Arc::new(Self {
            core: handle,
            store,
            config: RwLock::new(config),
            preferences,
            token,
            location,
            started_at: OffsetDateTime::now_utc(),
        })
    }

    /// Subscribe to host commands.
    pub fn subscribe_commands(&self) -> broadcast::Receiver<HostCommand> {
        self.location.subscribe()
    }

    /// Tracking preferences currently in effect.
    pub fn current_preferences(&self) -> TrackingPreferences {
        *self.preferences.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumpel_core::mock::MockTransport;

    fn state(config: Config) -> Arc<AppState> {
        AppState::start(
            Store::open_in_memory().unwrap(),
            config,
            Arc::new(MockTransport::new()),
            Some("tok".into()),
        )
    }

    #[tokio::test]
    async fn test_start_applies_configured_preferences() {
        let mut config = Config::default();
        config.tracking.enabled = false;
        config.tracking.desired_accuracy_meters = 30.0;

        let state = state(config);
        let preferences = state.current_preferences();
        assert!(!preferences.enabled);
        assert_eq!(preferences.desired_accuracy_meters, 30.0);
        assert!(state.token.is_set());
        assert!(state.core.is_running());
    }

    #[tokio::test]
    async fn test_core_publishes_host_commands() {
        let state = state(Config::default());
        let mut commands = state.subscribe_commands();

        state.core.set_tracking_enabled(false).await.unwrap();
        state.core.flush().await.unwrap();

        let mut saw_stop = false;
        while let Ok(command) = commands.try_recv() {
            saw_stop |= command == HostCommand::StopUpdating;
        }
        assert!(saw_stop);
    }
}
