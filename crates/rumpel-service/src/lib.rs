//! Host bridge for the Rumpel location tracker.
//!
//! This crate runs the tracking core as a local service next to the host
//! app. The host:
//! - Forwards OS location callbacks over REST
//! - Receives location service commands over a WebSocket and replays them
//! - Supplies the HAT auth token and tracking preferences
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `GET /api/status` - Preferences, region state and sync health
//! - `POST /api/events/fixes` - Batch of OS location fixes
//! - `POST /api/events/region-exit` - The host left a monitored region
//! - `POST /api/events/background-fetch` - Background fetch window, returns the sync outcome
//! - `POST /api/events/foreground` - App entered the foreground
//! - `POST /api/events/background` - App entered the background
//! - `PUT /api/tracking` - Enable or disable tracking
//! - `GET|PUT /api/preferences` - Tracking preferences
//! - `PUT|DELETE /api/auth/token` - Upload auth token
//! - `GET /api/samples` - Buffered samples with filters
//! - `WS /api/ws` - Host commands and core notifications
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/rumpel/tracker.toml`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8787"
//!
//! [storage]
//! path = "~/.local/share/rumpel/locations.db"
//!
//! [tracking]
//! enabled = true
//! desired_accuracy_meters = 100.0
//! min_distance_meters = 50.0
//! retention_days = 30
//!
//! [sync]
//! endpoint = "https://example.hubofallthings.net/api/v2.6/data/rumpel/locations"
//! batch_size = 250
//! ```
//!
//! The auth token is never stored in the file. Pass it through the
//! `RUMPEL_AUTH_TOKEN` environment variable or `PUT /api/auth/token`.

pub mod api;
pub mod bridge;
pub mod config;
pub mod state;
pub mod ws;

pub use bridge::{BridgeLocationService, HostCommand, MAX_MONITORED_REGIONS};
pub use config::{
    Config, ConfigError, ServerConfig, StorageConfig, SyncSettings, TrackingConfig,
};
pub use state::AppState;
pub use ws::BridgeMessage;
