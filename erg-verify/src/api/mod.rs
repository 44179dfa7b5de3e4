//! HTTP API handlers for erg-verify

pub mod auth;
pub mod entries;
pub mod health;
pub mod reviews;
pub mod settings;
pub mod stats;

pub use entries::entry_routes;
pub use health::health_routes;
pub use reviews::review_routes;
pub use settings::settings_routes;
pub use stats::stats_routes;
