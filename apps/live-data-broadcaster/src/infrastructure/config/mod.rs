//! Configuration Module
//!
//! Configuration loading for the broadcaster service.

mod settings;

pub use settings::{
    BroadcastSettings, BroadcasterConfig, ConfigError, PublisherSettings, ServerSettings,
    StompSettings,
};
