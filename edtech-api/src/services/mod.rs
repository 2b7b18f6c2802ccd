//! Domain services: sanitization, grouping, device source access

pub mod grouping_engine;
pub mod sanitizer;
pub mod unifi_client;

pub use grouping_engine::GroupingEngine;
pub use sanitizer::Sanitizer;
pub use unifi_client::UniFiClient;
