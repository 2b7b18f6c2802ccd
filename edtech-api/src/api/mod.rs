//! HTTP API handlers for edtech-api
//!
//! Route builders are assembled into the full router (with the auth and
//! rate-limit gate on the protected set) in `crate::build_router`.

pub mod auth;
pub mod decisions;
pub mod health;
pub mod rate_limit;
pub mod suggestions;
pub mod vlan_group;

pub use decisions::decision_routes;
pub use health::health_routes;
pub use suggestions::suggestion_routes;
pub use vlan_group::vlan_group_routes;
