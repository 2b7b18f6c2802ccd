//! # Edtech Common Library
//!
//! Shared code for the edtech network services:
//! - Error taxonomy used across service boundaries
//! - Configuration loading (TOML file + environment overlay)
//! - Authentication primitives (key digests, constant-time comparison)

pub mod auth;
pub mod config;
pub mod error;

pub use error::{Error, Result};
