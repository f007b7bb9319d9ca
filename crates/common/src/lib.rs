//! Common utilities and types shared across the session coordinator crates.

#![warn(clippy::pedantic)]

/// Module for identifier types
pub mod types;

/// Module for common configuration
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;
