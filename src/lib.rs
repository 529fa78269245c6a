#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # refract
//!
//! Derives ConfigMaps and Secrets from other ConfigMaps and Secrets through
//! `SecretTransform` resources and jq-style queries.
//!
//! This crate holds the `refract` command line and re-exports the workspace
//! crates for convenience.

pub mod cli;
pub mod commands;
pub mod config;

pub use config::{ConfigError, RefractConfig};

pub use refract_core;
pub use refract_reconciler;
pub use refract_store;
pub use refract_transform;
