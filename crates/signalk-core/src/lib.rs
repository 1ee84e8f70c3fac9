//! # signalk-core
//!
//! Core SignalK data model and gateway settings.
//!
//! This crate provides:
//! - Delta types (Delta, Update, PathValue, Source)
//! - Provider configuration and the settings file format
//!
//! This crate is intentionally runtime-agnostic and contains no async code.

pub mod config;
pub mod model;

pub use config::{ConfigError, DataType, ProviderConfig, Settings, TransportType};
pub use model::*;
