//! # iris-settings
//!
//! Layered configuration for the Iris hub.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`IrisSettings::default()`]
//! 2. **User file**: `~/.iris/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `IRIS_*` overrides
//!
//! The binary applies command-line flags last.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, iris_home, load_settings, load_settings_from_path,
    resolve_path, settings_path,
};
pub use types::*;
