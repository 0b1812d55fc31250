//! Application settings loaded from `lotbook.toml`.
//!
//! Every field has a safe default: strict allocation, no automatic repair on
//! startup, `"system"` as the audit actor. The actor can also be overridden
//! through the `LOTBOOK_ACTOR` environment variable, which takes precedence
//! over the file.

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Settings structure representing the entire lotbook.toml file
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Settings {
    /// Replicate the lenient legacy behavior: leave a short sale line PARTIAL
    /// instead of rejecting it. Off by default; oversell is rejected.
    pub allow_partial_allocation: bool,
    /// Run the cache rebuild (not just the drift report) on startup
    pub repair_on_start: bool,
    /// Audit attribution used for movements the binary itself makes
    pub actor: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            allow_partial_allocation: false,
            repair_on_start: false,
            actor: "system".to_string(),
        }
    }
}

impl Settings {
    /// The allocation mode sale registrations should run with.
    #[must_use]
    pub const fn allocation_mode(&self) -> crate::core::matching::AllocationMode {
        if self.allow_partial_allocation {
            crate::core::matching::AllocationMode::AllowPartial
        } else {
            crate::core::matching::AllocationMode::Strict
        }
    }
}

/// Loads settings from a TOML file, then applies environment overrides.
///
/// # Errors
/// Returns an error if the file exists but cannot be read or parsed. A
/// missing file is not an error; defaults apply.
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let mut settings = if path.as_ref().exists() {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
            message: format!("Failed to read settings file: {e}"),
        })?;
        toml::from_str(&contents).map_err(|e| Error::Config {
            message: format!("Failed to parse lotbook.toml: {e}"),
        })?
    } else {
        Settings::default()
    };

    if let Ok(actor) = std::env::var("LOTBOOK_ACTOR") {
        settings.actor = actor;
    }

    Ok(settings)
}

/// Loads settings from the default location (./lotbook.toml).
pub fn load_default_settings() -> Result<Settings> {
    load_settings("lotbook.toml")
}
