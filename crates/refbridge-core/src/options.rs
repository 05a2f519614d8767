//! Bridge options (refbridge.toml)
//!
//! Options control memory limits for native cells and whether pointer
//! wrappers are cached per address.
//!
//! ```toml
//! cache_pointers = true
//!
//! [limits]
//! max_allocation_bytes = 65536
//! max_live_bytes = 16777216
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while loading options
#[derive(Debug, Error)]
pub enum OptionsError {
    /// Failed to read options file
    #[error("Failed to read options file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse options: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid options: {0}")]
    ValidationError(String),
}

/// Limits applied to bridge-owned native memory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLimits {
    /// Largest single allocation in bytes (None = unlimited)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_allocation_bytes: Option<usize>,

    /// Total bytes owned by the bridge at any time (None = unlimited)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_live_bytes: Option<usize>,
}

impl MemoryLimits {
    /// Create unlimited memory limits
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Create limits with a cap on total live bytes
    pub fn with_live_limit(max_live_bytes: usize) -> Self {
        Self {
            max_live_bytes: Some(max_live_bytes),
            ..Default::default()
        }
    }

    /// Create limits with a cap on single allocations
    pub fn with_allocation_limit(max_allocation_bytes: usize) -> Self {
        Self {
            max_allocation_bytes: Some(max_allocation_bytes),
            ..Default::default()
        }
    }
}

/// Options for creating an `Interop` context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeOptions {
    /// Memory limits
    #[serde(default)]
    pub limits: MemoryLimits,

    /// Reuse one pointer wrapper per live address
    #[serde(default = "default_cache_pointers")]
    pub cache_pointers: bool,
}

fn default_cache_pointers() -> bool {
    true
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            limits: MemoryLimits::default(),
            cache_pointers: default_cache_pointers(),
        }
    }
}

impl BridgeOptions {
    /// Parse options from a file
    pub fn from_file(path: &Path) -> Result<Self, OptionsError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse options from a string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, OptionsError> {
        let options: BridgeOptions = toml::from_str(content)?;
        options.validate()?;
        Ok(options)
    }

    /// Validate the options
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.limits.max_allocation_bytes == Some(0) {
            return Err(OptionsError::ValidationError(
                "max_allocation_bytes must be greater than zero".to_string(),
            ));
        }
        if self.limits.max_live_bytes == Some(0) {
            return Err(OptionsError::ValidationError(
                "max_live_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
