//! Application Configuration
//!
//! YAML document with the code geometry and block store tuning:
//!
//! ```yaml
//! code:
//!   kind: reed-solomon
//!   stripe_size: 10
//!   parity_size: 4
//! store:
//!   cache_size: 50
//!   io_timeout_ms: 30000
//! ```
//!
//! Missing fields take their defaults; CLI flags override the file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ec::CodeConfig;
use crate::error::{Error, Result};
use crate::storage::StoreConfig;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub code: CodeConfig,
    pub store: StoreConfig,
}

impl AppConfig {
    /// Parse a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let yaml = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_yaml(&yaml)
    }

    /// Check values that would only fail deep inside the store
    pub fn validate(&self) -> Result<()> {
        if self.store.read_size == 0 {
            return Err(Error::Config("store.read_size must be greater than 0".into()));
        }
        if self.store.cache_size == 0 {
            return Err(Error::Config("store.cache_size must be greater than 0".into()));
        }
        if self.store.io_timeout_ms == 0 {
            return Err(Error::Config("store.io_timeout_ms must be greater than 0".into()));
        }
        Ok(())
    }
}
