//! Configuration loading.

use std::path::Path;

use anyhow::Result;
use stratos_common::config::BrokerConfig;

/// Load the broker configuration from `path`, falling back to defaults if
/// the file doesn't exist.
pub async fn load(path: &str) -> Result<BrokerConfig> {
    let path = Path::new(path);

    if path.exists() {
        BrokerConfig::load(path).await.map_err(|e| anyhow::anyhow!(e))
    } else {
        Ok(BrokerConfig::default())
    }
}
