//! Site configuration singleton.

use chrono::Utc;
use tracing::info;

use flor_core::{ConfigId, SiteConfig};

use crate::store::{Record, Store, StoreError};

/// Hero image used when no configuration has been saved yet.
pub const DEFAULT_HERO_IMAGE_URL: &str =
    "https://images.unsplash.com/photo-1490750967868-88aa4486c946?w=1200&h=400&fit=crop";

/// Return the configuration row, creating the default one if none exists.
///
/// # Errors
///
/// Returns `StoreError` if the read or the insert fails.
pub async fn ensure_config<S: Store>(store: &S) -> Result<SiteConfig, StoreError> {
    if let Some(config) = store.site_config().await? {
        return Ok(config);
    }

    let config = SiteConfig {
        id: ConfigId::SINGLETON,
        hero_image_url: Some(DEFAULT_HERO_IMAGE_URL.to_owned()),
        updated_at: Utc::now(),
    };
    let stored = store.upsert(&Record::SiteConfig(config)).await?;
    info!("Created default site config");

    match stored {
        Record::SiteConfig(config) => Ok(config),
        other => Err(StoreError::DataCorruption(format!(
            "config upsert returned {}",
            other.key()
        ))),
    }
}
