//! Seed the site configuration.
//!
//! # Usage
//!
//! ```bash
//! flor-cli seed
//! ```

use flor_migrate::site_config::ensure_config;

/// Create the default site config if none exists.
///
/// # Errors
///
/// Returns an error if the database cannot be reached or the insert fails.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let store = super::connect().await?;
    let config = ensure_config(&store).await?;

    tracing::info!(
        id = %config.id,
        hero_image_url = config.hero_image_url.as_deref().unwrap_or("-"),
        "Site config ready"
    );
    Ok(())
}
