//! Versioned response cache backing the offline read-path.
//!
//! Responses are grouped into named generations:
//! - Install pre-populates the configured generation with fallback assets
//! - Activation deletes every generation other than the current one
//! - The read-path stores and looks up entries in the current generation only

mod lifecycle;
mod store;

pub use lifecycle::{offline_page, Lifecycle, PrecacheAsset};
pub use store::{AssetStore, SqliteAssets};
