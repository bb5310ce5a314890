//! Install-time precaching and activation-time cleanup of generations.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::info;
use url::Url;

use super::store::AssetStore;
use crate::request::{request_identity, Method, StoredResponse};

/// A fixed asset written into a generation at install time.
#[derive(Debug, Clone)]
pub struct PrecacheAsset {
  /// Path on the app origin, e.g. "/offline.html"
  pub path: String,
  pub content_type: String,
  pub body: Vec<u8>,
}

/// The built-in offline placeholder page, always part of the precache set.
/// The path must match the one the navigation fallback looks up.
pub fn offline_page(path: impl Into<String>) -> PrecacheAsset {
  PrecacheAsset {
    path: path.into(),
    content_type: "text/html".to_string(),
    body: b"<!doctype html>\n<html lang=\"es\">\n<head><meta charset=\"utf-8\"><title>Sin conexi\xc3\xb3n</title></head>\n<body>\n<h1>Est\xc3\xa1s sin conexi\xc3\xb3n</h1>\n<p>Tu solicitud se enviar\xc3\xa1 autom\xc3\xa1ticamente cuando vuelva la conexi\xc3\xb3n.</p>\n</body>\n</html>\n"
      .to_vec(),
  }
}

/// Owns the current generation name, install-time pre-population and
/// activation-time garbage collection.
pub struct Lifecycle<A> {
  assets: Arc<A>,
  origin: Url,
  version: String,
}

impl<A: AssetStore> Lifecycle<A> {
  pub fn new(assets: Arc<A>, origin: Url, version: impl Into<String>) -> Self {
    Self {
      assets,
      origin,
      version: version.into(),
    }
  }

  /// Name of the generation this lifecycle serves from.
  pub fn current(&self) -> &str {
    &self.version
  }

  /// Populate the current generation with the precache set.
  ///
  /// The generation is not considered ready until every asset is stored, so
  /// any failure aborts the install.
  pub fn install(&self, precache: &[PrecacheAsset]) -> Result<()> {
    info!(generation = %self.version, assets = precache.len(), "installing cache generation");

    for asset in precache {
      let url = self.asset_url(&asset.path)?;
      let key = request_identity(&Method::Get, &url);
      let response = StoredResponse {
        status: 200,
        headers: vec![("content-type".to_string(), asset.content_type.clone())],
        body: asset.body.clone(),
      };
      self.assets.put(&self.version, &key, url.as_str(), &response)?;
    }

    Ok(())
  }

  /// Delete every generation whose name differs from the current version.
  pub fn activate(&self) -> Result<()> {
    for name in self.assets.list_generations()? {
      if name != self.version {
        info!(generation = %name, "deleting stale cache generation");
        self.assets.delete_generation(&name)?;
      }
    }

    Ok(())
  }

  /// Identity key of a precached asset path, for read-path lookups.
  pub fn asset_key(&self, path: &str) -> Result<String> {
    let url = self.asset_url(path)?;
    Ok(request_identity(&Method::Get, &url))
  }

  fn asset_url(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid asset path {}: {}", path, e))
  }
}
