//! Request interception: classify, route, and answer with relay policy.
//!
//! The relay sits between the application and the network. Mutation writes
//! are attempted immediately and queued on transport failure; navigations
//! and other reads are served network-first with cached fallbacks.

use color_eyre::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::{AssetStore, Lifecycle};
use crate::classify::{classify, RouteDecision};
use crate::delivery::{AttemptOutcome, BackendAck, DeliveryAttempter, ReadFetcher};
use crate::queue::QueueStore;
use crate::request::{InterceptedRequest, StoredResponse};
use crate::sync::{SyncTrigger, SYNC_TAG};

/// What the interception layer does with one request.
#[derive(Debug, Clone)]
pub enum RelayOutcome {
  /// Answer the caller with this response
  Respond(StoredResponse),
  /// Not ours; forward untouched with no side effects
  Passthrough,
}

/// The interception router.
pub struct Relay<Q, A, B> {
  queue: Arc<Q>,
  assets: Arc<A>,
  lifecycle: Lifecycle<A>,
  backend: Arc<B>,
  trigger: Arc<SyncTrigger>,
  mutation_path: String,
  offline_path: String,
}

impl<Q, A, B> Relay<Q, A, B>
where
  Q: QueueStore,
  A: AssetStore,
  B: DeliveryAttempter + ReadFetcher,
{
  pub fn new(
    queue: Arc<Q>,
    assets: Arc<A>,
    lifecycle: Lifecycle<A>,
    backend: Arc<B>,
    trigger: Arc<SyncTrigger>,
    mutation_path: impl Into<String>,
    offline_path: impl Into<String>,
  ) -> Self {
    Self {
      queue,
      assets,
      lifecycle,
      backend,
      trigger,
      mutation_path: mutation_path.into(),
      offline_path: offline_path.into(),
    }
  }

  /// Route one intercepted request to its handler.
  pub async fn handle(&self, request: &InterceptedRequest) -> Result<RelayOutcome> {
    match classify(request, &self.mutation_path) {
      RouteDecision::MutationWrite => self.handle_mutation(request).await.map(RelayOutcome::Respond),
      RouteDecision::Navigation => self.handle_navigation(request).await.map(RelayOutcome::Respond),
      RouteDecision::OtherRead => self.handle_read(request).await.map(RelayOutcome::Respond),
      RouteDecision::Ignored => Ok(RelayOutcome::Passthrough),
    }
  }

  /// Mutation write: try now, queue on transport failure.
  ///
  /// An endpoint-reported failure is surfaced to the caller, never queued;
  /// "your request was invalid" must stay distinguishable from "you are
  /// offline". A queue-store failure propagates: with storage gone the
  /// queueing guarantee is gone, and pretending otherwise would lose data
  /// silently.
  async fn handle_mutation(&self, request: &InterceptedRequest) -> Result<StoredResponse> {
    let payload: Value = match request.body.as_deref().map(serde_json::from_slice) {
      Some(Ok(value)) => value,
      _ => {
        warn!("rejecting solicitud with malformed body");
        return Ok(StoredResponse::json(
          400,
          &json!({"ok": false, "error": "invalid body"}),
        ));
      }
    };

    match self.backend.attempt(&payload).await {
      AttemptOutcome::Delivered {
        status,
        headers,
        body,
      } => {
        // A non-ack body is still surfaced; only the log line cares
        let ack = serde_json::from_slice::<BackendAck>(&body).ok();
        info!(
          status,
          id = ack.as_ref().and_then(|a| a.id.as_deref()),
          "solicitud delivered to backend"
        );
        Ok(StoredResponse {
          status,
          headers,
          body,
        })
      }
      AttemptOutcome::Rejected {
        status,
        headers,
        body,
      } => {
        warn!(status, "backend rejected solicitud");
        Ok(StoredResponse {
          status,
          headers,
          body,
        })
      }
      AttemptOutcome::TransportFailed { reason } => {
        warn!(%reason, "no connection, queueing solicitud");
        let id = self.queue.enqueue(&payload)?;
        self.trigger.register(SYNC_TAG);
        info!(id, "solicitud queued for replay");
        Ok(StoredResponse::json(
          200,
          &json!({"ok": true, "offlineQueued": true}),
        ))
      }
    }
  }

  /// Navigation: network, then the cached offline page, then a plain 503.
  async fn handle_navigation(&self, request: &InterceptedRequest) -> Result<StoredResponse> {
    match self.backend.fetch(request).await {
      Ok(fetched) => Ok(fetched.into_stored()),
      Err(e) => {
        warn!(url = %request.url, error = %e, "navigation fetch failed, serving offline page");

        let key = self.lifecycle.asset_key(&self.offline_path)?;
        if let Some(cached) = self.assets.get(self.lifecycle.current(), &key)? {
          return Ok(cached);
        }

        Ok(StoredResponse::text(
          503,
          "Estás sin conexión y no se pudo cargar la página.",
        ))
      }
    }
  }

  /// Other read: network-first with opportunistic caching, cache fallback.
  ///
  /// Opaque cross-origin responses and responses whose body could not be
  /// captured are served but never stored. With no network and no cached
  /// entry the failure propagates to the caller.
  async fn handle_read(&self, request: &InterceptedRequest) -> Result<StoredResponse> {
    let key = request.identity();

    match self.backend.fetch(request).await {
      Ok(fetched) => {
        if fetched.is_cacheable() {
          let stored = fetched.clone().into_stored();
          if let Err(e) = self
            .assets
            .put(self.lifecycle.current(), &key, request.url.as_str(), &stored)
          {
            // A cache write failure must not fail the response
            warn!(url = %request.url, error = %e, "failed to cache response");
          }
        }
        Ok(fetched.into_stored())
      }
      Err(e) => {
        if let Some(cached) = self.assets.get(self.lifecycle.current(), &key)? {
          info!(url = %request.url, "serving cached copy while offline");
          return Ok(cached);
        }
        Err(e)
      }
    }
  }
}
