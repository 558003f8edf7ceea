//! Zenoh event source: initial entity listing followed by live events.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use label_exporter_common::config::ZenohConfig;
use label_exporter_common::entity::{EntityKey, EntityKind, EntityObject};
use label_exporter_common::keyexpr::{
    KEY_PREFIX, KeyExprBuilder, all_entities_wildcard, parse_key_expr,
};
use label_exporter_common::serialization::decode_auto;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};
use zenoh::Session;
use zenoh::query::QueryTarget;
use zenoh::sample::SampleKind;

use crate::dispatcher::{DiscardReason, LabelEvent, SharedDispatcher};

/// Default bound on the initial listing.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors that stop the watcher.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Failed to connect to the event source: {0}")]
    Connect(#[source] label_exporter_common::Error),

    #[error("Failed to subscribe to '{key_expr}': {source}")]
    Subscribe {
        key_expr: String,
        #[source]
        source: zenoh::Error,
    },

    #[error("Failed to query '{selector}': {source}")]
    Query {
        selector: String,
        #[source]
        source: zenoh::Error,
    },

    #[error("Initial sync did not complete within {timeout_secs}s")]
    SyncTimeout { timeout_secs: u64 },

    #[error("Event stream closed: {0}")]
    Disconnected(String),
}

/// Reasons a single sample is not turned into an event.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("Key '{0}' does not match <prefix>/<kind>/<namespace>/<name>")]
    MalformedKey(String),

    #[error("Unsupported entity kind '{0}'")]
    UnsupportedKind(String),

    #[error("Failed to decode payload of '{key}': {source}")]
    Decode {
        key: String,
        #[source]
        source: label_exporter_common::Error,
    },

    #[error("Payload describes '{payload}' but was published on '{key}'")]
    IdentityMismatch { key: EntityKey, payload: EntityKey },
}

impl SampleError {
    pub fn reason(&self) -> DiscardReason {
        match self {
            SampleError::UnsupportedKind(_) => DiscardReason::UnsupportedKind,
            SampleError::MalformedKey(_)
            | SampleError::Decode { .. }
            | SampleError::IdentityMismatch { .. } => DiscardReason::Malformed,
        }
    }
}

/// Turn a Zenoh sample into a lifecycle event.
///
/// A PUT carries the full entity object, a DELETE only its key.
pub fn decode_sample(
    prefix: &str,
    key: &str,
    kind: SampleKind,
    payload: &[u8],
) -> Result<LabelEvent, SampleError> {
    let parsed =
        parse_key_expr(prefix, key).ok_or_else(|| SampleError::MalformedKey(key.to_string()))?;
    let entity_kind = parsed
        .entity_kind()
        .ok_or_else(|| SampleError::UnsupportedKind(parsed.kind.to_string()))?;
    let entity = parsed.entity_key();

    match kind {
        SampleKind::Delete => Ok(LabelEvent::Removed {
            kind: entity_kind,
            key: entity,
        }),
        SampleKind::Put => {
            let object: EntityObject =
                decode_auto(payload).map_err(|source| SampleError::Decode {
                    key: key.to_string(),
                    source,
                })?;

            let payload_key = object.key();
            if payload_key != entity {
                return Err(SampleError::IdentityMismatch {
                    key: entity,
                    payload: payload_key,
                });
            }

            Ok(LabelEvent::Added {
                kind: entity_kind,
                key: entity,
                labels: object.metadata.labels,
            })
        }
    }
}

/// Readiness flag, set once the initial listing has been applied.
#[derive(Debug, Clone, Default)]
pub struct SyncStatus(Arc<AtomicBool>);

impl SyncStatus {
    pub fn is_synced(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn mark_synced(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Feeds the dispatcher from the Zenoh key space.
pub struct EntityWatcher {
    dispatcher: SharedDispatcher,
    zenoh_config: ZenohConfig,
    key_prefix: String,
    sync_timeout: Duration,
    status: SyncStatus,
}

impl EntityWatcher {
    pub fn new(dispatcher: SharedDispatcher, zenoh_config: ZenohConfig) -> Self {
        Self {
            dispatcher,
            zenoh_config,
            key_prefix: KEY_PREFIX.to_string(),
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
            status: SyncStatus::default(),
        }
    }

    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    /// Handle on the readiness flag, for the HTTP server.
    pub fn sync_status(&self) -> SyncStatus {
        self.status.clone()
    }

    /// Open a session and watch until shutdown.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), WatchError> {
        let session = label_exporter_common::connect(&self.zenoh_config)
            .await
            .map_err(WatchError::Connect)?;

        let result = self.watch(&session, shutdown).await;

        if let Err(e) = session.close().await {
            warn!(error = %e, "Failed to close Zenoh session");
        }

        info!("Watcher stopped");
        result
    }

    /// Watch on an existing session until shutdown.
    ///
    /// The subscriber is declared before the initial listing is requested,
    /// so live events published during the sync are queued and applied
    /// after it.
    pub async fn watch(
        &self,
        session: &Session,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), WatchError> {
        let key_expr = all_entities_wildcard(&self.key_prefix);
        info!(key_expr = %key_expr, "Subscribing to entity events");

        let subscriber = session
            .declare_subscriber(&key_expr)
            .await
            .map_err(|source| WatchError::Subscribe {
                key_expr: key_expr.clone(),
                source,
            })?;

        let stopped = tokio::select! {
            synced = tokio::time::timeout(self.sync_timeout, self.initial_sync(session)) => {
                let count = synced.map_err(|_| WatchError::SyncTimeout {
                    timeout_secs: self.sync_timeout.as_secs(),
                })??;
                self.status.mark_synced();
                info!(entities = count, "Initial sync complete");
                false
            }
            _ = shutdown_requested(&mut shutdown) => {
                info!("Shutdown signal received during initial sync");
                true
            }
        };

        if !stopped {
            loop {
                tokio::select! {
                    _ = shutdown_requested(&mut shutdown) => {
                        info!("Shutdown signal received, stopping watcher");
                        break;
                    }

                    sample = subscriber.recv_async() => {
                        match sample {
                            Ok(sample) => {
                                let payload = sample.payload().to_bytes();
                                self.handle(sample.key_expr().as_str(), sample.kind(), &payload);
                            }
                            Err(e) => return Err(WatchError::Disconnected(e.to_string())),
                        }
                    }
                }
            }
        }

        if let Err(e) = subscriber.undeclare().await {
            warn!(error = %e, "Failed to undeclare subscriber");
        }

        Ok(())
    }

    /// Request the current entity listing and apply every reply as an add.
    async fn initial_sync(&self, session: &Session) -> Result<usize, WatchError> {
        let selector = KeyExprBuilder::with_prefix(&self.key_prefix, EntityKind::Pod).kind_wildcard();
        debug!(selector = %selector, "Requesting initial entity listing");

        let replies = session
            .get(selector.as_str())
            .target(QueryTarget::All)
            .await
            .map_err(|source| WatchError::Query {
                selector: selector.clone(),
                source,
            })?;

        let mut count = 0;
        while let Ok(reply) = replies.recv_async().await {
            match reply.result() {
                Ok(sample) => {
                    let payload = sample.payload().to_bytes();
                    if self.handle(sample.key_expr().as_str(), SampleKind::Put, &payload) {
                        count += 1;
                    }
                }
                Err(err) => {
                    warn!(error = ?err, "Error reply during initial sync");
                }
            }
        }

        Ok(count)
    }

    fn handle(&self, key: &str, kind: SampleKind, payload: &[u8]) -> bool {
        match decode_sample(&self.key_prefix, key, kind, payload) {
            Ok(event) => {
                trace!(entity = %event.key(), kind = %event.kind(), "Received entity event");
                self.dispatcher.dispatch(event);
                true
            }
            Err(e) => {
                self.dispatcher.discard(e.reason(), key, &e);
                false
            }
        }
    }
}

/// Resolve once shutdown is requested or every sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if *shutdown.borrow_and_update() {
        return;
    }
    while shutdown.changed().await.is_ok() {
        if *shutdown.borrow() {
            return;
        }
    }
}
