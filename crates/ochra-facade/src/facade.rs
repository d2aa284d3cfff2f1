//! Message type registry, `{type, content, id}` envelope, and reply
//! correlation.
//!
//! Grounded on `original_source/node/node.go`: `Node.RegisterMessageType`
//! (`name2type`/`type2name`) becomes the compile-time [`MessageType`] trait
//! plus a runtime set of known tags used only to flag unrecognized inbound
//! types; `Node.sendWithID`'s `idmap` reply-handler map plus its one-second
//! `time.After` cancellation goroutine becomes [`Facade::request`], a single
//! `tokio::time::timeout` race over a `oneshot` reply channel — the same
//! pending-reply shape `ochra_dht::rpc::Dht::send_and_wait` already uses for
//! DHT RPCs, reused here at the application layer.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use ochra_router::Router;
use ochra_types::identity::NodeId;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{FacadeError, Result};

/// One-second reply-correlation timeout (§4.5, §8 scenario 6).
const REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// A payload type that can travel in a facade envelope under a fixed wire
/// tag. Implementing this is the compile-time replacement for the original
/// runtime `name2type`/`type2name` registry (spec.md Design Note #9).
pub trait MessageType: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The `type` field this payload is tagged with on the wire.
    const TAG: &'static str;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(with = "serde_bytes")]
    content: Vec<u8>,
    id: String,
}

fn encode_content<T: Serialize>(content: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(content).map_err(|e| FacadeError::Encode(e.to_string()))
}

/// Decode a reply or inbound envelope's content bytes as `T`.
pub fn decode_content<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    rmp_serde::from_slice(bytes).map_err(|e| FacadeError::Decode(e.to_string()))
}

fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(envelope).map_err(|e| FacadeError::Encode(e.to_string()))
}

fn decode_envelope(bytes: &[u8]) -> Result<Envelope> {
    rmp_serde::from_slice(bytes).map_err(|e| FacadeError::Decode(e.to_string()))
}

fn random_id() -> String {
    let mut bytes = [0u8; 10];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// An inbound message handler. Receives `(src, type tag, content bytes)`
/// and may return `(reply type tag, reply content bytes)` to echo a reply
/// back tagged with the original envelope's `id` (§4.5 `on-message`).
type Handler = Arc<dyn Fn(NodeId, &str, &[u8]) -> Option<(String, Vec<u8>)> + Send + Sync>;

/// The messaging facade: type registry, envelope wrapping, and
/// reply-callback correlation on top of a [`Router`].
pub struct Facade {
    router: Arc<Router>,
    known_types: RwLock<HashSet<String>>,
    pending: Mutex<HashMap<String, oneshot::Sender<(String, Vec<u8>)>>>,
    handler: RwLock<Option<Handler>>,
    recv_task: StdMutex<Option<JoinHandle<()>>>,
}

impl Facade {
    /// Wrap `router` with a facade and start its inbound dispatch loop.
    pub fn new(router: Arc<Router>) -> Arc<Self> {
        let facade = Arc::new(Self {
            router,
            known_types: RwLock::new(HashSet::new()),
            pending: Mutex::new(HashMap::new()),
            handler: RwLock::new(None),
            recv_task: StdMutex::new(None),
        });
        let task = tokio::spawn(run_recv_loop(Arc::clone(&facade)));
        if let Ok(mut guard) = facade.recv_task.lock() {
            *guard = Some(task);
        }
        facade
    }

    /// Mark `T::TAG` as a known wire type. Inbound envelopes tagged with an
    /// unregistered type are logged and discarded (§4.5).
    pub async fn register_type<T: MessageType>(&self) {
        self.known_types.write().await.insert(T::TAG.to_string());
    }

    /// Install the handler invoked for inbound messages that are not a
    /// correlated reply. At most one handler is active at a time; a later
    /// call replaces the former.
    pub async fn on_message<F>(&self, handler: F)
    where
        F: Fn(NodeId, &str, &[u8]) -> Option<(String, Vec<u8>)> + Send + Sync + 'static,
    {
        *self.handler.write().await = Some(Arc::new(handler));
    }

    /// Send `content` to `dst` with no reply tracking.
    pub async fn send<T: MessageType>(&self, dst: NodeId, content: &T) -> Result<()> {
        let envelope = Envelope {
            kind: T::TAG.to_string(),
            content: encode_content(content)?,
            id: String::new(),
        };
        self.router.send(dst, encode_envelope(&envelope)?).await;
        Ok(())
    }

    /// Send `content` to `dst` and wait up to one second for a correlated
    /// reply. Returns `None` if no reply arrives in time, mirroring the
    /// original implementation's "invoke the handler with nil" behavior
    /// (§4.5, §8 scenario 6).
    pub async fn request<T: MessageType>(
        &self,
        dst: NodeId,
        content: &T,
    ) -> Result<Option<(String, Vec<u8>)>> {
        let id = random_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let envelope = Envelope {
            kind: T::TAG.to_string(),
            content: encode_content(content)?,
            id: id.clone(),
        };
        self.router.send(dst, encode_envelope(&envelope)?).await;

        match tokio::time::timeout(REPLY_TIMEOUT, rx).await {
            Ok(Ok(reply)) => Ok(Some(reply)),
            Ok(Err(_)) => Ok(None),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Ok(None)
            }
        }
    }

    /// Stop the inbound dispatch loop. Pending `request` calls still time
    /// out on their own one-second clock; they are not cancelled early.
    pub fn close(&self) {
        if let Ok(mut guard) = self.recv_task.lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
    }
}

async fn run_recv_loop(facade: Arc<Facade>) {
    while let Some(message) = facade.router.recv().await {
        let envelope = match decode_envelope(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(src = %message.src, error = %e, "dropping undecodable envelope");
                continue;
            }
        };

        if !facade.known_types.read().await.contains(&envelope.kind) {
            warn!(kind = %envelope.kind, src = %message.src, "unknown message type, discarding");
            continue;
        }

        if !envelope.id.is_empty() {
            let waiter = facade.pending.lock().await.remove(&envelope.id);
            if let Some(tx) = waiter {
                let _ = tx.send((envelope.kind, envelope.content));
                continue;
            }
        }

        let handler = facade.handler.read().await.clone();
        let Some(handler) = handler else {
            continue;
        };

        if let Some((reply_kind, reply_content)) =
            handler(message.src, &envelope.kind, &envelope.content)
        {
            if envelope.id.is_empty() {
                continue;
            }
            let reply_envelope = Envelope {
                kind: reply_kind,
                content: reply_content,
                id: envelope.id,
            };
            match encode_envelope(&reply_envelope) {
                Ok(encoded) => {
                    facade.router.send(message.src, encoded).await;
                }
                Err(e) => warn!(error = %e, "failed to encode reply envelope"),
            }
        }
    }
}
