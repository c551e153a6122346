//! 跨上下文存储桥
//!
//! Page-embedded code cannot see the extension's privileged storage, so
//! nothing is shared directly. A [`StorageHost`] runs next to the store (the
//! background context) and every other surface talks to it through a
//! [`StorageBridge`], sending JSON-serialized request envelopes over a
//! channel and awaiting a JSON reply.

use super::artifact::{ArtifactSummary, GifArtifact};
use super::error::StorageError;
use super::store::ArtifactStore;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageConfig {
    /// 单次往返的超时
    pub request_timeout_ms: u64,
    pub channel_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5_000,
            channel_capacity: 32,
        }
    }
}

/// 扩展的执行上下文
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionContext {
    Page,
    Background,
    ControlPanel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum BridgeOp {
    Store { artifact: GifArtifact },
    Retrieve { id: String },
    List,
    Delete { id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeRequest {
    pub request_id: u64,
    pub origin: ExtensionContext,
    #[serde(flatten)]
    pub op: BridgeOp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum BridgeResponse {
    Stored { id: String },
    Artifact { artifact: GifArtifact },
    Listing { artifacts: Vec<ArtifactSummary> },
    Deleted { existed: bool },
    NotFound { id: String },
    Error { message: String },
}

type Envelope = (String, oneshot::Sender<String>);

/// 持有存储的一端，在后台上下文运行
pub struct StorageHost {
    sender: mpsc::Sender<Envelope>,
    task: JoinHandle<()>,
}

impl StorageHost {
    pub fn spawn(store: Arc<dyn ArtifactStore>, config: &StorageConfig, handle: &Handle) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Envelope>(config.channel_capacity.max(1));

        let task = handle.spawn(async move {
            while let Some((request, reply)) = receiver.recv().await {
                // 请求方已超时放弃，不再执行
                if reply.is_closed() {
                    debug!("Dropping abandoned bridge request");
                    continue;
                }
                let response = Self::handle(store.as_ref(), &request).await;
                if reply.is_closed() {
                    // 调用方已按失败处理，回滚刚写入的产物
                    if let BridgeResponse::Stored { id } = &response {
                        warn!("Store of {} finished after the caller gave up, rolling back", id);
                        if let Err(e) = store.remove(id).await {
                            warn!("Rollback of {} failed: {}", id, e);
                        }
                    }
                    continue;
                }
                let encoded = serde_json::to_string(&response).unwrap_or_else(|e| {
                    format!(r#"{{"status":"error","message":"unencodable response: {}"}}"#, e)
                });
                let _ = reply.send(encoded);
            }
            debug!("Storage host loop finished");
        });

        info!("📦 StorageHost started");
        Self { sender, task }
    }

    async fn handle(store: &dyn ArtifactStore, raw: &str) -> BridgeResponse {
        let request: BridgeRequest = match serde_json::from_str(raw) {
            Ok(request) => request,
            Err(e) => {
                warn!("Malformed bridge request: {}", e);
                return BridgeResponse::Error {
                    message: format!("malformed request: {}", e),
                };
            }
        };

        debug!(
            "Bridge request {} from {:?}: {}",
            request.request_id,
            request.origin,
            op_name(&request.op)
        );

        let result = match request.op {
            BridgeOp::Store { artifact } => store
                .put(&artifact)
                .await
                .map(|_| BridgeResponse::Stored {
                    id: artifact.id().to_string(),
                }),
            BridgeOp::Retrieve { id } => store
                .get(&id)
                .await
                .map(|artifact| BridgeResponse::Artifact { artifact }),
            BridgeOp::List => store
                .list()
                .await
                .map(|artifacts| BridgeResponse::Listing { artifacts }),
            BridgeOp::Delete { id } => store
                .remove(&id)
                .await
                .map(|existed| BridgeResponse::Deleted { existed }),
        };

        match result {
            Ok(response) => response,
            Err(StorageError::NotFound(id)) => BridgeResponse::NotFound { id },
            Err(e) => BridgeResponse::Error {
                message: e.to_string(),
            },
        }
    }

    /// A client bound to one context.
    pub fn connect(&self, context: ExtensionContext, config: &StorageConfig) -> StorageBridge {
        StorageBridge {
            context,
            sender: self.sender.clone(),
            timeout: Duration::from_millis(config.request_timeout_ms),
            next_request_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for StorageHost {
    fn drop(&mut self) {
        self.task.abort();
        info!("🗑️ StorageHost dropped");
    }
}

fn op_name(op: &BridgeOp) -> &'static str {
    match op {
        BridgeOp::Store { .. } => "store",
        BridgeOp::Retrieve { .. } => "retrieve",
        BridgeOp::List => "list",
        BridgeOp::Delete { .. } => "delete",
    }
}

/// 其他上下文访问存储的客户端
#[derive(Clone)]
pub struct StorageBridge {
    context: ExtensionContext,
    sender: mpsc::Sender<Envelope>,
    timeout: Duration,
    next_request_id: Arc<AtomicU64>,
}

impl StorageBridge {
    pub fn context(&self) -> ExtensionContext {
        self.context
    }

    async fn round_trip(&self, op: BridgeOp) -> Result<BridgeResponse, StorageError> {
        let request = BridgeRequest {
            request_id: self.next_request_id.fetch_add(1, Ordering::Relaxed),
            origin: self.context,
            op,
        };
        let encoded = serde_json::to_string(&request)?;
        let (reply_tx, reply_rx) = oneshot::channel();

        let exchange = async move {
            self.sender
                .send((encoded, reply_tx))
                .await
                .map_err(|_| StorageError::Unavailable("storage host is gone".to_string()))?;
            reply_rx
                .await
                .map_err(|_| StorageError::Unavailable("storage host dropped the request".to_string()))
        };

        let raw = timeout(self.timeout, exchange).await.map_err(|_| {
            StorageError::Unavailable(format!(
                "no reply within {}ms",
                self.timeout.as_millis()
            ))
        })??;

        let response: BridgeResponse = serde_json::from_str(&raw)?;
        match response {
            BridgeResponse::Error { message } => Err(StorageError::Unavailable(message)),
            BridgeResponse::NotFound { id } => Err(StorageError::NotFound(id)),
            other => Ok(other),
        }
    }

    fn unexpected(response: BridgeResponse) -> StorageError {
        StorageError::Unavailable(format!("unexpected bridge response: {:?}", response))
    }

    /// Completes only once the artifact is durably stored.
    pub async fn store(&self, artifact: &GifArtifact) -> Result<String, StorageError> {
        match self
            .round_trip(BridgeOp::Store {
                artifact: artifact.clone(),
            })
            .await?
        {
            BridgeResponse::Stored { id } => Ok(id),
            other => Err(Self::unexpected(other)),
        }
    }

    pub async fn retrieve(&self, id: &str) -> Result<GifArtifact, StorageError> {
        match self
            .round_trip(BridgeOp::Retrieve { id: id.to_string() })
            .await?
        {
            BridgeResponse::Artifact { artifact } => Ok(artifact),
            other => Err(Self::unexpected(other)),
        }
    }

    pub async fn list(&self) -> Result<Vec<ArtifactSummary>, StorageError> {
        match self.round_trip(BridgeOp::List).await? {
            BridgeResponse::Listing { artifacts } => Ok(artifacts),
            other => Err(Self::unexpected(other)),
        }
    }

    pub async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        match self
            .round_trip(BridgeOp::Delete { id: id.to_string() })
            .await?
        {
            BridgeResponse::Deleted { existed } => Ok(existed),
            other => Err(Self::unexpected(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::encode::EncodedGif;
    use crate::core::storage::MemoryArtifactStore;

    fn artifact(id: &str) -> GifArtifact {
        GifArtifact::from_encoded(
            id,
            EncodedGif {
                bytes: b"GIF89a\x01\x00\x01\x00;".to_vec(),
                width: 1,
                height: 1,
                frame_count: 1,
                duration_sec: 0.1,
            },
        )
    }

    fn host() -> StorageHost {
        StorageHost::spawn(
            Arc::new(MemoryArtifactStore::new()),
            &StorageConfig::default(),
            &Handle::current(),
        )
    }

    #[tokio::test]
    async fn test_cross_context_round_trip() {
        let host = host();
        let config = StorageConfig::default();
        let page = host.connect(ExtensionContext::Page, &config);
        let panel = host.connect(ExtensionContext::ControlPanel, &config);

        let original = artifact("job-1");
        assert_eq!(page.store(&original).await.unwrap(), "job-1");

        let loaded = panel.retrieve("job-1").await.unwrap();
        assert_eq!(loaded, original);
        assert_eq!(panel.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_store_is_idempotent() {
        let host = host();
        let bridge = host.connect(ExtensionContext::Page, &StorageConfig::default());

        bridge.store(&artifact("same")).await.unwrap();
        bridge.store(&artifact("same")).await.unwrap();

        assert_eq!(bridge.list().await.unwrap().len(), 1);
        assert!(bridge.delete("same").await.unwrap());
        assert!(matches!(
            bridge.retrieve("same").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() {
        let (sender, _receiver) = mpsc::channel::<Envelope>(4);
        let bridge = StorageBridge {
            context: ExtensionContext::Page,
            sender,
            timeout: Duration::from_millis(30),
            next_request_id: Arc::new(AtomicU64::new(1)),
        };

        let result = bridge.store(&artifact("late")).await;
        assert!(matches!(result, Err(StorageError::Unavailable(_))));
    }

    /// put 比调用方的超时更慢
    struct SlowStore {
        inner: MemoryArtifactStore,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl ArtifactStore for SlowStore {
        async fn put(&self, artifact: &GifArtifact) -> Result<(), StorageError> {
            tokio::time::sleep(self.delay).await;
            self.inner.put(artifact).await
        }

        async fn get(&self, id: &str) -> Result<GifArtifact, StorageError> {
            self.inner.get(id).await
        }

        async fn list(&self) -> Result<Vec<ArtifactSummary>, StorageError> {
            self.inner.list().await
        }

        async fn remove(&self, id: &str) -> Result<bool, StorageError> {
            self.inner.remove(id).await
        }
    }

    #[tokio::test]
    async fn test_timed_out_store_is_rolled_back() {
        let host = StorageHost::spawn(
            Arc::new(SlowStore {
                inner: MemoryArtifactStore::new(),
                delay: Duration::from_millis(100),
            }),
            &StorageConfig::default(),
            &Handle::current(),
        );
        let impatient = host.connect(
            ExtensionContext::Page,
            &StorageConfig {
                request_timeout_ms: 20,
                ..Default::default()
            },
        );

        let result = impatient.store(&artifact("slow")).await;
        assert!(matches!(result, Err(StorageError::Unavailable(_))));

        tokio::time::sleep(Duration::from_millis(200)).await;
        let panel = host.connect(ExtensionContext::ControlPanel, &StorageConfig::default());
        assert!(panel.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stopped_host_is_unavailable() {
        let host = host();
        let bridge = host.connect(ExtensionContext::Background, &StorageConfig::default());
        host.shutdown();
        tokio::task::yield_now().await;

        let result = bridge.list().await;
        assert!(matches!(result, Err(StorageError::Unavailable(_))));
    }

    #[test]
    fn test_request_envelope_shape() {
        let request = BridgeRequest {
            request_id: 3,
            origin: ExtensionContext::ControlPanel,
            op: BridgeOp::Delete {
                id: "abc".to_string(),
            },
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"requestId":3,"origin":"control_panel","op":"delete","id":"abc"}"#
        );
    }
}
