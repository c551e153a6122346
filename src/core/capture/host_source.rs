//! 由宿主解码器驱动的视频源
//!
//! The pipeline never touches the native video element directly. Each
//! operation becomes a [`SourceRequest`] the host polls for, and the host
//! answers it by id with a [`SourceReply`].

use super::error::CaptureError;
use super::frame::Picture;
use super::source::{PlaybackState, VideoSource};
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SourceRequest {
    #[serde(rename_all = "camelCase")]
    Pause { request_id: u64 },
    #[serde(rename_all = "camelCase")]
    Seek { request_id: u64, time_sec: f64 },
    #[serde(rename_all = "camelCase")]
    Capture { request_id: u64 },
    #[serde(rename_all = "camelCase")]
    Restore {
        request_id: u64,
        position_sec: f64,
        paused: bool,
    },
}

impl SourceRequest {
    pub fn request_id(&self) -> u64 {
        match self {
            SourceRequest::Pause { request_id }
            | SourceRequest::Seek { request_id, .. }
            | SourceRequest::Capture { request_id }
            | SourceRequest::Restore { request_id, .. } => *request_id,
        }
    }
}

#[derive(Debug)]
pub enum SourceReply {
    Seeked { settled_sec: f64 },
    Captured(Picture),
    Done,
    Failed(String),
}

pub struct HostVideoSource {
    id: String,
    duration_sec: f64,
    state: Mutex<PlaybackState>,
    requests: mpsc::UnboundedSender<SourceRequest>,
    pending: Mutex<HashMap<u64, oneshot::Sender<SourceReply>>>,
    next_request_id: AtomicU64,
}

impl HostVideoSource {
    /// Returns the source plus the receiving end the host polls.
    pub fn new(
        id: impl Into<String>,
        duration_sec: f64,
        initial: PlaybackState,
    ) -> (Self, mpsc::UnboundedReceiver<SourceRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Self {
            id: id.into(),
            duration_sec,
            state: Mutex::new(initial),
            requests: tx,
            pending: Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
        };
        (source, rx)
    }

    /// 宿主回复某个请求；id 未知（已超时被丢弃）时返回 false
    pub fn resolve(&self, request_id: u64, reply: SourceReply) -> bool {
        let sender = self.lock_pending().remove(&request_id);
        match sender {
            Some(tx) => tx.send(reply).is_ok(),
            None => {
                debug!("Source {}: reply for unknown request {}", self.id, request_id);
                false
            }
        }
    }

    /// Host-side notification that the element moved on its own.
    pub fn update_playback(&self, state: PlaybackState) {
        *self.lock_state() = state;
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<SourceReply>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_state(&self) -> MutexGuard<'_, PlaybackState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn round_trip(
        &self,
        build: impl FnOnce(u64) -> SourceRequest,
    ) -> Result<SourceReply, CaptureError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(request_id, tx);

        // 超时或取消时 future 被丢弃，清理挂起项
        let guard = PendingGuard {
            source: self,
            request_id,
        };

        self.requests
            .send(build(request_id))
            .map_err(|_| CaptureError::Source("host detached from source".to_string()))?;

        let reply = rx
            .await
            .map_err(|_| CaptureError::Source("host dropped the request".to_string()))?;
        drop(guard);

        match reply {
            SourceReply::Failed(message) => Err(CaptureError::Source(message)),
            other => Ok(other),
        }
    }
}

struct PendingGuard<'a> {
    source: &'a HostVideoSource,
    request_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.source.lock_pending().remove(&self.request_id);
    }
}

#[async_trait]
impl VideoSource for HostVideoSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn duration_sec(&self) -> f64 {
        self.duration_sec
    }

    fn playback_state(&self) -> PlaybackState {
        *self.lock_state()
    }

    async fn pause(&self) -> Result<(), CaptureError> {
        self.round_trip(|request_id| SourceRequest::Pause { request_id })
            .await?;
        self.lock_state().paused = true;
        Ok(())
    }

    async fn seek(&self, time_sec: f64) -> Result<f64, CaptureError> {
        match self
            .round_trip(|request_id| SourceRequest::Seek {
                request_id,
                time_sec,
            })
            .await?
        {
            SourceReply::Seeked { settled_sec } => {
                self.lock_state().position_sec = settled_sec;
                Ok(settled_sec)
            }
            other => {
                warn!("Source {}: unexpected reply to seek: {:?}", self.id, other);
                Err(CaptureError::Source("unexpected reply to seek".to_string()))
            }
        }
    }

    async fn capture(&self) -> Result<Picture, CaptureError> {
        match self
            .round_trip(|request_id| SourceRequest::Capture { request_id })
            .await?
        {
            SourceReply::Captured(picture) => Ok(picture),
            _ => Err(CaptureError::Source("unexpected reply to capture".to_string())),
        }
    }

    async fn restore(&self, state: PlaybackState) -> Result<(), CaptureError> {
        self.round_trip(|request_id| SourceRequest::Restore {
            request_id,
            position_sec: state.position_sec,
            paused: state.paused,
        })
        .await?;
        *self.lock_state() = state;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_seek_round_trip() {
        let (source, mut requests) = HostVideoSource::new(
            "host",
            10.0,
            PlaybackState {
                position_sec: 0.0,
                paused: false,
            },
        );
        let source = Arc::new(source);

        let host = {
            let source = source.clone();
            tokio::spawn(async move {
                let request = requests.recv().await.unwrap();
                match request {
                    SourceRequest::Seek {
                        request_id,
                        time_sec,
                    } => {
                        assert!(source.resolve(
                            request_id,
                            SourceReply::Seeked {
                                settled_sec: time_sec + 0.02
                            }
                        ));
                    }
                    other => panic!("unexpected request {:?}", other),
                }
            })
        };

        let settled = source.seek(2.0).await.unwrap();
        host.await.unwrap();

        assert!((settled - 2.02).abs() < 1e-9);
        assert!((source.playback_state().position_sec - 2.02).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failed_reply_surfaces_error() {
        let (source, mut requests) = HostVideoSource::new(
            "host",
            10.0,
            PlaybackState {
                position_sec: 0.0,
                paused: true,
            },
        );
        let source = Arc::new(source);

        let host = {
            let source = source.clone();
            tokio::spawn(async move {
                let request = requests.recv().await.unwrap();
                source.resolve(
                    request.request_id(),
                    SourceReply::Failed("decoder gone".to_string()),
                );
            })
        };

        let result = source.capture().await;
        host.await.unwrap();
        assert!(matches!(result, Err(CaptureError::Source(_))));
    }

    #[tokio::test]
    async fn test_unknown_reply_ignored() {
        let (source, _requests) = HostVideoSource::new(
            "host",
            10.0,
            PlaybackState {
                position_sec: 0.0,
                paused: true,
            },
        );
        assert!(!source.resolve(42, SourceReply::Done));
    }

    #[test]
    fn test_request_wire_shape() {
        let json = serde_json::to_string(&SourceRequest::Seek {
            request_id: 7,
            time_sec: 1.5,
        })
        .unwrap();
        assert_eq!(json, r#"{"kind":"seek","requestId":7,"timeSec":1.5}"#);
    }
}
