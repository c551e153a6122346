//! GIF 录制器 - 宿主（Dart/扩展页）入口

use super::models::{ArtifactInfo, GifApiError};
use crate::core::capture::{HostVideoSource, Picture, PlaybackState, RawFrame, Selection, SourceReply, SourceRequest};
use crate::core::pipeline::{JobHandle, JobStatus, PipelineConfig, PipelineController};
use crate::core::progress::JobEvent;
use crate::core::storage::{ExtensionContext, FsArtifactStore, StorageBridge, StorageHost};
use flutter_rust_bridge::frb;
use log::{debug, info};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

struct AttachedSource {
    source: Arc<HostVideoSource>,
    requests: Arc<tokio::sync::Mutex<UnboundedReceiver<SourceRequest>>>,
}

/// GIF 录制器 - 视频源注册、任务调度和产物管理
///
/// ```dart
/// final recorder = await GifRecorder.create(storageDir: dir);
/// recorder.attachSource(sourceId: "tab-1", durationSec: 12.0, positionSec: 3.2, paused: false);
/// final jobId = recorder.startCapture(sourceId: "tab-1", selection: selection);
/// while (true) {
///   final request = await recorder.nextSourceRequest(sourceId: "tab-1", waitMs: 500);
///   // seek / capture the <video> element and answer by request id
/// }
/// ```
#[frb(opaque)]
pub struct GifRecorder {
    controller: PipelineController,
    host: StorageHost,
    library: StorageBridge,
    sources: Mutex<HashMap<String, AttachedSource>>,
    jobs: Mutex<HashMap<String, Arc<tokio::sync::Mutex<JobHandle>>>>,
}

impl GifRecorder {
    /// 创建录制器，config_json 为空时使用默认配置
    #[frb(dart_async)]
    pub async fn create(storage_dir: String, config_json: Option<String>) -> Result<Self, GifApiError> {
        crate::init_logging();
        info!("🎬 GifRecorder: initializing with storage_dir: {}", storage_dir);

        let config = PipelineConfig::from_json_str(config_json.as_deref().unwrap_or(""))?;
        let runtime = Handle::current();
        let store = Arc::new(FsArtifactStore::new(storage_dir));
        let host = StorageHost::spawn(store, &config.storage, &runtime);
        // 录制在页面上下文进行，列表/删除走控制面板上下文
        let page = host.connect(ExtensionContext::Page, &config.storage);
        let library = host.connect(ExtensionContext::ControlPanel, &config.storage);
        let controller = PipelineController::new(config, page, runtime);

        info!("✅ GifRecorder initialized");
        Ok(Self {
            controller,
            host,
            library,
            sources: Mutex::new(HashMap::new()),
            jobs: Mutex::new(HashMap::new()),
        })
    }

    fn lock_sources(&self) -> MutexGuard<'_, HashMap<String, AttachedSource>> {
        self.sources.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_jobs(&self) -> MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<JobHandle>>>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn source(&self, source_id: &str) -> Result<Arc<HostVideoSource>, GifApiError> {
        self.lock_sources()
            .get(source_id)
            .map(|attached| attached.source.clone())
            .ok_or_else(|| GifApiError::unknown_source(source_id))
    }

    /// 注册一个由宿主驱动的视频元素；同 id 重复注册会替换旧的
    #[frb(sync)]
    pub fn attach_source(&self, source_id: String, duration_sec: f64, position_sec: f64, paused: bool) {
        let (source, requests) = HostVideoSource::new(
            source_id.clone(),
            duration_sec,
            PlaybackState { position_sec, paused },
        );
        debug!("📺 Source {} attached ({:.2}s)", source_id, duration_sec);
        self.lock_sources().insert(
            source_id,
            AttachedSource {
                source: Arc::new(source),
                requests: Arc::new(tokio::sync::Mutex::new(requests)),
            },
        );
    }

    #[frb(sync)]
    pub fn detach_source(&self, source_id: String) -> bool {
        self.lock_sources().remove(&source_id).is_some()
    }

    /// 视频自己播放/暂停时由宿主同步状态
    #[frb(sync)]
    pub fn update_playback(&self, source_id: String, position_sec: f64, paused: bool) -> Result<(), GifApiError> {
        self.source(&source_id)?
            .update_playback(PlaybackState { position_sec, paused });
        Ok(())
    }

    /// 等待下一个需要宿主执行的操作，wait_ms 内没有则返回 None
    #[frb(dart_async)]
    pub async fn next_source_request(
        &self,
        source_id: String,
        wait_ms: u64,
    ) -> Result<Option<SourceRequest>, GifApiError> {
        let requests = self
            .lock_sources()
            .get(&source_id)
            .map(|attached| attached.requests.clone())
            .ok_or_else(|| GifApiError::unknown_source(&source_id))?;

        let mut requests = requests.lock().await;
        match timeout(Duration::from_millis(wait_ms), requests.recv()).await {
            Ok(request) => Ok(request),
            Err(_) => Ok(None),
        }
    }

    /// pause / restore 完成
    #[frb(sync)]
    pub fn answer_done(&self, source_id: String, request_id: u64) -> Result<bool, GifApiError> {
        Ok(self.source(&source_id)?.resolve(request_id, SourceReply::Done))
    }

    #[frb(sync)]
    pub fn answer_seek(&self, source_id: String, request_id: u64, settled_sec: f64) -> Result<bool, GifApiError> {
        Ok(self
            .source(&source_id)?
            .resolve(request_id, SourceReply::Seeked { settled_sec }))
    }

    #[frb(sync)]
    pub fn answer_rgba_frame(
        &self,
        source_id: String,
        request_id: u64,
        width: u32,
        height: u32,
        data: Vec<u8>,
    ) -> Result<bool, GifApiError> {
        let picture = Picture::Rgba { width, height, data };
        Ok(self
            .source(&source_id)?
            .resolve(request_id, SourceReply::Captured(picture)))
    }

    #[frb(sync)]
    pub fn answer_yuv_frame(
        &self,
        source_id: String,
        request_id: u64,
        width: u32,
        height: u32,
        y_plane: Vec<u8>,
        u_plane: Vec<u8>,
        v_plane: Vec<u8>,
    ) -> Result<bool, GifApiError> {
        let picture = Picture::Yuv420(RawFrame {
            width,
            height,
            y_plane,
            u_plane,
            v_plane,
        });
        Ok(self
            .source(&source_id)?
            .resolve(request_id, SourceReply::Captured(picture)))
    }

    #[frb(sync)]
    pub fn answer_failed(&self, source_id: String, request_id: u64, message: String) -> Result<bool, GifApiError> {
        Ok(self
            .source(&source_id)?
            .resolve(request_id, SourceReply::Failed(message)))
    }

    /// 开始录制，返回任务 id（同时也是产物 id）
    #[frb(sync)]
    pub fn start_capture(&self, source_id: String, selection: Selection) -> Result<String, GifApiError> {
        let source = self.source(&source_id)?;
        let handle = self.controller.start(source, selection)?;
        let job_id = handle.job_id().to_string();
        self.lock_jobs()
            .insert(job_id.clone(), Arc::new(tokio::sync::Mutex::new(handle)));
        Ok(job_id)
    }

    /// 录制并等待完成
    #[frb(dart_async)]
    pub async fn create_artifact(&self, source_id: String, selection: Selection) -> Result<ArtifactInfo, GifApiError> {
        let source = self.source(&source_id)?;
        let mut handle = self.controller.start(source, selection)?;
        let summary = handle.wait().await.into_result()?;
        Ok(ArtifactInfo::from(summary))
    }

    /// 存储失败后只重试持久化
    #[frb(dart_async)]
    pub async fn retry_store(&self, job_id: String) -> Result<ArtifactInfo, GifApiError> {
        let summary = self.controller.retry_store(&job_id).await?;
        Ok(ArtifactInfo::from(summary))
    }

    #[frb(sync)]
    pub fn cancel(&self, job_id: String) -> bool {
        self.controller.cancel(&job_id)
    }

    /// 按顺序取下一条事件；终止事件之后返回 None
    ///
    /// The handle is dropped on the first call that returns `None`, so a
    /// finished job keeps answering `None` until it is forgotten.
    #[frb(dart_async)]
    pub async fn next_event(&self, job_id: String) -> Result<Option<JobEvent>, GifApiError> {
        let handle = self.lock_jobs().get(&job_id).cloned();
        let Some(handle) = handle else {
            return match self.controller.status(&job_id) {
                Ok(status) if status.is_terminal() => Ok(None),
                _ => Err(GifApiError::unknown_job(&job_id)),
            };
        };

        let event = handle.lock().await.next_event().await;
        if event.is_none() {
            self.lock_jobs().remove(&job_id);
        }
        Ok(event)
    }

    #[frb(sync)]
    pub fn job_status(&self, job_id: String) -> Result<JobStatus, GifApiError> {
        Ok(self.controller.status(&job_id)?)
    }

    /// 清理已结束的任务；运行中的任务返回 false
    #[frb(sync)]
    pub fn forget_job(&self, job_id: String) -> bool {
        let forgotten = self.controller.forget(&job_id);
        if forgotten {
            self.lock_jobs().remove(&job_id);
            debug!("Forgot job {}", job_id);
        }
        forgotten
    }

    #[frb(dart_async)]
    pub async fn list_artifacts(&self) -> Result<Vec<ArtifactInfo>, GifApiError> {
        let summaries = self.library.list().await?;
        Ok(summaries.into_iter().map(ArtifactInfo::from).collect())
    }

    /// 读取 GIF 二进制
    #[frb(dart_async)]
    pub async fn load_artifact(&self, artifact_id: String) -> Result<Vec<u8>, GifApiError> {
        Ok(self.library.retrieve(&artifact_id).await?.into_blob())
    }

    #[frb(dart_async)]
    pub async fn delete_artifact(&self, artifact_id: String) -> Result<bool, GifApiError> {
        Ok(self.library.delete(&artifact_id).await?)
    }
}

impl Drop for GifRecorder {
    fn drop(&mut self) {
        self.host.shutdown();
        info!(
            "🗑️ GifRecorder: released ({} sources, {} tracked jobs)",
            self.lock_sources().len(),
            self.lock_jobs().len()
        );
    }
}
