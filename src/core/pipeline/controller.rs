use super::config::PipelineConfig;
use super::error::PipelineError;
use super::job::{EncodeJob, JobStatus};
use crate::core::capture::{FrameSampler, Selection, VideoSource};
use crate::core::encode::{EncodeError, StageEncoder};
use crate::core::progress::{FailureReason, JobEvent, ProgressReporter, Stage};
use crate::core::storage::{ArtifactSummary, GifArtifact, StorageBridge};
use log::{debug, error, info, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 已结束任务最多保留多少条记录
pub const FINISHED_JOB_LIMIT: usize = 64;

/// 任务的最终结果；只保留概要，二进制归存储所有
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Done(ArtifactSummary),
    Failed {
        reason: FailureReason,
        message: String,
    },
    Cancelled,
}

impl JobOutcome {
    pub fn into_result(self) -> Result<ArtifactSummary, PipelineError> {
        match self {
            JobOutcome::Done(artifact) => Ok(artifact),
            JobOutcome::Failed { reason, message } => Err(PipelineError::JobFailed { reason, message }),
            JobOutcome::Cancelled => Err(PipelineError::Cancelled),
        }
    }
}

/// 每个任务在控制器里登记的共享状态
struct JobEntry {
    source_id: String,
    reporter: Arc<ProgressReporter>,
    cancel: CancellationToken,
    /// 进入持久化后为 true，之后取消不再生效
    committed: Mutex<bool>,
    status: watch::Sender<JobStatus>,
    outcome: watch::Sender<Option<JobOutcome>>,
    /// 编码成功但没能存下的产物，等待 retry_store
    unsaved: Mutex<Option<GifArtifact>>,
}

impl JobEntry {
    fn lock_unsaved(&self) -> MutexGuard<'_, Option<GifArtifact>> {
        self.unsaved.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_committed(&self) -> MutexGuard<'_, bool> {
        self.committed.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn advance(&self, job: &mut EncodeJob, next: JobStatus) {
        if job.advance(next) {
            self.status.send_replace(next);
        }
    }

    fn checkpoint(&self) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    fn request_cancel(&self) -> bool {
        let committed = self.lock_committed();
        if *committed || self.status.borrow().is_terminal() {
            return false;
        }
        self.cancel.cancel();
        true
    }

    fn commit(&self) -> Result<(), PipelineError> {
        let mut committed = self.lock_committed();
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        *committed = true;
        Ok(())
    }
}

#[derive(Default)]
struct Registry {
    jobs: HashMap<String, Arc<JobEntry>>,
    /// source id -> 正在运行的 job id
    active_sources: HashMap<String, String>,
    /// 结束顺序，超出上限时淘汰最早的记录
    finished: VecDeque<String>,
}

impl Registry {
    fn record_finished(&mut self, job_id: &str, limit: usize) {
        self.finished.push_back(job_id.to_string());
        while self.finished.len() > limit {
            if let Some(oldest) = self.finished.pop_front() {
                debug!("Evicting finished job {}", oldest);
                self.jobs.remove(&oldest);
            }
        }
    }
}

/// 调用方拿到的任务句柄
pub struct JobHandle {
    job_id: String,
    events: broadcast::Receiver<JobEvent>,
    outcome: watch::Receiver<Option<JobOutcome>>,
    finished: bool,
}

impl JobHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Next event in order; `None` after the terminal event.
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        if self.finished {
            return None;
        }
        loop {
            match self.events.recv().await {
                Ok(event) => {
                    self.finished = event.is_terminal();
                    return Some(event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Job {}: subscriber lagged, {} events dropped", self.job_id, skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub async fn wait(&mut self) -> JobOutcome {
        wait_outcome(&mut self.outcome).await
    }
}

async fn wait_outcome(outcome: &mut watch::Receiver<Option<JobOutcome>>) -> JobOutcome {
    loop {
        if let Some(done) = outcome.borrow_and_update().clone() {
            return done;
        }
        if outcome.changed().await.is_err() {
            return outcome.borrow().clone().unwrap_or(JobOutcome::Failed {
                reason: FailureReason::EncodeFailure,
                message: "job ended without an outcome".to_string(),
            });
        }
    }
}

#[derive(Clone)]
struct JobContext {
    job_id: String,
    source: Arc<dyn VideoSource>,
    selection: Selection,
    config: Arc<PipelineConfig>,
    storage: StorageBridge,
    entry: Arc<JobEntry>,
}

/// 管线控制器：任务调度、取消和结果持久化
///
/// At most one job runs per video source. The job id doubles as the
/// artifact id, so a stored GIF can always be traced back to its job.
pub struct PipelineController {
    config: Arc<PipelineConfig>,
    storage: StorageBridge,
    runtime: Handle,
    registry: Arc<Mutex<Registry>>,
    finished_limit: usize,
}

impl PipelineController {
    pub fn new(config: PipelineConfig, storage: StorageBridge, runtime: Handle) -> Self {
        info!("🚀 Creating PipelineController (storage context: {:?})", storage.context());
        Self {
            config: Arc::new(config),
            storage,
            runtime,
            registry: Arc::new(Mutex::new(Registry::default())),
            finished_limit: FINISHED_JOB_LIMIT,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        lock_registry(&self.registry)
    }

    fn entry(&self, job_id: &str) -> Result<Arc<JobEntry>, PipelineError> {
        self.lock_registry()
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownJob(job_id.to_string()))
    }

    /// Validates the request, registers the job and starts it in the background.
    pub fn start(&self, source: Arc<dyn VideoSource>, selection: Selection) -> Result<JobHandle, PipelineError> {
        selection.validate()?;

        let source_id = source.id().to_string();
        let job_id = Uuid::new_v4().to_string();
        let reporter = Arc::new(ProgressReporter::new(job_id.clone(), &self.config.progress));
        let (status, _) = watch::channel(JobStatus::Pending);
        let (outcome, outcome_rx) = watch::channel(None);
        let entry = Arc::new(JobEntry {
            source_id: source_id.clone(),
            reporter: reporter.clone(),
            cancel: CancellationToken::new(),
            committed: Mutex::new(false),
            status,
            outcome,
            unsaved: Mutex::new(None),
        });

        {
            let mut registry = self.lock_registry();
            if let Some(running) = registry.active_sources.get(&source_id) {
                warn!("⛔ Source {} is busy with job {}", source_id, running);
                return Err(PipelineError::SourceBusy(source_id));
            }
            registry.active_sources.insert(source_id.clone(), job_id.clone());
            registry.jobs.insert(job_id.clone(), entry.clone());
        }

        // 先订阅再启动，保证不丢第一条事件
        let handle = JobHandle {
            job_id: job_id.clone(),
            events: reporter.subscribe(),
            outcome: outcome_rx,
            finished: false,
        };

        info!(
            "🎬 Job {} started on {}: {:.2}s-{:.2}s @ {}fps, {}x{}",
            job_id,
            source_id,
            selection.start_time_sec,
            selection.end_time_sec,
            selection.frame_rate,
            selection.output_width,
            selection.output_height
        );

        let ctx = JobContext {
            job_id,
            source,
            selection,
            config: self.config.clone(),
            storage: self.storage.clone(),
            entry,
        };
        let registry = self.registry.clone();
        let runtime = self.runtime.clone();
        self.runtime
            .spawn(run_job(ctx, registry, runtime, self.finished_limit));

        Ok(handle)
    }

    /// Runs a job to completion and reads the artifact back from storage.
    pub async fn create_artifact(
        &self,
        source: Arc<dyn VideoSource>,
        selection: Selection,
    ) -> Result<GifArtifact, PipelineError> {
        let mut handle = self.start(source, selection)?;
        let summary = handle.wait().await.into_result()?;
        Ok(self.storage.retrieve(&summary.id).await?)
    }

    /// 存储失败的任务重新持久化，不重新编码
    ///
    /// The job record keeps its `failed` outcome; the stored summary is
    /// returned directly. On another storage failure the artifact is kept
    /// for the next attempt.
    pub async fn retry_store(&self, job_id: &str) -> Result<ArtifactSummary, PipelineError> {
        let entry = self.entry(job_id)?;
        let artifact = entry
            .lock_unsaved()
            .take()
            .ok_or_else(|| PipelineError::NothingToRetry(job_id.to_string()))?;

        match self.storage.store(&artifact).await {
            Ok(_) => {
                info!("💾 Job {}: artifact stored on retry", job_id);
                Ok(artifact.summary())
            }
            Err(e) => {
                warn!("Job {}: retry store failed: {}", job_id, e);
                *entry.lock_unsaved() = Some(artifact);
                Err(e.into())
            }
        }
    }

    /// 取消任务；已终止或已进入持久化时返回 false
    pub fn cancel(&self, job_id: &str) -> bool {
        let Ok(entry) = self.entry(job_id) else {
            debug!("Cancel ignored: unknown job {}", job_id);
            return false;
        };
        let accepted = entry.request_cancel();
        if accepted {
            info!("🛑 Job {} cancellation requested", job_id);
        } else {
            debug!("Cancel ignored: job {} already committed or finished", job_id);
        }
        accepted
    }

    pub fn status(&self, job_id: &str) -> Result<JobStatus, PipelineError> {
        Ok(*self.entry(job_id)?.status.borrow())
    }

    /// Late subscribers only see events sent after this call.
    pub fn subscribe(&self, job_id: &str) -> Result<broadcast::Receiver<JobEvent>, PipelineError> {
        Ok(self.entry(job_id)?.reporter.subscribe())
    }

    /// Last progress update delivered, or the terminal event once finished.
    pub fn last_event(&self, job_id: &str) -> Result<Option<JobEvent>, PipelineError> {
        let entry = self.entry(job_id)?;
        Ok(entry
            .reporter
            .terminal_event()
            .or_else(|| entry.reporter.last_progress().map(JobEvent::Progress)))
    }

    pub async fn wait(&self, job_id: &str) -> Result<ArtifactSummary, PipelineError> {
        let mut outcome = self.entry(job_id)?.outcome.subscribe();
        wait_outcome(&mut outcome).await.into_result()
    }

    pub fn active_jobs(&self) -> usize {
        self.lock_registry().active_sources.len()
    }

    /// 清理已结束的任务记录
    pub fn forget(&self, job_id: &str) -> bool {
        let mut registry = self.lock_registry();
        let finished = registry
            .jobs
            .get(job_id)
            .map_or(false, |entry| entry.status.borrow().is_terminal());
        if finished {
            registry.jobs.remove(job_id);
            registry.finished.retain(|id| id != job_id);
        }
        finished
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        let registry = self.lock_registry();
        for job_id in registry.active_sources.values() {
            if let Some(entry) = registry.jobs.get(job_id) {
                entry.request_cancel();
            }
        }
        info!(
            "🗑️ Dropping PipelineController ({} jobs still running)",
            registry.active_sources.len()
        );
    }
}

fn lock_registry(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|e| e.into_inner())
}

async fn run_job(ctx: JobContext, registry: Arc<Mutex<Registry>>, runtime: Handle, finished_limit: usize) {
    let job_id = ctx.job_id.clone();
    let entry = ctx.entry.clone();

    // 单独的任务执行，panic 也能落到终止事件上
    let result = match runtime.spawn(execute(ctx)).await {
        Ok(result) => result,
        Err(e) => Err(PipelineError::Encode(EncodeError::from(e))),
    };

    let (terminal_status, event, outcome) = match result {
        Ok(summary) => {
            info!(
                "✅ Job {} done: artifact {} ({} bytes)",
                job_id, summary.id, summary.metadata.size_bytes
            );
            (
                JobStatus::Done,
                JobEvent::Completed {
                    artifact_id: summary.id.clone(),
                    metadata: summary.metadata.clone(),
                },
                JobOutcome::Done(summary),
            )
        }
        Err(PipelineError::Cancelled) => {
            info!("🛑 Job {} cancelled", job_id);
            (JobStatus::Cancelled, JobEvent::Cancelled, JobOutcome::Cancelled)
        }
        Err(e) => {
            let reason = e.reason().unwrap_or(FailureReason::EncodeFailure);
            let message = e.to_string();
            error!("❌ Job {} failed ({}): {}", job_id, reason, message);
            (
                JobStatus::Failed,
                JobEvent::Failed {
                    reason,
                    message: message.clone(),
                },
                JobOutcome::Failed { reason, message },
            )
        }
    };

    // 先释放视频源，收到终止事件的调用方可以立即开始下一个任务
    {
        let mut registry = lock_registry(&registry);
        if registry.active_sources.get(&entry.source_id) == Some(&job_id) {
            registry.active_sources.remove(&entry.source_id);
        }
        registry.record_finished(&job_id, finished_limit);
    }

    let current = *entry.status.borrow();
    if current.can_transition_to(terminal_status) {
        entry.status.send_replace(terminal_status);
    }
    if terminal_status != JobStatus::Done {
        entry.reporter.flush();
    }
    entry.reporter.finish(event);
    entry.outcome.send_replace(Some(outcome));
}

async fn execute(ctx: JobContext) -> Result<ArtifactSummary, PipelineError> {
    let entry = &ctx.entry;
    let config = &ctx.config;
    let mut job = EncodeJob::new(ctx.job_id.clone(), ctx.selection);

    entry.checkpoint()?;
    entry.advance(&mut job, JobStatus::for_stage(Stage::Extracting));

    let encoder = StageEncoder::new(
        entry.reporter.clone(),
        entry.cancel.clone(),
        config.palette.clone(),
        config.optimize.clone(),
        config.encode.clone(),
    );

    let mut sampler = FrameSampler::begin(
        ctx.source.clone(),
        &job.selection,
        &config.capture,
        entry.cancel.clone(),
    )
    .await?;
    let effective = *sampler.selection();
    let extracted = encoder.extract(&mut sampler).await;
    let (scheduled, skipped, skip_ratio) = (sampler.scheduled(), sampler.skipped(), sampler.skip_ratio());

    // 无论成败都要把视频恢复到原来的播放状态
    if let Err(e) = sampler.release().await {
        warn!("⚠️ Job {}: failed to restore playback: {}", job.id, e);
    }

    job.frames = extracted?;
    entry.checkpoint()?;
    if job.frames.is_empty() || skip_ratio > config.capture.max_skip_ratio {
        return Err(PipelineError::InsufficientFrames {
            scheduled,
            captured: job.frames.len(),
            skipped,
        });
    }
    if skipped > 0 {
        warn!("Job {}: {} of {} samples skipped", job.id, skipped, scheduled);
    }

    let quantized = encoder.quantize(job.take_frames(), &effective).await?;

    entry.advance(&mut job, JobStatus::for_stage(Stage::Encoding));
    let (encoded, global) = encoder.encode_frames(quantized, effective.frame_rate)?;

    entry.advance(&mut job, JobStatus::for_stage(Stage::Optimizing));
    let (optimized, global) = encoder.optimize(encoded, global).await?;

    entry.advance(&mut job, JobStatus::for_stage(Stage::Compressing));
    let gif = encoder.compress(optimized, global, &effective).await?;

    entry.commit()?;
    let artifact = GifArtifact::from_encoded(job.id.clone(), gif);
    if !artifact.has_valid_signature() {
        return Err(PipelineError::Encode(EncodeError::Format(
            "output is missing the GIF signature or trailer".to_string(),
        )));
    }
    if let Err(e) = ctx.storage.store(&artifact).await {
        // 保留产物，调用方可以只重试持久化
        *entry.lock_unsaved() = Some(artifact);
        return Err(e.into());
    }
    debug!("Job {} persisted artifact {}", job.id, artifact.id());
    Ok(artifact.summary())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::capture::MockVideoSource;
    use crate::core::storage::{
        ArtifactStore, ExtensionContext, MemoryArtifactStore, StorageConfig, StorageError, StorageHost,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn setup(config: PipelineConfig) -> (StorageHost, PipelineController) {
        setup_with_store(config, Arc::new(MemoryArtifactStore::new()))
    }

    fn setup_with_store(config: PipelineConfig, store: Arc<dyn ArtifactStore>) -> (StorageHost, PipelineController) {
        let host = StorageHost::spawn(store, &config.storage, &Handle::current());
        let bridge = host.connect(ExtensionContext::Page, &config.storage);
        let controller = PipelineController::new(config, bridge, Handle::current());
        (host, controller)
    }

    fn count_frames(bytes: &[u8]) -> usize {
        let mut options = gif::DecodeOptions::new();
        options.set_color_output(gif::ColorOutput::Indexed);
        let mut decoder = options.read_info(bytes).unwrap();
        let mut count = 0;
        while decoder.read_next_frame().unwrap().is_some() {
            count += 1;
        }
        count
    }

    #[tokio::test]
    async fn test_three_second_clip_end_to_end() {
        let (host, controller) = setup(PipelineConfig::default());
        let source = Arc::new(MockVideoSource::new("tab-1", 5.0));

        let mut handle = controller
            .start(source.clone(), Selection::new(0.0, 3.0, 10.0, 320, 240))
            .unwrap();
        let job_id = handle.job_id().to_string();

        let mut events = Vec::new();
        while let Some(event) = handle.next_event().await {
            events.push(event);
        }

        // 阶段只前进，同阶段百分比不回退
        let mut last: Option<(Stage, u8)> = None;
        for event in &events {
            if let JobEvent::Progress(p) = event {
                if let Some((stage, percent)) = last {
                    assert!(p.stage > stage || (p.stage == stage && p.percent >= percent));
                }
                last = Some((p.stage, p.percent));
            }
        }
        assert_eq!(last, Some((Stage::Compressing, 100)));

        let Some(JobEvent::Completed { artifact_id, metadata }) = events.last().cloned() else {
            panic!("expected completion, got {:?}", events.last());
        };
        assert_eq!(artifact_id, job_id);
        assert!((28..=32).contains(&metadata.frame_count));
        assert_eq!((metadata.width, metadata.height), (320, 240));

        // 另一个上下文读回同一个产物
        let panel = host.connect(ExtensionContext::ControlPanel, &StorageConfig::default());
        let stored = panel.retrieve(&job_id).await.unwrap();
        assert!(stored.has_valid_signature());
        assert_eq!(count_frames(stored.blob()), metadata.frame_count);

        assert_eq!(controller.status(&job_id).unwrap(), JobStatus::Done);
        assert!(!controller.cancel(&job_id));
        assert_eq!(source.restore_count(), 1);
        assert_eq!(controller.active_jobs(), 0);
    }

    #[tokio::test]
    async fn test_cancel_before_first_frame() {
        let (host, controller) = setup(PipelineConfig::default());
        let source = Arc::new(MockVideoSource::new("tab-1", 5.0).with_playback(1.5, false));

        let mut handle = controller
            .start(source.clone(), Selection::new(0.0, 3.0, 10.0, 64, 48))
            .unwrap();
        assert!(controller.cancel(handle.job_id()));

        assert!(matches!(handle.wait().await, JobOutcome::Cancelled));
        assert_eq!(controller.status(handle.job_id()).unwrap(), JobStatus::Cancelled);

        let panel = host.connect(ExtensionContext::ControlPanel, &StorageConfig::default());
        assert!(panel.list().await.unwrap().is_empty());
        assert!(matches!(
            panel.retrieve(handle.job_id()).await,
            Err(StorageError::NotFound(_))
        ));

        let playback = source.playback_state();
        assert_eq!(playback.position_sec, 1.5);
        assert!(!playback.paused);
    }

    #[tokio::test]
    async fn test_selection_clamped_to_duration() {
        let (_host, controller) = setup(PipelineConfig::default());
        let source = Arc::new(MockVideoSource::new("short", 2.0));

        let artifact = controller
            .create_artifact(source, Selection::new(0.0, 5.0, 10.0, 64, 48))
            .await
            .unwrap();

        assert_eq!(artifact.metadata().frame_count, 20);
        assert!((artifact.metadata().duration_sec - 2.0).abs() < 0.05);
    }

    #[tokio::test]
    async fn test_one_job_per_source() {
        let (_host, controller) = setup(PipelineConfig::default());
        let source = Arc::new(MockVideoSource::new("tab-1", 5.0).with_seek_latency(Duration::from_millis(20)));
        let selection = Selection::new(0.0, 1.0, 10.0, 32, 24);

        let mut first = controller.start(source.clone(), selection).unwrap();
        let busy = controller.start(source.clone(), selection);
        assert!(matches!(busy, Err(PipelineError::SourceBusy(ref id)) if id == "tab-1"));

        // 另一个视频源不受影响
        let other = Arc::new(MockVideoSource::new("tab-2", 5.0));
        let mut second = controller.start(other, selection).unwrap();

        assert!(matches!(first.wait().await, JobOutcome::Done(_)));
        assert!(matches!(second.wait().await, JobOutcome::Done(_)));
        assert!(controller.start(source, selection).is_ok());
    }

    #[tokio::test]
    async fn test_invalid_selection_rejected_upfront() {
        let (_host, controller) = setup(PipelineConfig::default());
        let source = Arc::new(MockVideoSource::new("tab-1", 5.0));

        let result = controller.start(source.clone(), Selection::new(2.0, 1.0, 10.0, 64, 48));
        assert!(matches!(result, Err(PipelineError::InvalidSelection(_))));
        assert_eq!(controller.active_jobs(), 0);
        assert_eq!(source.seek_count(), 0);
    }

    #[tokio::test]
    async fn test_stalled_seeks_fail_job() {
        let mut config = PipelineConfig::default();
        config.capture.seek_timeout_ms = 20;
        let (_host, controller) = setup(config);
        let source = Arc::new(MockVideoSource::new("tab-1", 5.0).with_stalled_times(vec![0.2, 0.5, 0.7]));

        let mut handle = controller
            .start(source.clone(), Selection::new(0.0, 1.0, 10.0, 64, 48))
            .unwrap();

        match handle.wait().await {
            JobOutcome::Failed { reason, .. } => assert_eq!(reason, FailureReason::InsufficientFrames),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(source.restore_count(), 1);
    }

    #[tokio::test]
    async fn test_storage_unavailable() {
        let mut config = PipelineConfig::default();
        config.storage.request_timeout_ms = 200;
        let (host, controller) = setup(config);
        host.shutdown();
        let source = Arc::new(MockVideoSource::new("tab-1", 5.0));

        let mut handle = controller
            .start(source, Selection::new(0.0, 0.5, 10.0, 32, 24))
            .unwrap();
        let job_id = handle.job_id().to_string();

        let mut terminal = None;
        while let Some(event) = handle.next_event().await {
            terminal = Some(event);
        }
        assert!(matches!(
            terminal,
            Some(JobEvent::Failed { reason: FailureReason::StorageUnavailable, .. })
        ));
        assert!(matches!(
            controller.wait(&job_id).await,
            Err(PipelineError::JobFailed { reason: FailureReason::StorageUnavailable, .. })
        ));
        assert_eq!(controller.status(&job_id).unwrap(), JobStatus::Failed);

        // 存储一直不可用时产物留着，可以反复重试
        for _ in 0..2 {
            assert!(matches!(
                controller.retry_store(&job_id).await,
                Err(PipelineError::Storage(StorageError::Unavailable(_)))
            ));
        }
    }

    /// 前几次 put 失败的存储
    struct FlakyStore {
        inner: MemoryArtifactStore,
        failures_left: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ArtifactStore for FlakyStore {
        async fn put(&self, artifact: &GifArtifact) -> Result<(), StorageError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(StorageError::Unavailable("quota exceeded".to_string()));
            }
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
    async fn test_retry_store_after_storage_failure() {
        let store = Arc::new(FlakyStore {
            inner: MemoryArtifactStore::new(),
            failures_left: AtomicUsize::new(1),
        });
        let (host, controller) = setup_with_store(PipelineConfig::default(), store);
        let source = Arc::new(MockVideoSource::new("tab-1", 5.0));

        let mut handle = controller
            .start(source, Selection::new(0.0, 0.5, 10.0, 32, 24))
            .unwrap();
        let job_id = handle.job_id().to_string();
        assert!(matches!(
            handle.wait().await,
            JobOutcome::Failed { reason: FailureReason::StorageUnavailable, .. }
        ));

        let summary = controller.retry_store(&job_id).await.unwrap();
        assert_eq!(summary.id, job_id);
        assert_eq!(summary.metadata.frame_count, 5);

        let panel = host.connect(ExtensionContext::ControlPanel, &StorageConfig::default());
        let stored = panel.retrieve(&job_id).await.unwrap();
        assert_eq!(count_frames(stored.blob()), 5);

        // 产物已经交出去，不能再重试；任务状态保持 failed
        assert!(matches!(
            controller.retry_store(&job_id).await,
            Err(PipelineError::NothingToRetry(_))
        ));
        assert_eq!(controller.status(&job_id).unwrap(), JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_retry_store_needs_failed_persistence() {
        let (_host, controller) = setup(PipelineConfig::default());
        let source = Arc::new(MockVideoSource::new("tab-1", 5.0));

        let mut handle = controller
            .start(source, Selection::new(0.0, 0.5, 10.0, 32, 24))
            .unwrap();
        assert!(matches!(handle.wait().await, JobOutcome::Done(_)));

        assert!(matches!(
            controller.retry_store(handle.job_id()).await,
            Err(PipelineError::NothingToRetry(_))
        ));
        assert!(matches!(
            controller.retry_store("nope").await,
            Err(PipelineError::UnknownJob(_))
        ));
    }

    #[tokio::test]
    async fn test_last_event_and_forget() {
        let (_host, controller) = setup(PipelineConfig::default());
        let source = Arc::new(MockVideoSource::new("tab-1", 5.0).with_seek_latency(Duration::from_millis(30)));

        let mut handle = controller
            .start(source, Selection::new(0.0, 1.0, 10.0, 32, 24))
            .unwrap();
        let job_id = handle.job_id().to_string();

        // 第一条事件是抽帧进度，此时任务还在跑
        let first = handle.next_event().await;
        assert!(matches!(first, Some(JobEvent::Progress(ref p)) if p.stage == Stage::Extracting));
        match controller.last_event(&job_id).unwrap() {
            Some(JobEvent::Progress(p)) => assert_eq!(p.stage, Stage::Extracting),
            other => panic!("unexpected last event {:?}", other),
        }
        assert!(!controller.forget(&job_id));
        assert!(controller.status(&job_id).is_ok());

        let summary = controller.wait(&job_id).await.unwrap();
        match controller.last_event(&job_id).unwrap() {
            Some(JobEvent::Completed { artifact_id, .. }) => assert_eq!(artifact_id, summary.id),
            other => panic!("unexpected last event {:?}", other),
        }

        assert!(controller.forget(&job_id));
        assert!(!controller.forget(&job_id));
        assert!(matches!(controller.status(&job_id), Err(PipelineError::UnknownJob(_))));
        assert!(matches!(controller.last_event(&job_id), Err(PipelineError::UnknownJob(_))));
    }

    #[tokio::test]
    async fn test_cancelled_job_reports_where_it_stopped() {
        let mut config = PipelineConfig::default();
        config.progress.throttle_ms = 60_000;
        let (_host, controller) = setup(config);
        let source = Arc::new(MockVideoSource::new("tab-1", 5.0).with_seek_latency(Duration::from_millis(20)));

        let mut handle = controller
            .start(source, Selection::new(0.0, 2.0, 10.0, 32, 24))
            .unwrap();

        let first = handle.next_event().await;
        assert!(matches!(first, Some(JobEvent::Progress(ref p)) if p.percent == 0));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(controller.cancel(handle.job_id()));

        // 被节流的进度在取消事件之前补发
        let mut events = Vec::new();
        while let Some(event) = handle.next_event().await {
            events.push(event);
        }
        assert!(matches!(events.last(), Some(JobEvent::Cancelled)));
        assert!(matches!(
            events.first(),
            Some(JobEvent::Progress(p)) if p.stage == Stage::Extracting && p.percent > 0
        ));
    }

    #[tokio::test]
    async fn test_finished_jobs_are_evicted() {
        let (_host, mut controller) = setup(PipelineConfig::default());
        controller.finished_limit = 2;
        let source = Arc::new(MockVideoSource::new("tab-1", 5.0));
        let selection = Selection::new(0.0, 0.3, 10.0, 16, 12);

        let mut ids = Vec::new();
        for _ in 0..3 {
            let mut handle = controller.start(source.clone(), selection).unwrap();
            assert!(matches!(handle.wait().await, JobOutcome::Done(_)));
            ids.push(handle.job_id().to_string());
        }

        assert!(matches!(controller.status(&ids[0]), Err(PipelineError::UnknownJob(_))));
        assert_eq!(controller.status(&ids[1]).unwrap(), JobStatus::Done);
        assert_eq!(controller.status(&ids[2]).unwrap(), JobStatus::Done);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let (_host, controller) = setup(PipelineConfig::default());
        assert!(!controller.cancel("nope"));
        assert!(matches!(controller.status("nope"), Err(PipelineError::UnknownJob(_))));
    }
}
