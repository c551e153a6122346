use super::event::{JobEvent, ProgressEvent, Stage};
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProgressConfig {
    /// 两次推送的最小间隔
    pub throttle_ms: u64,
    pub channel_capacity: usize,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            throttle_ms: 40,
            channel_capacity: 256,
        }
    }
}

#[derive(Default)]
struct ReporterState {
    stage: Option<Stage>,
    percent: u8,
    last_emit: Option<Instant>,
    pending: Option<ProgressEvent>,
    last_progress: Option<ProgressEvent>,
    terminal: Option<JobEvent>,
}

/// 单个任务的进度通道
///
/// Guarantees to every subscriber:
/// - percent is an integer and never goes down within a stage
/// - stages only move forward
/// - exactly one terminal event, after which nothing else is sent
///
/// Updates arriving faster than the throttle window are coalesced. The first
/// event of a stage and a stage's 100% are always delivered.
pub struct ProgressReporter {
    job_id: String,
    sender: broadcast::Sender<JobEvent>,
    throttle: Duration,
    state: Mutex<ReporterState>,
}

impl ProgressReporter {
    pub fn new(job_id: impl Into<String>, config: &ProgressConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(16));
        Self {
            job_id: job_id.into(),
            sender,
            throttle: Duration::from_millis(config.throttle_ms),
            state: Mutex::new(ReporterState::default()),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    fn lock_state(&self) -> MutexGuard<'_, ReporterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 百分比先四舍五入再上报；返回是否被接受
    pub fn report(&self, stage: Stage, percent: f64, message: impl Into<String>) -> bool {
        let percent = round_percent(percent);
        let mut state = self.lock_state();

        if state.terminal.is_some() {
            return false;
        }

        let event = ProgressEvent {
            stage,
            percent,
            message: message.into(),
        };

        match state.stage {
            Some(current) if stage < current => {
                debug!(
                    "Job {}: dropped {} update after {} started",
                    self.job_id, stage, current
                );
                false
            }
            Some(current) if stage == current => {
                if percent < state.percent {
                    trace!(
                        "Job {}: dropped regressing {} {}% < {}%",
                        self.job_id,
                        stage,
                        percent,
                        state.percent
                    );
                    return false;
                }
                state.percent = percent;

                let due = state
                    .last_emit
                    .map_or(true, |at| at.elapsed() >= self.throttle);
                if percent == 100 || due {
                    state.pending = None;
                    self.emit(&mut state, event);
                } else {
                    state.pending = Some(event);
                }
                true
            }
            _ => {
                if let Some(pending) = state.pending.take() {
                    self.emit(&mut state, pending);
                }
                debug!("📶 Job {}: stage {}", self.job_id, stage);
                state.stage = Some(stage);
                state.percent = percent;
                self.emit(&mut state, event);
                true
            }
        }
    }

    pub fn complete_stage(&self, stage: Stage, message: impl Into<String>) -> bool {
        self.report(stage, 100.0, message)
    }

    /// Sends any coalesced update that is still waiting; used before a
    /// failure or cancellation so observers see where the job stopped.
    pub fn flush(&self) {
        let mut state = self.lock_state();
        if state.terminal.is_some() {
            return;
        }
        if let Some(pending) = state.pending.take() {
            self.emit(&mut state, pending);
        }
    }

    /// 终止事件只发送一次
    pub fn finish(&self, event: JobEvent) -> bool {
        let mut state = self.lock_state();
        if state.terminal.is_some() {
            return false;
        }
        state.pending = None;
        state.terminal = Some(event.clone());
        let _ = self.sender.send(event);
        true
    }

    pub fn is_finished(&self) -> bool {
        self.lock_state().terminal.is_some()
    }

    /// Last progress update actually delivered.
    pub fn last_progress(&self) -> Option<ProgressEvent> {
        self.lock_state().last_progress.clone()
    }

    pub fn terminal_event(&self) -> Option<JobEvent> {
        self.lock_state().terminal.clone()
    }

    fn emit(&self, state: &mut ReporterState, event: ProgressEvent) {
        state.last_emit = Some(Instant::now());
        state.last_progress = Some(event.clone());
        // 没有订阅者时 send 会失败，忽略即可
        let _ = self.sender.send(JobEvent::Progress(event));
    }
}

fn round_percent(percent: f64) -> u8 {
    if percent.is_nan() {
        return 0;
    }
    percent.round().clamp(0.0, 100.0) as u8
}
