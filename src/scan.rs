// 该文件是 Xuese （血色） 项目的一部分。
// src/scan.rs - 扫描进度控制（漏桶状态机）
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! # 扫描进度控制
//!
//! 每一帧的人脸定位结果通过纯函数 [`step`] 推进 [`ScanState`]：
//!
//! - 检测到足够大的人脸：进度 +1.5，达到 100 时进入 `Completed`；
//! - 否则：进度 -1.0，最低为 0。
//!
//! 截止时间与进度无关，由 [`ScanController`] 借助 [`Clock`] 在每次推进前检查。
//! `Completed` 与 `Failed` 为终止状态，之后的推进不再改变状态；
//! 唯一的例外是完成后的推理出错，此时由 `Completed` 转入 `Failed(InferenceError)`。

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::detector::Detection;

pub const MAX_PROGRESS: f32 = 100.0;

/// 扫描策略参数
#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
  /// 参考帧宽度下的人脸宽度门限（像素），必须严格大于该值
  pub min_face_width: f32,
  /// 门限对应的参考帧宽度（像素）
  pub reference_width: f32,
  pub progress_step: f32,
  pub decay_step: f32,
  /// 从进入扫描循环开始计时的截止时间
  pub timeout: Duration,
}

impl Default for ScanConfig {
  fn default() -> Self {
    Self {
      min_face_width: 80.0,
      reference_width: 640.0,
      progress_step: 1.5,
      decay_step: 1.0,
      timeout: Duration::from_millis(20_000),
    }
  }
}

impl ScanConfig {
  /// 按实际帧宽线性缩放后的人脸宽度门限
  pub fn min_width_for(&self, frame_width: u32) -> f32 {
    self.min_face_width * frame_width as f32 / self.reference_width
  }

  pub fn qualifies(&self, detection: Option<&Detection>, frame_width: u32) -> bool {
    detection.is_some_and(|d| d.bbox.width() > self.min_width_for(frame_width))
  }
}

/// 扫描失败原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
  Timeout,
  InferenceError(String),
  FrameSourceLost,
}

impl FailureReason {
  /// 展示给用户的补救提示
  pub fn remediation(&self) -> &'static str {
    match self {
      FailureReason::Timeout => {
        "We couldn't get a clear view of your eyes. Move to a well-lit spot and \
         remove glasses or hair covering your eyes. Keep your whole face inside \
         the frame, then start a new scan."
      }
      FailureReason::InferenceError(_) => {
        "The analysis could not be completed. Hold still in even lighting and \
         start a new scan."
      }
      FailureReason::FrameSourceLost => {
        "The camera stopped responding. Check that no other app is using it and \
         start a new scan."
      }
    }
  }
}

impl fmt::Display for FailureReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FailureReason::Timeout => write!(f, "扫描超时"),
      FailureReason::InferenceError(msg) => write!(f, "推理失败: {}", msg),
      FailureReason::FrameSourceLost => write!(f, "帧源丢失"),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanPhase {
  Searching,
  Scanning,
  Completed,
  Failed(FailureReason),
}

/// 扫描状态，由控制器持有，渲染器只读
#[derive(Debug, Clone, PartialEq)]
pub struct ScanState {
  /// 进度，位于 [0, 100]
  pub progress: f32,
  pub is_scanning: bool,
  pub phase: ScanPhase,
}

impl Default for ScanState {
  fn default() -> Self {
    Self {
      progress: 0.0,
      is_scanning: false,
      phase: ScanPhase::Searching,
    }
  }
}

impl ScanState {
  pub fn is_terminal(&self) -> bool {
    matches!(self.phase, ScanPhase::Completed | ScanPhase::Failed(_))
  }

  pub fn is_completed(&self) -> bool {
    self.phase == ScanPhase::Completed
  }

  /// 进入失败状态
  ///
  /// `Failed` 不会被覆盖；`Completed` 只会被推理错误覆盖。
  pub fn fail(self, reason: FailureReason) -> Self {
    let keep = match (&self.phase, &reason) {
      (ScanPhase::Failed(_), _) => true,
      (ScanPhase::Completed, FailureReason::InferenceError(_)) => false,
      (ScanPhase::Completed, _) => true,
      _ => false,
    };
    if keep {
      return self;
    }
    Self {
      is_scanning: false,
      phase: ScanPhase::Failed(reason),
      ..self
    }
  }

  /// 扫描界面的提示语
  pub fn guidance(&self) -> &'static str {
    match self.phase {
      ScanPhase::Searching => "Position your face in the frame",
      ScanPhase::Scanning => "Scanning...",
      ScanPhase::Completed => "Scan complete",
      ScanPhase::Failed(_) => "Scan failed",
    }
  }
}

/// 按一帧的检测结果推进扫描状态
///
/// 只使用调用方传入的第一个检测结果。终止状态原样返回。
pub fn step(
  state: ScanState,
  detection: Option<&Detection>,
  frame_width: u32,
  config: &ScanConfig,
) -> ScanState {
  if state.is_terminal() {
    return state;
  }

  if config.qualifies(detection, frame_width) {
    let progress = state.progress + config.progress_step;
    if progress >= MAX_PROGRESS {
      ScanState {
        progress: MAX_PROGRESS,
        is_scanning: true,
        phase: ScanPhase::Completed,
      }
    } else {
      ScanState {
        progress,
        is_scanning: true,
        phase: ScanPhase::Scanning,
      }
    }
  } else {
    ScanState {
      progress: (state.progress - config.decay_step).max(0.0),
      is_scanning: false,
      phase: ScanPhase::Searching,
    }
  }
}

/// 单调时钟，返回自时钟原点起的时长
pub trait Clock {
  fn now(&self) -> Duration;
}

impl<C: Clock + ?Sized> Clock for &C {
  fn now(&self) -> Duration {
    (**self).now()
  }
}

pub struct SystemClock {
  origin: Instant,
}

impl Default for SystemClock {
  fn default() -> Self {
    Self {
      origin: Instant::now(),
    }
  }
}

impl Clock for SystemClock {
  fn now(&self) -> Duration {
    self.origin.elapsed()
  }
}

/// 手动推进的时钟，用于回放与测试
///
/// 设置了 `auto_step` 时，每次读取后自动前进该时长。
#[derive(Clone, Default)]
pub struct ManualClock {
  now_ms: Arc<AtomicU64>,
  auto_step_ms: u64,
}

impl ManualClock {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_auto_step(step: Duration) -> Self {
    Self {
      now_ms: Arc::new(AtomicU64::new(0)),
      auto_step_ms: step.as_millis() as u64,
    }
  }

  pub fn advance(&self, by: Duration) {
    self
      .now_ms
      .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
  }
}

impl Clock for ManualClock {
  fn now(&self) -> Duration {
    Duration::from_millis(self.now_ms.fetch_add(self.auto_step_ms, Ordering::SeqCst))
  }
}

/// 扫描控制器：持有扫描状态与截止时间
///
/// 每次推进（[`ScanController::on_frame`] 或 [`ScanController::on_idle`]）只读取一次时钟。
pub struct ScanController<C> {
  config: ScanConfig,
  clock: C,
  started: Duration,
  state: ScanState,
}

impl<C: Clock> ScanController<C> {
  /// 创建控制器，截止时间从此刻开始计算
  pub fn new(config: ScanConfig, clock: C) -> Self {
    let started = clock.now();
    Self {
      config,
      clock,
      started,
      state: ScanState::default(),
    }
  }

  pub fn state(&self) -> &ScanState {
    &self.state
  }

  pub fn config(&self) -> &ScanConfig {
    &self.config
  }

  /// 检查截止时间，已超时则进入 `Failed(Timeout)` 并返回 `true`
  fn check_deadline(&mut self) -> bool {
    if self.state.is_terminal() {
      return true;
    }
    let elapsed = self.clock.now().saturating_sub(self.started);
    if elapsed >= self.config.timeout {
      warn!(
        "扫描超时: {:.1?}，进度 {:.1}",
        elapsed, self.state.progress
      );
      self.state = std::mem::take(&mut self.state).fail(FailureReason::Timeout);
      return true;
    }
    false
  }

  /// 用一帧的检测结果推进状态
  pub fn on_frame(&mut self, detection: Option<&Detection>, frame_width: u32) -> &ScanState {
    if self.check_deadline() {
      return &self.state;
    }

    let previous = std::mem::take(&mut self.state);
    let was_scanning = previous.is_scanning;
    self.state = step(previous, detection, frame_width, &self.config);
    debug!(
      "扫描进度: {:.1} ({})",
      self.state.progress,
      self.state.guidance()
    );

    if self.state.is_completed() {
      info!("扫描完成");
    } else if self.state.is_scanning != was_scanning {
      info!("扫描状态切换: {}", self.state.guidance());
    }
    &self.state
  }

  /// 没有新帧时只检查截止时间
  pub fn on_idle(&mut self) -> &ScanState {
    self.check_deadline();
    &self.state
  }

  /// 外部步骤（推理）失败时调用
  pub fn fail(&mut self, reason: FailureReason) -> &ScanState {
    let message = reason.to_string();
    let before = self.state.phase.clone();
    self.state = std::mem::take(&mut self.state).fail(reason);
    if self.state.phase != before {
      warn!("扫描失败: {}", message);
    }
    &self.state
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detector::{BoundingBox, Point};

  fn face(width: f32) -> Detection {
    Detection {
      bbox: BoundingBox::new(100.0, 100.0, 100.0 + width, 100.0 + width),
      landmarks: vec![Point::new(130.0, 140.0), Point::new(170.0, 140.0)],
      score: 0.9,
    }
  }

  #[test]
  fn qualifying_ticks_rise_and_complete_once() {
    let config = ScanConfig::default();
    let detection = face(120.0);
    let mut state = ScanState::default();
    let mut completions = 0;

    for tick in 1..=80 {
      let before = state.progress;
      let was_completed = state.is_completed();
      state = step(state, Some(&detection), 640, &config);
      if state.is_completed() && !was_completed {
        completions += 1;
        assert_eq!(tick, 67);
      }
      if !was_completed && !state.is_completed() {
        assert_eq!(state.progress - before, 1.5);
        assert_eq!(state.phase, ScanPhase::Scanning);
      }
    }

    assert_eq!(completions, 1);
    assert_eq!(state.progress, 100.0);
    assert_eq!(state.phase, ScanPhase::Completed);
  }

  #[test]
  fn absent_detection_decays_to_zero() {
    let config = ScanConfig::default();
    let mut state = ScanState {
      progress: 3.0,
      is_scanning: true,
      phase: ScanPhase::Scanning,
    };

    for expected in [2.0, 1.0, 0.0, 0.0] {
      state = step(state, None, 640, &config);
      assert_eq!(state.progress, expected);
      assert!(!state.is_scanning);
      assert_eq!(state.phase, ScanPhase::Searching);
    }
  }

  #[test]
  fn width_threshold_is_strict_and_scaled() {
    let config = ScanConfig::default();
    assert_eq!(config.min_width_for(640), 80.0);
    assert_eq!(config.min_width_for(1280), 160.0);

    assert!(!config.qualifies(Some(&face(80.0)), 640));
    assert!(config.qualifies(Some(&face(81.0)), 640));
    assert!(!config.qualifies(Some(&face(160.0)), 1280));
    assert!(config.qualifies(Some(&face(161.0)), 1280));
    assert!(!config.qualifies(None, 640));
  }

  #[test]
  fn terminal_states_are_absorbing() {
    let config = ScanConfig::default();
    let failed = ScanState::default().fail(FailureReason::Timeout);
    let after = step(failed.clone(), Some(&face(200.0)), 640, &config);
    assert_eq!(after, failed);

    let completed = ScanState {
      progress: 100.0,
      is_scanning: true,
      phase: ScanPhase::Completed,
    };
    assert_eq!(step(completed.clone(), None, 640, &config), completed);
    assert_eq!(
      completed.clone().fail(FailureReason::FrameSourceLost),
      completed
    );
    assert_eq!(
      failed.clone().fail(FailureReason::InferenceError("late".to_string())),
      failed
    );
  }

  #[test]
  fn inference_error_after_completion_fails_the_scan() {
    let clock = ManualClock::new();
    let mut controller = ScanController::new(ScanConfig::default(), clock.clone());
    for _ in 0..67 {
      clock.advance(Duration::from_millis(33));
      controller.on_frame(Some(&face(200.0)), 640);
    }
    assert!(controller.state().is_completed());

    let state = controller.fail(FailureReason::InferenceError("bad tensor".to_string()));
    assert_eq!(
      state.phase,
      ScanPhase::Failed(FailureReason::InferenceError("bad tensor".to_string()))
    );
    assert!(!state.is_scanning);
    assert_eq!(state.progress, 100.0);
  }

  #[test]
  fn controller_times_out_at_deadline() {
    let clock = ManualClock::new();
    let mut controller = ScanController::new(ScanConfig::default(), clock.clone());

    clock.advance(Duration::from_millis(19_999));
    assert!(!controller.on_frame(Some(&face(120.0)), 640).is_terminal());
    assert_eq!(controller.state().progress, 1.5);

    clock.advance(Duration::from_millis(1));
    let state = controller.on_idle();
    assert_eq!(state.phase, ScanPhase::Failed(FailureReason::Timeout));
    assert_eq!(state.progress, 1.5);

    // 超时后检测结果不再推进进度
    assert_eq!(controller.on_frame(Some(&face(120.0)), 640).progress, 1.5);
  }

  #[test]
  fn guidance_follows_phase() {
    let config = ScanConfig::default();
    let state = ScanState::default();
    assert_eq!(state.guidance(), "Position your face in the frame");
    let state = step(state, Some(&face(100.0)), 640, &config);
    assert_eq!(state.guidance(), "Scanning...");
  }

  #[test]
  fn auto_step_clock_advances_per_read() {
    let clock = ManualClock::with_auto_step(Duration::from_millis(33));
    assert_eq!(clock.now(), Duration::ZERO);
    assert_eq!(clock.now(), Duration::from_millis(33));
  }
}
