// 该文件是 Xuese （血色） 项目的一部分。
// src/task.rs - 扫描会话任务
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

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::detector::{Detection, FaceLocalizer};
use crate::frame::Frame;
use crate::handoff::OutcomeHandoff;
use crate::input::{Feed, FrameFeed};
use crate::interpret::{HbScale, interpret_tensor};
use crate::model::{InferenceInput, Model};
use crate::outcome::OutcomeRecord;
use crate::output::{Navigator, OutcomeStore, OutputError, Render, ScanView};
use crate::roi::extract_roi;
use crate::scan::{
  Clock, FailureReason, ScanConfig, ScanController, ScanPhase, ScanState, SystemClock,
};

/// 取帧时的最长等待时间
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub trait Task<I, M, O>: Sized {
  type Output;
  fn run_task(self, input: I, model: M, output: O) -> Self::Output;
}

/// 会话取消标记，可在任意线程中触发
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::Release);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::Acquire)
  }
}

/// 一次扫描会话的结局
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
  Completed(OutcomeRecord),
  Failed(FailureReason),
  Cancelled,
}

/// 人脸定位器与推理模型
pub struct Pipeline<L, M> {
  pub localizer: L,
  pub model: M,
}

pub type PreviewSink = Box<dyn for<'a> Render<Frame, ScanView<'a>, Error = OutputError>>;

/// 扫描循环的出口；完成时交出控制器，推理失败仍由它记录
enum LoopExit<K> {
  Completed {
    frame: Frame,
    detection: Detection,
    controller: K,
  },
  Failed(FailureReason),
  Cancelled,
}

/// 单次扫描会话
///
/// 每个 tick 取一帧最新帧，做人脸定位并推进扫描状态；完成时裁剪 ROI、推理并交接结果。
/// 任何出口都会释放帧源。
pub struct ScanTask<C = SystemClock> {
  config: ScanConfig,
  scale: HbScale,
  clock: C,
  cancel: CancelToken,
  preview: Option<PreviewSink>,
  poll_interval: Duration,
}

impl Default for ScanTask<SystemClock> {
  fn default() -> Self {
    Self::new(ScanConfig::default())
  }
}

impl ScanTask<SystemClock> {
  pub fn new(config: ScanConfig) -> Self {
    Self {
      config,
      scale: HbScale::default(),
      clock: SystemClock::default(),
      cancel: CancelToken::new(),
      preview: None,
      poll_interval: DEFAULT_POLL_INTERVAL,
    }
  }
}

impl<C: Clock> ScanTask<C> {
  pub fn with_clock<C2: Clock>(self, clock: C2) -> ScanTask<C2> {
    ScanTask {
      config: self.config,
      scale: self.scale,
      clock,
      cancel: self.cancel,
      preview: self.preview,
      poll_interval: self.poll_interval,
    }
  }

  pub fn with_scale(mut self, scale: HbScale) -> Self {
    self.scale = scale;
    self
  }

  pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn with_preview(mut self, preview: PreviewSink) -> Self {
    self.preview = Some(preview);
    self
  }

  pub fn with_poll_interval(mut self, interval: Duration) -> Self {
    self.poll_interval = interval;
    self
  }

  pub fn cancel_token(&self) -> CancelToken {
    self.cancel.clone()
  }

  fn render_preview(&self, frame: &Frame, detection: Option<&Detection>, state: &ScanState) {
    if let Some(preview) = &self.preview {
      let view = ScanView { detection, state };
      if let Err(e) = preview.render_result(frame, &view) {
        warn!("预览输出失败: {}", e);
      }
    }
  }

  fn scan_loop<I: FrameFeed, L: FaceLocalizer>(
    &self,
    feed: &mut I,
    localizer: &L,
  ) -> LoopExit<ScanController<&C>> {
    let mut controller = ScanController::new(self.config.clone(), &self.clock);
    let mut ticks = 0u64;

    loop {
      if self.cancel.is_cancelled() {
        return LoopExit::Cancelled;
      }

      let frame = match feed.next_frame(self.poll_interval) {
        Feed::Frame(frame) => frame,
        Feed::Pending => {
          if let ScanPhase::Failed(reason) = &controller.on_idle().phase {
            return LoopExit::Failed(reason.clone());
          }
          continue;
        }
        Feed::Closed => {
          // 帧源关闭前若已超时，仍按超时处理
          if let ScanPhase::Failed(reason) = &controller.on_idle().phase {
            return LoopExit::Failed(reason.clone());
          }
          warn!("帧源已关闭");
          return LoopExit::Failed(FailureReason::FrameSourceLost);
        }
      };
      ticks += 1;

      // 定位失败与未检测到人脸同样处理
      let detection = match localizer.detect(&frame.image) {
        Ok(detections) => detections.into_iter().next(),
        Err(e) => {
          warn!("人脸定位失败: {}", e);
          None
        }
      };

      let state = controller.on_frame(detection.as_ref(), frame.width()).clone();
      self.render_preview(&frame, detection.as_ref(), &state);

      match state.phase {
        ScanPhase::Completed => {
          info!("第 {} 个 tick 完成扫描", ticks);
          return match detection {
            Some(detection) => LoopExit::Completed {
              frame,
              detection,
              controller,
            },
            None => LoopExit::Failed(FailureReason::InferenceError(
              "完成帧缺少检测结果".to_string(),
            )),
          };
        }
        ScanPhase::Failed(reason) => return LoopExit::Failed(reason),
        ScanPhase::Searching | ScanPhase::Scanning => {}
      }
    }
  }

  /// 对完成帧裁剪 ROI 并推理，返回解释前的原始输出
  fn analyze<M>(&self, frame: &Frame, detection: &Detection, model: &M) -> Result<Vec<f32>, FailureReason>
  where
    M: Model<Input = InferenceInput, Output = Vec<f32>>,
    M::Error: std::fmt::Display,
  {
    let (roi, input) = extract_roi(&frame.image, detection)
      .map_err(|e| FailureReason::InferenceError(e.to_string()))?;
    let center = roi.center();
    debug!(
      "ROI 中心 ({:.1}, {:.1})，边长 {:.1} 像素",
      center.x, center.y, roi.side
    );

    let now = Instant::now();
    let output = model
      .infer(&input)
      .map_err(|e| FailureReason::InferenceError(e.to_string()))?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    Ok(output)
  }
}

impl<'h, C, I, L, M, S, N> Task<I, Pipeline<L, M>, &'h OutcomeHandoff<S, N>> for ScanTask<C>
where
  C: Clock,
  I: FrameFeed,
  L: FaceLocalizer,
  M: Model<Input = InferenceInput, Output = Vec<f32>>,
  M::Error: std::fmt::Display,
  S: OutcomeStore,
  N: Navigator,
{
  type Output = SessionOutcome;

  fn run_task(
    self,
    mut input: I,
    pipeline: Pipeline<L, M>,
    handoff: &'h OutcomeHandoff<S, N>,
  ) -> Self::Output {
    info!("开始扫描会话...");
    let exit = self.scan_loop(&mut input, &pipeline.localizer);
    input.release();

    let (frame, detection, mut controller) = match exit {
      LoopExit::Completed {
        frame,
        detection,
        controller,
      } => (frame, detection, controller),
      LoopExit::Failed(reason) => {
        handoff.fail(reason.clone());
        return SessionOutcome::Failed(reason);
      }
      LoopExit::Cancelled => {
        info!("扫描会话已取消");
        return SessionOutcome::Cancelled;
      }
    };

    let result = self
      .analyze(&frame, &detection, &pipeline.model)
      .and_then(|output| {
        interpret_tensor(&output, &self.scale)
          .map_err(|e| FailureReason::InferenceError(e.to_string()))
      });

    // 推理期间被取消时丢弃结果
    if self.cancel.is_cancelled() {
      info!("扫描会话已取消，丢弃推理结果");
      return SessionOutcome::Cancelled;
    }

    match result {
      Ok(interpretation) => SessionOutcome::Completed(handoff.complete(&interpretation, Some(&frame))),
      Err(reason) => {
        let state = controller.fail(reason.clone()).clone();
        self.render_preview(&frame, Some(&detection), &state);
        let reason = match state.phase {
          ScanPhase::Failed(reason) => reason,
          _ => reason,
        };
        handoff.fail(reason.clone());
        SessionOutcome::Failed(reason)
      }
    }
  }
}
