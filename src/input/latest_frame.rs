// 该文件是 Xuese （血色） 项目的一部分。
// src/input/latest_frame.rs - 单槽最新帧缓冲
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

//! # 帧供给
//!
//! 扫描循环不直接迭代帧源，而是通过 [`FrameFeed`] 取帧：
//!
//! - [`LatestFrameBuffer`]：采集线程持续读取帧源，只保留最新的一帧。
//!   推理耗时较长时会跳过中间帧，但绝不会倒序处理。
//! - [`SequentialFeed`]：在当前线程中逐帧迭代，不丢帧，用于回放与测试。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::{FrameSource, InputError, frame_interval};
use crate::frame::Frame;

/// 连续采集失败达到该次数后认为帧源已丢失
const MAX_CONSECUTIVE_CAPTURE_ERRORS: usize = 10;
/// 节流等待时检查停止标记的间隔
const PACING_SLICE: Duration = Duration::from_millis(20);

/// 一次取帧的结果
#[derive(Debug)]
pub enum Feed {
  /// 新的一帧（保证晚于上一次取到的帧）
  Frame(Frame),
  /// 等待期间没有新帧
  Pending,
  /// 帧源已关闭，不会再有新帧
  Closed,
}

/// 扫描循环的取帧接口
pub trait FrameFeed {
  /// 等待至多 `wait` 时长，取出一帧比上一次更新的帧
  fn next_frame(&mut self, wait: Duration) -> Feed;

  /// 停止采集并释放帧源，可重复调用
  fn release(&mut self) {}
}

impl<F: FrameFeed + ?Sized> FrameFeed for &mut F {
  fn next_frame(&mut self, wait: Duration) -> Feed {
    (**self).next_frame(wait)
  }

  fn release(&mut self) {
    (**self).release()
  }
}

/// 采集选项
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureOptions {
  /// 采集期间开启补光（若帧源支持）
  pub illumination: bool,
}

#[derive(Default)]
struct Slot {
  frame: Option<Frame>,
  closed: bool,
}

struct Shared {
  slot: Mutex<Slot>,
  ready: Condvar,
  stop: AtomicBool,
}

/// 单槽最新帧缓冲
///
/// 帧源在采集线程内打开，打开失败（例如权限被拒绝）会从 [`LatestFrameBuffer::spawn`] 直接返回。
/// 缓冲被 drop 或调用 [`FrameFeed::release`] 时，采集线程退出并释放帧源。
pub struct LatestFrameBuffer {
  shared: Arc<Shared>,
  worker: Option<JoinHandle<()>>,
  last_index: Option<u64>,
  width: u32,
  height: u32,
}

impl LatestFrameBuffer {
  pub fn spawn<S, F>(open: F, options: CaptureOptions) -> Result<Self, InputError>
  where
    S: FrameSource,
    F: FnOnce() -> Result<S, InputError> + Send + 'static,
  {
    let shared = Arc::new(Shared {
      slot: Mutex::new(Slot::default()),
      ready: Condvar::new(),
      stop: AtomicBool::new(false),
    });
    let (opened_tx, opened_rx) = mpsc::sync_channel::<Result<(u32, u32), InputError>>(1);

    let worker_shared = Arc::clone(&shared);
    let worker = thread::Builder::new()
      .name("xuese-capture".to_string())
      .spawn(move || {
        let mut source = match open() {
          Ok(source) => source,
          Err(e) => {
            let _ = opened_tx.send(Err(e));
            return;
          }
        };
        let _ = opened_tx.send(Ok((source.width(), source.height())));
        capture_loop(&mut source, &worker_shared, options);
      })?;

    let (width, height) = match opened_rx.recv() {
      Ok(Ok(size)) => size,
      Ok(Err(e)) => {
        let _ = worker.join();
        return Err(e);
      }
      Err(_) => {
        let _ = worker.join();
        return Err(InputError::Unavailable("采集线程意外退出".to_string()));
      }
    };

    info!("采集线程已启动: {}x{}", width, height);
    Ok(Self {
      shared,
      worker: Some(worker),
      last_index: None,
      width,
      height,
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }
}

fn capture_loop<S: FrameSource>(source: &mut S, shared: &Shared, options: CaptureOptions) {
  if options.illumination {
    match source.set_illumination(true) {
      Ok(true) => info!("补光已开启"),
      Ok(false) => debug!("帧源不支持补光"),
      Err(e) => warn!("开启补光失败: {}", e),
    }
  }

  // 离线帧源按帧率出帧，否则会在扫描循环取到几帧之前就被读完
  let interval = if source.is_live() {
    None
  } else {
    source.fps().and_then(frame_interval)
  };
  if let Some(interval) = interval {
    info!("离线帧源，按 {:.1?} 间隔出帧", interval);
  }

  let mut next_due = Instant::now();
  let mut consecutive_errors = 0usize;
  while !shared.stop.load(Ordering::Acquire) {
    if let Some(interval) = interval {
      if !wait_until(next_due, &shared.stop) {
        break;
      }
      next_due += interval;
    }

    match source.next() {
      Some(Ok(frame)) => {
        consecutive_errors = 0;
        let mut slot = shared.slot.lock().unwrap_or_else(PoisonError::into_inner);
        // 只保留最新帧，旧帧直接覆盖
        if frame.is_newer_than(slot.frame.as_ref().map(|f| f.index)) {
          slot.frame = Some(frame);
          shared.ready.notify_all();
        }
      }
      Some(Err(e)) => {
        consecutive_errors += 1;
        warn!("采集失败 ({}/{}): {}", consecutive_errors, MAX_CONSECUTIVE_CAPTURE_ERRORS, e);
        if consecutive_errors >= MAX_CONSECUTIVE_CAPTURE_ERRORS {
          error!("连续采集失败，帧源视为已丢失");
          break;
        }
      }
      None => {
        info!("帧源已结束");
        break;
      }
    }
  }

  if options.illumination
    && let Err(e) = source.set_illumination(false)
  {
    warn!("关闭补光失败: {}", e);
  }

  let mut slot = shared.slot.lock().unwrap_or_else(PoisonError::into_inner);
  slot.closed = true;
  shared.ready.notify_all();
}

/// 等到 `deadline`，期间收到停止信号则返回 `false`
fn wait_until(deadline: Instant, stop: &AtomicBool) -> bool {
  loop {
    if stop.load(Ordering::Acquire) {
      return false;
    }
    let now = Instant::now();
    if now >= deadline {
      return true;
    }
    thread::sleep((deadline - now).min(PACING_SLICE));
  }
}

impl FrameFeed for LatestFrameBuffer {
  fn next_frame(&mut self, wait: Duration) -> Feed {
    let deadline = Instant::now() + wait;
    let mut slot = self
      .shared
      .slot
      .lock()
      .unwrap_or_else(PoisonError::into_inner);

    loop {
      if slot
        .frame
        .as_ref()
        .is_some_and(|frame| frame.is_newer_than(self.last_index))
      {
        if let Some(frame) = slot.frame.take() {
          self.last_index = Some(frame.index);
          return Feed::Frame(frame);
        }
      }
      if slot.closed {
        return Feed::Closed;
      }

      let now = Instant::now();
      if now >= deadline {
        return Feed::Pending;
      }
      slot = self
        .shared
        .ready
        .wait_timeout(slot, deadline - now)
        .map(|(guard, _)| guard)
        .unwrap_or_else(|e| e.into_inner().0);
    }
  }

  fn release(&mut self) {
    self.shared.stop.store(true, Ordering::Release);
    if let Some(worker) = self.worker.take() {
      debug!("等待采集线程退出");
      if worker.join().is_err() {
        error!("采集线程异常退出");
      }
      info!("帧源已释放");
    }
  }
}

impl Drop for LatestFrameBuffer {
  fn drop(&mut self) {
    self.release();
  }
}

/// 在当前线程中按顺序迭代帧源，不丢帧
pub struct SequentialFeed<S> {
  source: Option<S>,
  last_index: Option<u64>,
}

impl<S: Iterator<Item = Result<Frame, InputError>>> SequentialFeed<S> {
  pub fn new(source: S) -> Self {
    Self {
      source: Some(source),
      last_index: None,
    }
  }
}

impl<S: Iterator<Item = Result<Frame, InputError>>> FrameFeed for SequentialFeed<S> {
  fn next_frame(&mut self, _wait: Duration) -> Feed {
    let Some(source) = self.source.as_mut() else {
      return Feed::Closed;
    };

    match source.next() {
      Some(Ok(frame)) if frame.is_newer_than(self.last_index) => {
        self.last_index = Some(frame.index);
        Feed::Frame(frame)
      }
      Some(Ok(frame)) => {
        warn!("丢弃乱序帧 {}", frame.index);
        Feed::Pending
      }
      Some(Err(e)) => {
        warn!("读取帧失败: {}", e);
        Feed::Pending
      }
      None => Feed::Closed,
    }
  }

  fn release(&mut self) {
    self.source.take();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;

  fn frame(index: u64) -> Frame {
    Frame::new(RgbImage::new(2, 2), index, index * 33)
  }

  struct VecSource {
    frames: std::vec::IntoIter<Frame>,
    released: Arc<AtomicBool>,
    fps: Option<f64>,
  }

  impl Iterator for VecSource {
    type Item = Result<Frame, InputError>;

    fn next(&mut self) -> Option<Self::Item> {
      std::thread::sleep(Duration::from_millis(2));
      self.frames.next().map(Ok)
    }
  }

  impl FrameSource for VecSource {
    fn width(&self) -> u32 {
      2
    }

    fn height(&self) -> u32 {
      2
    }

    fn fps(&self) -> Option<f64> {
      self.fps
    }

    fn is_live(&self) -> bool {
      self.fps.is_none()
    }
  }

  impl Drop for VecSource {
    fn drop(&mut self) {
      self.released.store(true, Ordering::SeqCst);
    }
  }

  #[test]
  fn latest_buffer_never_goes_backwards_and_releases_source() {
    let released = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&released);
    let mut buffer = LatestFrameBuffer::spawn(
      move || {
        Ok(VecSource {
          frames: (0..20).map(frame).collect::<Vec<_>>().into_iter(),
          released: flag,
          fps: None,
        })
      },
      CaptureOptions::default(),
    )
    .unwrap();

    let mut seen = Vec::new();
    loop {
      match buffer.next_frame(Duration::from_millis(200)) {
        Feed::Frame(frame) => seen.push(frame.index),
        Feed::Pending => continue,
        Feed::Closed => break,
      }
    }

    assert!(!seen.is_empty());
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
    buffer.release();
    assert!(released.load(Ordering::SeqCst));
  }

  #[test]
  fn offline_source_is_paced_to_its_frame_rate() {
    let released = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&released);
    let started = Instant::now();
    let mut buffer = LatestFrameBuffer::spawn(
      move || {
        Ok(VecSource {
          frames: (0..12).map(frame).collect::<Vec<_>>().into_iter(),
          released: flag,
          fps: Some(50.0),
        })
      },
      CaptureOptions::default(),
    )
    .unwrap();

    let mut seen = Vec::new();
    loop {
      match buffer.next_frame(Duration::from_millis(200)) {
        Feed::Frame(frame) => {
          seen.push(frame.index);
          std::thread::sleep(Duration::from_millis(2));
        }
        Feed::Pending => continue,
        Feed::Closed => break,
      }
    }

    assert!(seen.len() >= 10);
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
    assert!(started.elapsed() >= Duration::from_millis(200));
  }

  #[test]
  fn release_interrupts_a_slow_offline_source() {
    let released = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&released);
    let mut buffer = LatestFrameBuffer::spawn(
      move || {
        Ok(VecSource {
          frames: (0..5).map(frame).collect::<Vec<_>>().into_iter(),
          released: flag,
          fps: Some(0.01),
        })
      },
      CaptureOptions::default(),
    )
    .unwrap();

    assert!(matches!(buffer.next_frame(Duration::from_millis(500)), Feed::Frame(f) if f.index == 0));
    let started = Instant::now();
    buffer.release();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(released.load(Ordering::SeqCst));
  }

  #[test]
  fn open_failure_is_returned_from_spawn() {
    let result = LatestFrameBuffer::spawn(
      || -> Result<VecSource, InputError> {
        Err(InputError::PermissionDenied("/dev/video0".to_string()))
      },
      CaptureOptions::default(),
    );
    assert!(matches!(result, Err(InputError::PermissionDenied(_))));
  }

  #[test]
  fn sequential_feed_drops_out_of_order_frames() {
    let frames = vec![Ok(frame(1)), Ok(frame(0)), Ok(frame(2))];
    let mut feed = SequentialFeed::new(frames.into_iter());

    assert!(matches!(feed.next_frame(Duration::ZERO), Feed::Frame(f) if f.index == 1));
    assert!(matches!(feed.next_frame(Duration::ZERO), Feed::Pending));
    assert!(matches!(feed.next_frame(Duration::ZERO), Feed::Frame(f) if f.index == 2));
    assert!(matches!(feed.next_frame(Duration::ZERO), Feed::Closed));
  }
}
