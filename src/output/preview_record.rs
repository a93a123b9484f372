// 该文件是 Xuese （血色） 项目的一部分。
// src/output/preview_record.rs - 扫描预览帧记录
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

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{Datelike, Utc};
use tracing::debug;
use url::Url;

use super::{OutputError, Render, ScanView, draw::Draw};
use crate::frame::Frame;
use crate::{FromUrl, FromUrlWithScheme, url_file_path, url_query};

/// 把叠加了扫描状态的预览帧按日期目录保存为 PNG
///
/// URL 格式：`folder:///tmp/preview?every=5`，每 `every` 次推进保存一帧；
/// 带 `always` 参数时没有检测结果的帧也会保存。
pub struct PreviewRecordOutput {
  directory: PathBuf,
  draw: Draw,
  every: u64,
  always: bool,
  ticks: AtomicU64,
}

impl FromUrlWithScheme for PreviewRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for PreviewRecordOutput {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch);
    }

    Ok(Self {
      directory: PathBuf::from(url_file_path(url)),
      draw: Draw::default(),
      every: url_query(url, "every").unwrap_or(1u64).max(1),
      always: url.query_pairs().any(|(k, _)| k == "always"),
      ticks: AtomicU64::new(0),
    })
  }
}

impl PreviewRecordOutput {
  fn frame_path(&self, frame: &Frame) -> Result<PathBuf, OutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:06}.png",
      now.format("%H-%M-%S"),
      frame.index
    )))
  }
}

impl<'a> Render<Frame, ScanView<'a>> for PreviewRecordOutput {
  type Error = OutputError;

  fn render_result(&self, frame: &Frame, result: &ScanView<'a>) -> Result<(), Self::Error> {
    let tick = self.ticks.fetch_add(1, Ordering::Relaxed);
    if tick % self.every != 0 {
      return Ok(());
    }
    if !self.always && result.detection.is_none() {
      return Ok(());
    }

    let mut image = frame.image.clone();
    self.draw.draw_scan(&mut image, result);
    let path = self.frame_path(frame)?;
    image.save(&path)?;
    debug!("预览帧已保存: {}", path.display());
    Ok(())
  }
}
