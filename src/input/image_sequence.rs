// 该文件是 Xuese （血色） 项目的一部分。
// src/input/image_sequence.rs - 图像序列（目录）帧源
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

use image::ImageReader;
use tracing::{debug, info};
use url::Url;

use super::{FrameSource, InputError, fps_option, frame_timestamp_ms};
use crate::{FromUrl, FromUrlWithScheme, frame::Frame, url_file_path};

const DEFAULT_SEQUENCE_FPS: f64 = 30.0;
const SEQUENCE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// 按文件名顺序回放目录中的图像，用于离线复现一次扫描
///
/// URL 格式：`folder:///path/to/frames?fps=30`
pub struct ImageSequenceInput {
  paths: Vec<PathBuf>,
  cursor: usize,
  fps: f64,
  width: u32,
  height: u32,
}

impl FromUrlWithScheme for ImageSequenceInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ImageSequenceInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(InputError::SchemeMismatch);
    }

    let directory = url_file_path(url);
    let fps = fps_option(url, DEFAULT_SEQUENCE_FPS)?;
    Self::open(PathBuf::from(directory), fps)
  }
}

impl ImageSequenceInput {
  pub fn open(directory: PathBuf, fps: f64) -> Result<Self, InputError> {
    let entries =
      std::fs::read_dir(&directory).map_err(|e| InputError::on_open(&directory.to_string_lossy(), e))?;

    let mut paths = Vec::new();
    for entry in entries {
      let path = entry?.path();
      let is_image = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SEQUENCE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false);
      if is_image {
        paths.push(path);
      }
    }
    paths.sort();

    let first = paths.first().ok_or_else(|| {
      InputError::Unavailable(format!("目录中没有图像: {}", directory.display()))
    })?;
    let (width, height) = image::image_dimensions(first)?;

    info!(
      "图像序列已打开: {} ({} 帧, {}x{})",
      directory.display(),
      paths.len(),
      width,
      height
    );

    Ok(Self {
      paths,
      cursor: 0,
      fps,
      width,
      height,
    })
  }
}

impl Iterator for ImageSequenceInput {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let path = self.paths.get(self.cursor)?;
    let index = self.cursor as u64;
    self.cursor += 1;

    debug!("读取序列帧 {}: {}", index, path.display());
    let image = ImageReader::open(path)
      .map_err(InputError::from)
      .and_then(|reader| reader.decode().map_err(InputError::from))
      .map(|image| image.to_rgb8());

    Some(image.map(|image| Frame::new(image, index, frame_timestamp_ms(index, self.fps))))
  }
}

impl FrameSource for ImageSequenceInput {
  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn fps(&self) -> Option<f64> {
    Some(self.fps)
  }

  fn is_live(&self) -> bool {
    false
  }
}
