// 该文件是 Xuese （血色） 项目的一部分。
// src/input/read_image_file.rs - 静态图像帧源
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

use image::{ImageReader, RgbImage};
use tracing::{error, info};
use url::Url;

use super::{FrameSource, InputError, fps_option, frame_timestamp_ms};
use crate::{FromUrl, FromUrlWithScheme, frame::Frame, url_file_path, url_query};

const DEFAULT_REPEAT: u64 = 150;
const DEFAULT_FPS: f64 = 30.0;

/// 将一张静态图像重复作为视频帧输出
///
/// URL 格式：`image:///path/face.png?repeat=150&fps=30`
///
/// 迭代本身不节流；经 [`LatestFrameBuffer`](super::LatestFrameBuffer) 采集时按 `fps` 出帧。
pub struct ImageFileInput {
  image: RgbImage,
  repeat: u64,
  emitted: u64,
  fps: f64,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch);
    }

    let fps = fps_option(url, DEFAULT_FPS)?;
    let path = url_file_path(url);
    let image = ImageReader::open(&path)
      .map_err(|e| InputError::on_open(&path, e))?
      .decode()?
      .to_rgb8();
    info!(
      "静态图像已加载: {} ({}x{})",
      path,
      image.width(),
      image.height()
    );

    Ok(Self {
      image,
      repeat: url_query(url, "repeat").unwrap_or(DEFAULT_REPEAT),
      emitted: 0,
      fps,
    })
  }
}

impl ImageFileInput {
  pub fn new(image: RgbImage, repeat: u64, fps: f64) -> Self {
    Self {
      image,
      repeat,
      emitted: 0,
      fps,
    }
  }
}

impl Iterator for ImageFileInput {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.emitted >= self.repeat {
      return None;
    }

    let index = self.emitted;
    self.emitted += 1;
    Some(Ok(Frame::new(
      self.image.clone(),
      index,
      frame_timestamp_ms(index, self.fps),
    )))
  }
}

impl FrameSource for ImageFileInput {
  fn width(&self) -> u32 {
    self.image.width()
  }

  fn height(&self) -> u32 {
    self.image.height()
  }

  fn fps(&self) -> Option<f64> {
    Some(self.fps)
  }

  fn is_live(&self) -> bool {
    false
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn repeats_the_still_image() {
    let input = ImageFileInput::new(RgbImage::new(6, 4), 3, 30.0);
    let frames: Vec<Frame> = input.map(|f| f.unwrap()).collect();
    assert_eq!(frames.len(), 3);
    assert_eq!(
      frames.iter().map(|f| f.index).collect::<Vec<_>>(),
      vec![0, 1, 2]
    );
    assert_eq!(frames[2].timestamp_ms, 67);
  }

  #[test]
  fn missing_file_is_unavailable() {
    let url = Url::parse("image:///definitely/not/here.png").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(InputError::Unavailable(_))
    ));
  }

  #[test]
  fn unusable_frame_rate_is_rejected_before_loading() {
    let url = Url::parse("image:///definitely/not/here.png?fps=1e-320").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(InputError::InvalidOption(_))
    ));
  }

  #[test]
  fn still_image_is_an_offline_source() {
    let input = ImageFileInput::new(RgbImage::new(6, 4), 3, 30.0);
    assert!(!input.is_live());
    assert_eq!(input.fps(), Some(30.0));
  }
}
