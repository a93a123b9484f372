// 该文件是 Xuese （血色） 项目的一部分。
// src/input.rs - 视频/图像帧源
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

use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::{FromUrl, frame::Frame};

mod image_sequence;
pub mod latest_frame;
pub use self::image_sequence::ImageSequenceInput;
pub use self::latest_frame::{CaptureOptions, Feed, FrameFeed, LatestFrameBuffer, SequentialFeed};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::ImageFileInput;

#[cfg(feature = "v4l2_input")]
mod v4l2_source;
#[cfg(feature = "v4l2_input")]
pub use self::v4l2_source::V4l2Source;

#[derive(Error, Debug)]
pub enum InputError {
  #[error("Frame source permission denied: {0}")]
  PermissionDenied(String),
  #[error("Frame source unavailable: {0}")]
  Unavailable(String),
  #[error("Frame capture failed: {0}")]
  CaptureFailed(String),
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("Invalid frame source option: {0}")]
  InvalidOption(String),
  #[error("URI scheme mismatch")]
  SchemeMismatch,
}

impl InputError {
  /// 打开帧源时的 I/O 错误需要区分权限被拒绝与设备不可用
  pub fn on_open(target: &str, err: std::io::Error) -> Self {
    match err.kind() {
      std::io::ErrorKind::PermissionDenied => {
        InputError::PermissionDenied(format!("{}: {}", target, err))
      }
      std::io::ErrorKind::NotFound => InputError::Unavailable(format!("{}: {}", target, err)),
      _ => InputError::IoError(err),
    }
  }

  pub fn is_permission_denied(&self) -> bool {
    matches!(self, InputError::PermissionDenied(_))
  }
}

/// 帧源 trait
///
/// 帧源按时间顺序产出帧；迭代结束表示帧源已关闭。
/// 帧源在被 drop 时必须停止采集。
pub trait FrameSource: Iterator<Item = Result<Frame, InputError>> {
  /// 获取帧宽度
  fn width(&self) -> u32;

  /// 获取帧高度
  fn height(&self) -> u32;

  /// 获取帧率（如果适用）
  fn fps(&self) -> Option<f64>;

  /// 控制补光，返回补光是否受支持
  fn set_illumination(&mut self, _on: bool) -> Result<bool, InputError> {
    Ok(false)
  }

  /// 实时帧源自身按采集节奏出帧；离线帧源由采集线程按 `fps()` 节流
  fn is_live(&self) -> bool {
    true
  }
}

pub enum InputWrapper {
  #[cfg(feature = "v4l2_input")]
  V4l2(V4l2Source),
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  ImageSequence(ImageSequenceInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "v4l2_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == V4l2Source::SCHEME {
        return Ok(InputWrapper::V4l2(V4l2Source::from_url(url)?));
      }
    }
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        return Ok(InputWrapper::ReadImageFile(ImageFileInput::from_url(url)?));
      }
    }
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageSequenceInput::SCHEME {
        return Ok(InputWrapper::ImageSequence(ImageSequenceInput::from_url(
          url,
        )?));
      }
    }
    Err(InputError::SchemeMismatch)
  }
}

impl Iterator for InputWrapper {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      #[cfg(feature = "v4l2_input")]
      InputWrapper::V4l2(input) => input.next(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.next(),
      InputWrapper::ImageSequence(input) => input.next(),
    }
  }
}

impl FrameSource for InputWrapper {
  fn width(&self) -> u32 {
    match self {
      #[cfg(feature = "v4l2_input")]
      InputWrapper::V4l2(input) => input.width(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.width(),
      InputWrapper::ImageSequence(input) => input.width(),
    }
  }

  fn height(&self) -> u32 {
    match self {
      #[cfg(feature = "v4l2_input")]
      InputWrapper::V4l2(input) => input.height(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.height(),
      InputWrapper::ImageSequence(input) => input.height(),
    }
  }

  fn fps(&self) -> Option<f64> {
    match self {
      #[cfg(feature = "v4l2_input")]
      InputWrapper::V4l2(input) => input.fps(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.fps(),
      InputWrapper::ImageSequence(input) => input.fps(),
    }
  }

  fn set_illumination(&mut self, on: bool) -> Result<bool, InputError> {
    match self {
      #[cfg(feature = "v4l2_input")]
      InputWrapper::V4l2(input) => input.set_illumination(on),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.set_illumination(on),
      InputWrapper::ImageSequence(input) => input.set_illumination(on),
    }
  }

  fn is_live(&self) -> bool {
    match self {
      #[cfg(feature = "v4l2_input")]
      InputWrapper::V4l2(input) => input.is_live(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.is_live(),
      InputWrapper::ImageSequence(input) => input.is_live(),
    }
  }
}

/// 帧率对应的帧间隔，帧率非正、非有限或间隔无法表示时返回 `None`
pub fn frame_interval(fps: f64) -> Option<Duration> {
  if !fps.is_finite() || fps <= 0.0 {
    return None;
  }
  Duration::try_from_secs_f64(1.0 / fps).ok()
}

/// 读取 URL 中的 `fps` 参数，缺省时使用 `default`
pub(crate) fn fps_option(url: &Url, default: f64) -> Result<f64, InputError> {
  let Some((_, value)) = url.query_pairs().find(|(k, _)| k == "fps") else {
    return Ok(default);
  };
  value
    .parse::<f64>()
    .ok()
    .filter(|fps| frame_interval(*fps).is_some())
    .ok_or_else(|| InputError::InvalidOption(format!("fps={}", value)))
}

/// 帧间隔对应的时间戳（毫秒）
pub(crate) fn frame_timestamp_ms(index: u64, fps: f64) -> u64 {
  if fps > 0.0 {
    ((index as f64) * 1000.0 / fps).round() as u64
  } else {
    0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn open_error_classification() {
    let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
    assert!(InputError::on_open("/dev/video0", denied).is_permission_denied());

    let missing = std::io::Error::from(std::io::ErrorKind::NotFound);
    assert!(matches!(
      InputError::on_open("/dev/video9", missing),
      InputError::Unavailable(_)
    ));
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("rtsp://camera.local/stream").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch)
    ));
  }

  #[test]
  fn timestamps_follow_frame_rate() {
    assert_eq!(frame_timestamp_ms(0, 30.0), 0);
    assert_eq!(frame_timestamp_ms(3, 30.0), 100);
    assert_eq!(frame_timestamp_ms(7, 0.0), 0);
  }

  #[test]
  fn frame_interval_rejects_unusable_rates() {
    assert_eq!(frame_interval(25.0), Some(Duration::from_millis(40)));
    assert_eq!(frame_interval(0.0), None);
    assert_eq!(frame_interval(-30.0), None);
    assert_eq!(frame_interval(f64::NAN), None);
    assert_eq!(frame_interval(1e-320), None);
  }

  #[test]
  fn fps_query_is_validated() {
    let url = Url::parse("folder:///frames").unwrap();
    assert_eq!(fps_option(&url, 30.0).unwrap(), 30.0);

    let url = Url::parse("folder:///frames?fps=15").unwrap();
    assert_eq!(fps_option(&url, 30.0).unwrap(), 15.0);

    for bad in ["1e-320", "0", "-5", "inf", "fast"] {
      let url = Url::parse(&format!("folder:///frames?fps={}", bad)).unwrap();
      assert!(matches!(
        fps_option(&url, 30.0),
        Err(InputError::InvalidOption(_))
      ));
    }
  }
}
