// 该文件是 Xuese （血色） 项目的一部分。
// src/input/v4l2_source.rs - V4L2 摄像头帧源
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

use std::pin::Pin;
use std::time::Instant;

use image::RgbImage;
use tracing::{info, warn};
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use super::{FrameSource, InputError};
use crate::{FromUrl, FromUrlWithScheme, frame::Frame, url_query};

/// 参考采集分辨率，与扫描门限的参考几何一致
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_DEVICE: &str = "/dev/video0";
const CAPTURE_BUFFERS: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
  Yuyv,
  Mjpeg,
}

/// V4L2 摄像头帧源
///
/// URL 格式：`v4l2:///dev/video0?width=640&height=480`
///
/// 由于 v4l 库的 Stream 需要引用 Device，我们使用 Pin<Box<Device>> 来保证
/// Device 的内存地址稳定，从而可以安全地创建引用它的 Stream。
pub struct V4l2Source {
  /// 捕获流（生命周期与 device 关联，必须先于 device 释放）
  stream: Option<Stream<'static>>,
  /// V4L2 设备（使用 Pin<Box> 固定内存位置）
  _device: Pin<Box<Device>>,
  device_path: String,
  pixel_format: PixelFormat,
  frame_index: u64,
  width: u32,
  height: u32,
  start_time: Instant,
}

impl FromUrlWithScheme for V4l2Source {
  const SCHEME: &'static str = "v4l2";
}

impl FromUrl for V4l2Source {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(InputError::SchemeMismatch);
    }

    let device_path = if url.path().is_empty() || url.path() == "/" {
      DEFAULT_DEVICE.to_string()
    } else {
      url.path().to_string()
    };

    Self::open(
      &device_path,
      url_query(url, "width").unwrap_or(DEFAULT_WIDTH),
      url_query(url, "height").unwrap_or(DEFAULT_HEIGHT),
    )
  }
}

impl V4l2Source {
  /// 打开摄像头并开始采集
  ///
  /// 设备权限被拒绝时返回 `InputError::PermissionDenied`。
  pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, InputError> {
    let device = Box::pin(
      Device::with_path(device_path).map_err(|e| InputError::on_open(device_path, e))?,
    );

    // 设置视频格式，优先 YUYV
    let mut format = device
      .format()
      .map_err(|e| InputError::on_open(device_path, e))?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device
      .set_format(&format)
      .map_err(|e| InputError::on_open(device_path, e))?;

    let pixel_format = if format.fourcc == FourCC::new(b"YUYV") {
      PixelFormat::Yuyv
    } else if format.fourcc == FourCC::new(b"MJPG") {
      PixelFormat::Mjpeg
    } else {
      return Err(InputError::Unavailable(format!(
        "{}: 不支持的像素格式 {}",
        device_path, format.fourcc
      )));
    };

    // SAFETY: device 被 Pin<Box> 固定在堆上，不会移动；
    // stream 存储在同一个结构体中，并在 Drop 中先于 device 释放。
    let device_ref: &Device = &device;
    let stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, CAPTURE_BUFFERS)
        .map_err(|e| InputError::on_open(device_path, e))?
    };

    info!(
      "摄像头已打开: {} {}x{} ({:?})",
      device_path, format.width, format.height, pixel_format
    );

    Ok(Self {
      stream: Some(stream),
      _device: device,
      device_path: device_path.to_string(),
      pixel_format,
      frame_index: 0,
      width: format.width,
      height: format.height,
      start_time: Instant::now(),
    })
  }

  fn decode(&self, buffer: &[u8]) -> Result<RgbImage, InputError> {
    match self.pixel_format {
      PixelFormat::Yuyv => {
        let rgb = yuyv_to_rgb(buffer, self.width, self.height);
        RgbImage::from_raw(self.width, self.height, rgb)
          .ok_or_else(|| InputError::CaptureFailed("YUYV 缓冲区大小不匹配".to_string()))
      }
      PixelFormat::Mjpeg => {
        let image = image::load_from_memory_with_format(buffer, image::ImageFormat::Jpeg)?;
        Ok(image.to_rgb8())
      }
    }
  }
}

/// 将 YUYV 格式转换为 RGB
fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
  let mut rgb = Vec::with_capacity((width * height * 3) as usize);

  for chunk in yuyv.chunks_exact(4) {
    let y0 = chunk[0] as f32;
    let u = chunk[1] as f32 - 128.0;
    let y1 = chunk[2] as f32;
    let v = chunk[3] as f32 - 128.0;

    for y in [y0, y1] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }

  rgb
}

impl Drop for V4l2Source {
  fn drop(&mut self) {
    // 确保 stream 在 device 之前被 drop，停止采集
    if self.stream.take().is_some() {
      info!("摄像头采集已停止: {}", self.device_path);
    }
  }
}

impl Iterator for V4l2Source {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let stream = self.stream.as_mut()?;

    let buffer = match stream.next() {
      Ok((buffer, _meta)) => buffer.to_vec(),
      Err(e) => {
        warn!("无法捕获帧: {}", e);
        return Some(Err(InputError::CaptureFailed(e.to_string())));
      }
    };

    let frame = self.decode(&buffer).map(|image| {
      let frame = Frame::new(
        image,
        self.frame_index,
        self.start_time.elapsed().as_millis() as u64,
      );
      self.frame_index += 1;
      frame
    });
    Some(frame)
  }
}

impl FrameSource for V4l2Source {
  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn fps(&self) -> Option<f64> {
    Some(30.0) // V4L2 默认帧率
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn yuyv_grey_maps_to_grey() {
    // U = V = 128 时为无色
    let rgb = yuyv_to_rgb(&[100, 128, 200, 128], 2, 1);
    assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
  }

  #[test]
  fn yuyv_ignores_trailing_partial_chunk() {
    let rgb = yuyv_to_rgb(&[10, 128, 20, 128, 99], 2, 1);
    assert_eq!(rgb.len(), 6);
  }
}
