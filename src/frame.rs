// 该文件是 Xuese （血色） 项目的一部分。
// src/frame.rs - 视频帧定义
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

use image::RgbImage;

/// 抓拍图像的 JPEG 质量
const CAPTURE_JPEG_QUALITY: u8 = 90;

/// 帧数据
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧索引（单调递增）
  pub index: u64,
  /// 时间戳（毫秒，相对于帧源打开时刻）
  pub timestamp_ms: u64,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64, timestamp_ms: u64) -> Self {
    Self {
      image,
      index,
      timestamp_ms,
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  /// 帧是否晚于另一帧（按帧索引判断）
  pub fn is_newer_than(&self, other: Option<u64>) -> bool {
    other.map(|index| self.index > index).unwrap_or(true)
  }

  /// 将帧编码为 JPEG，作为结果记录的抓拍图像
  pub fn to_jpeg(&self) -> Result<Vec<u8>, image::ImageError> {
    let mut bytes = Vec::new();
    let mut encoder =
      image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, CAPTURE_JPEG_QUALITY);
    encoder.encode_image(&self.image)?;
    Ok(bytes)
  }
}
