// 该文件是 Xuese （血色） 项目的一部分。
// src/roi.rs - 眼部 ROI 裁剪与归一化
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
use thiserror::Error;
use tracing::debug;

use crate::detector::{Detection, Point};
use crate::model::{CHANNELS, INPUT_SIZE, InferenceInput};

/// ROI 边长相对双眼间距的倍数
pub const ROI_SCALE: f32 = 1.8;
/// ROI 最小边长（像素）
pub const MIN_ROI_SIDE: f32 = 50.0;

#[derive(Error, Debug, PartialEq)]
pub enum RoiError {
  #[error("关键点不足: 需要 2 个, 实际 {0} 个")]
  MissingLandmarks(usize),
  #[error("关键点坐标无效")]
  InvalidLandmark,
  #[error("帧为空")]
  EmptyFrame,
}

/// 以右眼为中心的正方形裁剪窗口（帧像素坐标）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoiSpec {
  pub left: f32,
  pub top: f32,
  pub side: f32,
}

impl RoiSpec {
  /// 以 `center` 为中心、边长为 `side` 的窗口，边长不小于 [`MIN_ROI_SIDE`]
  pub fn centered(center: Point, side: f32) -> Self {
    let side = side.max(MIN_ROI_SIDE);
    Self {
      left: center.x - side / 2.0,
      top: center.y - side / 2.0,
      side,
    }
  }

  pub fn from_detection(detection: &Detection) -> Result<Self, RoiError> {
    let (Some(right_eye), Some(distance)) =
      (detection.right_eye(), detection.inter_ocular_distance())
    else {
      return Err(RoiError::MissingLandmarks(detection.landmarks.len()));
    };
    if !distance.is_finite() {
      return Err(RoiError::InvalidLandmark);
    }
    Ok(Self::centered(right_eye, ROI_SCALE * distance))
  }

  pub fn center(&self) -> Point {
    Point::new(self.left + self.side / 2.0, self.top + self.side / 2.0)
  }

  /// 双线性重采样到 224 × 224 并归一化到 [0, 1]
  ///
  /// 采样点按像素中心对齐；窗口超出帧的部分取最近的边缘像素。
  pub fn extract(&self, image: &RgbImage) -> Result<InferenceInput, RoiError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
      return Err(RoiError::EmptyFrame);
    }

    let scale = self.side / INPUT_SIZE as f32;
    let mut data = Vec::with_capacity(InferenceInput::LEN);

    for oy in 0..INPUT_SIZE {
      let sy = self.top + (oy as f32 + 0.5) * scale - 0.5;
      let (y0, y1, fy) = sample_axis(sy, height);
      for ox in 0..INPUT_SIZE {
        let sx = self.left + (ox as f32 + 0.5) * scale - 0.5;
        let (x0, x1, fx) = sample_axis(sx, width);

        let p00 = image.get_pixel(x0, y0);
        let p10 = image.get_pixel(x1, y0);
        let p01 = image.get_pixel(x0, y1);
        let p11 = image.get_pixel(x1, y1);
        for c in 0..CHANNELS {
          let top = lerp(f32::from(p00[c]), f32::from(p10[c]), fx);
          let bottom = lerp(f32::from(p01[c]), f32::from(p11[c]), fx);
          data.push(lerp(top, bottom, fy) / 255.0);
        }
      }
    }

    InferenceInput::from_vec(data).ok_or(RoiError::EmptyFrame)
  }
}

/// 返回相邻两个采样索引（已钳制到边缘）与插值权重
fn sample_axis(s: f32, len: u32) -> (u32, u32, f32) {
  let max = (len - 1) as f32;
  let s = s.clamp(0.0, max);
  let i0 = s.floor();
  let i1 = (i0 + 1.0).min(max);
  (i0 as u32, i1 as u32, s - i0)
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
  a + (b - a) * t
}

/// 从完成扫描的帧中裁剪眼部区域，生成模型输入
pub fn extract_roi(
  image: &RgbImage,
  detection: &Detection,
) -> Result<(RoiSpec, InferenceInput), RoiError> {
  let spec = RoiSpec::from_detection(detection)?;
  debug!(
    "ROI: ({:.1}, {:.1}) 边长 {:.1}",
    spec.left, spec.top, spec.side
  );
  let input = spec.extract(image)?;
  Ok((spec, input))
}
