// 该文件是 Xuese （血色） 项目的一部分。
// src/detector.rs - 人脸定位
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
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::FromUrl;

#[cfg(feature = "model_onnx")]
mod blazeface;
#[cfg(feature = "model_onnx")]
pub use self::blazeface::{BlazeFace, BlazeFaceBuilder};

/// 右眼中心在关键点列表中的索引
pub const RIGHT_EYE: usize = 0;
/// 左眼中心在关键点列表中的索引
pub const LEFT_EYE: usize = 1;

/// 帧像素坐标系中的点
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
  pub x: f32,
  pub y: f32,
}

impl Point {
  pub const fn new(x: f32, y: f32) -> Self {
    Self { x, y }
  }

  pub fn distance(&self, other: &Point) -> f32 {
    (self.x - other.x).hypot(self.y - other.y)
  }
}

/// 人脸边框（帧像素坐标，左上角与右下角）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
  pub top_left: Point,
  pub bottom_right: Point,
}

impl BoundingBox {
  pub const fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
    Self {
      top_left: Point::new(x_min, y_min),
      bottom_right: Point::new(x_max, y_max),
    }
  }

  pub fn width(&self) -> f32 {
    self.bottom_right.x - self.top_left.x
  }

  pub fn height(&self) -> f32 {
    self.bottom_right.y - self.top_left.y
  }
}

/// 单帧人脸检测结果，只在当前帧内有效
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub bbox: BoundingBox,
  /// 关键点：索引 0 为右眼中心，索引 1 为左眼中心
  pub landmarks: Vec<Point>,
  pub score: f32,
}

impl Detection {
  pub fn right_eye(&self) -> Option<Point> {
    self.landmarks.get(RIGHT_EYE).copied()
  }

  pub fn left_eye(&self) -> Option<Point> {
    self.landmarks.get(LEFT_EYE).copied()
  }

  /// 双眼间距（像素）
  pub fn inter_ocular_distance(&self) -> Option<f32> {
    Some(self.right_eye()?.distance(&self.left_eye()?))
  }
}

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[cfg(feature = "model_onnx")]
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("模型输出无效: {0}")]
  InvalidOutput(String),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 人脸定位器
///
/// 返回的列表可能为空；扫描循环只使用第一个检测结果。
pub trait FaceLocalizer {
  fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError>;
}

impl<T: FaceLocalizer + ?Sized> FaceLocalizer for Box<T> {
  fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
    (**self).detect(image)
  }
}

pub enum DetectorWrapper {
  #[cfg(feature = "model_onnx")]
  BlazeFace(BlazeFace),
}

impl FromUrl for DetectorWrapper {
  type Error = DetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "model_onnx")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == BlazeFaceBuilder::SCHEME {
        let detector = BlazeFaceBuilder::from_url(url)?.build()?;
        return Ok(DetectorWrapper::BlazeFace(detector));
      }
    }
    let _ = url;
    Err(DetectorError::SchemeMismatch)
  }
}

impl FaceLocalizer for DetectorWrapper {
  fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
    match self {
      #[cfg(feature = "model_onnx")]
      DetectorWrapper::BlazeFace(detector) => detector.detect(image),
      #[allow(unreachable_patterns)]
      _ => {
        let _ = image;
        Err(DetectorError::SchemeMismatch)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn eye_landmarks_follow_index_convention() {
    let detection = Detection {
      bbox: BoundingBox::new(100.0, 80.0, 260.0, 260.0),
      landmarks: vec![Point::new(140.0, 150.0), Point::new(220.0, 150.0)],
      score: 0.9,
    };
    assert_eq!(detection.right_eye(), Some(Point::new(140.0, 150.0)));
    assert_eq!(detection.left_eye(), Some(Point::new(220.0, 150.0)));
    assert_eq!(detection.inter_ocular_distance(), Some(80.0));
    assert_eq!(detection.bbox.width(), 160.0);
  }

  #[test]
  fn missing_landmarks_have_no_distance() {
    let detection = Detection {
      bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
      landmarks: vec![Point::new(1.0, 1.0)],
      score: 0.5,
    };
    assert_eq!(detection.inter_ocular_distance(), None);
  }
}
