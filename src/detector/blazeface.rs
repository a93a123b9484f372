// 该文件是 Xuese （血色） 项目的一部分。
// src/detector/blazeface.rs - BlazeFace 人脸检测（ONNX）
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

use std::sync::{Mutex, PoisonError};

use image::{RgbImage, imageops::FilterType};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;
use tracing::{debug, error, info};
use url::Url;

use super::{BoundingBox, Detection, DetectorError, FaceLocalizer, Point};
use crate::{FromUrl, FromUrlWithScheme, url_file_path, url_query};

const BLAZEFACE_INPUT_SIZE: usize = 128;
const BLAZEFACE_NUM_ANCHORS: usize = 896;
const BLAZEFACE_NUM_COORDS: usize = 16;
const BLAZEFACE_NUM_KEYPOINTS: usize = 6;
const BLAZEFACE_SCORE_THRESH: f32 = 0.75;
const BLAZEFACE_NMS_THRESH: f32 = 0.3;

/// 输入张量布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
  Nchw,
  Nhwc,
}

pub struct BlazeFaceBuilder {
  model_path: String,
  layout: TensorLayout,
  score_threshold: f32,
  nms_threshold: f32,
}

impl FromUrlWithScheme for BlazeFaceBuilder {
  const SCHEME: &'static str = "blazeface";
}

impl FromUrl for BlazeFaceBuilder {
  type Error = DetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DetectorError::SchemeMismatch);
    }

    let layout = match url_query::<String>(url, "layout").as_deref() {
      Some("nhwc") => TensorLayout::Nhwc,
      _ => TensorLayout::Nchw,
    };

    Ok(Self {
      model_path: url_file_path(url),
      layout,
      score_threshold: url_query(url, "score").unwrap_or(BLAZEFACE_SCORE_THRESH),
      nms_threshold: url_query(url, "nms").unwrap_or(BLAZEFACE_NMS_THRESH),
    })
  }
}

impl BlazeFaceBuilder {
  pub fn build(self) -> Result<BlazeFace, DetectorError> {
    info!("加载人脸检测模型: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    let session = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .with_intra_threads(1)?
      .commit_from_memory(&model_data)?;

    if session.outputs.len() != 2 {
      error!("预期模型输出数量为 2, 实际为 {}", session.outputs.len());
      return Err(DetectorError::InvalidOutput(format!(
        "预期模型输出数量为 2, 实际为 {}",
        session.outputs.len()
      )));
    }
    info!("人脸检测模型加载完成");

    Ok(BlazeFace {
      session: Mutex::new(session),
      anchors: generate_anchors(),
      layout: self.layout,
      score_threshold: self.score_threshold,
      nms_threshold: self.nms_threshold,
    })
  }
}

/// BlazeFace 人脸检测器
///
/// 关键点顺序：右眼、左眼、鼻尖、嘴、右耳、左耳。
pub struct BlazeFace {
  session: Mutex<Session>,
  anchors: Vec<[f32; 2]>,
  layout: TensorLayout,
  score_threshold: f32,
  nms_threshold: f32,
}

/// 生成两个尺度的锚点中心（16x16 每格 2 个，8x8 每格 6 个）
fn generate_anchors() -> Vec<[f32; 2]> {
  let mut anchors = Vec::with_capacity(BLAZEFACE_NUM_ANCHORS);
  for (grid, per_cell) in [(16u8, 2usize), (8u8, 6usize)] {
    for y in 0..grid {
      for x in 0..grid {
        let cx = (f32::from(x) + 0.5) / f32::from(grid);
        let cy = (f32::from(y) + 0.5) / f32::from(grid);
        anchors.extend(std::iter::repeat_n([cx, cy], per_cell));
      }
    }
  }
  anchors
}

impl BlazeFace {
  /// 缩放到 128x128 并归一化到 [-1, 1]
  fn preprocess(&self, image: &RgbImage) -> Vec<f32> {
    let size = BLAZEFACE_INPUT_SIZE as u32;
    let resized = image::imageops::resize(image, size, size, FilterType::Triangle);
    let plane = BLAZEFACE_INPUT_SIZE * BLAZEFACE_INPUT_SIZE;
    let mut data = vec![0f32; plane * 3];

    for (i, pixel) in resized.pixels().enumerate() {
      for c in 0..3 {
        let value = f32::from(pixel[c]) / 127.5 - 1.0;
        match self.layout {
          TensorLayout::Nchw => data[c * plane + i] = value,
          TensorLayout::Nhwc => data[i * 3 + c] = value,
        }
      }
    }
    data
  }

  fn input_shape(&self) -> [usize; 4] {
    match self.layout {
      TensorLayout::Nchw => [1, 3, BLAZEFACE_INPUT_SIZE, BLAZEFACE_INPUT_SIZE],
      TensorLayout::Nhwc => [1, BLAZEFACE_INPUT_SIZE, BLAZEFACE_INPUT_SIZE, 3],
    }
  }

  /// 将归一化坐标的检测结果解码并映射回帧像素坐标
  fn decode(&self, regressors: &[f32], scores: &[f32], width: f32, height: f32) -> Vec<Detection> {
    let input_size = BLAZEFACE_INPUT_SIZE as f32;
    let mut detections = Vec::new();

    for (i, anchor) in self.anchors.iter().enumerate() {
      let score = sigmoid(scores[i]);
      if score < self.score_threshold {
        continue;
      }

      let raw = &regressors[i * BLAZEFACE_NUM_COORDS..(i + 1) * BLAZEFACE_NUM_COORDS];
      let cx = anchor[0] + raw[0] / input_size;
      let cy = anchor[1] + raw[1] / input_size;
      let w = raw[2] / input_size;
      let h = raw[3] / input_size;

      let bbox = BoundingBox::new(
        (cx - w / 2.0).clamp(0.0, 1.0) * width,
        (cy - h / 2.0).clamp(0.0, 1.0) * height,
        (cx + w / 2.0).clamp(0.0, 1.0) * width,
        (cy + h / 2.0).clamp(0.0, 1.0) * height,
      );

      let landmarks = (0..BLAZEFACE_NUM_KEYPOINTS)
        .map(|k| {
          let x = anchor[0] + raw[4 + k * 2] / input_size;
          let y = anchor[1] + raw[4 + k * 2 + 1] / input_size;
          Point::new(x.clamp(0.0, 1.0) * width, y.clamp(0.0, 1.0) * height)
        })
        .collect();

      detections.push(Detection {
        bbox,
        landmarks,
        score,
      });
    }

    nms(detections, self.nms_threshold)
  }
}

impl FaceLocalizer for BlazeFace {
  fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
    let input = Tensor::from_array((self.input_shape(), self.preprocess(image)))?;

    let (first, second) = {
      let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
      let outputs = session.run(ort::inputs![input])?;
      let (_, first) = outputs[0].try_extract_tensor::<f32>()?;
      let (_, second) = outputs[1].try_extract_tensor::<f32>()?;
      (first.to_vec(), second.to_vec())
    };

    // 输出顺序因导出工具而异，按张量大小区分回归与分类输出
    let reg_expected = BLAZEFACE_NUM_ANCHORS * BLAZEFACE_NUM_COORDS;
    let (regressors, scores) = if first.len() == reg_expected && second.len() == BLAZEFACE_NUM_ANCHORS {
      (first, second)
    } else if second.len() == reg_expected && first.len() == BLAZEFACE_NUM_ANCHORS {
      (second, first)
    } else {
      return Err(DetectorError::InvalidOutput(format!(
        "输出大小不匹配: {} / {}",
        first.len(),
        second.len()
      )));
    };

    let detections = self.decode(
      &regressors,
      &scores,
      image.width() as f32,
      image.height() as f32,
    );
    debug!("检测到 {} 张人脸", detections.len());
    Ok(detections)
  }
}

/// 非极大值抑制，按分数从高到低保留
fn nms(mut detections: Vec<Detection>, threshold: f32) -> Vec<Detection> {
  detections.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut keep: Vec<Detection> = Vec::new();
  for detection in detections {
    if keep
      .iter()
      .all(|kept| iou(&kept.bbox, &detection.bbox) < threshold)
    {
      keep.push(detection);
    }
  }
  keep
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
  let x1 = a.top_left.x.max(b.top_left.x);
  let y1 = a.top_left.y.max(b.top_left.y);
  let x2 = a.bottom_right.x.min(b.bottom_right.x);
  let y2 = a.bottom_right.y.min(b.bottom_right.y);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let union = a.width() * a.height() + b.width() * b.height() - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}
