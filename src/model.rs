// 该文件是 Xuese （血色） 项目的一部分。
// src/model.rs - 推理模型
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

use thiserror::Error;
use url::Url;

use crate::FromUrl;

#[cfg(feature = "model_onnx")]
mod onnx_classifier;
#[cfg(feature = "model_onnx")]
pub use self::onnx_classifier::{OnnxClassifier, OnnxClassifierBuilder};

/// 模型输入边长（像素）
pub const INPUT_SIZE: usize = 224;
/// 模型输入通道数（RGB）
pub const CHANNELS: usize = 3;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

impl<M: Model + ?Sized> Model for Box<M> {
  type Input = M::Input;
  type Output = M::Output;
  type Error = M::Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    (**self).infer(input)
  }
}

/// 模型输入张量：224 × 224 × 3，行优先、通道交错（NHWC，无批次维）
///
/// 每个值为原始像素值除以 255，位于 [0, 1]。每次推理新建，不复用。
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceInput {
  data: Vec<f32>,
}

impl InferenceInput {
  pub const LEN: usize = INPUT_SIZE * INPUT_SIZE * CHANNELS;

  /// 长度不符时返回 `None`
  pub fn from_vec(data: Vec<f32>) -> Option<Self> {
    (data.len() == Self::LEN).then_some(Self { data })
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  /// 带批次维的 NHWC 形状
  pub fn shape(&self) -> [usize; 4] {
    [1, INPUT_SIZE, INPUT_SIZE, CHANNELS]
  }

  pub fn pixel(&self, x: usize, y: usize) -> [f32; CHANNELS] {
    let offset = (y * INPUT_SIZE + x) * CHANNELS;
    [
      self.data[offset],
      self.data[offset + 1],
      self.data[offset + 2],
    ]
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[cfg(feature = "model_onnx")]
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum ModelWrapper {
  #[cfg(feature = "model_onnx")]
  Onnx(OnnxClassifier),
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "model_onnx")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == OnnxClassifierBuilder::SCHEME {
        let model = OnnxClassifierBuilder::from_url(url)?.build()?;
        return Ok(ModelWrapper::Onnx(model));
      }
    }
    let _ = url;
    Err(ModelError::SchemeMismatch)
  }
}

impl Model for ModelWrapper {
  type Input = InferenceInput;
  type Output = Vec<f32>;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    match self {
      #[cfg(feature = "model_onnx")]
      ModelWrapper::Onnx(model) => model.infer(input),
      #[allow(unreachable_patterns)]
      _ => {
        let _ = input;
        Err(ModelError::SchemeMismatch)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn input_requires_exact_length() {
    assert!(InferenceInput::from_vec(vec![0.0; InferenceInput::LEN - 1]).is_none());
    let input = InferenceInput::from_vec(vec![0.5; InferenceInput::LEN]).unwrap();
    assert_eq!(input.shape(), [1, 224, 224, 3]);
    assert_eq!(input.pixel(223, 223), [0.5, 0.5, 0.5]);
  }

  #[test]
  fn unknown_model_scheme_is_rejected() {
    let url = Url::parse("tflite:///models/anemia.tflite").unwrap();
    assert!(matches!(
      ModelWrapper::from_url(&url),
      Err(ModelError::SchemeMismatch)
    ));
  }
}
