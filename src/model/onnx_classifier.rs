// 该文件是 Xuese （血色） 项目的一部分。
// src/model/onnx_classifier.rs - ONNX 贫血分类模型
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

use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;
use tracing::{debug, error, info};
use url::Url;

use super::{InferenceInput, Model, ModelError};
use crate::{FromUrl, FromUrlWithScheme, url_file_path, url_query};

const CLASSIFIER_NUM_INPUTS: usize = 1;
const DEFAULT_INTRA_THREADS: usize = 1;

/// 输出单个概率（或 logit）或两类概率的 ONNX 模型
///
/// URL 格式：`onnx:///path/anemia.onnx?threads=2`
pub struct OnnxClassifier {
  session: Mutex<Session>,
}

pub struct OnnxClassifierBuilder {
  model_path: String,
  intra_threads: usize,
}

impl FromUrlWithScheme for OnnxClassifierBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxClassifierBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::SchemeMismatch);
    }

    Ok(Self {
      model_path: url_file_path(url),
      intra_threads: url_query(url, "threads").unwrap_or(DEFAULT_INTRA_THREADS),
    })
  }
}

impl OnnxClassifierBuilder {
  pub fn build(self) -> Result<OnnxClassifier, ModelError> {
    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 ONNX Runtime 推理会话");
    let session = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .with_intra_threads(self.intra_threads)?
      .commit_from_memory(&model_data)?;

    if session.inputs.len() != CLASSIFIER_NUM_INPUTS {
      error!(
        "预期模型输入数量为 {}, 实际为 {}",
        CLASSIFIER_NUM_INPUTS,
        session.inputs.len()
      );
      return Err(ModelError::ModelInvalid(format!(
        "预期模型输入数量为 {}, 实际为 {}",
        CLASSIFIER_NUM_INPUTS,
        session.inputs.len()
      )));
    }
    if session.outputs.is_empty() {
      return Err(ModelError::ModelInvalid("模型没有输出".to_string()));
    }
    info!("模型加载完成");

    Ok(OnnxClassifier {
      session: Mutex::new(session),
    })
  }
}

impl Model for OnnxClassifier {
  type Input = InferenceInput;
  type Output = Vec<f32>;
  type Error = ModelError;

  /// 返回第一个输出张量的全部元素（批次为 1 时即 [1] 或 [2]）
  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let tensor = Tensor::from_array((input.shape(), input.as_slice().to_vec()))?;

    let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
    let outputs = session.run(ort::inputs![tensor])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
    debug!("模型输出形状: {:?}", shape);
    Ok(data.to_vec())
  }
}
