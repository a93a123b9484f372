// 该文件是 Xuese （血色） 项目的一部分。
// src/interpret.rs - 推理结果解释
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

//! # 推理结果解释
//!
//! 模型原始输出 → 贫血概率 → 估计血红蛋白 → 严重程度分级。
//!
//! 注意：概率到血红蛋白的线性映射只是展示用的启发式换算，不具有临床意义。

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum InterpretError {
  #[error("模型输出形状不符: 预期 1 或 2 个元素, 实际 {0} 个")]
  UnexpectedOutputShape(usize),
  #[error("模型输出不是有限数值: {0}")]
  NonFiniteOutput(f32),
}

/// 模型原始输出，在解释入口处一次性确定形态
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawOutput {
  /// 单个值：概率或 logit
  Single(f32),
  /// 两类概率：[P(非贫血), P(贫血)]
  Pair(f32, f32),
}

impl RawOutput {
  pub fn from_tensor(values: &[f32]) -> Result<Self, InterpretError> {
    match *values {
      [p] => Ok(RawOutput::Single(p)),
      [negative, positive] => Ok(RawOutput::Pair(negative, positive)),
      _ => Err(InterpretError::UnexpectedOutputShape(values.len())),
    }
  }

  /// 贫血概率；单值超出 [0, 1] 时视为 logit
  pub fn probability(&self) -> Result<f32, InterpretError> {
    let p = match *self {
      RawOutput::Single(p) if (0.0..=1.0).contains(&p) => p,
      RawOutput::Single(logit) => 1.0 / (1.0 + (-logit).exp()),
      RawOutput::Pair(_, positive) => positive,
    };
    if p.is_finite() {
      Ok(p)
    } else {
      Err(InterpretError::NonFiniteOutput(p))
    }
  }
}

/// 血红蛋白换算区间（g/dL）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HbScale {
  pub min_hb: f32,
  pub max_hb: f32,
}

impl Default for HbScale {
  fn default() -> Self {
    Self {
      min_hb: 5.0,
      max_hb: 15.0,
    }
  }
}

impl HbScale {
  /// 概率越高，估计的血红蛋白越低
  pub fn estimate(&self, probability: f32) -> f32 {
    self.max_hb - probability * (self.max_hb - self.min_hb)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
  Severe,
  Moderate,
  Mild,
  #[serde(rename = "Non-Anemic")]
  NonAnemic,
}

impl Severity {
  /// 按估计血红蛋白分级，区间左闭右开
  pub fn from_hb(hb: f32) -> Self {
    if hb < 7.0 {
      Severity::Severe
    } else if hb < 10.0 {
      Severity::Moderate
    } else if hb < 12.0 {
      Severity::Mild
    } else {
      Severity::NonAnemic
    }
  }

  pub fn anemia(&self) -> AnemiaFlag {
    match self {
      Severity::NonAnemic => AnemiaFlag::No,
      _ => AnemiaFlag::Yes,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Severity::Severe => "Severe",
      Severity::Moderate => "Moderate",
      Severity::Mild => "Mild",
      Severity::NonAnemic => "Non-Anemic",
    }
  }
}

impl fmt::Display for Severity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// 记录中的贫血标记；`Uncertain` 保留给记录格式，解释器不会产生
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnemiaFlag {
  Yes,
  No,
  Uncertain,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interpretation {
  pub probability: f32,
  pub estimated_hb: f32,
  pub severity: Severity,
  pub anemia: AnemiaFlag,
  /// max(p, 1 - p)，位于 [0.5, 1]
  pub confidence: f32,
}

pub fn interpret(output: RawOutput, scale: &HbScale) -> Result<Interpretation, InterpretError> {
  let probability = output.probability()?;
  let estimated_hb = scale.estimate(probability);
  let severity = Severity::from_hb(estimated_hb);

  Ok(Interpretation {
    probability,
    estimated_hb,
    severity,
    anemia: severity.anemia(),
    confidence: probability.max(1.0 - probability),
  })
}

/// 直接解释模型输出张量
pub fn interpret_tensor(values: &[f32], scale: &HbScale) -> Result<Interpretation, InterpretError> {
  interpret(RawOutput::from_tensor(values)?, scale)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn close(a: f32, b: f32, tolerance: f32) -> bool {
    (a - b).abs() < tolerance
  }

  #[test]
  fn two_class_output_uses_second_element() {
    let result = interpret_tensor(&[0.1, 0.9], &HbScale::default()).unwrap();
    assert!(close(result.probability, 0.9, 1e-6));
    assert!(close(result.estimated_hb, 6.0, 1e-5));
    assert_eq!(result.severity, Severity::Severe);
    assert_eq!(result.anemia, AnemiaFlag::Yes);
    assert!(close(result.confidence, 0.9, 1e-6));
  }

  #[test]
  fn out_of_range_single_value_is_a_logit() {
    let result = interpret_tensor(&[3.0], &HbScale::default()).unwrap();
    assert!(close(result.probability, 0.952_574, 1e-5));
    assert!(close(result.estimated_hb, 5.474, 1e-3));
    assert_eq!(result.severity, Severity::Severe);
  }

  #[test]
  fn tier_boundaries_are_left_closed() {
    assert_eq!(Severity::from_hb(12.0), Severity::NonAnemic);
    assert_eq!(Severity::from_hb(11.999), Severity::Mild);
    assert_eq!(Severity::from_hb(10.0), Severity::Mild);
    assert_eq!(Severity::from_hb(9.999), Severity::Moderate);
    assert_eq!(Severity::from_hb(7.0), Severity::Moderate);
    assert_eq!(Severity::from_hb(6.999), Severity::Severe);
  }

  #[test]
  fn even_probability_lands_on_mild_boundary() {
    let result = interpret_tensor(&[0.5], &HbScale::default()).unwrap();
    assert_eq!(result.estimated_hb, 10.0);
    assert_eq!(result.confidence, 0.5);
    assert_eq!(result.severity, Severity::Mild);
    assert_eq!(result.anemia, AnemiaFlag::Yes);
  }

  #[test]
  fn low_probability_is_non_anemic() {
    let result = interpret_tensor(&[0.1], &HbScale::default()).unwrap();
    assert!(close(result.estimated_hb, 14.0, 1e-5));
    assert_eq!(result.severity, Severity::NonAnemic);
    assert_eq!(result.anemia, AnemiaFlag::No);
    assert!(close(result.confidence, 0.9, 1e-6));
  }

  #[test]
  fn unexpected_shapes_and_nan_are_errors() {
    assert_eq!(
      RawOutput::from_tensor(&[]),
      Err(InterpretError::UnexpectedOutputShape(0))
    );
    assert_eq!(
      RawOutput::from_tensor(&[0.2, 0.3, 0.5]),
      Err(InterpretError::UnexpectedOutputShape(3))
    );
    assert!(matches!(
      interpret_tensor(&[f32::NAN], &HbScale::default()),
      Err(InterpretError::NonFiniteOutput(_))
    ));
  }

  #[test]
  fn severity_serializes_with_display_names() {
    assert_eq!(
      serde_json::to_string(&Severity::NonAnemic).unwrap(),
      "\"Non-Anemic\""
    );
    assert_eq!(serde_json::to_string(&AnemiaFlag::Uncertain).unwrap(), "\"uncertain\"");
  }
}
