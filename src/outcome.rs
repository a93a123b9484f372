// 该文件是 Xuese （血色） 项目的一部分。
// src/outcome.rs - 筛查结果记录
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

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::interpret::{AnemiaFlag, Interpretation, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
  Male,
  Female,
  Other,
}

impl FromStr for Gender {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "male" | "m" => Ok(Gender::Male),
      "female" | "f" => Ok(Gender::Female),
      "other" => Ok(Gender::Other),
      _ => Err(format!("未知性别: {}", s)),
    }
  }
}

/// 引导流程收集的受检者信息
///
/// 只用于标注记录，不参与分级。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectContext {
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub age: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub gender: Option<Gender>,
  /// 受检者是否知道自己的血红蛋白值
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub known_hb: Option<bool>,
  /// 自报的血红蛋白值（g/dL）
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub hb_value: Option<f32>,
}

impl SubjectContext {
  pub fn named(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Self::default()
    }
  }
}

/// 一次完成扫描的结果记录，创建后不可修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecord {
  anemia: AnemiaFlag,
  severity: Severity,
  estimated_hb: f32,
  confidence: f32,
  timestamp: DateTime<Utc>,
  #[serde(rename = "imagePath", default, skip_serializing_if = "Option::is_none")]
  image: Option<String>,
  #[serde(flatten)]
  subject: SubjectContext,
}

impl OutcomeRecord {
  pub(crate) fn from_interpretation(
    interpretation: &Interpretation,
    subject: SubjectContext,
    timestamp: DateTime<Utc>,
    image: Option<String>,
  ) -> Self {
    Self {
      anemia: interpretation.anemia,
      severity: interpretation.severity,
      estimated_hb: interpretation.estimated_hb,
      confidence: interpretation.confidence,
      timestamp,
      image,
      subject,
    }
  }

  pub fn anemia(&self) -> AnemiaFlag {
    self.anemia
  }

  pub fn severity(&self) -> Severity {
    self.severity
  }

  /// 估计血红蛋白（g/dL）
  pub fn estimated_hb(&self) -> f32 {
    self.estimated_hb
  }

  pub fn confidence(&self) -> f32 {
    self.confidence
  }

  pub fn timestamp(&self) -> DateTime<Utc> {
    self.timestamp
  }

  /// 抓拍图像文件名
  pub fn image(&self) -> Option<&str> {
    self.image.as_deref()
  }

  pub fn subject(&self) -> &SubjectContext {
    &self.subject
  }

  #[cfg(test)]
  pub(crate) fn fixture(severity: Severity, estimated_hb: f32, confidence: f32) -> Self {
    Self {
      anemia: severity.anemia(),
      severity,
      estimated_hb,
      confidence,
      timestamp: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
      image: None,
      subject: SubjectContext::named("Test"),
    }
  }
}

impl fmt::Display for OutcomeRecord {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} (Hb {:.1} g/dL, 置信度 {:.0}%)",
      self.severity,
      self.estimated_hb,
      self.confidence * 100.0
    )
  }
}

/// 抓拍图像的文件名，由记录时间戳决定
pub fn image_file_name(timestamp: &DateTime<Utc>) -> String {
  format!("scan-{}.jpg", timestamp.timestamp_millis())
}
