// 该文件是 Xuese （血色） 项目的一部分。
// src/handoff.rs - 结果交接：持久化与界面跳转
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

use chrono::Utc;
use tracing::{info, warn};

use crate::frame::Frame;
use crate::interpret::Interpretation;
use crate::outcome::{OutcomeRecord, SubjectContext, image_file_name};
use crate::output::{NavigationEvent, Navigator, OutcomeStore};
use crate::scan::FailureReason;

/// 把解释结果打包为记录，先尝试保存，再无条件跳转到结果页
pub struct OutcomeHandoff<S, N> {
  store: S,
  navigator: N,
  subject: SubjectContext,
}

impl<S: OutcomeStore, N: Navigator> OutcomeHandoff<S, N> {
  pub fn new(store: S, navigator: N, subject: SubjectContext) -> Self {
    Self {
      store,
      navigator,
      subject,
    }
  }

  pub fn subject(&self) -> &SubjectContext {
    &self.subject
  }

  /// `capture` 为完成扫描的那一帧，编码为 JPEG 随记录一起保存
  pub fn complete(&self, interpretation: &Interpretation, capture: Option<&Frame>) -> OutcomeRecord {
    let timestamp = Utc::now();
    let image = capture.and_then(|frame| match frame.to_jpeg() {
      Ok(bytes) => Some(bytes),
      Err(e) => {
        warn!("抓拍图像编码失败: {}", e);
        None
      }
    });

    let record = OutcomeRecord::from_interpretation(
      interpretation,
      self.subject.clone(),
      timestamp,
      image.as_ref().map(|_| image_file_name(&timestamp)),
    );
    info!("筛查结果: {}", record);

    if let Err(e) = self.store.append(&record, image.as_deref()) {
      warn!("结果保存失败: {}", e);
    }

    self.navigator.navigate(NavigationEvent::ShowResult(record.clone()));
    record
  }

  pub fn fail(&self, reason: FailureReason) {
    info!("扫描未完成: {}", reason);
    self.navigator.navigate(NavigationEvent::failure(reason));
  }
}
