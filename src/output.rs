// 该文件是 Xuese （血色） 项目的一部分。
// src/output.rs - 输出定义：结果存储、界面跳转与实时预览
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
use crate::detector::Detection;
use crate::frame::Frame;
use crate::outcome::OutcomeRecord;
use crate::scan::{FailureReason, ScanState};

mod console_navigator;
mod json_log_store;
pub use self::console_navigator::ConsoleNavigator;
pub use self::json_log_store::JsonLogStore;

#[cfg(feature = "preview_record")]
pub mod draw;
#[cfg(feature = "preview_record")]
mod preview_record;
#[cfg(feature = "preview_record")]
pub use self::preview_record::PreviewRecordOutput;

pub trait Render<Frame, Output> {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

/// 一次扫描推进后供预览使用的只读视图
#[derive(Debug, Clone, Copy)]
pub struct ScanView<'a> {
  pub detection: Option<&'a Detection>,
  pub state: &'a ScanState,
}

/// 结果持久化
///
/// 追加由实现方串行化；失败只记录日志，不影响结果展示。
pub trait OutcomeStore {
  fn append(&self, record: &OutcomeRecord, image: Option<&[u8]>) -> Result<(), StoreError>;
}

impl<T: OutcomeStore + ?Sized> OutcomeStore for &T {
  fn append(&self, record: &OutcomeRecord, image: Option<&[u8]>) -> Result<(), StoreError> {
    (**self).append(record, image)
  }
}

impl<T: OutcomeStore + ?Sized> OutcomeStore for Box<T> {
  fn append(&self, record: &OutcomeRecord, image: Option<&[u8]>) -> Result<(), StoreError> {
    (**self).append(record, image)
  }
}

/// 交给界面层的跳转事件
#[derive(Debug, Clone, PartialEq)]
pub enum NavigationEvent {
  ShowResult(OutcomeRecord),
  ShowFailure {
    reason: FailureReason,
    remediation: &'static str,
    /// 界面是否提供“重新扫描”入口
    can_retry: bool,
  },
}

impl NavigationEvent {
  pub fn failure(reason: FailureReason) -> Self {
    let remediation = reason.remediation();
    NavigationEvent::ShowFailure {
      reason,
      remediation,
      can_retry: true,
    }
  }
}

pub trait Navigator {
  fn navigate(&self, event: NavigationEvent);
}

impl<T: Navigator + ?Sized> Navigator for &T {
  fn navigate(&self, event: NavigationEvent) {
    (**self).navigate(event)
  }
}

impl<T: Navigator + ?Sized> Navigator for Box<T> {
  fn navigate(&self, event: NavigationEvent) {
    (**self).navigate(event)
  }
}

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum StoreWrapper {
  JsonLog(JsonLogStore),
}

impl FromUrl for StoreWrapper {
  type Error = StoreError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    use crate::FromUrlWithScheme;

    match url.scheme() {
      JsonLogStore::SCHEME => Ok(StoreWrapper::JsonLog(JsonLogStore::from_url(url)?)),
      _ => Err(StoreError::SchemeMismatch),
    }
  }
}

impl OutcomeStore for StoreWrapper {
  fn append(&self, record: &OutcomeRecord, image: Option<&[u8]>) -> Result<(), StoreError> {
    match self {
      StoreWrapper::JsonLog(store) => store.append(record, image),
    }
  }
}

pub enum PreviewWrapper {
  #[cfg(feature = "preview_record")]
  Record(PreviewRecordOutput),
}

impl FromUrl for PreviewWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "preview_record")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == PreviewRecordOutput::SCHEME {
        return Ok(PreviewWrapper::Record(PreviewRecordOutput::from_url(url)?));
      }
    }
    let _ = url;
    Err(OutputError::SchemeMismatch)
  }
}

impl<'a> Render<Frame, ScanView<'a>> for PreviewWrapper {
  type Error = OutputError;

  fn render_result(&self, frame: &Frame, result: &ScanView<'a>) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "preview_record")]
      PreviewWrapper::Record(output) => output.render_result(frame, result),
      #[allow(unreachable_patterns)]
      _ => {
        let _ = (frame, result);
        Err(OutputError::SchemeMismatch)
      }
    }
  }
}
