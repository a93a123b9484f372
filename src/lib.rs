// 该文件是 Xuese （血色） 项目的一部分。
// src/lib.rs - 库主文件
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

//! # Xuese 眼部区域贫血筛查管线
//!
//! 数据单向流动：
//!
//! 帧源 → 人脸定位 → 扫描进度控制 → （完成时）ROI 裁剪 → 推理模型 → 结果解释 → 结果交接
//!
//! 除 `task` 外，各模块都可以脱离摄像头独立测试。

pub mod detector;
pub mod frame;
pub mod handoff;
pub mod input;
pub mod interpret;
pub mod model;
pub mod outcome;
pub mod output;
pub mod roi;
pub mod scan;
pub mod task;

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}

/// 从 URL 中解析本地文件路径（处理百分号编码）
pub(crate) fn url_file_path(url: &url::Url) -> String {
  urlencoding::decode(url.path())
    .map(|p| p.into_owned())
    .unwrap_or_else(|_| url.path().to_string())
}

/// 读取 URL 查询参数并解析为指定类型，缺失或解析失败时返回 `None`
pub(crate) fn url_query<T: std::str::FromStr>(url: &url::Url, key: &str) -> Option<T> {
  url
    .query_pairs()
    .find(|(k, _)| k == key)
    .and_then(|(_, v)| v.parse::<T>().ok())
}
