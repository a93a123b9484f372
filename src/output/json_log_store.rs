// 该文件是 Xuese （血色） 项目的一部分。
// src/output/json_log_store.rs - JSON 结果日志存储
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

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use super::{OutcomeStore, StoreError};
use crate::outcome::OutcomeRecord;
use crate::{FromUrl, FromUrlWithScheme, url_file_path};

const DATA_DIR: &str = "data";
const UPLOADS_DIR: &str = "uploads";
const RESULTS_FILE: &str = "results.json";

/// 把结果追加到 `<root>/data/results.json`，抓拍图像保存到 `<root>/uploads/`
///
/// URL 格式：`folder:///var/lib/xuese`
///
/// 日志文件是一个 JSON 数组，每次追加都完整重写（先写临时文件再重命名）。
/// 无法解析的日志会被移到一旁，然后重新开始。
pub struct JsonLogStore {
  root: PathBuf,
  lock: Mutex<()>,
}

impl FromUrlWithScheme for JsonLogStore {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for JsonLogStore {
  type Error = StoreError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(StoreError::SchemeMismatch);
    }
    Ok(Self::new(url_file_path(url)))
  }
}

impl JsonLogStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      lock: Mutex::new(()),
    }
  }

  pub fn results_path(&self) -> PathBuf {
    self.root.join(DATA_DIR).join(RESULTS_FILE)
  }

  pub fn uploads_dir(&self) -> PathBuf {
    self.root.join(UPLOADS_DIR)
  }

  /// 读取全部已保存的记录
  pub fn load(&self) -> Result<Vec<OutcomeRecord>, StoreError> {
    let path = self.results_path();
    if !path.exists() {
      return Ok(Vec::new());
    }
    let content = fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&content)?)
  }

  fn read_entries(path: &Path) -> Result<Vec<Value>, StoreError> {
    if !path.exists() {
      return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)?;
    match serde_json::from_str::<Vec<Value>>(&content) {
      Ok(entries) => Ok(entries),
      Err(e) => {
        let aside = path.with_extension(format!("corrupt-{}.json", Utc::now().timestamp_millis()));
        warn!("结果日志无法解析 ({}), 已移至 {}", e, aside.display());
        fs::rename(path, &aside)?;
        Ok(Vec::new())
      }
    }
  }
}

impl OutcomeStore for JsonLogStore {
  fn append(&self, record: &OutcomeRecord, image: Option<&[u8]>) -> Result<(), StoreError> {
    let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

    if let (Some(bytes), Some(name)) = (image, record.image()) {
      let uploads = self.uploads_dir();
      fs::create_dir_all(&uploads)?;
      let image_path = uploads.join(name);
      fs::write(&image_path, bytes)?;
      debug!("抓拍图像已保存: {}", image_path.display());
    }

    let path = self.results_path();
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
    }

    let mut entries = Self::read_entries(&path)?;
    entries.push(serde_json::to_value(record)?);

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(&entries)?)?;
    fs::rename(&tmp, &path)?;

    info!("结果已保存: {} (共 {} 条)", path.display(), entries.len());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::interpret::Severity;

  #[test]
  fn appends_records_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonLogStore::new(dir.path());

    let first = OutcomeRecord::fixture(Severity::Severe, 6.0, 0.9);
    let second = OutcomeRecord::fixture(Severity::NonAnemic, 13.5, 0.85);
    store.append(&first, None).unwrap();
    store.append(&second, None).unwrap();

    assert_eq!(store.load().unwrap(), vec![first, second]);
    assert!(!store.uploads_dir().exists());
  }

  #[test]
  fn corrupt_log_is_moved_aside() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonLogStore::new(dir.path());
    fs::create_dir_all(dir.path().join(DATA_DIR)).unwrap();
    fs::write(store.results_path(), "{ not json").unwrap();

    let record = OutcomeRecord::fixture(Severity::Mild, 11.0, 0.6);
    store.append(&record, None).unwrap();

    assert_eq!(store.load().unwrap(), vec![record]);
    let aside = fs::read_dir(dir.path().join(DATA_DIR))
      .unwrap()
      .filter_map(|e| e.ok())
      .filter(|e| e.file_name().to_string_lossy().contains("corrupt"))
      .count();
    assert_eq!(aside, 1);
  }

  #[test]
  fn url_selects_root_directory() {
    let url = Url::parse("folder:///var/lib/xuese%20data").unwrap();
    let store = JsonLogStore::from_url(&url).unwrap();
    assert_eq!(
      store.results_path(),
      PathBuf::from("/var/lib/xuese data/data/results.json")
    );
  }
}
