// 该文件是 Kanjian （看见） 项目的一部分。
// src/preference.rs - 主题偏好存储
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

use std::{
  fs, io,
  path::{Path, PathBuf},
};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DARK_MODE_KEY: &str = "darkMode";

#[derive(Error, Debug)]
pub enum PreferenceError {
  #[error("无法读写偏好文件: {0}")]
  IoError(#[from] io::Error),
  #[error("偏好文件格式错误: {0}")]
  FormatError(#[from] serde_json::Error),
}

/// 以 JSON 文件保存深色模式开关，值为字符串 `"true"` 或 `"false"`
#[derive(Debug, Clone)]
pub struct ThemePreference {
  path: PathBuf,
}

impl ThemePreference {
  pub fn new<P: Into<PathBuf>>(path: P) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// 文件缺失或内容无法识别时视为浅色模式
  pub fn load(&self) -> bool {
    match self.read_map() {
      Ok(map) => map.get(DARK_MODE_KEY).and_then(Value::as_str) == Some("true"),
      Err(PreferenceError::IoError(e)) if e.kind() == io::ErrorKind::NotFound => {
        debug!("偏好文件不存在: {}", self.path.display());
        false
      }
      Err(e) => {
        warn!("读取偏好文件失败 {}: {}", self.path.display(), e);
        false
      }
    }
  }

  /// 保留文件中的其他键
  pub fn store(&self, dark_mode: bool) -> Result<(), PreferenceError> {
    let mut map = match self.read_map() {
      Ok(map) => map,
      Err(PreferenceError::IoError(e)) if e.kind() == io::ErrorKind::NotFound => Map::new(),
      Err(e) => {
        warn!("偏好文件内容无效，将被覆盖: {}", e);
        Map::new()
      }
    };
    map.insert(
      DARK_MODE_KEY.to_string(),
      Value::String(dark_mode.to_string()),
    );

    let content = serde_json::to_string_pretty(&Value::Object(map))?;
    fs::write(&self.path, content)?;
    info!("深色模式: {}", dark_mode);
    Ok(())
  }

  /// 返回切换后的值
  pub fn toggle(&self) -> Result<bool, PreferenceError> {
    let dark_mode = !self.load();
    self.store(dark_mode)?;
    Ok(dark_mode)
  }

  fn read_map(&self) -> Result<Map<String, Value>, PreferenceError> {
    let content = fs::read_to_string(&self.path)?;
    match serde_json::from_str(&content)? {
      Value::Object(map) => Ok(map),
      _ => Ok(Map::new()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("kanjian-{}-{}.json", name, std::process::id()))
  }

  #[test]
  fn missing_file_is_light_mode() {
    let preference = ThemePreference::new(temp_path("missing"));
    let _ = fs::remove_file(preference.path());
    assert!(!preference.load());
  }

  #[test]
  fn toggle_round_trips_through_file() {
    let path = temp_path("toggle");
    fs::write(&path, r#"{"language":"en-US"}"#).unwrap();
    let preference = ThemePreference::new(&path);

    assert!(preference.toggle().unwrap());
    assert!(preference.load());
    let saved: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(saved[DARK_MODE_KEY], "true");
    assert_eq!(saved["language"], "en-US");

    assert!(!preference.toggle().unwrap());
    assert!(!preference.load());
    let _ = fs::remove_file(path);
  }

  #[test]
  fn non_string_value_is_not_dark_mode() {
    let path = temp_path("bool");
    fs::write(&path, r#"{"darkMode":true}"#).unwrap();
    assert!(!ThemePreference::new(&path).load());
    let _ = fs::remove_file(path);
  }
}
