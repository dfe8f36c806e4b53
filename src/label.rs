// 该文件是 Jiedao （街道巡检） 项目的一部分。
// src/label.rs - 类别表与优先级
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

use std::{collections::HashSet, fmt, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 缺失描述时使用的占位文本
pub const UNKNOWN_DESCRIPTION: &str = "Unknown";

/// 巡检优先级，声明顺序即严重程度从低到高
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
  #[default]
  Low,
  Medium,
  High,
  Critical,
}

impl Priority {
  pub fn as_str(&self) -> &'static str {
    match self {
      Priority::Low => "LOW",
      Priority::Medium => "MEDIUM",
      Priority::High => "HIGH",
      Priority::Critical => "CRITICAL",
    }
  }
}

impl fmt::Display for Priority {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEntry {
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub priority: Option<Priority>,
}

impl LabelEntry {
  fn new(name: &str, description: &str, priority: Priority) -> Self {
    Self {
      name: name.to_string(),
      description: Some(description.to_string()),
      priority: Some(priority),
    }
  }

  pub fn description(&self) -> &str {
    self.description.as_deref().unwrap_or(UNKNOWN_DESCRIPTION)
  }

  pub fn priority(&self) -> Priority {
    self.priority.unwrap_or_default()
  }
}

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("I/O error reading label file: {0}")]
  Io(#[from] std::io::Error),
  #[error("invalid label file: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("label table is empty")]
  Empty,
  #[error("duplicate label: {0}")]
  Duplicate(String),
}

#[derive(Deserialize)]
struct LabelFile {
  labels: Vec<LabelEntry>,
}

/// 有序类别表，下标与模型输出向量逐位对齐
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
  entries: Box<[LabelEntry]>,
}

impl LabelTable {
  pub fn new(entries: Vec<LabelEntry>) -> Result<Self, LabelError> {
    if entries.is_empty() {
      return Err(LabelError::Empty);
    }

    let mut seen = HashSet::new();
    for entry in &entries {
      if !seen.insert(entry.name.as_str()) {
        return Err(LabelError::Duplicate(entry.name.clone()));
      }
    }

    Ok(Self {
      entries: entries.into_boxed_slice(),
    })
  }

  /// 内置的街道设施六分类
  pub fn street_infrastructure() -> Self {
    let entries = vec![
      LabelEntry::new("garbage", "Garbage/litter on street", Priority::Medium),
      LabelEntry::new(
        "open_manhole",
        "Uncovered manhole - Safety hazard",
        Priority::Critical,
      ),
      LabelEntry::new("potholes", "Road pothole - Needs repair", Priority::High),
      LabelEntry::new("road_normal", "Normal road condition", Priority::Low),
      LabelEntry::new(
        "streetlight_bad",
        "Broken/non-functional streetlight",
        Priority::Medium,
      ),
      LabelEntry::new("streetlight_good", "Working streetlight", Priority::Low),
    ];

    Self {
      entries: entries.into_boxed_slice(),
    }
  }

  pub fn from_toml_str(content: &str) -> Result<Self, LabelError> {
    let file: LabelFile = toml::from_str(content)?;
    Self::new(file.labels)
  }

  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LabelError> {
    let content = std::fs::read_to_string(path)?;
    Self::from_toml_str(&content)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn entries(&self) -> &[LabelEntry] {
    &self.entries
  }

  pub fn find(&self, name: &str) -> Option<&LabelEntry> {
    self.entries.iter().find(|entry| entry.name == name)
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.entries.iter().map(|entry| entry.name.as_str())
  }

  /// 未知类别回落到 `LOW`
  pub fn priority_of(&self, name: &str) -> Priority {
    self.find(name).map(LabelEntry::priority).unwrap_or_default()
  }

  /// 未知类别回落到 `"Unknown"`
  pub fn description_of(&self, name: &str) -> &str {
    self
      .find(name)
      .map(LabelEntry::description)
      .unwrap_or(UNKNOWN_DESCRIPTION)
  }

  /// 缺少描述或优先级的类别名
  pub fn incomplete(&self) -> Vec<&str> {
    self
      .entries
      .iter()
      .filter(|entry| entry.description.is_none() || entry.priority.is_none())
      .map(|entry| entry.name.as_str())
      .collect()
  }
}

impl Default for LabelTable {
  fn default() -> Self {
    Self::street_infrastructure()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLE_LABELS: &str = include_str!("../labels/street.toml");

  #[test]
  fn test_builtin_order() {
    let labels = LabelTable::street_infrastructure();
    let names = labels.names().collect::<Vec<_>>();
    assert_eq!(
      names,
      [
        "garbage",
        "open_manhole",
        "potholes",
        "road_normal",
        "streetlight_bad",
        "streetlight_good"
      ]
    );
  }

  #[test]
  fn test_builtin_metadata_is_complete() {
    let labels = LabelTable::street_infrastructure();
    assert!(labels.incomplete().is_empty());
    for entry in labels.entries() {
      assert_eq!(
        labels.entries().iter().filter(|e| e.name == entry.name).count(),
        1
      );
      assert_ne!(entry.description(), UNKNOWN_DESCRIPTION);
    }
  }

  #[test]
  fn test_builtin_priorities() {
    let labels = LabelTable::street_infrastructure();
    assert_eq!(labels.priority_of("open_manhole"), Priority::Critical);
    assert_eq!(labels.priority_of("potholes"), Priority::High);
    assert_eq!(labels.priority_of("garbage"), Priority::Medium);
    assert_eq!(labels.priority_of("streetlight_bad"), Priority::Medium);
    assert_eq!(labels.priority_of("road_normal"), Priority::Low);
    assert_eq!(labels.priority_of("streetlight_good"), Priority::Low);
  }

  #[test]
  fn test_priority_ordering() {
    assert!(Priority::Critical > Priority::High);
    assert!(Priority::High > Priority::Medium);
    assert!(Priority::Medium > Priority::Low);
  }

  #[test]
  fn test_sample_file_matches_builtin() {
    let labels = LabelTable::from_toml_str(SAMPLE_LABELS).unwrap();
    assert_eq!(labels, LabelTable::street_infrastructure());
  }

  #[test]
  fn test_missing_metadata_falls_back() {
    let labels = LabelTable::from_toml_str(
      r#"
        [[labels]]
        name = "graffiti"
      "#,
    )
    .unwrap();

    assert_eq!(labels.incomplete(), ["graffiti"]);
    assert_eq!(labels.priority_of("graffiti"), Priority::Low);
    assert_eq!(labels.description_of("graffiti"), "Unknown");
    assert_eq!(labels.priority_of("not_a_label"), Priority::Low);
    assert_eq!(labels.description_of("not_a_label"), "Unknown");
  }

  #[test]
  fn test_rejects_duplicates() {
    let err = LabelTable::from_toml_str(
      r#"
        [[labels]]
        name = "potholes"
        [[labels]]
        name = "potholes"
      "#,
    )
    .unwrap_err();
    assert!(matches!(err, LabelError::Duplicate(name) if name == "potholes"));
  }

  #[test]
  fn test_rejects_empty_table() {
    let err = LabelTable::from_toml_str("labels = []").unwrap_err();
    assert!(matches!(err, LabelError::Empty));
  }

  #[test]
  fn test_rejects_unknown_priority() {
    let err = LabelTable::from_toml_str(
      r#"
        [[labels]]
        name = "potholes"
        priority = "URGENT"
      "#,
    )
    .unwrap_err();
    assert!(matches!(err, LabelError::Parse(_)));
  }
}
