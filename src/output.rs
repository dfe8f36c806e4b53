// 该文件是 Jiedao （街道巡检） 项目的一部分。
// src/output.rs - 推理结果映射
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

use std::sync::Arc;

use serde::{Serialize, Serializer, ser::SerializeMap};
use thiserror::Error;

use crate::label::{LabelTable, Priority};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MapError {
  #[error("model output has {actual} values, label table has {expected}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("model output contains no finite score")]
  NoScore,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelScore {
  pub label: String,
  pub confidence: f64,
}

/// 全部类别的置信度，按置信度降序排列，序列化为 JSON 对象
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Distribution(Vec<LabelScore>);

impl Distribution {
  pub fn iter(&self) -> impl Iterator<Item = &LabelScore> {
    self.0.iter()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn total(&self) -> f64 {
    self.0.iter().map(|score| score.confidence).sum()
  }
}

impl Serialize for Distribution {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.0.len()))?;
    for score in &self.0 {
      map.serialize_entry(&score.label, &score.confidence)?;
    }
    map.end()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
  #[serde(rename = "class")]
  pub label: String,
  pub confidence: f64,
  pub priority: Priority,
  pub description: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub all_predictions: Option<Distribution>,
}

impl Prediction {
  pub fn without_distribution(mut self) -> Self {
    self.all_predictions = None;
    self
  }
}

/// 概率转百分比，保留两位小数
pub fn to_percent(probability: f32) -> f64 {
  (f64::from(probability) * 100.0 * 100.0).round() / 100.0
}

/// 取第一个最大值的下标，NaN 不参与比较；全部为 NaN 时返回 `None`
pub fn argmax(values: &[f32]) -> Option<usize> {
  let mut best: Option<(usize, f32)> = None;
  for (index, &value) in values.iter().enumerate() {
    if value.is_nan() {
      continue;
    }
    if best.is_none_or(|(_, best_value)| value > best_value) {
      best = Some((index, value));
    }
  }
  best.map(|(index, _)| index)
}

#[derive(Debug, Clone)]
pub struct ResultMapper {
  labels: Arc<LabelTable>,
}

impl ResultMapper {
  pub fn new(labels: Arc<LabelTable>) -> Self {
    Self { labels }
  }

  pub fn labels(&self) -> &LabelTable {
    &self.labels
  }

  pub fn map(&self, probabilities: &[f32]) -> Result<Prediction, MapError> {
    let expected = self.labels.len();
    if probabilities.len() != expected {
      return Err(MapError::LengthMismatch {
        expected,
        actual: probabilities.len(),
      });
    }

    let index = argmax(probabilities).ok_or(MapError::NoScore)?;
    let entry = &self.labels.entries()[index];

    let mut scores = self
      .labels
      .entries()
      .iter()
      .zip(probabilities)
      .map(|(entry, &p)| LabelScore {
        label: entry.name.clone(),
        confidence: to_percent(p),
      })
      .collect::<Vec<_>>();
    // 稳定排序，同分时保持类别表顺序
    scores.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    Ok(Prediction {
      label: entry.name.clone(),
      confidence: to_percent(probabilities[index]),
      priority: entry.priority(),
      description: entry.description().to_string(),
      all_predictions: Some(Distribution(scores)),
    })
  }
}
