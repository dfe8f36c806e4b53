// 该文件是 Jiedao （街道巡检） 项目的一部分。
// src/task.rs - 预测任务流程
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

use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tracing::{info, warn};

use crate::{
  classifier::{ClassifyError, Classifier},
  input::{PreprocessError, ResizeFilter, StreetPreprocessor, Upload},
  label::LabelTable,
  model::ModelState,
  output::{MapError, Prediction, ResultMapper},
};

#[derive(Error, Debug)]
pub enum PredictError {
  #[error(transparent)]
  Preprocess(#[from] PreprocessError),
  #[error(transparent)]
  Classify(#[from] ClassifyError),
  #[error(transparent)]
  Map(#[from] MapError),
  #[error("preprocessing worker failed: {0}")]
  Worker(String),
}

impl PredictError {
  /// 返回给调用方的错误类别
  pub fn category(&self) -> &'static str {
    match self {
      PredictError::Preprocess(PreprocessError::EmptyUpload) => "empty_upload",
      PredictError::Preprocess(PreprocessError::Shape(_)) => "shape_mismatch",
      PredictError::Preprocess(_) => "decode_error",
      PredictError::Classify(ClassifyError::ModelUnavailable(_)) => "model_unavailable",
      PredictError::Classify(ClassifyError::Timeout(_)) => "inference_timeout",
      PredictError::Classify(ClassifyError::Inference(_)) => "inference_error",
      PredictError::Classify(ClassifyError::Worker(_)) | PredictError::Worker(_) => {
        "internal_error"
      }
      PredictError::Map(MapError::LengthMismatch { .. }) => "shape_mismatch",
      PredictError::Map(MapError::NoScore) => "inference_error",
    }
  }

  pub fn is_client_error(&self) -> bool {
    matches!(
      self,
      PredictError::Preprocess(
        PreprocessError::EmptyUpload | PreprocessError::Decode(_) | PreprocessError::Io(_)
      )
    )
  }
}

/// 流水线参数
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
  pub resize_filter: ResizeFilter,
  pub max_concurrent_inferences: usize,
  pub inference_timeout: Duration,
}

impl Default for PipelineSettings {
  fn default() -> Self {
    Self {
      resize_filter: ResizeFilter::default(),
      max_concurrent_inferences: 4,
      inference_timeout: Duration::from_secs(30),
    }
  }
}

/// 批量预测中单个文件的结果
#[derive(Debug)]
pub struct BatchItem {
  pub filename: String,
  pub outcome: Result<Prediction, PredictError>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
  pub items: Vec<BatchItem>,
}

impl BatchReport {
  pub fn total(&self) -> usize {
    self.items.len()
  }

  pub fn succeeded(&self) -> usize {
    self.items.iter().filter(|item| item.outcome.is_ok()).count()
  }

  pub fn failed(&self) -> usize {
    self.total() - self.succeeded()
  }
}

/// 解码 → 推理 → 结果映射
pub struct PredictionPipeline {
  preprocessor: StreetPreprocessor,
  classifier: Classifier,
  mapper: ResultMapper,
}

impl PredictionPipeline {
  pub fn new(model: Arc<ModelState>, labels: Arc<LabelTable>, settings: PipelineSettings) -> Self {
    Self {
      preprocessor: StreetPreprocessor::new(settings.resize_filter),
      classifier: Classifier::new(
        model,
        settings.max_concurrent_inferences,
        settings.inference_timeout,
      ),
      mapper: ResultMapper::new(labels),
    }
  }

  pub fn model_state(&self) -> &ModelState {
    self.classifier.state()
  }

  pub fn labels(&self) -> &LabelTable {
    self.mapper.labels()
  }

  /// 模型不可用时直接失败，不读取上传内容
  pub fn ensure_ready(&self) -> Result<(), PredictError> {
    self.classifier.ready_model()?;
    Ok(())
  }

  pub async fn predict(&self, upload: Upload) -> Result<Prediction, PredictError> {
    self.ensure_ready()?;

    let now = std::time::Instant::now();
    let filename = upload.filename.clone();
    let preprocessor = self.preprocessor;
    let tensor = tokio::task::spawn_blocking(move || preprocessor.preprocess(&upload))
      .await
      .map_err(|e| PredictError::Worker(e.to_string()))??;
    let preprocessed = now.elapsed();

    let probabilities = self.classifier.classify(tensor).await?;
    let prediction = self.mapper.map(&probabilities)?;

    info!(
      "{}: {} {:.2}% ({}), 预处理 {:.2?}, 总耗时 {:.2?}",
      filename,
      prediction.label,
      prediction.confidence,
      prediction.priority,
      preprocessed,
      now.elapsed()
    );
    Ok(prediction)
  }

  /// 逐个处理上传文件，单个失败不影响其余文件
  pub async fn predict_batch(&self, uploads: Vec<Upload>) -> BatchReport {
    let mut report = BatchReport {
      items: Vec::with_capacity(uploads.len()),
    };

    for upload in uploads {
      let filename = upload.filename.clone();
      let outcome = self.predict(upload).await;
      if let Err(e) = &outcome {
        warn!("批量预测 {} 失败: {}", filename, e);
      }
      report.items.push(BatchItem { filename, outcome });
    }

    info!(
      "批量预测完成: 共 {} 个, 成功 {}, 失败 {}",
      report.total(),
      report.succeeded(),
      report.failed()
    );
    report
  }
}
