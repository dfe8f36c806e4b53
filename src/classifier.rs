// 该文件是 Jiedao （街道巡检） 项目的一部分。
// src/classifier.rs - 受限并发的模型推理
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
use tokio::sync::Semaphore;
use tracing::debug;

use crate::{
  ModelInput,
  model::{ModelError, ModelState, SharedModel},
};

#[derive(Error, Debug)]
pub enum ClassifyError {
  #[error("model not available: {0}")]
  ModelUnavailable(String),
  #[error("inference failed: {0}")]
  Inference(#[from] ModelError),
  #[error("inference timed out after {0:?}")]
  Timeout(Duration),
  #[error("inference worker failed: {0}")]
  Worker(String),
}

/// 推理入口
///
/// 同时进行的前向计算数量受信号量限制。许可在阻塞任务结束后才释放，
/// 因此超时返回的请求仍然占用名额直到计算真正完成。
pub struct Classifier {
  state: Arc<ModelState>,
  permits: Arc<Semaphore>,
  timeout: Duration,
}

impl Classifier {
  pub fn new(state: Arc<ModelState>, max_concurrent: usize, timeout: Duration) -> Self {
    Self {
      state,
      permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
      timeout,
    }
  }

  pub fn state(&self) -> &ModelState {
    &self.state
  }

  /// 模型未加载时立即失败
  pub fn ready_model(&self) -> Result<SharedModel, ClassifyError> {
    self.state.model().cloned().ok_or_else(|| {
      ClassifyError::ModelUnavailable(
        self
          .state
          .error_message()
          .unwrap_or_else(|| "model is not loaded".to_string()),
      )
    })
  }

  pub async fn classify(&self, input: ModelInput) -> Result<Vec<f32>, ClassifyError> {
    let model = self.ready_model()?;

    let run = async {
      let permit = self
        .permits
        .clone()
        .acquire_owned()
        .await
        .map_err(|e| ClassifyError::Worker(e.to_string()))?;

      debug!("执行模型推理");
      let output = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        model.infer(&input)
      })
      .await
      .map_err(|e| ClassifyError::Worker(e.to_string()))??;

      Ok::<_, ClassifyError>(output)
    };

    tokio::time::timeout(self.timeout, run)
      .await
      .map_err(|_| ClassifyError::Timeout(self.timeout))?
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::Model;
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct FixedModel(Vec<f32>);

  impl Model for FixedModel {
    type Input = ModelInput;
    type Output = Vec<f32>;
    type Error = ModelError;

    fn infer(&self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
      Ok(self.0.clone())
    }
  }

  struct SlowModel(Duration);

  impl Model for SlowModel {
    type Input = ModelInput;
    type Output = Vec<f32>;
    type Error = ModelError;

    fn infer(&self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
      std::thread::sleep(self.0);
      Ok(vec![1.0])
    }
  }

  /// 记录同时执行 `infer` 的最大数量
  #[derive(Default)]
  struct CountingModel {
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
  }

  impl Model for CountingModel {
    type Input = ModelInput;
    type Output = Vec<f32>;
    type Error = ModelError;

    fn infer(&self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
      let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
      self.peak.fetch_max(now, Ordering::SeqCst);
      std::thread::sleep(Duration::from_millis(50));
      self.active.fetch_sub(1, Ordering::SeqCst);
      self.calls.fetch_add(1, Ordering::SeqCst);
      Ok(vec![1.0])
    }
  }

  struct BrokenModel;

  impl Model for BrokenModel {
    type Input = ModelInput;
    type Output = Vec<f32>;
    type Error = ModelError;

    fn infer(&self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
      Err(ModelError::Runtime("shape [1,224,224,3] expected".to_string()))
    }
  }

  fn classifier(state: ModelState, timeout: Duration) -> Classifier {
    Classifier::new(Arc::new(state), 2, timeout)
  }

  #[tokio::test]
  async fn test_classify_returns_model_output() {
    let model: SharedModel = Arc::new(FixedModel(vec![0.1, 0.9]));
    let classifier = classifier(ModelState::loaded(model, "fixed.onnx"), Duration::from_secs(5));

    let output = classifier.classify(ModelInput::default()).await.unwrap();
    assert_eq!(output, vec![0.1, 0.9]);
  }

  #[tokio::test]
  async fn test_unloaded_model_fails_fast() {
    let classifier = classifier(
      ModelState::NotFound {
        path: "/data/final_model_98plus.onnx".into(),
      },
      Duration::from_secs(5),
    );

    let err = classifier.classify(ModelInput::default()).await.unwrap_err();
    match err {
      ClassifyError::ModelUnavailable(message) => assert!(message.contains("not found")),
      other => panic!("Expected ModelUnavailable, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn test_model_error_is_inference_error() {
    let model: SharedModel = Arc::new(BrokenModel);
    let classifier = classifier(ModelState::loaded(model, "broken.onnx"), Duration::from_secs(5));

    let err = classifier.classify(ModelInput::default()).await.unwrap_err();
    assert!(matches!(err, ClassifyError::Inference(ModelError::Runtime(_))));
  }

  #[tokio::test]
  async fn test_slow_inference_times_out() {
    let model: SharedModel = Arc::new(SlowModel(Duration::from_millis(500)));
    let classifier = classifier(
      ModelState::loaded(model, "slow.onnx"),
      Duration::from_millis(50),
    );

    let err = classifier.classify(ModelInput::default()).await.unwrap_err();
    assert!(matches!(err, ClassifyError::Timeout(_)));
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_concurrent_inferences_are_bounded() {
    let counter = Arc::new(CountingModel::default());
    let model: SharedModel = counter.clone();
    let classifier = Arc::new(Classifier::new(
      Arc::new(ModelState::loaded(model, "counting.onnx")),
      2,
      Duration::from_secs(5),
    ));

    let handles = (0..8)
      .map(|_| {
        let classifier = classifier.clone();
        tokio::spawn(async move { classifier.classify(ModelInput::default()).await })
      })
      .collect::<Vec<_>>();
    for handle in handles {
      assert_eq!(handle.await.unwrap().unwrap(), vec![1.0]);
    }

    assert_eq!(counter.calls.load(Ordering::SeqCst), 8);
    let peak = counter.peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak concurrency was {peak}");
  }

  #[tokio::test]
  async fn test_timed_out_inference_keeps_permit() {
    let model: SharedModel = Arc::new(SlowModel(Duration::from_millis(300)));
    let classifier = Classifier::new(
      Arc::new(ModelState::loaded(model, "slow.onnx")),
      1,
      Duration::from_millis(50),
    );

    let err = classifier.classify(ModelInput::default()).await.unwrap_err();
    assert!(matches!(err, ClassifyError::Timeout(_)));
    assert_eq!(classifier.permits.available_permits(), 0);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(classifier.permits.available_permits(), 1);
  }
}
