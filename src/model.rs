// 该文件是 Jiedao （街道巡检） 项目的一部分。
// src/model.rs - 模型抽象与加载
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
  path::{Path, PathBuf},
  str::FromStr,
  sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{FromUrl, ModelInput};
#[cfg(feature = "model_onnx")]
use crate::IMAGE_SIZE;

pub trait Model: Send + Sync {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 进程内共享的分类模型，输出与类别表对齐的概率向量
pub type SharedModel = Arc<dyn Model<Input = ModelInput, Output = Vec<f32>, Error = ModelError>>;

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("model file not found at {0}")]
  NotFound(PathBuf),
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("unsupported model source: {0}")]
  UnsupportedSource(String),
  #[error("model runtime error: {0}")]
  Runtime(String),
  #[error("model produces {actual} outputs, label table has {expected}")]
  OutputMismatch { expected: usize, actual: usize },
}

impl ModelError {
  pub fn runtime(context: &str, err: impl std::fmt::Display) -> Self {
    ModelError::Runtime(format!("{context}: {err:#}"))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
  Onnx,
}

impl ModelFormat {
  fn from_path(path: &Path) -> Result<Self, ModelError> {
    match path.extension().and_then(|ext| ext.to_str()) {
      Some(ext) if ext.eq_ignore_ascii_case("onnx") => Ok(ModelFormat::Onnx),
      _ => Err(ModelError::UnsupportedSource(format!(
        "cannot infer model format from {}",
        path.display()
      ))),
    }
  }
}

/// 模型文件位置
///
/// 可以是普通路径（按扩展名判断格式），也可以是 `onnx:///path` 或 `file:///path` 形式的 URL。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
  pub format: ModelFormat,
  pub path: PathBuf,
}

const ONNX_SCHEME: &str = "onnx";
const FILE_SCHEME: &str = "file";

impl FromUrl for ModelSource {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let path = urlencoding::decode(url.path())
      .map_err(|e| ModelError::UnsupportedSource(format!("{url}: {e}")))?;
    let path = PathBuf::from(path.as_ref());

    match url.scheme() {
      ONNX_SCHEME => Ok(ModelSource {
        format: ModelFormat::Onnx,
        path,
      }),
      FILE_SCHEME => Ok(ModelSource {
        format: ModelFormat::from_path(&path)?,
        path,
      }),
      scheme => Err(ModelError::UnsupportedSource(format!(
        "scheme '{scheme}' is not supported"
      ))),
    }
  }
}

impl FromStr for ModelSource {
  type Err = ModelError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    if s.contains("://") {
      let url = Url::parse(s).map_err(|e| ModelError::UnsupportedSource(format!("{s}: {e}")))?;
      return Self::from_url(&url);
    }

    let path = PathBuf::from(s);
    Ok(ModelSource {
      format: ModelFormat::from_path(&path)?,
      path,
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelStatus {
  NotLoaded,
  Loaded,
  NotFound,
  Error,
}

/// 启动时确定、之后只读的模型状态
pub enum ModelState {
  NotLoaded,
  Loaded {
    model: SharedModel,
    path: PathBuf,
    loaded_at: DateTime<Utc>,
  },
  NotFound {
    path: PathBuf,
  },
  Failed {
    path: PathBuf,
    message: String,
  },
}

impl ModelState {
  pub fn loaded(model: SharedModel, path: impl Into<PathBuf>) -> Self {
    ModelState::Loaded {
      model,
      path: path.into(),
      loaded_at: Utc::now(),
    }
  }

  pub fn failed(path: impl Into<PathBuf>, err: &ModelError) -> Self {
    ModelState::Failed {
      path: path.into(),
      message: err.to_string(),
    }
  }

  pub fn status(&self) -> ModelStatus {
    match self {
      ModelState::NotLoaded => ModelStatus::NotLoaded,
      ModelState::Loaded { .. } => ModelStatus::Loaded,
      ModelState::NotFound { .. } => ModelStatus::NotFound,
      ModelState::Failed { .. } => ModelStatus::Error,
    }
  }

  pub fn model(&self) -> Option<&SharedModel> {
    match self {
      ModelState::Loaded { model, .. } => Some(model),
      _ => None,
    }
  }

  pub fn path(&self) -> Option<&Path> {
    match self {
      ModelState::NotLoaded => None,
      ModelState::Loaded { path, .. }
      | ModelState::NotFound { path }
      | ModelState::Failed { path, .. } => Some(path),
    }
  }

  pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
    match self {
      ModelState::Loaded { loaded_at, .. } => Some(*loaded_at),
      _ => None,
    }
  }

  pub fn error_message(&self) -> Option<String> {
    match self {
      ModelState::NotLoaded => Some("model has not been loaded".to_string()),
      ModelState::Loaded { .. } => None,
      ModelState::NotFound { path } => Some(ModelError::NotFound(path.clone()).to_string()),
      ModelState::Failed { message, .. } => Some(message.clone()),
    }
  }
}

impl std::fmt::Debug for ModelState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ModelState")
      .field("status", &self.status())
      .field("path", &self.path())
      .finish()
  }
}

/// 解析位置字符串并加载模型，失败时记录为降级状态而不是中止进程
pub fn load_from_location(location: &str, num_classes: usize) -> ModelState {
  match ModelSource::from_str(location) {
    Ok(source) => load_model(&source, num_classes),
    Err(_) if !location.contains("://") && !Path::new(location).exists() => {
      warn!("模型文件不存在: {}", location);
      ModelState::NotFound {
        path: PathBuf::from(location),
      }
    }
    Err(e) => {
      error!("模型位置无效 {}: {}", location, e);
      ModelState::failed(location, &e)
    }
  }
}

pub fn load_model(source: &ModelSource, num_classes: usize) -> ModelState {
  if !source.path.exists() {
    warn!("模型文件不存在: {}", source.path.display());
    return ModelState::NotFound {
      path: source.path.clone(),
    };
  }

  match build_model(source, num_classes) {
    Ok(model) => {
      info!("模型加载成功: {}", source.path.display());
      ModelState::loaded(model, &source.path)
    }
    Err(e) => {
      error!("模型加载失败 {}: {}", source.path.display(), e);
      ModelState::failed(&source.path, &e)
    }
  }
}

fn build_model(source: &ModelSource, num_classes: usize) -> Result<SharedModel, ModelError> {
  match source.format {
    #[cfg(feature = "model_onnx")]
    ModelFormat::Onnx => {
      let model = OnnxClassifierBuilder::new(&source.path)
        .expect_classes(num_classes)
        .build::<IMAGE_SIZE, IMAGE_SIZE>()?;
      Ok(Arc::new(model))
    }
    #[cfg(not(feature = "model_onnx"))]
    ModelFormat::Onnx => {
      let _ = num_classes;
      Err(ModelError::UnsupportedSource(
        "built without the model_onnx feature".to_string(),
      ))
    }
  }
}

#[cfg(feature = "model_onnx")]
mod onnx;
#[cfg(feature = "model_onnx")]
pub use self::onnx::{OnnxClassifier, OnnxClassifierBuilder};
