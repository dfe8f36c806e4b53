// 该文件是 Jiedao （街道巡检） 项目的一部分。
// src/server.rs - HTTP 接口
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

use axum::{
  Json, Router,
  extract::{DefaultBodyLimit, Multipart, Query, State},
  routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::debug;

use crate::{
  IMAGE_SIZE,
  input::Upload,
  label::{LabelTable, Priority},
  model::{ModelState, ModelStatus},
  output::Prediction,
  task::{PipelineSettings, PredictionPipeline},
};

mod error;
pub use self::error::{ApiError, ErrorBody};

const SERVICE_NAME: &str = "Street Infrastructure Classifier API";
const SINGLE_FILE_FIELD: &str = "file";

/// 请求处理所需的全部只读状态，启动时构建一次
pub struct AppContext {
  pipeline: PredictionPipeline,
  max_batch_files: usize,
}

pub type SharedState = Arc<AppContext>;

impl AppContext {
  pub fn new(
    model: Arc<ModelState>,
    labels: Arc<LabelTable>,
    settings: PipelineSettings,
    max_batch_files: usize,
  ) -> Self {
    Self {
      pipeline: PredictionPipeline::new(model, labels, settings),
      max_batch_files,
    }
  }

  pub fn model(&self) -> &ModelState {
    self.pipeline.model_state()
  }

  pub fn labels(&self) -> &LabelTable {
    self.pipeline.labels()
  }
}

pub fn router(context: AppContext, body_limit: usize) -> Router {
  Router::new()
    .route("/", get(root))
    .route("/health", get(health))
    .route("/classes", get(classes))
    .route("/predict", post(predict))
    .route("/predict/batch", post(predict_batch))
    .layer(DefaultBodyLimit::max(body_limit))
    .layer(TraceLayer::new_for_http())
    .layer(CorsLayer::permissive())
    .with_state(Arc::new(context))
}

#[derive(Serialize)]
struct RootResponse {
  message: &'static str,
  status: &'static str,
  version: &'static str,
}

async fn root() -> Json<RootResponse> {
  Json(RootResponse {
    message: SERVICE_NAME,
    status: "running",
    version: env!("CARGO_PKG_VERSION"),
  })
}

#[derive(Serialize)]
struct HealthResponse {
  status: &'static str,
  model_status: ModelStatus,
  model_error: Option<String>,
  model_path: Option<String>,
  model_loaded_at: Option<DateTime<Utc>>,
  classes: Vec<String>,
  image_size: u32,
}

/// 服务本身总是健康的，模型状态单独报告
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
  let model = state.model();
  Json(HealthResponse {
    status: "healthy",
    model_status: model.status(),
    model_error: model.error_message(),
    model_path: model.path().map(|path| path.display().to_string()),
    model_loaded_at: model.loaded_at(),
    classes: state.labels().names().map(str::to_string).collect(),
    image_size: IMAGE_SIZE,
  })
}

#[derive(Serialize)]
struct ClassInfo {
  name: String,
  description: String,
  priority: Priority,
}

#[derive(Serialize)]
struct ClassesResponse {
  classes: Vec<ClassInfo>,
}

async fn classes(State(state): State<SharedState>) -> Json<ClassesResponse> {
  let classes = state
    .labels()
    .entries()
    .iter()
    .map(|entry| ClassInfo {
      name: entry.name.clone(),
      description: entry.description().to_string(),
      priority: entry.priority(),
    })
    .collect();
  Json(ClassesResponse { classes })
}

fn default_true() -> bool {
  true
}

#[derive(Debug, Deserialize)]
struct PredictQuery {
  #[serde(default = "default_true")]
  include_all: bool,
}

#[derive(Debug, Deserialize)]
struct BatchQuery {
  #[serde(default)]
  include_all: bool,
}

/// 读取 multipart 中带文件名的字段，超过 `limit` 个时报错
async fn read_uploads(multipart: &mut Multipart, limit: usize) -> Result<Vec<Upload>, ApiError> {
  let mut uploads = Vec::new();

  while let Some(field) = multipart.next_field().await? {
    let Some(filename) = field.file_name().map(str::to_string) else {
      debug!("忽略非文件字段 {:?}", field.name());
      continue;
    };

    if uploads.len() >= limit {
      return Err(ApiError::TooManyFiles { max: limit });
    }

    let content_type = field.content_type().map(str::to_string);
    let bytes = field.bytes().await?;
    debug!("收到文件 {} ({} 字节, {:?})", filename, bytes.len(), content_type);
    uploads.push(Upload::new(filename, bytes.to_vec()).with_content_type(content_type));
  }

  Ok(uploads)
}

async fn predict(
  State(state): State<SharedState>,
  Query(query): Query<PredictQuery>,
  mut multipart: Multipart,
) -> Result<Json<Prediction>, ApiError> {
  state.pipeline.ensure_ready()?;

  let upload = read_uploads(&mut multipart, 1)
    .await?
    .into_iter()
    .next()
    .ok_or(ApiError::MissingFile(SINGLE_FILE_FIELD))?;

  let prediction = state.pipeline.predict(upload).await?;
  Ok(Json(if query.include_all {
    prediction
  } else {
    prediction.without_distribution()
  }))
}

#[derive(Serialize)]
struct BatchEntry {
  filename: String,
  success: bool,
  #[serde(flatten)]
  prediction: Option<Prediction>,
  #[serde(skip_serializing_if = "Option::is_none")]
  error: Option<ErrorBody>,
}

#[derive(Serialize)]
struct BatchResponse {
  total: usize,
  processed: usize,
  succeeded: usize,
  failed: usize,
  results: Vec<BatchEntry>,
}

async fn predict_batch(
  State(state): State<SharedState>,
  Query(query): Query<BatchQuery>,
  mut multipart: Multipart,
) -> Result<Json<BatchResponse>, ApiError> {
  state.pipeline.ensure_ready()?;

  let uploads = read_uploads(&mut multipart, state.max_batch_files).await?;
  if uploads.is_empty() {
    return Err(ApiError::MissingFile("files"));
  }

  let report = state.pipeline.predict_batch(uploads).await;
  let (total, succeeded, failed) = (report.total(), report.succeeded(), report.failed());

  let results = report
    .items
    .into_iter()
    .map(|item| match item.outcome {
      Ok(prediction) => BatchEntry {
        filename: item.filename,
        success: true,
        prediction: Some(if query.include_all {
          prediction
        } else {
          prediction.without_distribution()
        }),
        error: None,
      },
      Err(e) => BatchEntry {
        filename: item.filename,
        success: false,
        prediction: None,
        error: Some(ErrorBody::from(&e)),
      },
    })
    .collect();

  Ok(Json(BatchResponse {
    total,
    processed: succeeded,
    succeeded,
    failed,
    results,
  }))
}
