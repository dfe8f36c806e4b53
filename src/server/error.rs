// 该文件是 Jiedao （街道巡检） 项目的一部分。
// src/server/error.rs - HTTP 错误响应
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

use axum::{
  Json,
  extract::multipart::MultipartError,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::task::PredictError;

/// 错误响应体，批量结果中的单项失败也使用该结构
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
  pub category: String,
  pub message: String,
}

impl From<&PredictError> for ErrorBody {
  fn from(err: &PredictError) -> Self {
    Self {
      category: err.category().to_string(),
      message: err.to_string(),
    }
  }
}

#[derive(Error, Debug)]
pub enum ApiError {
  #[error(transparent)]
  Predict(#[from] PredictError),
  #[error("invalid multipart body: {0}")]
  Multipart(#[from] MultipartError),
  #[error("no file uploaded in field '{0}'")]
  MissingFile(&'static str),
  #[error("too many files: at most {max} per request")]
  TooManyFiles { max: usize },
}

impl ApiError {
  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::Predict(e) => match e.category() {
        "model_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
        "inference_timeout" => StatusCode::GATEWAY_TIMEOUT,
        _ if e.is_client_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
      },
      ApiError::Multipart(e) => e.status(),
      ApiError::MissingFile(_) | ApiError::TooManyFiles { .. } => StatusCode::BAD_REQUEST,
    }
  }

  pub fn category(&self) -> &'static str {
    match self {
      ApiError::Predict(e) => e.category(),
      ApiError::Multipart(_) => "invalid_request",
      ApiError::MissingFile(_) => "missing_file",
      ApiError::TooManyFiles { .. } => "too_many_files",
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      error!("请求失败 ({}): {:?}", status, self);
    } else {
      warn!("请求被拒绝 ({}): {}", status, self);
    }

    let body = ErrorBody {
      category: self.category().to_string(),
      message: self.to_string(),
    };
    (status, Json(body)).into_response()
  }
}
