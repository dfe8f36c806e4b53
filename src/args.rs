// 该文件是 Jiedao （街道巡检） 项目的一部分。
// src/args.rs - 项目参数配置
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
  net::{IpAddr, SocketAddr},
  path::PathBuf,
  time::Duration,
};

use clap::Parser;

use crate::{input::ResizeFilter, task::PipelineSettings};

/// 未指定模型路径时在存储卷中查找的文件名
pub const DEFAULT_MODEL_FILENAME: &str = "final_model_98plus.onnx";

/// Jiedao 服务参数配置，每一项都可以用环境变量覆盖
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型文件路径或 URL
  /// 支持格式:
  /// - 路径: /data/final_model_98plus.onnx
  /// - URL: onnx:///data/model.bin 或 file:///data/model.onnx
  #[arg(long, env = "MODEL_PATH", value_name = "MODEL")]
  pub model: Option<String>,

  /// 模型存储卷目录（未指定 --model 时使用）
  #[arg(long, env = "VOLUME_PATH", default_value = "/data", value_name = "DIR")]
  pub volume_path: PathBuf,

  /// 监听地址
  #[arg(long, env = "HOST", default_value = "0.0.0.0", value_name = "ADDR")]
  pub host: IpAddr,

  /// 监听端口
  #[arg(long, env = "PORT", default_value_t = 8000, value_name = "PORT")]
  pub port: u16,

  /// 类别表 TOML 文件，覆盖内置类别
  #[arg(long, env = "LABELS_FILE", value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 缩放插值方式，需与训练时一致
  #[arg(
    long,
    env = "RESIZE_FILTER",
    value_enum,
    default_value_t = ResizeFilter::CatmullRom,
    value_name = "FILTER"
  )]
  pub resize_filter: ResizeFilter,

  /// 单次批量预测的最大文件数
  #[arg(long, env = "MAX_BATCH_FILES", default_value_t = 10, value_name = "COUNT")]
  pub max_batch_files: usize,

  /// 同时进行的推理数量上限
  #[arg(long, env = "MAX_CONCURRENT_INFERENCES", default_value_t = 4, value_name = "COUNT")]
  pub max_concurrent_inferences: usize,

  /// 单次推理超时（秒）
  #[arg(long, env = "INFERENCE_TIMEOUT_SECS", default_value_t = 30, value_name = "SECS")]
  pub inference_timeout_secs: u64,

  /// 请求体大小上限（MB）
  #[arg(long, env = "MAX_UPLOAD_MB", default_value_t = 20, value_name = "MB")]
  pub max_upload_mb: usize,

  /// 模型加载失败时直接退出，而不是以降级状态启动
  #[arg(long, env = "REQUIRE_MODEL")]
  pub require_model: bool,
}

impl Args {
  pub fn model_location(&self) -> String {
    match &self.model {
      Some(model) => model.clone(),
      None => self
        .volume_path
        .join(DEFAULT_MODEL_FILENAME)
        .to_string_lossy()
        .into_owned(),
    }
  }

  pub fn bind_addr(&self) -> SocketAddr {
    SocketAddr::new(self.host, self.port)
  }

  pub fn body_limit(&self) -> usize {
    self.max_upload_mb.saturating_mul(1024 * 1024)
  }

  pub fn pipeline_settings(&self) -> PipelineSettings {
    PipelineSettings {
      resize_filter: self.resize_filter,
      max_concurrent_inferences: self.max_concurrent_inferences,
      inference_timeout: Duration::from_secs(self.inference_timeout_secs),
    }
  }
}
