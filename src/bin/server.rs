// 该文件是 Jiedao （街道巡检） 项目的一部分。
// src/bin/server.rs - 分类服务主程序
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

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use jiedao::{
  IMAGE_SIZE,
  args::Args,
  label::LabelTable,
  model::{ModelStatus, load_from_location},
  server::{AppContext, router},
  utils::{init_tracing, shutdown_signal},
};

#[tokio::main]
async fn main() -> Result<()> {
  init_tracing();

  let args = Args::parse();
  let location = args.model_location();

  info!("Jiedao 街道设施分类服务");
  info!("模型文件路径: {}", location);
  info!("监听地址: {}", args.bind_addr());
  info!("输入尺寸: {}x{}, 插值方式: {:?}", IMAGE_SIZE, IMAGE_SIZE, args.resize_filter);
  info!("批量上限: {}, 并发推理上限: {}", args.max_batch_files, args.max_concurrent_inferences);

  let labels = match &args.labels {
    Some(path) => LabelTable::from_file(path)
      .with_context(|| format!("无法读取类别表: {}", path.display()))?,
    None => LabelTable::street_infrastructure(),
  };
  for name in labels.incomplete() {
    warn!("类别 {} 缺少描述或优先级，将使用默认值", name);
  }
  info!("类别: {:?}", labels.names().collect::<Vec<_>>());

  info!("正在加载模型...");
  let model = load_from_location(&location, labels.len());
  let status = model.status();
  if status != ModelStatus::Loaded {
    if args.require_model {
      bail!(
        "模型不可用 ({:?}): {}",
        status,
        model.error_message().unwrap_or_default()
      );
    }
    warn!("模型不可用 ({:?})，服务以降级状态启动，预测接口将返回 503", status);
  }

  let context = AppContext::new(
    Arc::new(model),
    Arc::new(labels),
    args.pipeline_settings(),
    args.max_batch_files,
  );
  let app = router(context, args.body_limit());

  let shutdown = shutdown_signal().context("无法注册中断信号处理")?;
  let listener = TcpListener::bind(args.bind_addr())
    .await
    .with_context(|| format!("无法监听 {}", args.bind_addr()))?;
  info!("服务已启动: http://{}", listener.local_addr()?);
  info!("健康检查: http://{}/health", listener.local_addr()?);

  axum::serve(listener, app)
    .with_graceful_shutdown(async move {
      let _ = shutdown.await;
    })
    .await?;

  info!("服务已退出");
  Ok(())
}
