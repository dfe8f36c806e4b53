// 该文件是 Jiedao （街道巡检） 项目的一部分。
// src/utils.rs - 日志与退出信号
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

use std::{thread, time::Duration};

use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info";
const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

/// 初始化日志，`RUST_LOG` 未设置时使用 `info`
pub fn init_tracing() {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
  if let Err(e) = tracing_subscriber::fmt().with_env_filter(filter).try_init() {
    warn!("日志已初始化: {}", e);
  }
}

/// 注册中断信号处理，返回的接收端在收到 SIGINT/SIGTERM 时完成
///
/// 收到信号后若 30 秒内未能正常退出，则强制结束进程。
pub fn shutdown_signal() -> Result<oneshot::Receiver<()>, ctrlc::Error> {
  let (tx, rx) = oneshot::channel();
  let mut tx = Some(tx);

  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    if let Some(tx) = tx.take() {
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(FORCE_EXIT_AFTER);
        warn!("强制退出程序");
        std::process::exit(1);
      });
    }
  })?;

  Ok(rx)
}
