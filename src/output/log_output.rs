// 该文件是 Luyan （路眼） 项目的一部分。
// src/output/log_output.rs - 日志输出
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

use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  decode::Detection,
  output::{DetectionListener, OutputError},
};

/// 把检测结果写入日志，`log:?quiet` 时空结果只记 debug
#[derive(Debug, Default)]
pub struct LogOutput {
  quiet: bool,
}

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch(format!(
        "期望输出方式 '{}', 实际输出方式 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }
    Ok(LogOutput {
      quiet: url.query_pairs().any(|(k, _)| k == "quiet"),
    })
  }
}

impl DetectionListener for LogOutput {
  fn on_empty(&mut self) {
    if self.quiet {
      debug!("未检测到目标");
    } else {
      info!("未检测到目标");
    }
  }

  fn on_detections(&mut self, detections: &[Detection], inference_ms: u64) {
    info!("检测到 {} 个目标, 耗时 {} ms", detections.len(), inference_ms);
    for item in detections {
      info!(
        "  {} ({}) {:.4} [{:.4}, {:.4}, {:.4}, {:.4}]",
        item.class_name, item.class_id, item.confidence, item.x1, item.y1, item.x2, item.y2
      );
    }
  }
}
