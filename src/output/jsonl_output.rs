// 该文件是 Luyan （路眼） 项目的一部分。
// src/output/jsonl_output.rs - JSON Lines 输出
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
  fs::File,
  io::{BufWriter, Write},
  path::Path,
};

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, decode::Detection, decoded_path,
  output::{DetectionListener, OutputError},
};

/// 每个事件写一行 JSON
pub struct JsonLinesOutput<W: Write> {
  writer: W,
  sequence: u64,
}

impl<W: Write> JsonLinesOutput<W> {
  pub fn new(writer: W) -> Self {
    Self {
      writer,
      sequence: 0,
    }
  }

  pub fn into_inner(self) -> W {
    self.writer
  }

  fn write_event(&mut self, detections: &[Detection], inference_ms: Option<u64>) {
    self.sequence += 1;
    let record = json!({
      "sequence": self.sequence,
      "timestamp": Utc::now().to_rfc3339(),
      "inference_ms": inference_ms,
      "detections": detections.iter().map(detection_json).collect::<Vec<_>>(),
    });
    let written = writeln!(self.writer, "{}", record).and_then(|_| self.writer.flush());
    if let Err(e) = written {
      error!("写入检测记录失败: {}", e);
    }
  }
}

fn detection_json(item: &Detection) -> Value {
  json!({
    "class_id": item.class_id,
    "class_name": item.class_name,
    "confidence": item.confidence,
    "box": [item.x1, item.y1, item.x2, item.y2],
  })
}

impl FromUrlWithScheme for JsonLinesOutput<BufWriter<File>> {
  const SCHEME: &'static str = "jsonl";
}

impl FromUrl for JsonLinesOutput<BufWriter<File>> {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch(format!(
        "期望输出方式 '{}', 实际输出方式 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let path = decoded_path(url);
    if let Some(parent) = Path::new(&path).parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    let file = File::options().create(true).append(true).open(&path)?;
    info!("检测记录写入: {}", path);
    Ok(JsonLinesOutput::new(BufWriter::new(file)))
  }
}

impl<W: Write> DetectionListener for JsonLinesOutput<W> {
  fn on_empty(&mut self) {
    self.write_event(&[], None);
  }

  fn on_detections(&mut self, detections: &[Detection], inference_ms: u64) {
    self.write_event(detections, Some(inference_ms));
  }
}
