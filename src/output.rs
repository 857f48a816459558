// 该文件是 Luyan （路眼） 项目的一部分。
// src/output.rs - 检测结果输出
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

use std::{fs::File, io::BufWriter};

use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, decode::Detection, pipeline::PipelineOutcome};

/// 检测结果的接收方，在工作线程上被调用
///
/// 实现方需要尽快返回，耗时工作应转交给自己的线程。
pub trait DetectionListener {
  fn on_empty(&mut self);
  fn on_detections(&mut self, detections: &[Detection], inference_ms: u64);

  fn on_outcome(&mut self, outcome: &PipelineOutcome) {
    match outcome {
      PipelineOutcome::Empty { .. } => self.on_empty(),
      PipelineOutcome::Detections {
        items,
        inference_ms,
      } => self.on_detections(items, *inference_ms),
    }
  }
}

impl<L: DetectionListener + ?Sized> DetectionListener for Box<L> {
  fn on_empty(&mut self) {
    (**self).on_empty()
  }

  fn on_detections(&mut self, detections: &[Detection], inference_ms: u64) {
    (**self).on_detections(detections, inference_ms)
  }
}

mod channel_output;
mod jsonl_output;
mod log_output;

pub use self::{
  channel_output::{ChannelOutput, DetectionEvent},
  jsonl_output::JsonLinesOutput,
  log_output::LogOutput,
};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper {
  Log(LogOutput),
  JsonLines(JsonLinesOutput<BufWriter<File>>),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      LogOutput::SCHEME => Ok(OutputWrapper::Log(LogOutput::from_url(url)?)),
      JsonLinesOutput::<BufWriter<File>>::SCHEME => {
        Ok(OutputWrapper::JsonLines(JsonLinesOutput::from_url(url)?))
      }
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl DetectionListener for OutputWrapper {
  fn on_empty(&mut self) {
    match self {
      OutputWrapper::Log(output) => output.on_empty(),
      OutputWrapper::JsonLines(output) => output.on_empty(),
    }
  }

  fn on_detections(&mut self, detections: &[Detection], inference_ms: u64) {
    match self {
      OutputWrapper::Log(output) => output.on_detections(detections, inference_ms),
      OutputWrapper::JsonLines(output) => output.on_detections(detections, inference_ms),
    }
  }
}
