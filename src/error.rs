// 该文件是 Luyan （路眼） 项目的一部分。
// src/error.rs - 流水线错误
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

use thiserror::Error;

use crate::{
  config::ConfigError, engine::EngineError, frame::FrameError, labels::LabelError,
  preprocess::PreprocessError,
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("张量形状不匹配: {0}")]
  ShapeMismatch(String),
  #[error("帧转换失败: {0}")]
  ConversionFailure(#[from] PreprocessError),
  #[error("类别 {class_id} 没有对应标签 (共 {len} 个标签)")]
  LabelResolutionGap { class_id: usize, len: usize },
  #[error("推理引擎不可用: {0}")]
  EngineUnavailable(String),
  #[error("推理引擎错误: {0}")]
  Engine(EngineError),
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("标签错误: {0}")]
  Label(LabelError),
  #[error("帧数据错误: {0}")]
  Frame(#[from] FrameError),
  #[error("工作线程错误: {0}")]
  Worker(String),
}

impl PipelineError {
  /// 只影响当前帧的错误，调度器丢弃该帧后继续工作
  pub fn is_frame_local(&self) -> bool {
    matches!(
      self,
      PipelineError::ConversionFailure(_)
        | PipelineError::Frame(_)
        | PipelineError::LabelResolutionGap { .. }
        | PipelineError::Engine(EngineError::Inference(_))
    )
  }
}

impl From<EngineError> for PipelineError {
  fn from(err: EngineError) -> Self {
    match err {
      EngineError::ShapeMismatch { .. } => PipelineError::ShapeMismatch(err.to_string()),
      EngineError::Unavailable(reason) => PipelineError::EngineUnavailable(reason),
      other => PipelineError::Engine(other),
    }
  }
}

impl From<LabelError> for PipelineError {
  fn from(err: LabelError) -> Self {
    match err {
      LabelError::ResolutionGap { class_id, len } => {
        PipelineError::LabelResolutionGap { class_id, len }
      }
      other => PipelineError::Label(other),
    }
  }
}
