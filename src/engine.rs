// 该文件是 Luyan （路眼） 项目的一部分。
// src/engine.rs - 推理引擎边界
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
use tracing::{info, warn};
use url::Url;

use crate::{
  config::PipelineConfig,
  frame::{NormalizedTensor, RawOutputTensor},
  labels::LabelTable,
};

#[cfg(feature = "tract_engine")]
mod tract_engine;
#[cfg(feature = "tract_engine")]
pub use self::tract_engine::{TractEngine, TractEngineBuilder};

#[cfg(feature = "rknpu_engine")]
mod rknpu_engine;
#[cfg(feature = "rknpu_engine")]
pub use self::rknpu_engine::{RknpuEngine, RknpuEngineBuilder};

pub const TRACT_SCHEME: &str = "tract";
pub const RKNPU_SCHEME: &str = "rknpu";

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("{tensor}张量形状不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  ShapeMismatch {
    tensor: &'static str,
    expected: Vec<usize>,
    actual: Vec<usize>,
  },
  #[error("推理引擎不可用: {0}")]
  Unavailable(String),
  #[error("模型加载错误: {0}")]
  Load(String),
  #[error("模型文件读取错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("推理错误: {0}")]
  Inference(String),
  #[error("不支持的推理引擎方案: {0}")]
  UnsupportedScheme(String),
}

/// 黑盒推理引擎，输入输出形状在初始化后固定
pub trait InferenceEngine {
  fn name(&self) -> &str;
  fn input_shape(&self) -> &[usize];
  fn output_shape(&self) -> &[usize];
  /// 执行一次前向计算，返回按 (通道, 候选位置) 排布的输出
  fn run(&mut self, input: &NormalizedTensor) -> Result<Vec<f32>, EngineError>;

  fn embedded_labels(&self) -> Option<LabelTable> {
    None
  }
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
  fn name(&self) -> &str {
    (**self).name()
  }

  fn input_shape(&self) -> &[usize] {
    (**self).input_shape()
  }

  fn output_shape(&self) -> &[usize] {
    (**self).output_shape()
  }

  fn run(&mut self, input: &NormalizedTensor) -> Result<Vec<f32>, EngineError> {
    (**self).run(input)
  }

  fn embedded_labels(&self) -> Option<LabelTable> {
    (**self).embedded_labels()
  }
}

/// 在初始化时校验一次形状的引擎包装
pub struct Interpreter<E> {
  engine: E,
  channels: usize,
  elements: usize,
}

impl<E: InferenceEngine> Interpreter<E> {
  pub fn new(engine: E, config: &PipelineConfig) -> Result<Self, EngineError> {
    check_shape("输入", &config.input_shape(), engine.input_shape())?;
    check_shape("输出", &config.output_shape(), engine.output_shape())?;
    info!(
      "推理引擎 {} 就绪: 输入 {:?}, 输出 {:?}",
      engine.name(),
      engine.input_shape(),
      engine.output_shape()
    );
    Ok(Self {
      engine,
      channels: config.channels,
      elements: config.elements,
    })
  }

  pub fn run(&mut self, input: &NormalizedTensor) -> Result<RawOutputTensor, EngineError> {
    let data = self.engine.run(input)?;
    RawOutputTensor::new(self.channels, self.elements, data)
      .map_err(|e| EngineError::Inference(e.to_string()))
  }

  pub fn engine(&self) -> &E {
    &self.engine
  }

  pub fn into_inner(self) -> E {
    self.engine
  }
}

fn check_shape(tensor: &'static str, expected: &[usize], actual: &[usize]) -> Result<(), EngineError> {
  if expected != actual {
    return Err(EngineError::ShapeMismatch {
      tensor,
      expected: expected.to_vec(),
      actual: actual.to_vec(),
    });
  }
  Ok(())
}

/// 合并模型声明的形状与期望形状，未定维度取期望值
///
/// 秩不同时保留声明的维度，交给形状校验报告差异。
pub fn resolve_declared_shape(declared: &[Option<usize>], wanted: &[usize]) -> Vec<usize> {
  if declared.is_empty() {
    return wanted.to_vec();
  }
  declared
    .iter()
    .enumerate()
    .map(|(i, dim)| dim.or_else(|| wanted.get(i).copied()).unwrap_or(0))
    .collect()
}

pub type BoxedEngine = Box<dyn InferenceEngine>;

/// 首选引擎不可用时回退一次，之后不再尝试首选引擎
#[derive(Debug, Clone)]
pub struct EngineSelector {
  preferred: Url,
  fallback: Option<Url>,
}

impl EngineSelector {
  pub fn new(preferred: Url) -> Self {
    Self {
      preferred,
      fallback: None,
    }
  }

  pub fn with_fallback(mut self, fallback: Option<Url>) -> Self {
    self.fallback = fallback;
    self
  }

  pub fn select(&self, config: &PipelineConfig) -> Result<BoxedEngine, EngineError> {
    match open_engine(&self.preferred, config) {
      Err(EngineError::Unavailable(reason)) => match &self.fallback {
        Some(fallback) => {
          warn!(
            "首选推理引擎 {} 不可用 ({}), 回退到 {}",
            self.preferred, reason, fallback
          );
          open_engine(fallback, config)
        }
        None => Err(EngineError::Unavailable(reason)),
      },
      other => other,
    }
  }
}

/// 按 URL 方案打开推理引擎
pub fn open_engine(url: &Url, config: &PipelineConfig) -> Result<BoxedEngine, EngineError> {
  match url.scheme() {
    TRACT_SCHEME => open_tract(url, config),
    RKNPU_SCHEME => open_rknpu(url, config),
    other => Err(EngineError::UnsupportedScheme(other.to_string())),
  }
}

#[cfg(feature = "tract_engine")]
fn open_tract(url: &Url, config: &PipelineConfig) -> Result<BoxedEngine, EngineError> {
  use crate::FromUrl;
  Ok(Box::new(TractEngineBuilder::from_url(url)?.build(config)?))
}

#[cfg(not(feature = "tract_engine"))]
fn open_tract(_url: &Url, _config: &PipelineConfig) -> Result<BoxedEngine, EngineError> {
  Err(EngineError::Unavailable("未启用 tract_engine 特性".to_string()))
}

#[cfg(feature = "rknpu_engine")]
fn open_rknpu(url: &Url, config: &PipelineConfig) -> Result<BoxedEngine, EngineError> {
  use crate::FromUrl;
  Ok(Box::new(RknpuEngineBuilder::from_url(url)?.build(config)?))
}

#[cfg(not(feature = "rknpu_engine"))]
fn open_rknpu(_url: &Url, _config: &PipelineConfig) -> Result<BoxedEngine, EngineError> {
  Err(EngineError::Unavailable("未启用 rknpu_engine 特性".to_string()))
}
