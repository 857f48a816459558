// 该文件是 Luyan （路眼） 项目的一部分。
// src/pipeline.rs - 单帧检测流水线
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

use std::{path::PathBuf, time::Instant};

use tracing::{debug, info, warn};

use crate::{
  config::PipelineConfig,
  decode::{Decoder, Detection},
  engine::{InferenceEngine, Interpreter},
  error::PipelineError,
  frame::RawFrame,
  labels::{LabelSource, LabelTable},
  preprocess::Preprocessor,
  suppress::Suppressor,
};

/// 一次流水线处理的结果
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
  Empty {
    inference_ms: u64,
  },
  /// 非空，按置信度降序
  Detections {
    items: Vec<Detection>,
    inference_ms: u64,
  },
}

impl PipelineOutcome {
  pub fn inference_ms(&self) -> u64 {
    match self {
      PipelineOutcome::Empty { inference_ms } => *inference_ms,
      PipelineOutcome::Detections { inference_ms, .. } => *inference_ms,
    }
  }

  pub fn detections(&self) -> &[Detection] {
    match self {
      PipelineOutcome::Empty { .. } => &[],
      PipelineOutcome::Detections { items, .. } => items,
    }
  }

  pub fn is_empty(&self) -> bool {
    matches!(self, PipelineOutcome::Empty { .. })
  }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
  config: PipelineConfig,
  label_file: Option<PathBuf>,
  labels: Option<LabelTable>,
}

impl PipelineBuilder {
  pub fn new(config: PipelineConfig) -> Self {
    Self {
      config,
      label_file: None,
      labels: None,
    }
  }

  pub fn with_label_file(mut self, path: Option<PathBuf>) -> Self {
    self.label_file = path;
    self
  }

  /// 直接指定标签表，跳过模型元数据与标签文件
  pub fn with_labels(mut self, labels: LabelTable) -> Self {
    self.labels = Some(labels);
    self
  }

  /// 校验配置、引擎形状并加载标签，任何错误都在接收帧之前返回
  pub fn build<E: InferenceEngine>(self, engine: E) -> Result<Pipeline<E>, PipelineError> {
    let config = self.config;
    config.validate()?;
    let interpreter = Interpreter::new(engine, &config)?;

    let labels = match self.labels {
      Some(labels) => labels,
      None => LabelSource {
        embedded: interpreter.engine().embedded_labels(),
        file: self.label_file,
      }
      .resolve()?,
    };
    if labels.len() != config.num_classes() {
      warn!(
        "标签数量 {} 与模型类别数 {} 不一致, 超出范围的类别将被丢弃",
        labels.len(),
        config.num_classes()
      );
    }
    info!(
      "流水线就绪: 输入 {}x{}, 类别 {}, 解码 {:?}, 选择 {:?}",
      config.input_width,
      config.input_height,
      config.num_classes(),
      config.decoder,
      config.selection
    );

    Ok(Pipeline {
      preprocessor: Preprocessor::new(&config),
      interpreter,
      decoder: Decoder::new(&config),
      suppressor: Suppressor::new(&config),
      labels,
      config,
    })
  }
}

/// 预处理 → 推理 → 解码 → 抑制，独占推理引擎
pub struct Pipeline<E> {
  preprocessor: Preprocessor,
  interpreter: Interpreter<E>,
  decoder: Decoder,
  suppressor: Suppressor,
  labels: LabelTable,
  config: PipelineConfig,
}

impl<E: InferenceEngine> Pipeline<E> {
  pub fn process(&mut self, frame: &RawFrame) -> Result<PipelineOutcome, PipelineError> {
    let start = Instant::now();
    let tensor = self.preprocessor.process(frame)?;
    let output = self.interpreter.run(&tensor)?;
    let candidates = self.decoder.decode(&output, &self.labels);
    let items = self.suppressor.apply(candidates);
    let inference_ms = start.elapsed().as_millis() as u64;
    debug!("单帧处理耗时 {} ms, 结果 {} 个", inference_ms, items.len());

    if items.is_empty() {
      Ok(PipelineOutcome::Empty { inference_ms })
    } else {
      Ok(PipelineOutcome::Detections {
        items,
        inference_ms,
      })
    }
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub fn labels(&self) -> &LabelTable {
    &self.labels
  }

  pub fn engine(&self) -> &E {
    self.interpreter.engine()
  }

  /// 拆出推理引擎，流水线随之失效
  pub fn into_engine(self) -> E {
    self.interpreter.into_inner()
  }
}
