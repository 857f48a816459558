// 该文件是 Luyan （路眼） 项目的一部分。
// tests/common/mod.rs - 集成测试共用的模拟引擎
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

#![allow(dead_code)]

use std::{
  thread,
  time::{Duration, Instant},
};

use crossbeam::channel::{Receiver, Sender};

use luyan::{
  DecoderLayout, LabelTable, PipelineConfig, PixelFormat, RawFrame,
  engine::{EngineError, InferenceEngine},
  frame::NormalizedTensor,
};

pub const SIZE: u32 = 8;
pub const CLASSES: usize = 3;
pub const ELEMENTS: usize = 4;

/// 8x8 输入、3 类、4 个候选位置的小模型
pub fn small_config() -> PipelineConfig {
  PipelineConfig::default()
    .with_input_size(SIZE, SIZE)
    .with_decoder(DecoderLayout::Direct { box_scale: 1.0 })
    .with_output_shape(4 + CLASSES, ELEMENTS)
    .with_max_boxes(3)
}

pub fn signs() -> LabelTable {
  LabelTable::new(["speed", "stop", "yield"])
}

pub fn gray_frame() -> RawFrame {
  RawFrame::packed(SIZE, SIZE, PixelFormat::Rgb8, vec![128; (SIZE * SIZE * 3) as usize]).unwrap()
}

/// 一个直接输出候选：像素坐标的中心与宽高、类别、分数
pub struct Candidate {
  pub element: usize,
  pub bbox: [f32; 4],
  pub class_id: usize,
  pub score: f32,
}

/// 按 (通道, 候选位置) 排布构造输出，未指定的位置全为 0
pub fn direct_output(candidates: &[Candidate]) -> Vec<f32> {
  let channels = 4 + CLASSES;
  let mut data = vec![0.0; channels * ELEMENTS];
  for candidate in candidates {
    for (channel, value) in candidate.bbox.iter().enumerate() {
      data[channel * ELEMENTS + candidate.element] = *value;
    }
    data[(4 + candidate.class_id) * ELEMENTS + candidate.element] = candidate.score;
  }
  data
}

/// 总是返回同一份输出的引擎，可选地在推理中等待放行
pub struct ScriptedEngine {
  input_shape: Vec<usize>,
  output_shape: Vec<usize>,
  output: Vec<f32>,
  labels: Option<LabelTable>,
  gate: Option<(Sender<()>, Receiver<()>)>,
  panic_on_run: bool,
}

impl ScriptedEngine {
  pub fn new(config: &PipelineConfig, output: Vec<f32>) -> Self {
    Self {
      input_shape: config.input_shape().to_vec(),
      output_shape: config.output_shape().to_vec(),
      output,
      labels: None,
      gate: None,
      panic_on_run: false,
    }
  }

  pub fn with_input_shape(mut self, shape: Vec<usize>) -> Self {
    self.input_shape = shape;
    self
  }

  pub fn with_output_shape(mut self, shape: Vec<usize>) -> Self {
    self.output_shape = shape;
    self
  }

  pub fn with_labels(mut self, labels: LabelTable) -> Self {
    self.labels = Some(labels);
    self
  }

  /// 进入推理时向 `entered` 发送信号，然后等待 `release`
  pub fn with_gate(mut self, entered: Sender<()>, release: Receiver<()>) -> Self {
    self.gate = Some((entered, release));
    self
  }

  pub fn panicking(mut self) -> Self {
    self.panic_on_run = true;
    self
  }
}

impl InferenceEngine for ScriptedEngine {
  fn name(&self) -> &str {
    "scripted"
  }

  fn input_shape(&self) -> &[usize] {
    &self.input_shape
  }

  fn output_shape(&self) -> &[usize] {
    &self.output_shape
  }

  fn run(&mut self, _input: &NormalizedTensor) -> Result<Vec<f32>, EngineError> {
    if let Some((entered, release)) = &self.gate {
      let _ = entered.send(());
      let _ = release.recv();
    }
    if self.panic_on_run {
      panic!("scripted engine failure");
    }
    Ok(self.output.clone())
  }

  fn embedded_labels(&self) -> Option<LabelTable> {
    self.labels.clone()
  }
}

/// 轮询直到条件成立，超时返回 false
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
  let deadline = Instant::now() + Duration::from_secs(5);
  while Instant::now() < deadline {
    if condition() {
      return true;
    }
    thread::sleep(Duration::from_millis(1));
  }
  false
}
