// 该文件是 Luyan （路眼） 项目的一部分。
// src/engine/rknpu_engine.rs - RKNN NPU 推理引擎
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

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::PipelineConfig,
  decoded_path,
  engine::{EngineError, InferenceEngine, RKNPU_SCHEME},
  frame::NormalizedTensor,
  labels::LabelTable,
};

const RKNPU_NUM_INPUTS: u32 = 1;
const RKNPU_NUM_OUTPUTS: u32 = 1;

/// NPU 引擎，输入为 NHWC 排布的 u8 像素
pub struct RknpuEngine {
  context: Context,
  input_shape: Vec<usize>,
  output_shape: Vec<usize>,
  input_buffer: Vec<u8>,
  labels: Option<LabelTable>,
}

pub struct RknpuEngineBuilder {
  model_path: String,
  flags: InitFlags,
}

impl FromUrlWithScheme for RknpuEngineBuilder {
  const SCHEME: &'static str = RKNPU_SCHEME;
}

impl FromUrl for RknpuEngineBuilder {
  type Error = EngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(EngineError::UnsupportedScheme(url.scheme().to_string()));
    }
    Ok(RknpuEngineBuilder {
      model_path: decoded_path(url),
      flags: InitFlags::default(),
    })
  }
}

fn invalid(what: &str, e: rknpu::Error) -> EngineError {
  error!("{}: {}", what, e);
  EngineError::Load(format!("{}: {}", what, e))
}

impl RknpuEngineBuilder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn build(self, config: &PipelineConfig) -> Result<RknpuEngine, EngineError> {
    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    // 运行库或设备缺失时上下文创建失败，交由调用方回退
    let context = Context::new(&model_data, self.flags)
      .map_err(|e| EngineError::Unavailable(format!("RKNN 上下文创建失败: {}", e)))?;

    let num_inputs = context
      .num_inputs()
      .map_err(|e| invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| invalid("无法获取输出数量", e))?;
    debug!("模型输入数量: {}, 输出数量: {}", num_inputs, num_outputs);
    if num_inputs != RKNPU_NUM_INPUTS || num_outputs != RKNPU_NUM_OUTPUTS {
      return Err(EngineError::Load(format!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        RKNPU_NUM_INPUTS, RKNPU_NUM_OUTPUTS, num_inputs, num_outputs
      )));
    }

    let input_shape = config.input_shape();
    let mut engine = RknpuEngine {
      context,
      input_shape: input_shape.to_vec(),
      output_shape: Vec::new(),
      input_buffer: vec![0; input_shape.iter().product()],
      labels: LabelTable::scan_embedded(&model_data),
    };

    // RKNN 只报告输出元素总数，与配置一致时采用配置的形状
    let warmup = engine.infer().map_err(|e| EngineError::Load(e.to_string()))?;
    let expected = config.output_shape();
    engine.output_shape = if warmup.len() == expected.iter().product::<usize>() {
      expected.to_vec()
    } else {
      vec![1, warmup.len()]
    };
    info!("模型加载完成");
    Ok(engine)
  }
}

impl RknpuEngine {
  fn infer(&self) -> Result<Vec<f32>, EngineError> {
    let runtime = |e: rknpu::Error| EngineError::Inference(e.to_string());
    self
      .context
      .set_input(
        0,
        &self.input_buffer,
        TensorFormat::NHWC,
        TensorType::UInt8,
      )
      .map_err(runtime)?;
    self.context.run().map_err(runtime)?;
    let output = self.context.get_outputs().map_err(runtime)?;
    let data = output.get_f32(0).map_err(runtime)?;
    Ok(data.to_vec())
  }

  /// 把 [0, 1] 浮点张量量化回 NHWC 排布的 u8
  fn quantize(&mut self, input: &NormalizedTensor) {
    let (width, height) = (input.width(), input.height());
    for y in 0..height {
      for x in 0..width {
        for c in 0..3 {
          let value = (input.get(c, y, x) * 255.0).round().clamp(0.0, 255.0);
          self.input_buffer[(y * width + x) * 3 + c] = value as u8;
        }
      }
    }
  }
}

impl InferenceEngine for RknpuEngine {
  fn name(&self) -> &str {
    RKNPU_SCHEME
  }

  fn input_shape(&self) -> &[usize] {
    &self.input_shape
  }

  fn output_shape(&self) -> &[usize] {
    &self.output_shape
  }

  fn run(&mut self, input: &NormalizedTensor) -> Result<Vec<f32>, EngineError> {
    self.quantize(input);
    self.infer()
  }

  fn embedded_labels(&self) -> Option<LabelTable> {
    self.labels.clone()
  }
}
