// 该文件是 Luyan （路眼） 项目的一部分。
// src/engine/tract_engine.rs - tract CPU 推理引擎
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

use std::io::Cursor;

use tract_onnx::{prelude::*, tract_hir::infer::GenericFactoid};
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::PipelineConfig,
  decoded_path,
  engine::{EngineError, InferenceEngine, TRACT_SCHEME, resolve_declared_shape},
  frame::NormalizedTensor,
  labels::LabelTable,
};

type TractPlan = RunnableModel<TypedFact, Box<dyn TypedOp>, TypedModel>;

pub struct TractEngine {
  plan: TractPlan,
  input_shape: Vec<usize>,
  output_shape: Vec<usize>,
  labels: Option<LabelTable>,
}

pub struct TractEngineBuilder {
  model_path: String,
}

impl FromUrlWithScheme for TractEngineBuilder {
  const SCHEME: &'static str = TRACT_SCHEME;
}

impl FromUrl for TractEngineBuilder {
  type Error = EngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(EngineError::UnsupportedScheme(url.scheme().to_string()));
    }
    Ok(TractEngineBuilder {
      model_path: decoded_path(url),
    })
  }
}

impl TractEngineBuilder {
  pub fn build(self, config: &PipelineConfig) -> Result<TractEngine, EngineError> {
    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );
    TractEngine::load(&model_data, config.input_shape())
  }
}

fn load_error(e: impl std::fmt::Display) -> EngineError {
  error!("tract 模型加载失败: {}", e);
  EngineError::Load(e.to_string())
}

impl TractEngine {
  /// 校验模型声明的输入形状，固定后优化模型，并用一次空跑确定输出形状
  pub fn load(model_data: &[u8], input_shape: [usize; 4]) -> Result<Self, EngineError> {
    let model = tract_onnx::onnx()
      .model_for_read(&mut Cursor::new(model_data))
      .map_err(load_error)?;
    let declared = declared_input_shape(&model, &input_shape)?;
    debug!("模型声明的输入形状: {:?}", declared);
    if declared != input_shape {
      return Err(EngineError::ShapeMismatch {
        tensor: "输入",
        expected: input_shape.to_vec(),
        actual: declared,
      });
    }

    let [n, a, b, c] = input_shape;
    let plan = model
      .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(n, a, b, c)))
      .map_err(load_error)?
      .into_optimized()
      .map_err(load_error)?
      .into_runnable()
      .map_err(load_error)?;

    let mut engine = TractEngine {
      plan,
      input_shape: declared,
      output_shape: Vec::new(),
      labels: LabelTable::scan_embedded(model_data),
    };

    let warmup = Tensor::zero::<f32>(&input_shape).map_err(load_error)?;
    let outputs = engine.plan.run(tvec!(warmup.into())).map_err(load_error)?;
    let first = outputs
      .first()
      .ok_or_else(|| EngineError::Load("模型没有输出".to_string()))?;
    engine.output_shape = first.shape().to_vec();
    debug!("模型输出形状: {:?}", engine.output_shape);

    Ok(engine)
  }
}

/// 开放秩的输入没有声明形状，按期望形状处理
fn declared_input_shape(model: &InferenceModel, wanted: &[usize]) -> Result<Vec<usize>, EngineError> {
  let fact = model.input_fact(0).map_err(load_error)?;
  if fact.shape.is_open() {
    return Ok(wanted.to_vec());
  }
  let dims: Vec<Option<usize>> = fact
    .shape
    .dims()
    .map(|dim| match dim {
      GenericFactoid::Only(d) => d.as_i64().and_then(|v| usize::try_from(v).ok()),
      GenericFactoid::Any => None,
    })
    .collect();
  Ok(resolve_declared_shape(&dims, wanted))
}

impl InferenceEngine for TractEngine {
  fn name(&self) -> &str {
    TRACT_SCHEME
  }

  fn input_shape(&self) -> &[usize] {
    &self.input_shape
  }

  fn output_shape(&self) -> &[usize] {
    &self.output_shape
  }

  fn run(&mut self, input: &NormalizedTensor) -> Result<Vec<f32>, EngineError> {
    let inference = |e: TractError| EngineError::Inference(e.to_string());
    let tensor = Tensor::from_shape(&self.input_shape, input.as_slice()).map_err(inference)?;
    let outputs = self.plan.run(tvec!(tensor.into())).map_err(inference)?;
    let first = outputs
      .first()
      .ok_or_else(|| EngineError::Inference("模型没有输出".to_string()))?;
    Ok(first.as_slice::<f32>().map_err(inference)?.to_vec())
  }

  fn embedded_labels(&self) -> Option<LabelTable> {
    self.labels.clone()
  }
}
