// 该文件是 Luyan （路眼） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use url::Url;

use crate::{
  config::{ChannelOrder, DecoderLayout, PipelineConfig, SelectionMode},
  engine::EngineSelector,
  frame::TensorLayout,
  pipeline::PipelineBuilder,
};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutArg {
  Nhwc,
  Nchw,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderArg {
  /// 直接输出框与类别分数
  Direct,
  /// 目标性 + sigmoid 类别分数
  Objectness,
}

/// 各个命令共用的流水线参数
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
  /// 模型路径，例如 tract:///model.onnx 或 rknpu:///model.rknn
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 首选模型不可用时使用的备用模型
  #[arg(long, value_name = "MODEL")]
  pub fallback_model: Option<Url>,

  /// 标签文件，每行一个类别名称；模型内嵌标签优先
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  #[arg(long, default_value_t = 640, value_name = "WIDTH")]
  pub input_width: u32,

  #[arg(long, default_value_t = 640, value_name = "HEIGHT")]
  pub input_height: u32,

  #[arg(long, value_enum, default_value_t = LayoutArg::Nhwc)]
  pub layout: LayoutArg,

  /// 按 BGR 顺序输入模型
  #[arg(long)]
  pub bgr: bool,

  #[arg(long, value_enum, default_value_t = DecoderArg::Direct)]
  pub decoder: DecoderArg,

  /// 直接输出格式下的框放大系数
  #[arg(long, default_value_t = 1.1, value_name = "SCALE")]
  pub box_scale: f32,

  #[arg(long, default_value_t = 80, value_name = "COUNT")]
  pub num_classes: usize,

  /// 输出张量的候选位置数
  #[arg(long, default_value_t = 8400, value_name = "COUNT")]
  pub elements: usize,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.25, value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.5, value_name = "THRESHOLD")]
  pub iou: f32,

  #[arg(long, default_value_t = 3, value_name = "COUNT")]
  pub max_boxes: usize,

  /// 每帧只输出一个 面积×置信度 最高的框
  #[arg(long)]
  pub single_best: bool,

  /// 单框模式下的最小框面积（像素²）
  #[arg(long, default_value_t = 0.0, value_name = "AREA")]
  pub min_box_area: f32,

  /// 单框模式下框与边界的最小距离（像素）
  #[arg(long, default_value_t = 0.0, value_name = "PIXELS")]
  pub edge_margin: f32,
}

impl PipelineArgs {
  pub fn to_config(&self) -> PipelineConfig {
    let decoder = match self.decoder {
      DecoderArg::Direct => DecoderLayout::Direct {
        box_scale: self.box_scale,
      },
      DecoderArg::Objectness => DecoderLayout::Objectness,
    };
    let layout = match self.layout {
      LayoutArg::Nhwc => TensorLayout::Nhwc,
      LayoutArg::Nchw => TensorLayout::Nchw,
    };
    let order = if self.bgr {
      ChannelOrder::Bgr
    } else {
      ChannelOrder::Rgb
    };
    let selection = if self.single_best {
      SelectionMode::SingleBest
    } else {
      SelectionMode::Ranked
    };

    PipelineConfig::default()
      .with_input_size(self.input_width, self.input_height)
      .with_layout(layout)
      .with_channel_order(order)
      .with_decoder(decoder)
      .with_output_shape(decoder.header_channels() + self.num_classes, self.elements)
      .with_confidence_threshold(self.confidence)
      .with_iou_threshold(self.iou)
      .with_max_boxes(self.max_boxes)
      .with_selection(selection)
      .with_geometry_gate(self.min_box_area, self.edge_margin)
  }

  pub fn engine_selector(&self) -> EngineSelector {
    EngineSelector::new(self.model.clone()).with_fallback(self.fallback_model.clone())
  }

  pub fn pipeline_builder(&self) -> PipelineBuilder {
    PipelineBuilder::new(self.to_config()).with_label_file(self.labels.clone())
  }
}
