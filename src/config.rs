// 该文件是 Luyan （路眼） 项目的一部分。
// src/config.rs - 流水线配置
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

use crate::frame::TensorLayout;

const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CLASS_NUM: usize = 80;
const DEFAULT_ELEMENTS: usize = 8400;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.5;
const DEFAULT_MAX_BOXES: usize = 3;
const DEFAULT_BOX_SCALE: f32 = 1.1;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
  #[error("输入尺寸无效: {0}x{1}")]
  InvalidInputSize(u32, u32),
  #[error("{layout} 布局至少需要 {min} 个通道, 实际为 {actual}")]
  TooFewChannels {
    layout: &'static str,
    min: usize,
    actual: usize,
  },
  #[error("候选位置数量不能为 0")]
  NoElements,
  #[error("{name} 超出范围 [0, 1]: {value}")]
  OutOfUnitRange { name: &'static str, value: f32 },
  #[error("最大框数量不能为 0")]
  NoBoxes,
  #[error("{name} 不能为负数: {value}")]
  Negative { name: &'static str, value: f32 },
  #[error("框放大系数必须为正数: {0}")]
  InvalidBoxScale(f32),
}

/// 原始输出的排布约定，构造时固定，不做自动推断
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecoderLayout {
  /// 通道 0-3 为 (cx, cy, w, h)，之后为可直接比较的类别分数
  Direct {
    /// 宽高放大系数，用于补偿训练时偏紧的标注框
    box_scale: f32,
  },
  /// 通道 4 为目标性 logit，之后为类别 logit，均经过 sigmoid
  Objectness,
}

impl DecoderLayout {
  /// 类别分数之前的通道数
  pub fn header_channels(&self) -> usize {
    match self {
      DecoderLayout::Direct { .. } => 4,
      DecoderLayout::Objectness => 5,
    }
  }

  fn name(&self) -> &'static str {
    match self {
      DecoderLayout::Direct { .. } => "direct",
      DecoderLayout::Objectness => "objectness",
    }
  }
}

impl Default for DecoderLayout {
  fn default() -> Self {
    DecoderLayout::Direct {
      box_scale: DEFAULT_BOX_SCALE,
    }
  }
}

/// 最终结果的挑选方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionMode {
  /// NMS 后按置信度排序的前 N 个
  #[default]
  Ranked,
  /// 几何过滤后按 面积×置信度 选出唯一一个
  SingleBest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
  #[default]
  Rgb,
  Bgr,
}

/// 归一化后每个通道的增益与偏置，结果再截断回 [0, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelGain {
  pub gain: [f32; 3],
  pub offset: [f32; 3],
}

impl ChannelGain {
  pub const IDENTITY: ChannelGain = ChannelGain {
    gain: [1.0, 1.0, 1.0],
    offset: [0.0, 0.0, 0.0],
  };

  pub fn is_identity(&self) -> bool {
    *self == Self::IDENTITY
  }
}

impl Default for ChannelGain {
  fn default() -> Self {
    Self::IDENTITY
  }
}

/// 整个会话内固定不变的流水线参数
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
  pub input_width: u32,
  pub input_height: u32,
  pub layout: TensorLayout,
  pub channel_order: ChannelOrder,
  pub channel_gain: ChannelGain,
  /// 输出张量通道数，等于 表头通道 + 类别数
  pub channels: usize,
  /// 输出张量候选位置数
  pub elements: usize,
  pub decoder: DecoderLayout,
  pub confidence_threshold: f32,
  pub iou_threshold: f32,
  pub max_boxes: usize,
  pub selection: SelectionMode,
  /// 最小框面积，单位为输入张量像素的平方
  pub min_box_area: f32,
  /// 框与张量边界的最小距离，单位为输入张量像素
  pub edge_margin: f32,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    let decoder = DecoderLayout::default();
    Self {
      input_width: DEFAULT_INPUT_SIZE,
      input_height: DEFAULT_INPUT_SIZE,
      layout: TensorLayout::default(),
      channel_order: ChannelOrder::default(),
      channel_gain: ChannelGain::default(),
      channels: decoder.header_channels() + DEFAULT_CLASS_NUM,
      elements: DEFAULT_ELEMENTS,
      decoder,
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      max_boxes: DEFAULT_MAX_BOXES,
      selection: SelectionMode::default(),
      min_box_area: 0.0,
      edge_margin: 0.0,
    }
  }
}

impl PipelineConfig {
  pub fn with_input_size(mut self, width: u32, height: u32) -> Self {
    self.input_width = width;
    self.input_height = height;
    self
  }

  pub fn with_layout(mut self, layout: TensorLayout) -> Self {
    self.layout = layout;
    self
  }

  pub fn with_channel_order(mut self, order: ChannelOrder) -> Self {
    self.channel_order = order;
    self
  }

  pub fn with_channel_gain(mut self, gain: ChannelGain) -> Self {
    self.channel_gain = gain;
    self
  }

  pub fn with_output_shape(mut self, channels: usize, elements: usize) -> Self {
    self.channels = channels;
    self.elements = elements;
    self
  }

  /// 按类别数设置通道数，需在 `with_decoder` 之后调用
  pub fn with_num_classes(mut self, num_classes: usize) -> Self {
    self.channels = self.decoder.header_channels() + num_classes;
    self
  }

  pub fn with_decoder(mut self, decoder: DecoderLayout) -> Self {
    self.decoder = decoder;
    self
  }

  pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
    self.confidence_threshold = threshold;
    self
  }

  pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
    self.iou_threshold = threshold;
    self
  }

  pub fn with_max_boxes(mut self, max_boxes: usize) -> Self {
    self.max_boxes = max_boxes;
    self
  }

  pub fn with_selection(mut self, selection: SelectionMode) -> Self {
    self.selection = selection;
    self
  }

  pub fn with_geometry_gate(mut self, min_box_area: f32, edge_margin: f32) -> Self {
    self.min_box_area = min_box_area;
    self.edge_margin = edge_margin;
    self
  }

  pub fn num_classes(&self) -> usize {
    self.channels.saturating_sub(self.decoder.header_channels())
  }

  /// 模型应当声明的输入形状
  pub fn input_shape(&self) -> [usize; 4] {
    self
      .layout
      .shape(self.input_width as usize, self.input_height as usize)
  }

  /// 模型应当声明的输出形状
  pub fn output_shape(&self) -> [usize; 3] {
    [1, self.channels, self.elements]
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.input_width == 0 || self.input_height == 0 {
      return Err(ConfigError::InvalidInputSize(
        self.input_width,
        self.input_height,
      ));
    }
    let min = self.decoder.header_channels() + 1;
    if self.channels < min {
      return Err(ConfigError::TooFewChannels {
        layout: self.decoder.name(),
        min,
        actual: self.channels,
      });
    }
    if self.elements == 0 {
      return Err(ConfigError::NoElements);
    }
    for (name, value) in [
      ("confidence_threshold", self.confidence_threshold),
      ("iou_threshold", self.iou_threshold),
    ] {
      if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::OutOfUnitRange { name, value });
      }
    }
    if self.max_boxes == 0 {
      return Err(ConfigError::NoBoxes);
    }
    for (name, value) in [
      ("min_box_area", self.min_box_area),
      ("edge_margin", self.edge_margin),
    ] {
      if !(value >= 0.0) {
        return Err(ConfigError::Negative { name, value });
      }
    }
    if let DecoderLayout::Direct { box_scale } = self.decoder {
      if !(box_scale > 0.0) {
        return Err(ConfigError::InvalidBoxScale(box_scale));
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_config_is_valid() {
    let config = PipelineConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.num_classes(), 80);
    assert_eq!(config.output_shape(), [1, 84, 8400]);
    assert_eq!(config.input_shape(), [1, 640, 640, 3]);
  }

  #[test]
  fn num_classes_follows_layout() {
    let config = PipelineConfig::default()
      .with_decoder(DecoderLayout::Objectness)
      .with_num_classes(10);
    assert_eq!(config.channels, 15);
    assert_eq!(config.num_classes(), 10);
  }

  #[test]
  fn rejects_invalid_values() {
    let config = PipelineConfig::default().with_confidence_threshold(1.5);
    assert!(matches!(
      config.validate(),
      Err(ConfigError::OutOfUnitRange { .. })
    ));

    let config = PipelineConfig::default().with_output_shape(4, 100);
    assert!(matches!(
      config.validate(),
      Err(ConfigError::TooFewChannels { .. })
    ));

    let config = PipelineConfig::default().with_geometry_gate(-1.0, 0.0);
    assert!(matches!(config.validate(), Err(ConfigError::Negative { .. })));

    let config = PipelineConfig::default().with_max_boxes(0);
    assert_eq!(config.validate(), Err(ConfigError::NoBoxes));

    let config = PipelineConfig::default().with_decoder(DecoderLayout::Direct { box_scale: 0.0 });
    assert_eq!(config.validate(), Err(ConfigError::InvalidBoxScale(0.0)));
  }
}
