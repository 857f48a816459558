// 该文件是 Luyan （路眼） 项目的一部分。
// src/decode.rs - 检测输出解码
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

use tracing::{debug, trace};

use crate::{
  config::{DecoderLayout, PipelineConfig},
  frame::RawOutputTensor,
  labels::LabelTable,
};

/// 检测结果，坐标归一化到 [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
  pub cx: f32,
  pub cy: f32,
  pub w: f32,
  pub h: f32,
  pub confidence: f32,
  pub class_id: usize,
  pub class_name: String,
}

impl Detection {
  /// 由中心点与宽高构造，角点截断到 [0, 1]
  pub fn from_center(
    cx: f32,
    cy: f32,
    w: f32,
    h: f32,
    confidence: f32,
    class_id: usize,
    class_name: impl Into<String>,
  ) -> Self {
    Self {
      x1: (cx - w / 2.0).clamp(0.0, 1.0),
      y1: (cy - h / 2.0).clamp(0.0, 1.0),
      x2: (cx + w / 2.0).clamp(0.0, 1.0),
      y2: (cy + h / 2.0).clamp(0.0, 1.0),
      cx,
      cy,
      w,
      h,
      confidence,
      class_id,
      class_name: class_name.into(),
    }
  }

  pub fn from_corners(
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    confidence: f32,
    class_id: usize,
    class_name: impl Into<String>,
  ) -> Self {
    Self {
      x1,
      y1,
      x2,
      y2,
      cx: (x1 + x2) / 2.0,
      cy: (y1 + y2) / 2.0,
      w: x2 - x1,
      h: y2 - y1,
      confidence,
      class_id,
      class_name: class_name.into(),
    }
  }

  /// 角点围成的面积（截断后），归一化单位
  pub fn corner_area(&self) -> f32 {
    (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
  }

  /// 换算到 `width`x`height` 像素坐标 [x1, y1, x2, y2]
  pub fn to_pixels(&self, width: u32, height: u32) -> [f32; 4] {
    let (w, h) = (width as f32, height as f32);
    [self.x1 * w, self.y1 * h, self.x2 * w, self.y2 * h]
  }
}

pub struct Decoder {
  layout: DecoderLayout,
  threshold: f32,
  num_classes: usize,
  tensor_width: f32,
  tensor_height: f32,
}

impl Decoder {
  pub fn new(config: &PipelineConfig) -> Self {
    Self {
      layout: config.decoder,
      threshold: config.confidence_threshold,
      num_classes: config.num_classes(),
      tensor_width: config.input_width as f32,
      tensor_height: config.input_height as f32,
    }
  }

  pub fn with_threshold(mut self, threshold: f32) -> Self {
    self.threshold = threshold;
    self
  }

  /// 解码出置信度达标的候选框，不做抑制
  pub fn decode(&self, output: &RawOutputTensor, labels: &LabelTable) -> Vec<Detection> {
    let header = self.layout.header_channels();
    let num_classes = self.num_classes.min(output.channels().saturating_sub(header));
    let mut items = Vec::new();
    let mut gaps = 0usize;

    for element in 0..output.elements() {
      let candidate = match self.layout {
        DecoderLayout::Direct { box_scale } => {
          self.decode_direct(output, element, num_classes, box_scale)
        }
        DecoderLayout::Objectness => self.decode_objectness(output, element, num_classes),
      };
      let Some((class_id, confidence, [cx, cy, w, h])) = candidate else {
        continue;
      };

      let class_name = match labels.name_or_placeholder(class_id) {
        Ok(name) => name,
        Err(e) => {
          trace!("丢弃候选 {}: {}", element, e);
          gaps += 1;
          continue;
        }
      };
      items.push(Detection::from_center(
        cx, cy, w, h, confidence, class_id, class_name,
      ));
    }

    if gaps > 0 {
      debug!("{} 个候选的类别没有对应标签, 已丢弃", gaps);
    }
    debug!("解码得到 {} 个候选框", items.len());
    items
  }

  /// 坐标含非有限值或宽高不为正的框视为无效
  fn normalized_box(&self, output: &RawOutputTensor, element: usize, scale: f32) -> Option<[f32; 4]> {
    let bbox = [
      output.at(0, element) / self.tensor_width,
      output.at(1, element) / self.tensor_height,
      output.at(2, element) / self.tensor_width * scale,
      output.at(3, element) / self.tensor_height * scale,
    ];
    if !bbox.iter().all(|v| v.is_finite()) || !(bbox[2] > 0.0 && bbox[3] > 0.0) {
      trace!("丢弃无效框 {}: {:?}", element, bbox);
      return None;
    }
    Some(bbox)
  }

  fn decode_direct(
    &self,
    output: &RawOutputTensor,
    element: usize,
    num_classes: usize,
    box_scale: f32,
  ) -> Option<(usize, f32, [f32; 4])> {
    let (class_id, score) = argmax(output, element, 4, num_classes)?;
    if !(score > self.threshold) {
      return None;
    }
    Some((class_id, score, self.normalized_box(output, element, box_scale)?))
  }

  fn decode_objectness(
    &self,
    output: &RawOutputTensor,
    element: usize,
    num_classes: usize,
  ) -> Option<(usize, f32, [f32; 4])> {
    let objectness = sigmoid(output.at(4, element));
    // sigmoid 单调，直接比较 logit 即可
    let (class_id, logit) = argmax(output, element, 5, num_classes)?;
    let confidence = objectness * sigmoid(logit);
    if !(confidence >= self.threshold) {
      return None;
    }
    Some((class_id, confidence, self.normalized_box(output, element, 1.0)?))
  }
}

/// 返回 (类别索引, 分数)，相同分数取靠前的类别
fn argmax(
  output: &RawOutputTensor,
  element: usize,
  first_channel: usize,
  num_classes: usize,
) -> Option<(usize, f32)> {
  let mut best: Option<(usize, f32)> = None;
  for class_id in 0..num_classes {
    let score = output.at(first_channel + class_id, element);
    if best.is_none_or(|(_, max)| score > max) {
      best = Some((class_id, score));
    }
  }
  best
}

pub fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}
