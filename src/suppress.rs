// 该文件是 Luyan （路眼） 项目的一部分。
// src/suppress.rs - 候选框抑制与挑选
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
  config::{PipelineConfig, SelectionMode},
  decode::Detection,
};

/// 交并比，并集面积使用框自身的宽高而不是截断后的角点
pub fn iou(a: &Detection, b: &Detection) -> f32 {
  let inter_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
  let inter_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
  let inter = inter_w * inter_h;
  let union = a.w * a.h + b.w * b.h - inter;
  if union > 0.0 { inter / union } else { 0.0 }
}

/// 贪心 NMS，与类别无关
///
/// 按置信度降序稳定排序，置信度相同时保持输入顺序。
/// 与已保留框的 IoU 不小于 `iou_threshold` 的候选被移除，
/// 结果最多保留 `max_boxes` 个。
pub fn nms(mut candidates: Vec<Detection>, iou_threshold: f32, max_boxes: usize) -> Vec<Detection> {
  candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut kept: Vec<Detection> = Vec::with_capacity(max_boxes.min(candidates.len()));
  for candidate in candidates {
    if kept.len() >= max_boxes {
      break;
    }
    if kept
      .iter()
      .all(|winner| iou(winner, &candidate) < iou_threshold)
    {
      kept.push(candidate);
    }
  }
  kept
}

/// 单框模式的几何门限，单位为输入张量像素
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryGate {
  pub min_area: f32,
  pub margin: f32,
  pub width: f32,
  pub height: f32,
}

impl GeometryGate {
  pub fn new(config: &PipelineConfig) -> Self {
    Self {
      min_area: config.min_box_area,
      margin: config.edge_margin,
      width: config.input_width as f32,
      height: config.input_height as f32,
    }
  }

  pub fn pixel_area(&self, detection: &Detection) -> f32 {
    detection.corner_area() * self.width * self.height
  }
}

/// 面积过小或贴近边界的框不通过
pub fn passes_geometry_gate(detection: &Detection, gate: &GeometryGate) -> bool {
  let [x1, y1, x2, y2] = [
    detection.x1 * gate.width,
    detection.y1 * gate.height,
    detection.x2 * gate.width,
    detection.y2 * gate.height,
  ];
  if gate.pixel_area(detection) < gate.min_area {
    return false;
  }
  x1 >= gate.margin
    && y1 >= gate.margin
    && x2 <= gate.width - gate.margin
    && y2 <= gate.height - gate.margin
}

/// 在通过几何门限的框中按 面积×置信度 挑选一个，分数相同取靠前者
pub fn select_best(candidates: Vec<Detection>, gate: &GeometryGate) -> Option<Detection> {
  let mut best: Option<(f32, Detection)> = None;
  for candidate in candidates {
    if !passes_geometry_gate(&candidate, gate) {
      trace!("几何过滤丢弃: {:?}", candidate);
      continue;
    }
    let score = gate.pixel_area(&candidate) * candidate.confidence;
    if best.as_ref().is_none_or(|(max, _)| score > *max) {
      best = Some((score, candidate));
    }
  }
  best.map(|(_, detection)| detection)
}

pub struct Suppressor {
  iou_threshold: f32,
  max_boxes: usize,
  selection: SelectionMode,
  gate: GeometryGate,
}

impl Suppressor {
  pub fn new(config: &PipelineConfig) -> Self {
    Self {
      iou_threshold: config.iou_threshold,
      max_boxes: config.max_boxes,
      selection: config.selection,
      gate: GeometryGate::new(config),
    }
  }

  pub fn apply(&self, candidates: Vec<Detection>) -> Vec<Detection> {
    let total = candidates.len();
    let result = match self.selection {
      SelectionMode::Ranked => nms(candidates, self.iou_threshold, self.max_boxes),
      SelectionMode::SingleBest => {
        let survivors = nms(candidates, self.iou_threshold, usize::MAX);
        select_best(survivors, &self.gate).into_iter().collect()
      }
    };
    debug!("抑制后保留 {} / {} 个候选框", result.len(), total);
    result
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn boxed(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Detection {
    Detection::from_corners(x1, y1, x2, y2, confidence, 0, "sign")
  }

  fn gate(min_area: f32, margin: f32) -> GeometryGate {
    GeometryGate {
      min_area,
      margin,
      width: 100.0,
      height: 100.0,
    }
  }

  #[test]
  fn iou_of_self_and_disjoint() {
    let a = boxed(0.1, 0.1, 0.4, 0.5, 0.9);
    let b = boxed(0.6, 0.6, 0.9, 0.9, 0.9);
    assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    assert_eq!(iou(&a, &b), 0.0);
  }

  #[test]
  fn iou_uses_own_extents_for_union() {
    let a = boxed(0.0, 0.0, 0.5, 0.5, 0.9);
    let b = boxed(0.0, 0.0, 0.5, 0.4, 0.9);
    assert!((iou(&a, &b) - 0.8).abs() < 1e-5);
    let degenerate = boxed(0.2, 0.2, 0.2, 0.2, 0.9);
    assert_eq!(iou(&degenerate, &degenerate), 0.0);
  }

  #[test]
  fn equal_confidence_overlap_keeps_first() {
    let first = Detection {
      class_id: 1,
      ..boxed(0.0, 0.0, 0.5, 0.5, 0.7)
    };
    let second = Detection {
      class_id: 2,
      ..boxed(0.0, 0.0, 0.5, 0.4, 0.7)
    };
    let kept = nms(vec![first, second], 0.5, 10);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].class_id, 1);
  }

  #[test]
  fn nms_orders_and_truncates() {
    let candidates = vec![
      boxed(0.0, 0.0, 0.1, 0.1, 0.3),
      boxed(0.2, 0.2, 0.3, 0.3, 0.9),
      boxed(0.4, 0.4, 0.5, 0.5, 0.6),
      boxed(0.2, 0.2, 0.3, 0.29, 0.8),
      boxed(0.6, 0.6, 0.7, 0.7, 0.5),
    ];
    let kept = nms(candidates.clone(), 0.5, 10);
    let scores: Vec<f32> = kept.iter().map(|d| d.confidence).collect();
    assert_eq!(scores, vec![0.9, 0.6, 0.5, 0.3]);

    let kept = nms(candidates, 0.5, 2);
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[1].confidence, 0.6);
  }

  #[test]
  fn gate_rejects_small_and_edge_boxes() {
    let gate = gate(100.0, 5.0);
    assert!(passes_geometry_gate(&boxed(0.1, 0.1, 0.5, 0.5, 0.9), &gate));
    // 面积 9 像素²
    assert!(!passes_geometry_gate(&boxed(0.5, 0.5, 0.53, 0.53, 0.9), &gate));
    assert!(!passes_geometry_gate(&boxed(0.02, 0.1, 0.5, 0.5, 0.9), &gate));
    assert!(!passes_geometry_gate(&boxed(0.1, 0.1, 0.97, 0.5, 0.9), &gate));
    assert!(passes_geometry_gate(&boxed(0.06, 0.06, 0.94, 0.94, 0.9), &gate));
  }

  #[test]
  fn single_best_prefers_area_times_confidence() {
    let small_sure = boxed(0.1, 0.1, 0.2, 0.2, 0.95);
    let large_unsure = boxed(0.4, 0.4, 0.8, 0.8, 0.5);
    let best = select_best(vec![small_sure, large_unsure.clone()], &gate(0.0, 0.0));
    assert_eq!(best, Some(large_unsure));

    let best = select_best(vec![boxed(0.0, 0.0, 0.5, 0.5, 0.9)], &gate(0.0, 1.0));
    assert_eq!(best, None);
  }

  #[test]
  fn suppressor_modes() {
    let config = PipelineConfig::default()
      .with_input_size(100, 100)
      .with_max_boxes(2);
    let candidates = vec![
      boxed(0.1, 0.1, 0.2, 0.2, 0.9),
      boxed(0.3, 0.3, 0.4, 0.4, 0.8),
      boxed(0.5, 0.5, 0.9, 0.9, 0.7),
    ];

    let ranked = Suppressor::new(&config).apply(candidates.clone());
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].confidence, 0.9);

    let single = Suppressor::new(&config.clone().with_selection(SelectionMode::SingleBest))
      .apply(candidates.clone());
    assert_eq!(single.len(), 1);
    assert_eq!(single[0].confidence, 0.7);

    let gated = config
      .with_selection(SelectionMode::SingleBest)
      .with_geometry_gate(10_000.0, 0.0);
    assert!(Suppressor::new(&gated).apply(candidates).is_empty());
  }
}
