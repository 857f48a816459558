// 该文件是 Luyan （路眼） 项目的一部分。
// src/preprocess.rs - 帧预处理
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

//! # 帧预处理
//!
//! 把相机帧变成模型需要的归一化张量，依次执行：
//!
//! 1. 像素格式转换（YUV 多平面/紧凑格式 → RGB）
//! 2. 旋转与镜像，合并为一次像素重映射，不做插值
//! 3. 双线性缩放到模型输入尺寸，整个流程只插值一次
//! 4. 归一化到 [0, 1]，按配置施加通道增益与偏置后截断

pub mod color;

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::trace;

use crate::{
  config::{ChannelGain, ChannelOrder, PipelineConfig},
  frame::{NormalizedTensor, RawFrame, Rotation, TensorLayout},
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreprocessError {
  #[error("帧尺寸为空")]
  EmptyFrame,
  #[error("{plane} 平面数据不足: 期望至少 {expected} 字节, 实际 {actual} 字节")]
  PlaneTooSmall {
    plane: &'static str,
    expected: usize,
    actual: usize,
  },
}

pub struct Preprocessor {
  width: u32,
  height: u32,
  layout: TensorLayout,
  order: ChannelOrder,
  gain: ChannelGain,
}

impl Preprocessor {
  pub fn new(config: &PipelineConfig) -> Self {
    Self {
      width: config.input_width,
      height: config.input_height,
      layout: config.layout,
      order: config.channel_order,
      gain: config.channel_gain,
    }
  }

  pub fn process(&self, frame: &RawFrame) -> Result<NormalizedTensor, PreprocessError> {
    let rgb = color::to_rgb(frame)?;
    let oriented = orient(&rgb, frame.rotation(), frame.mirrored());
    let resized = if oriented.dimensions() == (self.width, self.height) {
      oriented
    } else {
      image::imageops::resize(&oriented, self.width, self.height, FilterType::Triangle)
    };
    trace!(
      "预处理: {}x{} {:?} -> {}x{}",
      frame.width(),
      frame.height(),
      frame.format(),
      self.width,
      self.height
    );
    Ok(normalize(&resized, self.layout, self.order, &self.gain))
  }
}

/// 顺时针旋转后再水平镜像，一次遍历完成
pub fn orient(image: &RgbImage, rotation: Rotation, mirrored: bool) -> RgbImage {
  if rotation == Rotation::Deg0 && !mirrored {
    return image.clone();
  }

  let (src_w, src_h) = image.dimensions();
  let (dst_w, dst_h) = if rotation.swaps_axes() {
    (src_h, src_w)
  } else {
    (src_w, src_h)
  };

  RgbImage::from_fn(dst_w, dst_h, |ox, oy| {
    let rx = if mirrored { dst_w - 1 - ox } else { ox };
    let ry = oy;
    let (sx, sy) = match rotation {
      Rotation::Deg0 => (rx, ry),
      Rotation::Deg90 => (ry, src_h - 1 - rx),
      Rotation::Deg180 => (src_w - 1 - rx, src_h - 1 - ry),
      Rotation::Deg270 => (src_w - 1 - ry, rx),
    };
    *image.get_pixel(sx, sy)
  })
}

/// 把 0-255 的像素值映射到 [0, 1]
pub fn normalize(
  image: &RgbImage,
  layout: TensorLayout,
  order: ChannelOrder,
  gain: &ChannelGain,
) -> NormalizedTensor {
  let (width, height) = image.dimensions();
  let mut tensor = NormalizedTensor::zeros(width as usize, height as usize, layout);
  let identity = gain.is_identity();

  for (x, y, pixel) in image.enumerate_pixels() {
    for c in 0..3 {
      let src = match order {
        ChannelOrder::Rgb => c,
        ChannelOrder::Bgr => 2 - c,
      };
      let mut value = pixel.0[src] as f32 / 255.0;
      if !identity {
        value = (value * gain.gain[c] + gain.offset[c]).clamp(0.0, 1.0);
      }
      tensor.set(c, y as usize, x as usize, value);
    }
  }
  tensor
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::PixelFormat;

  // 2x3 图像，像素值编码坐标: R = x, G = y
  fn coordinate_image() -> RgbImage {
    RgbImage::from_fn(2, 3, |x, y| image::Rgb([x as u8, y as u8, 0]))
  }

  fn at(image: &RgbImage, x: u32, y: u32) -> (u8, u8) {
    let p = image.get_pixel(x, y);
    (p.0[0], p.0[1])
  }

  #[test]
  fn rotation_matches_clockwise_turns() {
    let src = coordinate_image();

    let r90 = orient(&src, Rotation::Deg90, false);
    assert_eq!(r90.dimensions(), (3, 2));
    assert_eq!(r90, image::imageops::rotate90(&src));
    // 左下角转到左上角
    assert_eq!(at(&r90, 0, 0), (0, 2));

    let r180 = orient(&src, Rotation::Deg180, false);
    assert_eq!(r180, image::imageops::rotate180(&src));

    let r270 = orient(&src, Rotation::Deg270, false);
    assert_eq!(r270, image::imageops::rotate270(&src));
  }

  #[test]
  fn mirror_is_applied_after_rotation() {
    let src = coordinate_image();
    let combined = orient(&src, Rotation::Deg90, true);
    let expected = image::imageops::flip_horizontal(&image::imageops::rotate90(&src));
    assert_eq!(combined, expected);

    let mirrored = orient(&src, Rotation::Deg0, true);
    assert_eq!(at(&mirrored, 0, 0), (1, 0));
  }

  #[test]
  fn normalize_scales_and_clamps() {
    let image = RgbImage::from_pixel(1, 1, image::Rgb([255, 51, 200]));
    let plain = normalize(&image, TensorLayout::Nhwc, ChannelOrder::Rgb, &ChannelGain::IDENTITY);
    assert_eq!(plain.get(0, 0, 0), 1.0);
    assert!((plain.get(1, 0, 0) - 0.2).abs() < 1e-6);

    let gain = ChannelGain {
      gain: [1.2, 1.0, 0.8],
      offset: [0.0, 0.0, 0.0],
    };
    let boosted = normalize(&image, TensorLayout::Nchw, ChannelOrder::Rgb, &gain);
    assert_eq!(boosted.get(0, 0, 0), 1.0);
    assert!((boosted.get(2, 0, 0) - 200.0 / 255.0 * 0.8).abs() < 1e-6);

    let bgr = normalize(&image, TensorLayout::Nhwc, ChannelOrder::Bgr, &ChannelGain::IDENTITY);
    assert_eq!(bgr.get(2, 0, 0), 1.0);
  }

  #[test]
  fn process_produces_configured_shape() {
    let config = PipelineConfig::default()
      .with_input_size(32, 16)
      .with_layout(TensorLayout::Nchw);
    let preprocessor = Preprocessor::new(&config);
    let frame = RawFrame::packed(20, 10, PixelFormat::Rgb8, vec![128; 20 * 10 * 3])
      .unwrap()
      .with_rotation(Rotation::Deg90)
      .with_mirror(true);
    let tensor = preprocessor.process(&frame).unwrap();
    assert_eq!(tensor.shape(), [1, 3, 16, 32]);
    assert!(
      tensor
        .as_slice()
        .iter()
        .all(|v| (*v - 128.0 / 255.0).abs() < 2.0 / 255.0)
    );
  }

  #[test]
  fn corrupt_frame_is_rejected() {
    let frame = RawFrame::planar(
      4,
      4,
      PixelFormat::Nv21,
      vec![
        crate::frame::Plane::new(vec![0; 16], 4, 1),
        crate::frame::Plane::new(vec![0; 3], 4, 2),
      ],
    )
    .unwrap();
    let preprocessor = Preprocessor::new(&PipelineConfig::default());
    assert!(preprocessor.process(&frame).is_err());
  }
}
