// 该文件是 Luyan （路眼） 项目的一部分。
// src/frame.rs - 帧与张量定义
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

pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
  #[error("不支持的旋转角度: {0}")]
  InvalidRotation(i32),
  #[error("无法解析的旋转角度: {0:?}")]
  UnparsableRotation(String),
  #[error("像素格式 {format:?} 需要 {expected} 个平面, 实际为 {actual}")]
  PlaneCount {
    format: PixelFormat,
    expected: usize,
    actual: usize,
  },
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 相机方向，顺时针旋转到正向所需的角度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
  #[default]
  Deg0,
  Deg90,
  Deg180,
  Deg270,
}

impl Rotation {
  pub fn from_degrees(degrees: i32) -> Result<Self, FrameError> {
    match degrees.rem_euclid(360) {
      0 => Ok(Rotation::Deg0),
      90 => Ok(Rotation::Deg90),
      180 => Ok(Rotation::Deg180),
      270 => Ok(Rotation::Deg270),
      _ => Err(FrameError::InvalidRotation(degrees)),
    }
  }

  pub fn degrees(&self) -> u32 {
    match self {
      Rotation::Deg0 => 0,
      Rotation::Deg90 => 90,
      Rotation::Deg180 => 180,
      Rotation::Deg270 => 270,
    }
  }

  /// 旋转后宽高是否互换
  pub fn swaps_axes(&self) -> bool {
    matches!(self, Rotation::Deg90 | Rotation::Deg270)
  }
}

/// 相机原生像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
  /// 紧凑 RGB，每像素 3 字节
  Rgb8,
  /// 紧凑 RGBA，每像素 4 字节
  Rgba8,
  /// 三平面 YUV 4:2:0，平面顺序为 Y, U, V；色度平面可带像素步长
  I420,
  /// 双平面 YUV 4:2:0，第二平面为交错的 UV
  Nv12,
  /// 双平面 YUV 4:2:0，第二平面为交错的 VU
  Nv21,
  /// 紧凑 YUV 4:2:2，字节顺序 Y0 U Y1 V
  Yuyv,
}

impl PixelFormat {
  pub fn plane_count(&self) -> usize {
    match self {
      PixelFormat::Rgb8 | PixelFormat::Rgba8 | PixelFormat::Yuyv => 1,
      PixelFormat::Nv12 | PixelFormat::Nv21 => 2,
      PixelFormat::I420 => 3,
    }
  }

  /// 紧凑格式每像素字节数
  pub fn packed_bytes_per_pixel(&self) -> Option<usize> {
    match self {
      PixelFormat::Rgb8 => Some(3),
      PixelFormat::Rgba8 => Some(4),
      PixelFormat::Yuyv => Some(2),
      _ => None,
    }
  }
}

/// 单个像素平面
#[derive(Debug, Clone)]
pub struct Plane {
  pub data: Vec<u8>,
  /// 相邻两行的起始字节距离
  pub row_stride: usize,
  /// 同一行相邻两个样本的字节距离
  pub pixel_stride: usize,
}

impl Plane {
  pub fn new(data: Vec<u8>, row_stride: usize, pixel_stride: usize) -> Self {
    Self {
      data,
      row_stride,
      pixel_stride,
    }
  }
}

/// 相机采集得到的原始帧，只在一次流水线处理中存活
#[derive(Debug, Clone)]
pub struct RawFrame {
  width: u32,
  height: u32,
  format: PixelFormat,
  planes: Vec<Plane>,
  rotation: Rotation,
  mirrored: bool,
}

impl RawFrame {
  /// 紧凑格式帧，行步长按宽度推算
  pub fn packed(
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
  ) -> Result<Self, FrameError> {
    let bpp = format.packed_bytes_per_pixel().ok_or(FrameError::PlaneCount {
      format,
      expected: format.plane_count(),
      actual: 1,
    })?;
    let expected = bpp * width as usize * height as usize;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }
    let row_stride = bpp * width as usize;
    Ok(Self {
      width,
      height,
      format,
      planes: vec![Plane::new(data, row_stride, bpp)],
      rotation: Rotation::Deg0,
      mirrored: false,
    })
  }

  /// 多平面帧，平面内容在预处理时才校验
  pub fn planar(
    width: u32,
    height: u32,
    format: PixelFormat,
    planes: Vec<Plane>,
  ) -> Result<Self, FrameError> {
    if planes.len() != format.plane_count() {
      return Err(FrameError::PlaneCount {
        format,
        expected: format.plane_count(),
        actual: planes.len(),
      });
    }
    Ok(Self {
      width,
      height,
      format,
      planes,
      rotation: Rotation::Deg0,
      mirrored: false,
    })
  }

  pub fn with_rotation(mut self, rotation: Rotation) -> Self {
    self.rotation = rotation;
    self
  }

  /// 前置摄像头需要水平镜像
  pub fn with_mirror(mut self, mirrored: bool) -> Self {
    self.mirrored = mirrored;
    self
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn format(&self) -> PixelFormat {
    self.format
  }

  pub fn planes(&self) -> &[Plane] {
    &self.planes
  }

  pub fn rotation(&self) -> Rotation {
    self.rotation
  }

  pub fn mirrored(&self) -> bool {
    self.mirrored
  }
}

/// 输入张量的内存布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorLayout {
  /// (1, H, W, 3)
  #[default]
  Nhwc,
  /// (1, 3, H, W)
  Nchw,
}

impl TensorLayout {
  pub fn shape(&self, width: usize, height: usize) -> [usize; 4] {
    match self {
      TensorLayout::Nhwc => [1, height, width, RGB_CHANNELS],
      TensorLayout::Nchw => [1, RGB_CHANNELS, height, width],
    }
  }
}

/// 模型输入张量，三通道浮点数据
#[derive(Debug, Clone)]
pub struct NormalizedTensor {
  width: usize,
  height: usize,
  layout: TensorLayout,
  data: Box<[f32]>,
}

impl NormalizedTensor {
  pub fn zeros(width: usize, height: usize, layout: TensorLayout) -> Self {
    let data = vec![0.0f32; RGB_CHANNELS * width * height].into_boxed_slice();
    Self {
      width,
      height,
      layout,
      data,
    }
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn layout(&self) -> TensorLayout {
    self.layout
  }

  pub fn shape(&self) -> [usize; 4] {
    self.layout.shape(self.width, self.height)
  }

  fn index(&self, channel: usize, y: usize, x: usize) -> usize {
    match self.layout {
      TensorLayout::Nhwc => (y * self.width + x) * RGB_CHANNELS + channel,
      TensorLayout::Nchw => channel * self.height * self.width + y * self.width + x,
    }
  }

  pub fn get(&self, channel: usize, y: usize, x: usize) -> f32 {
    self.data[self.index(channel, y, x)]
  }

  pub fn set(&mut self, channel: usize, y: usize, x: usize, value: f32) {
    let index = self.index(channel, y, x);
    self.data[index] = value;
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }
}

impl AsRef<[f32]> for NormalizedTensor {
  fn as_ref(&self) -> &[f32] {
    &self.data
  }
}

/// 推理引擎输出，形状为 (channels, elements)
#[derive(Debug, Clone)]
pub struct RawOutputTensor {
  channels: usize,
  elements: usize,
  data: Box<[f32]>,
}

impl RawOutputTensor {
  pub fn new(channels: usize, elements: usize, data: Vec<f32>) -> Result<Self, FrameError> {
    let expected = channels * elements;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }
    Ok(Self {
      channels,
      elements,
      data: data.into_boxed_slice(),
    })
  }

  pub fn channels(&self) -> usize {
    self.channels
  }

  pub fn elements(&self) -> usize {
    self.elements
  }

  /// 第 `channel` 通道上第 `element` 个候选位置的值
  pub fn at(&self, channel: usize, element: usize) -> f32 {
    self.data[channel * self.elements + element]
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rotation_from_degrees() {
    assert_eq!(Rotation::from_degrees(90), Ok(Rotation::Deg90));
    assert_eq!(Rotation::from_degrees(-90), Ok(Rotation::Deg270));
    assert_eq!(Rotation::from_degrees(450), Ok(Rotation::Deg90));
    assert!(Rotation::from_degrees(45).is_err());
    assert!(Rotation::Deg270.swaps_axes());
    assert!(!Rotation::Deg180.swaps_axes());
  }

  #[test]
  fn packed_frame_checks_length() {
    assert!(RawFrame::packed(2, 2, PixelFormat::Rgb8, vec![0; 12]).is_ok());
    assert_eq!(
      RawFrame::packed(2, 2, PixelFormat::Rgb8, vec![0; 11]).unwrap_err(),
      FrameError::LengthMismatch {
        expected: 12,
        actual: 11
      }
    );
    assert!(RawFrame::packed(2, 2, PixelFormat::Nv21, vec![0; 6]).is_err());
  }

  #[test]
  fn planar_frame_checks_plane_count() {
    let y = Plane::new(vec![0; 4], 2, 1);
    assert!(RawFrame::planar(2, 2, PixelFormat::I420, vec![y]).is_err());
  }

  #[test]
  fn tensor_layout_indexing() {
    let mut nhwc = NormalizedTensor::zeros(4, 2, TensorLayout::Nhwc);
    nhwc.set(2, 1, 3, 0.5);
    assert_eq!(nhwc.as_slice()[(4 + 3) * 3 + 2], 0.5);
    assert_eq!(nhwc.shape(), [1, 2, 4, 3]);

    let mut nchw = NormalizedTensor::zeros(4, 2, TensorLayout::Nchw);
    nchw.set(2, 1, 3, 0.5);
    assert_eq!(nchw.as_slice()[2 * 8 + 4 + 3], 0.5);
    assert_eq!(nchw.shape(), [1, 3, 2, 4]);
  }

  #[test]
  fn output_tensor_is_channel_major() {
    let tensor = RawOutputTensor::new(2, 3, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
    assert_eq!(tensor.at(1, 0), 3.0);
    assert_eq!(tensor.at(0, 2), 2.0);
    assert!(RawOutputTensor::new(2, 3, vec![0.0; 5]).is_err());
  }
}
