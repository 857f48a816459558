// 该文件是 Luyan （路眼） 项目的一部分。
// src/preprocess/color.rs - 像素格式转换
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

use image::RgbImage;

use super::PreprocessError;
use crate::frame::{PixelFormat, Plane, RawFrame};

/// 把任意原生格式的帧转换为紧凑 RGB 图像，不做几何变换
pub fn to_rgb(frame: &RawFrame) -> Result<RgbImage, PreprocessError> {
  let (width, height) = (frame.width() as usize, frame.height() as usize);
  if width == 0 || height == 0 {
    return Err(PreprocessError::EmptyFrame);
  }

  let planes = frame.planes();
  let rgb = match frame.format() {
    PixelFormat::Rgb8 => packed_to_rgb(&planes[0], width, height, 3)?,
    PixelFormat::Rgba8 => packed_to_rgb(&planes[0], width, height, 4)?,
    PixelFormat::Yuyv => yuyv_to_rgb(&planes[0], width, height)?,
    PixelFormat::I420 => {
      let chroma = ChromaPlanes::Separate {
        u: &planes[1],
        v: &planes[2],
      };
      yuv420_to_rgb(&planes[0], chroma, width, height)?
    }
    PixelFormat::Nv12 => yuv420_to_rgb(
      &planes[0],
      ChromaPlanes::Interleaved {
        plane: &planes[1],
        v_first: false,
      },
      width,
      height,
    )?,
    PixelFormat::Nv21 => yuv420_to_rgb(
      &planes[0],
      ChromaPlanes::Interleaved {
        plane: &planes[1],
        v_first: true,
      },
      width,
      height,
    )?,
  };

  RgbImage::from_raw(width as u32, height as u32, rgb).ok_or(PreprocessError::EmptyFrame)
}

enum ChromaPlanes<'a> {
  Separate { u: &'a Plane, v: &'a Plane },
  Interleaved { plane: &'a Plane, v_first: bool },
}

/// 读取 `rows` 行、每行 `cols` 个样本（每个样本 `sample_len` 字节）所需的最小长度
fn required_len(plane: &Plane, rows: usize, cols: usize, sample_len: usize) -> usize {
  if rows == 0 || cols == 0 {
    return 0;
  }
  (rows - 1) * plane.row_stride + (cols - 1) * plane.pixel_stride + sample_len
}

fn check_plane(
  name: &'static str,
  plane: &Plane,
  rows: usize,
  cols: usize,
  sample_len: usize,
) -> Result<(), PreprocessError> {
  let expected = required_len(plane, rows, cols, sample_len);
  if plane.pixel_stride == 0 || plane.data.len() < expected {
    return Err(PreprocessError::PlaneTooSmall {
      plane: name,
      expected,
      actual: plane.data.len(),
    });
  }
  Ok(())
}

fn packed_to_rgb(
  plane: &Plane,
  width: usize,
  height: usize,
  bpp: usize,
) -> Result<Vec<u8>, PreprocessError> {
  check_plane("packed", plane, height, width, bpp)?;
  let mut rgb = Vec::with_capacity(width * height * 3);
  for y in 0..height {
    let row = &plane.data[y * plane.row_stride..];
    for x in 0..width {
      let base = x * plane.pixel_stride;
      rgb.extend_from_slice(&row[base..base + 3]);
    }
  }
  Ok(rgb)
}

fn yuyv_to_rgb(plane: &Plane, width: usize, height: usize) -> Result<Vec<u8>, PreprocessError> {
  // 每两个像素共享一组 U/V，占 4 字节
  let pairs = width.div_ceil(2);
  let expected = if height == 0 {
    0
  } else {
    (height - 1) * plane.row_stride + pairs * 4
  };
  if plane.data.len() < expected {
    return Err(PreprocessError::PlaneTooSmall {
      plane: "yuyv",
      expected,
      actual: plane.data.len(),
    });
  }

  let mut rgb = Vec::with_capacity(width * height * 3);
  for y in 0..height {
    let row = &plane.data[y * plane.row_stride..];
    for x in 0..width {
      let base = (x / 2) * 4;
      let luma = row[base + (x % 2) * 2];
      let (u, v) = (row[base + 1], row[base + 3]);
      rgb.extend_from_slice(&yuv_to_rgb(luma, u, v));
    }
  }
  Ok(rgb)
}

fn yuv420_to_rgb(
  luma: &Plane,
  chroma: ChromaPlanes<'_>,
  width: usize,
  height: usize,
) -> Result<Vec<u8>, PreprocessError> {
  let (chroma_w, chroma_h) = (width.div_ceil(2), height.div_ceil(2));
  check_plane("y", luma, height, width, 1)?;
  match chroma {
    ChromaPlanes::Separate { u, v } => {
      check_plane("u", u, chroma_h, chroma_w, 1)?;
      check_plane("v", v, chroma_h, chroma_w, 1)?;
    }
    ChromaPlanes::Interleaved { plane, .. } => {
      check_plane("uv", plane, chroma_h, chroma_w, 2)?;
    }
  }

  let mut rgb = Vec::with_capacity(width * height * 3);
  for y in 0..height {
    for x in 0..width {
      let luma_value = luma.data[y * luma.row_stride + x * luma.pixel_stride];
      let (u, v) = match chroma {
        ChromaPlanes::Separate { u, v } => (
          u.data[(y / 2) * u.row_stride + (x / 2) * u.pixel_stride],
          v.data[(y / 2) * v.row_stride + (x / 2) * v.pixel_stride],
        ),
        ChromaPlanes::Interleaved { plane, v_first } => {
          let base = (y / 2) * plane.row_stride + (x / 2) * plane.pixel_stride;
          let (first, second) = (plane.data[base], plane.data[base + 1]);
          if v_first {
            (second, first)
          } else {
            (first, second)
          }
        }
      };
      rgb.extend_from_slice(&yuv_to_rgb(luma_value, u, v));
    }
  }
  Ok(rgb)
}

/// BT.601 有限范围整数转换
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
  let c = y as i32 - 16;
  let d = u as i32 - 128;
  let e = v as i32 - 128;

  let r = ((298 * c + 409 * e + 128) >> 8).clamp(0, 255) as u8;
  let g = ((298 * c - 100 * d - 208 * e + 128) >> 8).clamp(0, 255) as u8;
  let b = ((298 * c + 516 * d + 128) >> 8).clamp(0, 255) as u8;

  [r, g, b]
}
