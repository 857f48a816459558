// 该文件是 Luyan （路眼） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, decoded_path,
  frame::{FrameError, PixelFormat, RawFrame},
  input::CaptureOrientation,
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("帧参数错误: {0}")]
  FrameError(#[from] FrameError),
  #[error("无效的重复次数: {0}")]
  InvalidRepeat(String),
}

/// 从图像文件读取一帧，`repeat=N` 时重复输出同一帧
///
/// 例如 `image:///data/stop.jpg?rotate=90&front&repeat=10`。
pub struct ImageFileInput {
  frame: RawFrame,
  remaining: usize,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemeMismatch);
    }

    let orientation = CaptureOrientation::from_query(url)?;
    let mut repeat = 1;
    for (key, value) in url.query_pairs() {
      if key == "repeat" {
        repeat = value
          .parse()
          .map_err(|_| ImageFileInputError::InvalidRepeat(value.to_string()))?;
      }
    }

    let path = decoded_path(url);
    info!("读取图像文件: {}", path);
    let image = ImageReader::open(&path)?.decode()?.to_rgb8();
    Ok(ImageFileInput {
      frame: orientation.apply(rgb_frame(image)?),
      remaining: repeat,
    })
  }
}

impl ImageFileInput {
  pub fn from_image(image: RgbImage, orientation: CaptureOrientation) -> Result<Self, ImageFileInputError> {
    Ok(ImageFileInput {
      frame: orientation.apply(rgb_frame(image)?),
      remaining: 1,
    })
  }
}

fn rgb_frame(image: RgbImage) -> Result<RawFrame, FrameError> {
  let (width, height) = image.dimensions();
  RawFrame::packed(width, height, PixelFormat::Rgb8, image.into_raw())
}

impl Iterator for ImageFileInput {
  type Item = RawFrame;

  fn next(&mut self) -> Option<Self::Item> {
    if self.remaining == 0 {
      return None;
    }
    self.remaining -= 1;
    Some(self.frame.clone())
  }
}
