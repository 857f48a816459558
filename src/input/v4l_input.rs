// 该文件是 Luyan （路眼） 项目的一部分。
// src/input/v4l_input.rs - V4L 摄像头输入
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
use tracing::{error, info};
use url::Url;
use v4l::{
  Device, FourCC,
  buffer::Type,
  io::{mmap::Stream, traits::CaptureStream},
  video::Capture,
};

use crate::{
  FromUrl, FromUrlWithScheme, decoded_path,
  frame::{FrameError, PixelFormat, Plane, RawFrame},
  input::CaptureOrientation,
};

const V4L_DEFAULT_DEVICE: &str = "/dev/video0";
const V4L_BUFFER_COUNT: u32 = 4;
const YUYV: &[u8; 4] = b"YUYV";

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("V4L 设备错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("设备不支持 YUYV 格式, 实际为 {0}")]
  UnsupportedPixelFormat(String),
  #[error("帧参数错误: {0}")]
  FrameError(#[from] FrameError),
}

/// YUYV 摄像头，例如 `v4l:///dev/video0?rotate=90&front`
pub struct V4lInput {
  stream: Stream<'static>,
  width: u32,
  height: u32,
  stride: usize,
  orientation: CaptureOrientation,
}

impl FromUrlWithScheme for V4lInput {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lInput {
  type Error = V4lInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lInputError::SchemeMismatch);
    }

    let path = match decoded_path(url) {
      path if path.is_empty() || path == "/" => V4L_DEFAULT_DEVICE.to_string(),
      path => path,
    };
    let orientation = CaptureOrientation::from_query(url)?;

    info!("打开摄像头: {}", path);
    let device = Device::with_path(&path)?;
    let mut format = device.format()?;
    format.fourcc = FourCC::new(YUYV);
    let format = device.set_format(&format)?;
    if format.fourcc != FourCC::new(YUYV) {
      return Err(V4lInputError::UnsupportedPixelFormat(format.fourcc.to_string()));
    }
    info!(
      "摄像头格式: {}x{} {}, 行步长 {}",
      format.width, format.height, format.fourcc, format.stride
    );

    let stream = Stream::with_buffers(&device, Type::VideoCapture, V4L_BUFFER_COUNT)?;
    Ok(V4lInput {
      stream,
      width: format.width,
      height: format.height,
      stride: format.stride as usize,
      orientation,
    })
  }
}

impl V4lInput {
  fn capture(&mut self) -> Result<RawFrame, V4lInputError> {
    let (buffer, meta) = self.stream.next()?;
    // 部分驱动不填写 bytesused
    let used = match meta.bytesused as usize {
      0 => buffer.len(),
      n => n.min(buffer.len()),
    };
    let data = buffer[..used].to_vec();
    let frame = RawFrame::planar(
      self.width,
      self.height,
      PixelFormat::Yuyv,
      vec![Plane::new(data, self.stride, 2)],
    )?;
    Ok(self.orientation.apply(frame))
  }
}

impl Iterator for V4lInput {
  type Item = RawFrame;

  fn next(&mut self) -> Option<Self::Item> {
    match self.capture() {
      Ok(frame) => Some(frame),
      Err(e) => {
        error!("采集失败: {}", e);
        None
      }
    }
  }
}
