// 该文件是 Luyan （路眼） 项目的一部分。
// src/output/channel_output.rs - 向展示线程转发结果
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

use crossbeam::channel::{Receiver, Sender, TrySendError, bounded};
use tracing::debug;

use crate::{decode::Detection, output::DetectionListener};

#[derive(Debug, Clone, PartialEq)]
pub enum DetectionEvent {
  Empty,
  Detections {
    items: Vec<Detection>,
    inference_ms: u64,
  },
}

/// 把结果发送到展示线程，不等待对方消费
///
/// 通道只保留最新的一个事件，展示线程来不及消费时旧事件被覆盖。
#[derive(Debug, Clone)]
pub struct ChannelOutput {
  sender: Sender<DetectionEvent>,
  stale: Receiver<DetectionEvent>,
}

impl ChannelOutput {
  pub fn pair() -> (Self, Receiver<DetectionEvent>) {
    let (sender, receiver) = bounded(1);
    let output = Self {
      sender,
      stale: receiver.clone(),
    };
    (output, receiver)
  }

  fn forward(&self, event: DetectionEvent) {
    let mut event = event;
    loop {
      match self.sender.try_send(event) {
        Ok(()) => return,
        Err(TrySendError::Full(rejected)) => {
          if self.stale.try_recv().is_ok() {
            debug!("展示线程繁忙, 覆盖未消费的检测事件");
          }
          event = rejected;
        }
        Err(TrySendError::Disconnected(_)) => {
          debug!("展示线程已退出, 丢弃检测事件");
          return;
        }
      }
    }
  }
}

impl DetectionListener for ChannelOutput {
  fn on_empty(&mut self) {
    self.forward(DetectionEvent::Empty);
  }

  fn on_detections(&mut self, detections: &[Detection], inference_ms: u64) {
    self.forward(DetectionEvent::Detections {
      items: detections.to_vec(),
      inference_ms,
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn forwards_without_blocking() {
    let (mut output, receiver) = ChannelOutput::pair();
    output.on_empty();
    assert_eq!(receiver.try_recv().unwrap(), DetectionEvent::Empty);

    drop(receiver);
    // 接收端关闭后发送不应阻塞或崩溃
    output.on_detections(&[], 1);
  }

  #[test]
  fn keeps_only_latest_event() {
    let (mut output, receiver) = ChannelOutput::pair();
    output.on_empty();
    output.on_detections(&[], 7);
    output.on_detections(&[], 9);
    assert_eq!(
      receiver.try_recv().unwrap(),
      DetectionEvent::Detections {
        items: Vec::new(),
        inference_ms: 9
      }
    );
    assert!(receiver.try_recv().is_err());
  }
}
