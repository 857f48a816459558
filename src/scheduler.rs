// 该文件是 Luyan （路眼） 项目的一部分。
// src/scheduler.rs - 帧调度
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

//! # 帧调度
//!
//! 采集线程通过 [`FrameSink::submit`] 提交帧，专用工作线程串行执行流水线。
//!
//! 状态机为 `Idle → Processing → Idle`，关闭后进入 `Closed` 且不再离开。
//! 处理中到达的新帧直接丢弃，不排队；采集线程永远不会被阻塞。
//! 帧交接使用容量为 1 的通道，满时覆盖旧帧。

use std::{
  panic::{AssertUnwindSafe, catch_unwind},
  sync::{
    Arc,
    atomic::{AtomicU8, AtomicU64, Ordering},
  },
  thread::{self, JoinHandle},
};

use crossbeam::channel::{Receiver, Sender, TrySendError, bounded, select};
use tracing::{debug, error, info, warn};

use crate::{
  engine::InferenceEngine, error::PipelineError, frame::RawFrame, output::DetectionListener,
  pipeline::Pipeline,
};

const IDLE: u8 = 0;
const PROCESSING: u8 = 1;
const CLOSED: u8 = 2;

const WORKER_NAME: &str = "luyan-worker";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
  Idle,
  Processing,
  Closed,
}

/// 提交帧的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
  Admitted,
  /// 工作线程繁忙，帧被丢弃
  Dropped,
  Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
  pub submitted: u64,
  pub admitted: u64,
  pub dropped: u64,
  pub dispatched: u64,
  pub failed: u64,
  /// 关闭时仍在处理、结果未派发的帧
  pub abandoned: u64,
}

#[derive(Default)]
struct Shared {
  state: AtomicU8,
  submitted: AtomicU64,
  admitted: AtomicU64,
  dropped: AtomicU64,
  dispatched: AtomicU64,
  failed: AtomicU64,
  abandoned: AtomicU64,
}

impl Shared {
  fn state(&self) -> SchedulerState {
    match self.state.load(Ordering::Acquire) {
      IDLE => SchedulerState::Idle,
      PROCESSING => SchedulerState::Processing,
      _ => SchedulerState::Closed,
    }
  }

  fn is_closed(&self) -> bool {
    self.state.load(Ordering::Acquire) == CLOSED
  }

  /// 处理结束回到空闲，已关闭时保持关闭
  fn finish(&self) {
    let _ = self
      .state
      .compare_exchange(PROCESSING, IDLE, Ordering::AcqRel, Ordering::Acquire);
  }

  fn close(&self) -> bool {
    self.state.swap(CLOSED, Ordering::AcqRel) != CLOSED
  }

  fn stats(&self) -> SchedulerStats {
    SchedulerStats {
      submitted: self.submitted.load(Ordering::Relaxed),
      admitted: self.admitted.load(Ordering::Relaxed),
      dropped: self.dropped.load(Ordering::Relaxed),
      dispatched: self.dispatched.load(Ordering::Relaxed),
      failed: self.failed.load(Ordering::Relaxed),
      abandoned: self.abandoned.load(Ordering::Relaxed),
    }
  }
}

/// 采集端句柄，可克隆到任意线程
#[derive(Clone)]
pub struct FrameSink {
  shared: Arc<Shared>,
  sender: Sender<RawFrame>,
  slot: Receiver<RawFrame>,
}

impl FrameSink {
  /// 非阻塞提交；只有空闲时才接收
  pub fn submit(&self, frame: RawFrame) -> Admission {
    self.shared.submitted.fetch_add(1, Ordering::Relaxed);
    match self
      .shared
      .state
      .compare_exchange(IDLE, PROCESSING, Ordering::AcqRel, Ordering::Acquire)
    {
      Ok(_) => {}
      Err(CLOSED) => return Admission::Closed,
      Err(_) => {
        self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        debug!("工作线程繁忙, 丢弃新帧");
        return Admission::Dropped;
      }
    }
    self.hand_over(frame)
  }

  /// 已进入处理状态后把帧放入交接槽
  fn hand_over(&self, frame: RawFrame) -> Admission {
    let mut frame = frame;
    loop {
      match self.sender.try_send(frame) {
        Ok(()) => break,
        Err(TrySendError::Full(rejected)) => {
          // 覆盖尚未取走的旧帧
          if self.slot.try_recv().is_ok() {
            debug!("覆盖未处理的旧帧");
          }
          frame = rejected;
        }
        Err(TrySendError::Disconnected(_)) => {
          self.shared.finish();
          return Admission::Closed;
        }
      }
    }
    // 交接期间调度器被关闭，工作线程不会再取这一帧
    if self.shared.is_closed() && self.slot.try_recv().is_ok() {
      debug!("调度器已关闭, 撤回刚提交的帧");
      return Admission::Closed;
    }
    self.shared.admitted.fetch_add(1, Ordering::Relaxed);
    Admission::Admitted
  }

  pub fn state(&self) -> SchedulerState {
    self.shared.state()
  }
}

/// 帧调度器，拥有唯一的工作线程与其中的推理引擎
pub struct FrameScheduler {
  sink: FrameSink,
  stop: Option<Sender<()>>,
  worker: Option<JoinHandle<()>>,
}

impl FrameScheduler {
  /// 启动工作线程并在其中构建流水线
  ///
  /// 流水线构建失败时返回错误，此时调度器不会接收任何帧。
  pub fn spawn<E, F, L>(factory: F, listener: L) -> Result<Self, PipelineError>
  where
    E: InferenceEngine,
    F: FnOnce() -> Result<Pipeline<E>, PipelineError> + Send + 'static,
    L: DetectionListener + Send + 'static,
  {
    let (sender, frames) = bounded::<RawFrame>(1);
    let (stop, stopped) = bounded::<()>(0);
    let (ready_tx, ready_rx) = bounded::<Result<(), PipelineError>>(1);
    let shared = Arc::new(Shared::default());

    let worker = {
      let shared = shared.clone();
      let frames = frames.clone();
      thread::Builder::new()
        .name(WORKER_NAME.to_string())
        .spawn(move || {
          let pipeline = match factory() {
            Ok(pipeline) => {
              let _ = ready_tx.send(Ok(()));
              pipeline
            }
            Err(e) => {
              let _ = ready_tx.send(Err(e));
              return;
            }
          };
          Worker {
            pipeline,
            listener,
            shared,
          }
          .run(frames, stopped);
        })
        .map_err(|e| PipelineError::Worker(e.to_string()))?
    };

    match ready_rx.recv() {
      Ok(Ok(())) => {}
      Ok(Err(e)) => {
        error!("流水线初始化失败: {}", e);
        let _ = worker.join();
        return Err(e);
      }
      Err(_) => {
        let _ = worker.join();
        return Err(PipelineError::Worker("工作线程在初始化时退出".to_string()));
      }
    }
    info!("帧调度器已启动");

    Ok(FrameScheduler {
      sink: FrameSink {
        shared,
        sender,
        slot: frames,
      },
      stop: Some(stop),
      worker: Some(worker),
    })
  }

  pub fn submit(&self, frame: RawFrame) -> Admission {
    self.sink.submit(frame)
  }

  pub fn sink(&self) -> FrameSink {
    self.sink.clone()
  }

  pub fn state(&self) -> SchedulerState {
    self.sink.state()
  }

  pub fn stats(&self) -> SchedulerStats {
    self.sink.shared.stats()
  }

  /// 停止接收新帧并等待工作线程退出，返回最终统计
  pub fn shutdown(mut self) -> SchedulerStats {
    self.close();
    self.stats()
  }

  fn close(&mut self) {
    if self.sink.shared.close() {
      info!("关闭帧调度器");
    }
    while self.sink.slot.try_recv().is_ok() {}
    self.stop.take();
    if let Some(worker) = self.worker.take() {
      if worker.join().is_err() {
        error!("工作线程异常退出");
      }
      let stats = self.stats();
      info!(
        "调度统计: 提交 {}, 接收 {}, 丢弃 {}, 派发 {}, 失败 {}, 放弃 {}",
        stats.submitted,
        stats.admitted,
        stats.dropped,
        stats.dispatched,
        stats.failed,
        stats.abandoned
      );
    }
  }
}

impl Drop for FrameScheduler {
  fn drop(&mut self) {
    self.close();
  }
}

struct Worker<E, L> {
  pipeline: Pipeline<E>,
  listener: L,
  shared: Arc<Shared>,
}

impl<E: InferenceEngine, L: DetectionListener> Worker<E, L> {
  fn run(mut self, frames: Receiver<RawFrame>, stopped: Receiver<()>) {
    debug!("工作线程开始");
    loop {
      select! {
        recv(frames) -> frame => match frame {
          Ok(frame) => self.handle(frame),
          Err(_) => break,
        },
        recv(stopped) -> _ => break,
      }
    }
    debug!("工作线程退出, 释放推理引擎");
  }

  fn handle(&mut self, frame: RawFrame) {
    let pipeline = &mut self.pipeline;
    let result = catch_unwind(AssertUnwindSafe(|| pipeline.process(&frame)));

    match result {
      Ok(Ok(outcome)) => {
        if self.shared.is_closed() {
          self.shared.abandoned.fetch_add(1, Ordering::Relaxed);
          debug!("调度器已关闭, 放弃本帧结果");
        } else {
          let listener = &mut self.listener;
          if catch_unwind(AssertUnwindSafe(|| listener.on_outcome(&outcome))).is_ok() {
            self.shared.dispatched.fetch_add(1, Ordering::Relaxed);
          } else {
            self.shared.failed.fetch_add(1, Ordering::Relaxed);
            error!("结果回调发生 panic");
          }
        }
      }
      Ok(Err(e)) => {
        self.shared.failed.fetch_add(1, Ordering::Relaxed);
        if e.is_frame_local() {
          warn!("丢弃本帧: {}", e);
        } else {
          error!("处理帧失败: {}", e);
        }
      }
      Err(_) => {
        self.shared.failed.fetch_add(1, Ordering::Relaxed);
        error!("处理帧时发生 panic");
      }
    }

    drop(frame);
    self.shared.finish();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::PixelFormat;

  fn sink() -> FrameSink {
    let (sender, slot) = bounded(1);
    FrameSink {
      shared: Arc::new(Shared::default()),
      sender,
      slot,
    }
  }

  fn frame() -> RawFrame {
    RawFrame::packed(2, 2, PixelFormat::Rgb8, vec![0; 12]).unwrap()
  }

  #[test]
  fn admits_only_when_idle() {
    let sink = sink();
    assert_eq!(sink.submit(frame()), Admission::Admitted);
    assert_eq!(sink.state(), SchedulerState::Processing);
    assert_eq!(sink.submit(frame()), Admission::Dropped);
    let stats = sink.shared.stats();
    assert_eq!((stats.submitted, stats.admitted, stats.dropped), (2, 1, 1));
  }

  #[test]
  fn frame_handed_over_after_close_is_withdrawn() {
    let sink = sink();
    sink.shared.state.store(PROCESSING, Ordering::Release);
    // 关闭发生在状态切换与交接之间
    sink.shared.close();
    assert_eq!(sink.hand_over(frame()), Admission::Closed);
    assert!(sink.slot.is_empty());
    assert_eq!(sink.shared.stats().admitted, 0);
  }
}
