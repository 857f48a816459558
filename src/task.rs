// 该文件是 Luyan （路眼） 项目的一部分。
// src/task.rs - 任务驱动
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

use std::{
  sync::mpsc,
  thread,
  time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::{
  engine::InferenceEngine,
  error::PipelineError,
  frame::RawFrame,
  output::DetectionListener,
  pipeline::Pipeline,
  scheduler::{Admission, FrameScheduler},
};

pub trait Task<I, P, O>: Sized {
  type Error;
  fn run_task(self, input: I, pipeline: P, output: O) -> Result<(), Self::Error>;
}

/// 同步处理第一帧
pub struct OneShotTask;

impl<E, I, O> Task<I, Pipeline<E>, O> for OneShotTask
where
  E: InferenceEngine,
  I: Iterator<Item = RawFrame>,
  O: DetectionListener,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut pipeline: Pipeline<E>, mut output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let outcome = pipeline.process(&frame)?;
    info!("推理完成，耗时: {} ms", outcome.inference_ms());
    output.on_outcome(&outcome);
    Ok(())
  }
}

/// 对同一帧重复推理，统计平均耗时
#[derive(Debug)]
pub struct RepeatShotTask {
  repeat: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self { repeat: 1000 }
  }
}

impl RepeatShotTask {
  pub fn with_repeat(mut self, repeat: usize) -> Self {
    self.repeat = repeat.max(1);
    self
  }
}

/// 去掉预热轮次后的平均耗时
fn average_after_warmup(times: &[Duration]) -> Option<Duration> {
  const WARMUP: usize = 2;
  let measured = times.get(WARMUP..).filter(|rest| !rest.is_empty()).unwrap_or(times);
  if measured.is_empty() {
    return None;
  }
  Some(measured.iter().sum::<Duration>() / measured.len() as u32)
}

impl<E, I, O> Task<I, Pipeline<E>, O> for RepeatShotTask
where
  E: InferenceEngine,
  I: Iterator<Item = RawFrame>,
  O: DetectionListener,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut pipeline: Pipeline<E>, mut output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let mut times = Vec::with_capacity(self.repeat);
    for i in 0..self.repeat {
      let now = Instant::now();
      let outcome = pipeline.process(&frame)?;
      let elapsed = now.elapsed();
      debug!("({})推理完成，耗时: {:.2?}", i, elapsed);
      output.on_outcome(&outcome);
      times.push(elapsed);
    }

    if let Some(average) = average_after_warmup(&times) {
      warn!("平均推理时间: {:.2?}", average);
    }
    Ok(())
  }
}

/// 持续采集，经帧调度器交给工作线程处理
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<E, F, I, O> Task<I, F, O> for ContinuousTask
where
  E: InferenceEngine,
  F: FnOnce() -> Result<Pipeline<E>, PipelineError> + Send + 'static,
  I: Iterator<Item = RawFrame>,
  O: DetectionListener + Send + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, factory: F, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (tx, rx) = mpsc::channel();

    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;

    let scheduler = FrameScheduler::spawn(factory, output)?;
    let mut frame_index = 0usize;
    for frame in input {
      frame_index = frame_index.wrapping_add(1);
      match scheduler.submit(frame) {
        Admission::Admitted => debug!("第 {} 帧进入处理", frame_index),
        Admission::Dropped => debug!("第 {} 帧被丢弃", frame_index),
        Admission::Closed => break,
      }
      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    let stats = scheduler.shutdown();
    info!(
      "任务完成，共提交 {} 帧，处理 {} 帧，丢弃 {} 帧",
      stats.submitted, stats.dispatched, stats.dropped
    );
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn average_skips_warmup_rounds() {
    let times = [100, 50, 10, 20].map(Duration::from_millis);
    assert_eq!(average_after_warmup(&times), Some(Duration::from_millis(15)));

    let short = [Duration::from_millis(8)];
    assert_eq!(average_after_warmup(&short), Some(Duration::from_millis(8)));
    assert_eq!(average_after_warmup(&[]), None);
  }
}
