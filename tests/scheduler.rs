// 该文件是 Luyan （路眼） 项目的一部分。
// tests/scheduler.rs - 帧调度集成测试
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

mod common;

use std::{thread, time::Duration};

use crossbeam::channel::bounded;

use luyan::{
  Admission, FrameScheduler, PipelineBuilder, PipelineError, PixelFormat, RawFrame,
  SchedulerState,
  frame::Plane,
  output::{ChannelOutput, DetectionEvent},
};

use common::*;

const TIMEOUT: Duration = Duration::from_secs(5);

fn one_sign() -> Vec<f32> {
  direct_output(&[Candidate {
    element: 0,
    bbox: [4.0, 4.0, 2.0, 2.0],
    class_id: 1,
    score: 0.9,
  }])
}

#[test]
fn drops_frames_while_busy() {
  let (entered_tx, entered) = bounded(1);
  let (release, release_rx) = bounded(1);
  let (output, events) = ChannelOutput::pair();

  let scheduler = FrameScheduler::spawn(
    move || {
      let config = small_config();
      let engine = ScriptedEngine::new(&config, one_sign()).with_gate(entered_tx, release_rx);
      PipelineBuilder::new(config).with_labels(signs()).build(engine)
    },
    output,
  )
  .unwrap();
  assert_eq!(scheduler.state(), SchedulerState::Idle);

  assert_eq!(scheduler.submit(gray_frame()), Admission::Admitted);
  entered.recv_timeout(TIMEOUT).unwrap();
  assert_eq!(scheduler.state(), SchedulerState::Processing);
  assert_eq!(scheduler.submit(gray_frame()), Admission::Dropped);

  release.send(()).unwrap();
  match events.recv_timeout(TIMEOUT).unwrap() {
    DetectionEvent::Detections { items, .. } => {
      assert_eq!(items.len(), 1);
      assert_eq!(items[0].class_name, "stop");
    }
    other => panic!("unexpected event {:?}", other),
  }
  assert!(wait_until(|| scheduler.state() == SchedulerState::Idle));

  let stats = scheduler.shutdown();
  assert_eq!(stats.submitted, 2);
  assert_eq!(stats.admitted, 1);
  assert_eq!(stats.dropped, 1);
  assert_eq!(stats.dispatched, 1);
  // 被丢弃的帧不会产生任何事件
  assert!(events.try_recv().is_err());
}

#[test]
fn recovers_after_failed_frame() {
  let (output, events) = ChannelOutput::pair();
  let scheduler = FrameScheduler::spawn(
    || {
      let config = small_config();
      let engine = ScriptedEngine::new(&config, one_sign());
      PipelineBuilder::new(config).with_labels(signs()).build(engine)
    },
    output,
  )
  .unwrap();

  let broken = RawFrame::planar(
    SIZE,
    SIZE,
    PixelFormat::Nv12,
    vec![
      Plane::new(vec![0; 2], SIZE as usize, 1),
      Plane::new(vec![0; 2], SIZE as usize, 2),
    ],
  )
  .unwrap();
  assert_eq!(scheduler.submit(broken), Admission::Admitted);
  assert!(wait_until(|| scheduler.stats().failed == 1));
  assert!(wait_until(|| scheduler.state() == SchedulerState::Idle));

  assert_eq!(scheduler.submit(gray_frame()), Admission::Admitted);
  assert!(matches!(
    events.recv_timeout(TIMEOUT).unwrap(),
    DetectionEvent::Detections { .. }
  ));

  let stats = scheduler.shutdown();
  assert_eq!(stats.failed, 1);
  assert_eq!(stats.dispatched, 1);
}

#[test]
fn recovers_after_engine_panic() {
  let (output, events) = ChannelOutput::pair();
  let scheduler = FrameScheduler::spawn(
    || {
      let config = small_config();
      let engine = ScriptedEngine::new(&config, one_sign()).panicking();
      PipelineBuilder::new(config).with_labels(signs()).build(engine)
    },
    output,
  )
  .unwrap();

  assert_eq!(scheduler.submit(gray_frame()), Admission::Admitted);
  assert!(wait_until(|| scheduler.stats().failed == 1));
  assert!(wait_until(|| scheduler.state() == SchedulerState::Idle));
  assert_eq!(scheduler.submit(gray_frame()), Admission::Admitted);
  assert!(wait_until(|| scheduler.stats().failed == 2));
  assert!(events.try_recv().is_err());
}

#[test]
fn build_failure_is_reported_by_spawn() {
  let (output, _events) = ChannelOutput::pair();
  let result = FrameScheduler::spawn(
    || {
      let config = small_config();
      let engine = ScriptedEngine::new(&config, one_sign()).with_output_shape(vec![1, 1]);
      PipelineBuilder::new(config).with_labels(signs()).build(engine)
    },
    output,
  );
  assert!(matches!(result, Err(PipelineError::ShapeMismatch(_))));
}

#[test]
fn closed_scheduler_rejects_frames() {
  let (output, events) = ChannelOutput::pair();
  let scheduler = FrameScheduler::spawn(
    || {
      let config = small_config();
      let engine = ScriptedEngine::new(&config, one_sign());
      PipelineBuilder::new(config).with_labels(signs()).build(engine)
    },
    output,
  )
  .unwrap();
  let sink = scheduler.sink();
  let stats = scheduler.shutdown();
  assert_eq!(stats.submitted, 0);

  assert_eq!(sink.state(), SchedulerState::Closed);
  assert_eq!(sink.submit(gray_frame()), Admission::Closed);
  assert!(events.try_recv().is_err());
}

#[test]
fn result_in_flight_at_shutdown_is_abandoned() {
  let (entered_tx, entered) = bounded(1);
  let (release, release_rx) = bounded(1);
  let (output, events) = ChannelOutput::pair();

  let scheduler = FrameScheduler::spawn(
    move || {
      let config = small_config();
      let engine = ScriptedEngine::new(&config, one_sign()).with_gate(entered_tx, release_rx);
      PipelineBuilder::new(config).with_labels(signs()).build(engine)
    },
    output,
  )
  .unwrap();

  assert_eq!(scheduler.submit(gray_frame()), Admission::Admitted);
  entered.recv_timeout(TIMEOUT).unwrap();

  let sink = scheduler.sink();
  let closing = thread::spawn(move || scheduler.shutdown());
  // 关闭先于推理结束
  assert!(wait_until(|| sink.state() == SchedulerState::Closed));
  release.send(()).unwrap();

  let stats = closing.join().unwrap();
  assert_eq!(stats.abandoned, 1);
  assert_eq!(stats.dispatched, 0);
  assert!(events.try_recv().is_err());
}

#[test]
fn empty_result_reaches_listener() {
  let (output, events) = ChannelOutput::pair();
  let scheduler = FrameScheduler::spawn(
    || {
      let config = small_config();
      let below_threshold = direct_output(&[Candidate {
        element: 0,
        bbox: [4.0, 4.0, 2.0, 2.0],
        class_id: 0,
        score: 0.1,
      }]);
      let engine = ScriptedEngine::new(&config, below_threshold);
      PipelineBuilder::new(config).with_labels(signs()).build(engine)
    },
    output,
  )
  .unwrap();

  assert_eq!(scheduler.submit(gray_frame()), Admission::Admitted);
  assert_eq!(events.recv_timeout(TIMEOUT).unwrap(), DetectionEvent::Empty);
  let stats = scheduler.shutdown();
  assert_eq!(stats.dispatched, 1);
}
