// 该文件是 Luyan （路眼） 项目的一部分。
// src/bin/simple_continueshot.rs - 持续采集检测
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

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use luyan::{
  FromUrl, PipelineError,
  args::PipelineArgs,
  input::InputWrapper,
  output::OutputWrapper,
  task::{ContinuousTask, Task},
};

/// Luyan 持续检测参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub pipeline: PipelineArgs,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT", default_value = "log:")]
  pub output: Url,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();

  info!("模型: {}", args.pipeline.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  // 推理引擎在工作线程内创建
  let selector = args.pipeline.engine_selector();
  let builder = args.pipeline.pipeline_builder();
  let config = args.pipeline.to_config();
  let factory = move || {
    let engine = selector.select(&config).map_err(PipelineError::from)?;
    builder.build(engine)
  };

  ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .run_task(input, factory, output)?;

  Ok(())
}
