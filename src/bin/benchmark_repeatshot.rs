// 该文件是 AeroTool （航修工具识别） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 重复检测耗时测试
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
use url::Url;

use aerotool::{
  FromUrl,
  args::{DetectorArgs, init_tracing},
  input::ImageFileInput,
  output::OutputWrapper,
  task::{RecordJob, RepeatShotTask, Task},
};

/// 对同一张图像重复检测，输出平均耗时
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub detector: DetectorArgs,
  /// 输入图像
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出位置，默认丢弃结果
  #[arg(long, value_name = "OUTPUT", default_value = "null:///")]
  pub output: Url,
  /// 重复次数
  #[arg(long, default_value = "100")]
  pub repeat: usize,
}

fn main() -> Result<()> {
  init_tracing();

  let args = Args::parse();

  info!("输入来源: {}", args.input);
  info!("重复次数: {}", args.repeat);

  let input = ImageFileInput::from_url(&args.input)?;
  let detector = args.detector.build_detector()?;
  let output = OutputWrapper::from_url(&args.output)?;

  let jobs = input.map(|image| RecordJob::from_image(0, image));
  let report = RepeatShotTask::default()
    .with_repeat(args.repeat)
    .run_task(jobs, &detector, output)?;

  if let Some(average) = report.average_time {
    info!("平均检测时间: {:.2?}", average);
  }

  Ok(())
}
