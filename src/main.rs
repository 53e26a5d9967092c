// 该文件是 AeroTool （航修工具识别） 项目的一部分。
// src/main.rs - 单张图像检测
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
  task::{OneShotTask, RecordJob, Task},
};

/// 对一张工具照片进行检测，保存标注图像与报告
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub detector: DetectorArgs,
  /// 输入图像，例如 image:///photos/wrench.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出位置，image:///out/wrench.jpg?report 或 folder:///records
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 记录编号
  #[arg(long, default_value = "1")]
  pub record_id: u64,
  /// 记录原有备注
  #[arg(long, default_value = "")]
  pub note: String,
}

fn main() -> Result<()> {
  init_tracing();

  let args = Args::parse();

  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let input = ImageFileInput::from_url(&args.input)?;
  let detector = args.detector.build_detector()?;
  let output = OutputWrapper::from_url(&args.output)?;

  // 命令行给出的阈值优先于后台任务默认值
  let confidence = args.detector.confidence;
  let jobs = input.map(|image| {
    RecordJob::from_image(args.record_id, image)
      .with_expected_confidence(Some(confidence))
      .with_note(args.note.clone())
  });

  let report = OneShotTask.run_task(jobs, &detector, output)?;
  info!("完成，共处理 {} 条记录", report.outcomes.len());

  Ok(())
}

