// 该文件是 AeroTool （航修工具识别） 项目的一部分。
// src/bin/record_worker.rs - 记录队列处理进程
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
  FromUrl, SharedDetector,
  args::{DetectorArgs, init_tracing},
  input::InputWrapper,
  model::OnnxModel,
  output::OutputWrapper,
  task::{ContinuousTask, JOB_DEFAULT_CONFIDENCE, RecordJob, Task},
};

static DETECTOR: SharedDetector<OnnxModel> = SharedDetector::new();

/// 逐个处理待检测目录中的照片，结果按日期归档
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub detector: DetectorArgs,
  /// 待处理照片，folder:///incoming 或 image:///photo.jpg
  #[arg(long, value_name = "SOURCE", env = "AEROTOOL_QUEUE")]
  pub queue: Url,
  /// 记录输出位置，例如 folder:///records?skip-empty
  #[arg(long, value_name = "OUTPUT", env = "AEROTOOL_RECORDS")]
  pub output: Url,
  /// 每条记录的置信度阈值
  #[arg(long, default_value_t = JOB_DEFAULT_CONFIDENCE)]
  pub expected_confidence: f32,
  /// 每张照片预期的工具数量，仅用于日志提示
  #[arg(long)]
  pub expected_objects: Option<u32>,
  /// 第一条记录的编号
  #[arg(long, default_value = "1")]
  pub first_record_id: u64,
  /// 最多处理的记录数
  #[arg(long)]
  pub max_jobs: Option<usize>,
}

fn main() -> Result<()> {
  init_tracing();

  let args = Args::parse();

  info!("队列来源: {}", args.queue);
  info!("记录输出: {}", args.output);

  let input = InputWrapper::from_url(&args.queue)?;
  let output = OutputWrapper::from_url(&args.output)?;
  let detector = DETECTOR.get_or_try_init(|| args.detector.build_detector())?;

  let jobs = input.enumerate().map(|(index, image)| {
    RecordJob::from_image(args.first_record_id + index as u64, image)
      .with_expected_confidence(Some(args.expected_confidence))
      .with_expected_object_count(args.expected_objects)
  });

  let report = ContinuousTask::default()
    .with_max_jobs(args.max_jobs)
    .run_task(jobs, detector, output)?;

  info!(
    "处理完成: 成功 {} 条, 失败 {} 条",
    report.succeeded(),
    report.failed()
  );
  if let Some(average) = report.average_time {
    info!("平均每条耗时: {:.2?}", average);
  }

  Ok(())
}
