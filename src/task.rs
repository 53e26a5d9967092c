// 该文件是 AeroTool （航修工具识别） 项目的一部分。
// src/task.rs - 记录处理任务
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

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::{thread, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::{
  input::EncodedImage,
  model::Model,
  output::{ProcessedRecord, Render},
  pipeline::{DetectionStatus, Detector},
};

/// 后台任务未指定置信度时使用的阈值
pub const JOB_DEFAULT_CONFIDENCE: f32 = 0.7;

/// 一条待处理的记录
#[derive(Debug, Clone)]
pub struct RecordJob {
  pub record_id: u64,
  pub image_bytes: Vec<u8>,
  pub expected_object_count: Option<u32>,
  pub expected_confidence: Option<f32>,
  pub note: String,
}

impl RecordJob {
  pub fn new(record_id: u64, image_bytes: Vec<u8>) -> Self {
    RecordJob {
      record_id,
      image_bytes,
      expected_object_count: None,
      expected_confidence: None,
      note: String::new(),
    }
  }

  pub fn from_image(record_id: u64, image: EncodedImage) -> Self {
    info!("记录 {} 来自 {}", record_id, image.name);
    RecordJob::new(record_id, image.bytes)
  }

  pub fn with_expected_confidence(mut self, confidence: Option<f32>) -> Self {
    self.expected_confidence = confidence;
    self
  }

  pub fn with_expected_object_count(mut self, count: Option<u32>) -> Self {
    self.expected_object_count = count;
    self
  }

  pub fn with_note<S: Into<String>>(mut self, note: S) -> Self {
    self.note = note.into();
    self
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
  Success { record_id: u64 },
  Error { record_id: u64, error: String },
}

impl JobOutcome {
  pub fn is_success(&self) -> bool {
    matches!(self, JobOutcome::Success { .. })
  }
}

/// 处理一条记录：检测、生成摘要并交给输出保存。检测失败时保存错误状态（没有标注图像）
pub fn process_record<M, O>(detector: &Detector<M>, job: RecordJob, output: &O) -> JobOutcome
where
  M: Model,
  O: Render<ProcessedRecord>,
  O::Error: std::fmt::Display,
{
  let record_id = job.record_id;
  info!("开始处理记录 {}", record_id);

  let params = detector
    .params()
    .with_confidence(job.expected_confidence.unwrap_or(JOB_DEFAULT_CONFIDENCE));
  let (report, annotated_image) = detector.detect_or_report(&job.image_bytes, &params);

  let failure = match report.status {
    DetectionStatus::Error => Some(report.reason.clone().unwrap_or_default()),
    _ => None,
  };
  if let Some(error) = &failure {
    error!("记录 {} 处理失败: {}", record_id, error);
  } else if let Some(expected) = job.expected_object_count
    && expected as usize != report.detections.len()
  {
    warn!(
      "记录 {} 预期 {} 个目标, 实际检测到 {} 个",
      record_id,
      expected,
      report.detections.len()
    );
  }

  let record = ProcessedRecord {
    record_id,
    note: job.note,
    report,
    annotated_image,
  };
  let saved = output.render_result(&record);
  match (failure, saved) {
    (None, Ok(())) => {
      info!("记录 {} 处理完成", record_id);
      JobOutcome::Success { record_id }
    }
    (Some(error), Ok(())) => JobOutcome::Error { record_id, error },
    (failure, Err(e)) => {
      error!("记录 {} 保存失败: {}", record_id, e);
      JobOutcome::Error {
        record_id,
        error: failure.unwrap_or_else(|| e.to_string()),
      }
    }
  }
}

#[derive(Debug, Default, Clone)]
pub struct TaskReport {
  pub outcomes: Vec<JobOutcome>,
  pub average_time: Option<Duration>,
}

impl TaskReport {
  pub fn succeeded(&self) -> usize {
    self.outcomes.iter().filter(|o| o.is_success()).count()
  }

  pub fn failed(&self) -> usize {
    self.outcomes.len() - self.succeeded()
  }
}

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, detector: &Detector<M>, output: O) -> Result<TaskReport, Self::Error>;
}

pub struct OneShotTask;

impl<I, M, O> Task<I, M, O> for OneShotTask
where
  I: Iterator<Item = RecordJob>,
  M: Model,
  O: Render<ProcessedRecord>,
  O::Error: std::fmt::Display,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, detector: &Detector<M>, output: O) -> Result<TaskReport, Self::Error> {
    info!("开始任务...");
    let job = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
    let now = std::time::Instant::now();
    let outcome = process_record(detector, job, &output);
    let elapsed = now.elapsed();
    info!("处理完成，耗时: {:.2?}", elapsed);

    if let JobOutcome::Error { record_id, error } = &outcome {
      anyhow::bail!("记录 {} 处理失败: {}", record_id, error);
    }
    Ok(TaskReport {
      outcomes: vec![outcome],
      average_time: Some(elapsed),
    })
  }
}

/// 对同一张图像重复检测，统计平均耗时（跳过前两次预热）
pub struct RepeatShotTask {
  repeat: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    RepeatShotTask { repeat: 1000 }
  }
}

impl RepeatShotTask {
  pub fn with_repeat(mut self, repeat: usize) -> Self {
    self.repeat = repeat.max(1);
    self
  }
}

const WARMUP_ROUNDS: usize = 2;

impl<I, M, O> Task<I, M, O> for RepeatShotTask
where
  I: Iterator<Item = RecordJob>,
  M: Model,
  O: Render<ProcessedRecord>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, detector: &Detector<M>, output: O) -> Result<TaskReport, Self::Error> {
    info!("开始任务...");
    let job = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
    let params = detector
      .params()
      .with_confidence(job.expected_confidence.unwrap_or(detector.params().confidence));

    let mut times = Vec::with_capacity(self.repeat);
    let mut outcomes = Vec::with_capacity(self.repeat);
    for i in 0..self.repeat {
      let now = std::time::Instant::now();
      let result = detector.detect_with(&job.image_bytes, &params)?;
      let elapsed = now.elapsed();
      info!(
        "({})检测完成，{} 个目标，耗时: {:.2?}",
        i,
        result.report.detections.len(),
        elapsed
      );
      output.render_result(&ProcessedRecord {
        record_id: job.record_id,
        note: job.note.clone(),
        report: result.report,
        annotated_image: Some(result.annotated_image),
      })?;
      times.push(elapsed);
      outcomes.push(JobOutcome::Success {
        record_id: job.record_id,
      });
    }

    let measured: Vec<Duration> = if times.len() > WARMUP_ROUNDS {
      times[WARMUP_ROUNDS..].to_vec()
    } else {
      times
    };
    let average = measured.iter().sum::<Duration>() / measured.len() as u32;
    warn!("平均检测时间: {:.2?}", average);

    Ok(TaskReport {
      outcomes,
      average_time: Some(average),
    })
  }
}

/// 逐条处理队列中的记录，直到队列耗尽、达到数量上限或收到中断信号
#[derive(Debug)]
pub struct ContinuousTask {
  max_jobs: Option<usize>,
  interrupt: bool,
  stop: Arc<AtomicBool>,
}

impl Default for ContinuousTask {
  fn default() -> Self {
    ContinuousTask {
      max_jobs: None,
      interrupt: true,
      stop: Arc::new(AtomicBool::new(false)),
    }
  }
}

impl ContinuousTask {
  pub fn with_max_jobs(mut self, max_jobs: Option<usize>) -> Self {
    self.max_jobs = max_jobs;
    self
  }

  /// 是否安装 Ctrl-C 处理函数（每个进程只能安装一次）
  pub fn with_interrupt(mut self, interrupt: bool) -> Self {
    self.interrupt = interrupt;
    self
  }

  /// 外部停止标志，置位后在下一条记录前退出
  pub fn stop_flag(&self) -> Arc<AtomicBool> {
    self.stop.clone()
  }

  fn install_interrupt(&self) -> anyhow::Result<mpsc::Receiver<()>> {
    let (tx, rx) = mpsc::channel();
    if self.interrupt {
      ctrlc::set_handler(move || {
        info!("收到中断信号，准备退出...");
        let _ = tx.send(());
        thread::spawn(|| {
          thread::sleep(Duration::from_secs(30));
          warn!("强制退出程序");
          std::process::exit(1);
        });
      })?;
    }
    Ok(rx)
  }
}

impl<I, M, O> Task<I, M, O> for ContinuousTask
where
  I: Iterator<Item = RecordJob>,
  M: Model,
  O: Render<ProcessedRecord>,
  O::Error: std::fmt::Display,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, detector: &Detector<M>, output: O) -> Result<TaskReport, Self::Error> {
    info!("开始任务...");
    let rx = self.install_interrupt()?;

    let mut outcomes = Vec::new();
    let mut total = Duration::ZERO;
    for job in input {
      if self.stop.load(Ordering::Relaxed) || rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }

      let now = std::time::Instant::now();
      let outcome = process_record(detector, job, &output);
      total += now.elapsed();
      outcomes.push(outcome);

      if self.max_jobs.is_some_and(|n| outcomes.len() >= n) {
        info!("达到指定数量 {}, 退出任务循环", outcomes.len());
        break;
      }
    }

    let average_time = (!outcomes.is_empty()).then(|| total / outcomes.len() as u32);
    let report = TaskReport {
      outcomes,
      average_time,
    };
    info!(
      "任务完成，成功 {} 条，失败 {} 条",
      report.succeeded(),
      report.failed()
    );
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn outcome_serialization() {
    let success = serde_json::to_value(JobOutcome::Success { record_id: 3 }).unwrap();
    assert_eq!(success, serde_json::json!({"status": "success", "record_id": 3}));

    let failure = serde_json::to_value(JobOutcome::Error {
      record_id: 4,
      error: "boom".to_string(),
    })
    .unwrap();
    assert_eq!(
      failure,
      serde_json::json!({"status": "error", "record_id": 4, "error": "boom"})
    );
  }

  #[test]
  fn report_counts() {
    let report = TaskReport {
      outcomes: vec![
        JobOutcome::Success { record_id: 1 },
        JobOutcome::Error {
          record_id: 2,
          error: "x".to_string(),
        },
      ],
      average_time: None,
    };
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 1);
  }
}
