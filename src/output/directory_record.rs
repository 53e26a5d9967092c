// 该文件是 AeroTool （航修工具识别） 项目的一部分。
// src/output/directory_record.rs - 按日期归档的记录输出
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

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{Datelike, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{
    ProcessedRecord, Render,
    summary::{merge_note, summarize_report},
  },
  pipeline::DetectionStatus,
  url_to_path,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("报告序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 在 `<root>/<YYYY>/<MM>/<DD>/` 下为每条记录写出标注图像、备注与 JSON 报告
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  frame_counter: AtomicU32,
  skip_empty: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let skip_empty = uri.query_pairs().any(|(k, _)| k == "skip-empty");
    Ok(DirectoryRecordOutput::new(url_to_path(uri)).skip_empty(skip_empty))
  }
}

impl DirectoryRecordOutput {
  pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
    DirectoryRecordOutput {
      directory: directory.into(),
      frame_counter: AtomicU32::new(0),
      skip_empty: false,
    }
  }

  pub fn skip_empty(mut self, skip_empty: bool) -> Self {
    self.skip_empty = skip_empty;
    self
  }

  fn frame_id(&self) -> u32 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  /// 不含扩展名的记录路径
  fn record_stem(&self, record_id: u64) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "record-{}-{}-{:04X}",
      record_id,
      now.format("%H-%M-%S"),
      self.frame_id() & 0xFFFF
    )))
  }

  /// 写出一条记录，返回不含扩展名的记录路径；被跳过时返回 None。
  /// 没有标注图像（检测失败）时只写出备注与报告
  pub fn write_record(
    &self,
    record: &ProcessedRecord,
  ) -> Result<Option<PathBuf>, DirectoryRecordOutputError> {
    let failed = record.report.status == DetectionStatus::Error;
    if self.skip_empty && !failed && record.report.detections.is_empty() {
      debug!("记录 {} 没有检测结果，跳过", record.record_id);
      return Ok(None);
    }

    let stem = self.record_stem(record.record_id)?;
    if let Some(bytes) = &record.annotated_image {
      std::fs::write(stem.with_extension("jpg"), bytes)?;
    }

    let note = merge_note(&record.note, &summarize_report(&record.report));
    std::fs::write(stem.with_extension("txt"), note)?;
    std::fs::write(
      stem.with_extension("json"),
      serde_json::to_vec_pretty(&record.report)?,
    )?;

    if failed {
      warn!("记录 {} 检测失败，已保存错误状态到 {}", record.record_id, stem.display());
    } else {
      info!("记录 {} 已保存到 {}", record.record_id, stem.display());
    }
    Ok(Some(stem))
  }
}

impl Render<ProcessedRecord> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, result: &ProcessedRecord) -> Result<(), Self::Error> {
    self.write_record(result).map(|_| ())
  }
}
