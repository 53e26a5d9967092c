// 该文件是 AeroTool （航修工具识别） 项目的一部分。
// src/output/summary.rs - 检测结果文字摘要
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

use crate::model::FinalDetection;
use crate::pipeline::{DetectionReport, DetectionStatus};

pub const NOTHING_DETECTED: &str = "Detection summary: no tools detected";

/// 生成记录备注中的检测摘要，序号从 1 开始
pub fn summarize(detections: &[FinalDetection]) -> String {
  if detections.is_empty() {
    return NOTHING_DETECTED.to_string();
  }

  let mut lines = Vec::with_capacity(detections.len() + 1);
  lines.push(format!(
    "Detection summary: {} objects detected",
    detections.len()
  ));
  for (index, detection) in detections.iter().enumerate() {
    lines.push(format!(
      "{}. {} (confidence: {:.2})",
      index + 1,
      detection.class_label,
      detection.confidence
    ));
  }
  lines.join("\n")
}

/// 失败的检测写出原因，其余写出检测摘要
pub fn summarize_report(report: &DetectionReport) -> String {
  match (&report.status, &report.reason) {
    (DetectionStatus::Error, Some(reason)) => format!("Detection failed: {}", reason),
    (DetectionStatus::Error, None) => "Detection failed".to_string(),
    _ => summarize(&report.detections),
  }
}

/// 保留已有备注，摘要以空行分隔追加在后
pub fn merge_note(existing: &str, summary: &str) -> String {
  if existing.trim().is_empty() {
    summary.to_string()
  } else {
    format!("{}\n\n{}", existing, summary)
  }
}
