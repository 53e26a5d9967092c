// 该文件是 AeroTool （航修工具识别） 项目的一部分。
// src/output/save_image_file.rs - 保存标注图像文件
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{ProcessedRecord, Render},
  url_to_path,
};

/// 将标注后的 JPEG 写到指定路径，`?report` 时在旁边写出 JSON 报告
pub struct SaveImageFileOutput {
  path: PathBuf,
  with_report: bool,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("报告序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(SaveImageFileOutput {
      path: url_to_path(uri),
      with_report: uri.query_pairs().any(|(k, _)| k == "report"),
    })
  }
}

impl SaveImageFileOutput {
  pub fn new<P: Into<PathBuf>>(path: P) -> Self {
    SaveImageFileOutput {
      path: path.into(),
      with_report: false,
    }
  }

  pub fn with_report(mut self, with_report: bool) -> Self {
    self.with_report = with_report;
    self
  }

  pub fn report_path(&self) -> PathBuf {
    self.path.with_extension("json")
  }

  fn ensure_parent(path: &Path) -> Result<(), SaveImageFileError> {
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    Ok(())
  }
}

impl Render<ProcessedRecord> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, result: &ProcessedRecord) -> Result<(), Self::Error> {
    Self::ensure_parent(&self.path)?;

    match &result.annotated_image {
      Some(bytes) => {
        std::fs::write(&self.path, bytes)?;
        info!("保存图像到文件: {}", self.path.display());
      }
      None => warn!("记录 {} 没有标注图像，跳过保存", result.record_id),
    }

    if self.with_report {
      let report_path = self.report_path();
      std::fs::write(&report_path, serde_json::to_vec_pretty(&result.report)?)?;
      info!("保存报告到文件: {}", report_path.display());
    }

    Ok(())
  }
}
