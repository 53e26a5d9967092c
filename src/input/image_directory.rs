// 该文件是 AeroTool （航修工具识别） 项目的一部分。
// src/input/image_directory.rs - 图像目录输入
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

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, input::EncodedImage, url_to_path};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum ImageDirectoryInputError {
  #[error("URI 方案不匹配")]
  SchemaMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 按文件名顺序逐个读取目录中的图像，读取失败的文件会被跳过
pub struct ImageDirectoryInput {
  pending: VecDeque<PathBuf>,
}

impl FromUrlWithScheme for ImageDirectoryInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ImageDirectoryInput {
  type Error = ImageDirectoryInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ImageDirectoryInputError::SchemaMismatch);
    }
    ImageDirectoryInput::scan(url_to_path(url))
  }
}

fn is_image(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .is_some_and(|ext| {
      IMAGE_EXTENSIONS
        .iter()
        .any(|known| ext.eq_ignore_ascii_case(known))
    })
}

impl ImageDirectoryInput {
  pub fn scan<P: AsRef<Path>>(directory: P) -> Result<Self, ImageDirectoryInputError> {
    let directory = directory.as_ref();
    let mut files = Vec::new();
    for entry in std::fs::read_dir(directory)? {
      let path = entry?.path();
      if path.is_file() && is_image(&path) {
        files.push(path);
      }
    }
    files.sort();
    info!("目录 {} 中有 {} 个图像文件", directory.display(), files.len());

    Ok(ImageDirectoryInput {
      pending: files.into(),
    })
  }

  pub fn remaining(&self) -> usize {
    self.pending.len()
  }
}

impl Iterator for ImageDirectoryInput {
  type Item = EncodedImage;

  fn next(&mut self) -> Option<Self::Item> {
    while let Some(path) = self.pending.pop_front() {
      match std::fs::read(&path) {
        Ok(bytes) => {
          return Some(EncodedImage {
            name: path.display().to_string(),
            bytes,
          });
        }
        Err(e) => warn!("跳过无法读取的文件 {}: {}", path.display(), e),
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn lists_images_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("b.PNG"), b"b").unwrap();
    std::fs::write(dir.path().join("a.jpg"), b"a").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
    std::fs::create_dir(dir.path().join("c.jpg")).unwrap();

    let input = ImageDirectoryInput::scan(dir.path()).unwrap();
    assert_eq!(input.remaining(), 2);
    let bytes: Vec<Vec<u8>> = input.map(|image| image.bytes).collect();
    assert_eq!(bytes, vec![b"a".to_vec(), b"b".to_vec()]);
  }

  #[test]
  fn missing_directory() {
    assert!(ImageDirectoryInput::scan("/nonexistent/queue").is_err());
  }
}
