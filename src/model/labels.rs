// 该文件是 AeroTool （航修工具识别） 项目的一部分。
// src/model/labels.rs - 类别名称表
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

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;
use tracing::info;

/// 内置的航修工具类别，下标即模型输出通道 4 + i
pub const TOOL_CLASSES: [&str; 11] = [
  "1_screwdriver_minus",
  "2_screwdriver_plus",
  "3_screwdriver_torq",
  "4_brace",
  "5_locking_pliers",
  "6_pliers",
  "7_adjustable_pliers",
  "8_adjustable_wrench",
  "9_can_opener",
  "10_open_end_wrench",
  "11_sidecutter",
];

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("读取类别文件错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("类别文件 JSON 格式错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("类别表为空")]
  Empty,
  #[error("无法解析模型元数据中的类别: {0}")]
  Metadata(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassCatalog {
  names: Vec<String>,
}

impl Default for ClassCatalog {
  fn default() -> Self {
    ClassCatalog::tools()
  }
}

impl ClassCatalog {
  pub fn new(names: Vec<String>) -> Result<Self, LabelError> {
    if names.is_empty() {
      return Err(LabelError::Empty);
    }
    Ok(ClassCatalog { names })
  }

  pub fn tools() -> Self {
    ClassCatalog {
      names: TOOL_CLASSES.iter().map(|name| name.to_string()).collect(),
    }
  }

  /// `.json` 文件为字符串数组，其余按行读取（跳过空行与 `#` 注释）
  pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, LabelError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let is_json = path
      .extension()
      .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let names: Vec<String> = if is_json {
      serde_json::from_str(&content)?
    } else {
      content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
    };

    let catalog = ClassCatalog::new(names)?;
    info!("从 {} 加载了 {} 个类别", path.display(), catalog.len());
    Ok(catalog)
  }

  /// 解析 ultralytics 导出写入的 `names` 元数据，
  /// 形如 `{0: 'a', 1: 'b'}`，也接受 JSON 对象 `{"0": "a"}`
  pub fn from_metadata_names(names: &str) -> Result<Self, LabelError> {
    let entries = match serde_json::from_str::<BTreeMap<String, String>>(names) {
      Ok(map) => map.into_iter().collect(),
      Err(_) => parse_python_dict(names)?,
    };

    let mut indexed = BTreeMap::new();
    for (key, value) in entries {
      let index: usize = key
        .trim()
        .parse()
        .map_err(|_| LabelError::Metadata(format!("类别编号无效: {}", key)))?;
      indexed.insert(index, value);
    }

    // 编号必须从 0 连续
    let names: Vec<String> = indexed
      .into_iter()
      .enumerate()
      .map(|(expected, (index, name))| {
        if expected == index {
          Ok(name)
        } else {
          Err(LabelError::Metadata(format!("缺少类别编号 {}", expected)))
        }
      })
      .collect::<Result<_, _>>()?;

    ClassCatalog::new(names)
  }

  /// 逗号分隔的 `labels` 元数据
  pub fn from_metadata_labels(labels: &str) -> Result<Self, LabelError> {
    let names = labels
      .split(',')
      .map(str::trim)
      .filter(|name| !name.is_empty())
      .map(String::from)
      .collect();
    ClassCatalog::new(names)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn names(&self) -> &[String] {
    &self.names
  }

  /// 超出类别表的编号显示为数字本身
  pub fn label(&self, class_id: usize) -> Cow<'_, str> {
    match self.names.get(class_id) {
      Some(name) => Cow::Borrowed(name.as_str()),
      None => Cow::Owned(class_id.to_string()),
    }
  }
}

fn parse_python_dict(text: &str) -> Result<Vec<(String, String)>, LabelError> {
  let invalid = || LabelError::Metadata(text.to_string());
  let body = text
    .trim()
    .strip_prefix('{')
    .and_then(|rest| rest.strip_suffix('}'))
    .ok_or_else(invalid)?;

  let mut entries = Vec::new();
  let mut rest = body.trim_start();
  while !rest.is_empty() {
    let (key, after_key) = rest.split_once(':').ok_or_else(invalid)?;
    let after_key = after_key.trim_start();
    let quote = after_key.chars().next().filter(|c| *c == '\'' || *c == '"');
    let quote = quote.ok_or_else(invalid)?;
    let value_body = &after_key[1..];
    let end = value_body.find(quote).ok_or_else(invalid)?;
    entries.push((key.trim().to_string(), value_body[..end].to_string()));

    rest = value_body[end + 1..].trim_start();
    rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
  }

  Ok(entries)
}
