// 该文件是 AeroTool （航修工具识别） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
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
use std::sync::Mutex;

use ndarray::{ArrayD, IxDyn};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::{TensorRef, ValueType};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::frame::RgbNchwFrame;
use crate::model::{ClassCatalog, Model};
use crate::{FromUrl, FromUrlWithScheme, url_to_path};

#[derive(Error, Debug)]
pub enum OnnxError {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型加载错误: {0}")]
  ModelLoadError(String),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("推理错误: {0}")]
  InferenceError(String),
  #[error("推理会话锁已损坏")]
  Poisoned,
}

pub struct OnnxModelBuilder {
  model_path: PathBuf,
  intra_threads: usize,
}

impl FromUrlWithScheme for OnnxModelBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxModelBuilder {
  type Error = OnnxError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let mut builder = OnnxModelBuilder::new(url_to_path(url));
    for (key, value) in url.query_pairs() {
      if key == "threads" {
        let threads = value
          .parse()
          .map_err(|_| OnnxError::ModelPathError(format!("线程数无效: {}", value)))?;
        builder = builder.intra_threads(threads);
      }
    }
    Ok(builder)
  }
}

impl OnnxModelBuilder {
  pub fn new<P: Into<PathBuf>>(model_path: P) -> Self {
    OnnxModelBuilder {
      model_path: model_path.into(),
      intra_threads: 4,
    }
  }

  pub fn intra_threads(mut self, threads: usize) -> Self {
    self.intra_threads = threads.max(1);
    self
  }

  pub fn build(self) -> Result<OnnxModel, OnnxError> {
    if !self.model_path.exists() {
      return Err(OnnxError::ModelPathError(format!(
        "模型文件不存在: {}",
        self.model_path.display()
      )));
    }

    info!("加载模型文件: {}", self.model_path.display());
    let session = Session::builder()
      .map_err(|e| OnnxError::ModelLoadError(e.to_string()))?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(|e| OnnxError::ModelLoadError(e.to_string()))?
      .with_intra_threads(self.intra_threads)
      .map_err(|e| OnnxError::ModelLoadError(e.to_string()))?
      .commit_from_file(&self.model_path)
      .map_err(|e| OnnxError::ModelLoadError(e.to_string()))?;

    if session.inputs.len() != 1 {
      return Err(OnnxError::ModelInvalid(format!(
        "预期模型输入数量为 1, 实际为 {}",
        session.inputs.len()
      )));
    }
    if session.outputs.is_empty() {
      return Err(OnnxError::ModelInvalid("模型没有输出".to_string()));
    }

    let input_size = match &session.inputs[0].input_type {
      ValueType::Tensor { shape, .. } => {
        debug!("模型输入形状: {:?}", shape);
        square_input_size(shape)
      }
      other => {
        return Err(OnnxError::ModelInvalid(format!(
          "模型输入不是张量: {:?}",
          other
        )));
      }
    };

    let names = read_class_names(&session);
    match &names {
      Some(names) => info!("模型元数据包含 {} 个类别", names.len()),
      None => debug!("模型元数据中没有类别名称"),
    }
    info!("模型加载完成");

    Ok(OnnxModel {
      session: Mutex::new(session),
      input_size,
      names,
    })
  }
}

/// NCHW 输入中 H == W 且为固定值时返回边长
fn square_input_size(shape: &[i64]) -> Option<u32> {
  match shape {
    [_, _, h, w] if *h > 0 && h == w => u32::try_from(*h).ok(),
    _ => None,
  }
}

fn read_class_names(session: &Session) -> Option<Vec<String>> {
  let metadata = match session.metadata() {
    Ok(metadata) => metadata,
    Err(e) => {
      warn!("读取模型元数据失败: {}", e);
      return None;
    }
  };

  let catalog = if let Ok(Some(names)) = metadata.custom("names") {
    ClassCatalog::from_metadata_names(&names)
  } else if let Ok(Some(labels)) = metadata.custom("labels") {
    ClassCatalog::from_metadata_labels(&labels)
  } else {
    return None;
  };

  match catalog {
    Ok(catalog) => Some(catalog.names().to_vec()),
    Err(e) => {
      warn!("忽略模型元数据中的类别: {}", e);
      None
    }
  }
}

pub struct OnnxModel {
  session: Mutex<Session>,
  input_size: Option<u32>,
  names: Option<Vec<String>>,
}

impl Model for OnnxModel {
  type Error = OnnxError;

  fn infer(&self, input: &RgbNchwFrame) -> Result<ArrayD<f32>, Self::Error> {
    let tensor = TensorRef::from_array_view(input.view())
      .map_err(|e| OnnxError::InferenceError(e.to_string()))?;

    let mut session = self.session.lock().map_err(|_| OnnxError::Poisoned)?;
    let outputs = session
      .run(ort::inputs![tensor])
      .map_err(|e| OnnxError::InferenceError(e.to_string()))?;

    let (shape, data) = outputs[0]
      .try_extract_tensor::<f32>()
      .map_err(|e| OnnxError::InferenceError(e.to_string()))?;
    let shape: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
    debug!("模型输出形状: {:?}", shape);

    ArrayD::from_shape_vec(IxDyn(&shape), data.to_vec())
      .map_err(|e| OnnxError::InferenceError(e.to_string()))
  }

  fn input_size(&self) -> Option<u32> {
    self.input_size
  }

  fn class_names(&self) -> Option<Vec<String>> {
    self.names.clone()
  }
}
