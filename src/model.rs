// 该文件是 AeroTool （航修工具识别） 项目的一部分。
// src/model.rs - 模型接口与检测结果
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

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::frame::RgbNchwFrame;

/// 推理后端。实现必须可以被多个线程同时调用；
/// 如果底层运行时不支持并发推理，由实现自行串行化。
pub trait Model {
  type Error: std::error::Error + Send + Sync + 'static;

  fn infer(&self, input: &RgbNchwFrame) -> Result<ArrayD<f32>, Self::Error>;

  /// 模型声明的方形输入边长（动态尺寸时为 None）
  fn input_size(&self) -> Option<u32> {
    None
  }

  /// 模型元数据中携带的类别名称
  fn class_names(&self) -> Option<Vec<String>> {
    None
  }
}

impl<M: Model + ?Sized> Model for std::sync::Arc<M> {
  type Error = M::Error;

  fn infer(&self, input: &RgbNchwFrame) -> Result<ArrayD<f32>, Self::Error> {
    (**self).infer(input)
  }

  fn input_size(&self) -> Option<u32> {
    (**self).input_size()
  }

  fn class_names(&self) -> Option<Vec<String>> {
    (**self).class_names()
  }
}

/// 阈值过滤后、NMS 之前的候选框（推理画布坐标）
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateDetection {
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]
  pub score: f32,
  pub class_id: usize,
}

/// 映射回原图后的最终检测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalDetection {
  #[serde(rename = "class")]
  pub class_label: String,
  pub confidence: f32,
  pub bbox: [i32; 4], // [x_min, y_min, x_max, y_max]
}

mod decode;
mod labels;
mod nms;
mod onnx;

pub use self::decode::{
  CONFIDENCE_TOLERANCE, CoordinateConvention, DecodeError, Decoder, TensorLayout, decode,
  normalize_layout,
};
pub use self::labels::{ClassCatalog, LabelError, TOOL_CLASSES};
pub use self::nms::suppress;
pub use self::onnx::{OnnxError, OnnxModel, OnnxModelBuilder};
